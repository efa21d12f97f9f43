use super::append_entries::{append_new_entry, handle_append_entries_request};
use super::election::{is_quorum, start_election};
use super::follower::handle_leader_log_compaction;
use super::heartbeat::beat;
use super::leader::advance_commit;
use super::vote::handle_vote_request;
use super::{RoleHandler, validate_store_id};
use crate::error::RaftError;
use crate::messages::{RaftMessage, VoteResponse};
use crate::outcome::{FollowerStates, Outcome};
use crate::raft::{ReadableRaftState, Role};
use crate::store::LocalDatabase;
use bytes::Bytes;

#[derive(Debug, Clone, Copy, Default)]
pub struct Candidate;

impl RoleHandler for Candidate {
    fn validate(
        &self,
        message: &RaftMessage,
        state: &dyn ReadableRaftState,
        database: &dyn LocalDatabase,
    ) -> Result<Outcome, RaftError> {
        validate_store_id(message, state, database)
    }

    fn handle(
        &self,
        message: &RaftMessage,
        state: &dyn ReadableRaftState,
        database: &dyn LocalDatabase,
    ) -> Result<Outcome, RaftError> {
        let mut outcome = Outcome::new(state);
        let store_id = database.store_id();

        match message {
            RaftMessage::Heartbeat(heartbeat) => {
                if heartbeat.leader_term >= state.term() {
                    outcome.set_next_role(Role::Follower);
                    beat(state, &mut outcome, heartbeat, store_id)?;
                }
            }
            RaftMessage::AppendEntriesRequest(request) => {
                if request.leader_term >= state.term() {
                    outcome.set_next_role(Role::Follower);
                }
                handle_append_entries_request(
                    state,
                    &mut outcome,
                    request,
                    store_id,
                )?;
            }
            RaftMessage::VoteResponse(response) => {
                handle_vote_response(state, &mut outcome, response)?;
            }
            RaftMessage::VoteRequest(request) => {
                if request.term > state.term() {
                    outcome.votes_for_me.clear();
                    outcome.set_next_role(Role::Follower);
                }
                handle_vote_request(state, &mut outcome, request, store_id)?;
            }
            RaftMessage::ElectionTimeout(_) => {
                if !start_election(state, &mut outcome, store_id)? {
                    outcome.set_next_role(Role::Follower);
                }
            }
            RaftMessage::LogCompactionInfo(info) => {
                handle_leader_log_compaction(state, &mut outcome, info);
            }
            _ => {}
        }

        Ok(outcome)
    }
}

fn handle_vote_response(
    state: &dyn ReadableRaftState,
    outcome: &mut Outcome,
    response: &VoteResponse,
) -> Result<(), RaftError> {
    if response.term > state.term() {
        outcome.set_next_term(response.term);
        outcome.set_next_role(Role::Follower);
        return Ok(());
    }

    if response.term < state.term() || !response.vote_granted {
        return Ok(());
    }

    if response.from != state.myself() {
        outcome.votes_for_me.insert(response.from);
    }

    if is_quorum(state.voting_members().len(), outcome.votes_for_me.len()) {
        become_leader(state, outcome)?;
    }
    Ok(())
}

fn become_leader(
    state: &dyn ReadableRaftState,
    outcome: &mut Outcome,
) -> Result<(), RaftError> {
    let myself = state.myself();
    outcome.leader = Some(myself);

    // An entry in the new term lets earlier entries commit.
    append_new_entry(state, outcome, Bytes::new())?;
    let last_log_index = state.entry_log().append_index();
    outcome.last_log_index_before_we_became_leader = last_log_index;
    outcome.follower_states = FollowerStates::new();
    outcome.heartbeat_responses.clear();
    // A sole voting member commits the barrier right away.
    advance_commit(state, outcome, last_log_index + 1)?;
    outcome.elected_leader();

    tracing::info!(
        id = myself,
        term = state.term(),
        votes = ?outcome.votes_for_me,
        "Moving to LEADER state after winning election"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::log::InMemoryRaftLog;
    use crate::messages::Directed;
    use crate::outcome::{LogCommand, ShipCommand};
    use crate::raft::RaftState;

    /// Member 1 campaigning in `term`.
    fn candidate_state(term: u64) -> RaftState<InMemoryRaftLog> {
        state_with_log(term, &[1, 1]).with_term(term, Some(1))
    }

    #[test]
    fn test_own_vote_alone_is_not_a_quorum() -> anyhow::Result<()> {
        let state = candidate_state(2);

        let outcome = Candidate.handle(&vote_response(1, 2, true), &state, &database())?;

        assert!(outcome.votes_for_me.is_empty());
        assert_eq!(outcome.next_role, None);
        Ok(())
    }

    #[test]
    fn test_majority_of_votes_elects_leader() -> anyhow::Result<()> {
        let state = candidate_state(2);

        let outcome = Candidate.handle(&vote_response(3, 2, true), &state, &database())?;

        assert!(outcome.elected_leader);
        assert_eq!(outcome.next_role, Some(Role::Leader));
        assert_eq!(outcome.leader, Some(1));
        assert_eq!(outcome.last_log_index_before_we_became_leader, 1);
        assert!(matches!(
            &outcome.log_commands[..],
            [LogCommand::Append { index: 2, entry }] if entry.term == 2
        ));
        assert!(matches!(
            &outcome.ship_commands[..],
            [ShipCommand::NewEntries { prev_log_index: 1, prev_log_term: 1, .. }]
        ));
        Ok(())
    }

    #[test]
    fn test_denied_or_stale_votes_are_ignored() -> anyhow::Result<()> {
        let state = candidate_state(3);

        for message in [vote_response(2, 3, false), vote_response(2, 2, true)] {
            let outcome = Candidate.handle(&message, &state, &database())?;
            assert!(outcome.votes_for_me.is_empty());
            assert_eq!(outcome.next_role, None);
        }
        Ok(())
    }

    #[test]
    fn test_newer_term_in_vote_response_steps_back() -> anyhow::Result<()> {
        let state = candidate_state(3);

        let outcome = Candidate.handle(&vote_response(2, 5, false), &state, &database())?;

        assert_eq!(outcome.term, 5);
        assert_eq!(outcome.voted_for, None);
        assert_eq!(outcome.next_role, Some(Role::Follower));
        Ok(())
    }

    #[test]
    fn test_current_leader_heartbeat_makes_follower() -> anyhow::Result<()> {
        let state = candidate_state(3);

        let outcome = Candidate.handle(&heartbeat(2, 3), &state, &database())?;
        assert_eq!(outcome.next_role, Some(Role::Follower));
        assert_eq!(outcome.leader, Some(2));

        let outcome = Candidate.handle(&heartbeat(2, 2), &state, &database())?;
        assert_eq!(outcome.next_role, None);
        Ok(())
    }

    #[test]
    fn test_stale_append_is_refused() -> anyhow::Result<()> {
        let state = candidate_state(3);
        let request =
            RaftMessage::AppendEntriesRequest(append_request(2, 2, 1, 1, &[2], 0));

        let outcome = Candidate.handle(&request, &state, &database())?;

        assert_eq!(outcome.next_role, None);
        match &outcome.outgoing_messages[..] {
            [Directed {
                message: RaftMessage::AppendEntriesResponse(response),
                ..
            }] => {
                assert!(!response.success);
                assert_eq!(response.term, 3);
            }
            other => panic!("Expected AppendEntriesResponse, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_newer_vote_request_makes_follower_and_votes() -> anyhow::Result<()> {
        let state = candidate_state(3);
        let request = RaftMessage::VoteRequest(vote_request(2, 4, 5, 2));

        let outcome = Candidate.handle(&request, &state, &database())?;

        assert_eq!(outcome.next_role, Some(Role::Follower));
        assert_eq!(outcome.term, 4);
        assert_eq!(outcome.voted_for, Some(2));
        Ok(())
    }

    #[test]
    fn test_same_term_vote_request_is_denied() -> anyhow::Result<()> {
        let state = candidate_state(3);
        let request = RaftMessage::VoteRequest(vote_request(2, 3, 5, 2));

        let outcome = Candidate.handle(&request, &state, &database())?;

        assert_eq!(outcome.next_role, None);
        assert_eq!(outcome.voted_for, Some(1));
        Ok(())
    }

    #[test]
    fn test_election_timeout_restarts_election() -> anyhow::Result<()> {
        let state = candidate_state(3);

        let outcome = Candidate.handle(&election_timeout(), &state, &database())?;

        assert_eq!(outcome.term, 4);
        assert_eq!(outcome.next_role, None);
        assert_eq!(outcome.outgoing_messages.len(), 3);
        Ok(())
    }
}
