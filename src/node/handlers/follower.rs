use super::append_entries::handle_append_entries_request;
use super::election::start_election;
use super::heartbeat::beat;
use super::vote::handle_vote_request;
use super::{RoleHandler, validate_store_id};
use crate::error::RaftError;
use crate::messages::{LogCompactionInfo, RaftMessage};
use crate::outcome::Outcome;
use crate::raft::{ReadableRaftState, Role};
use crate::store::LocalDatabase;

#[derive(Debug, Clone, Copy, Default)]
pub struct Follower;

impl RoleHandler for Follower {
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
                beat(state, &mut outcome, heartbeat, store_id)?;
            }
            RaftMessage::AppendEntriesRequest(request) => {
                handle_append_entries_request(
                    state,
                    &mut outcome,
                    request,
                    store_id,
                )?;
            }
            RaftMessage::VoteRequest(request) => {
                handle_vote_request(state, &mut outcome, request, store_id)?;
            }
            RaftMessage::LogCompactionInfo(info) => {
                handle_leader_log_compaction(state, &mut outcome, info);
            }
            RaftMessage::ElectionTimeout(_) => {
                if start_election(state, &mut outcome, store_id)? {
                    outcome.set_next_role(Role::Candidate);
                    tracing::info!(
                        id = state.myself(),
                        term = outcome.term,
                        "Moving to CANDIDATE state after successfully starting election"
                    );
                }
            }
            _ => {}
        }

        Ok(outcome)
    }
}

/// Flags the need for a snapshot when the leader has compacted entries
/// we never received.
pub fn handle_leader_log_compaction(
    state: &dyn ReadableRaftState,
    outcome: &mut Outcome,
    info: &LogCompactionInfo,
) {
    if info.leader_term < state.term() {
        return;
    }

    let append_index = state.entry_log().append_index();
    if info.prev_index > append_index {
        tracing::info!(
            id = state.myself(),
            leader = info.from,
            leader_prev_index = info.prev_index,
            append_index,
            "Leader compacted past our log, a fresh snapshot is needed"
        );
        outcome.mark_need_for_fresh_snapshot();
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::log::InMemoryRaftLog;
    use crate::messages::Directed;
    use crate::raft::RaftState;

    #[test]
    fn test_stale_compaction_info_never_needs_snapshot() -> anyhow::Result<()> {
        let state = state_with_log(5, &[1]);

        for prev_index in [-1, 0, 1, 100] {
            let outcome =
                Follower.handle(&compaction_info(4, prev_index), &state, &database())?;
            assert!(!outcome.needs_fresh_snapshot);
        }
        Ok(())
    }

    #[test]
    fn test_compaction_beyond_append_index_needs_snapshot() -> anyhow::Result<()> {
        let state = state_with_log(5, &[1, 1, 1]);

        for (leader_term, prev_index, expected) in
            [(5, 3, true), (6, 10, true), (5, 2, false), (7, -1, false)]
        {
            let outcome = Follower.handle(
                &compaction_info(leader_term, prev_index),
                &state,
                &database(),
            )?;
            assert_eq!(outcome.needs_fresh_snapshot, expected);
            assert_eq!(outcome.next_role, None);
        }
        Ok(())
    }

    #[test]
    fn test_election_timeout_moves_to_candidate() -> anyhow::Result<()> {
        let state = state_with_log(2, &[]);

        let outcome = Follower.handle(&election_timeout(), &state, &database())?;

        assert_eq!(outcome.next_role, Some(Role::Candidate));
        assert_eq!(outcome.term, 3);
        assert_eq!(outcome.outgoing_messages.len(), 3);
        Ok(())
    }

    #[test]
    fn test_election_timeout_stays_follower_when_not_voting() -> anyhow::Result<()>
    {
        let state =
            RaftState::new(4, [1, 2, 3].into_iter().collect(), InMemoryRaftLog::new());

        let outcome = Follower.handle(&election_timeout(), &state, &database())?;

        assert_eq!(outcome.role_after(Role::Follower), Role::Follower);
        assert!(outcome.outgoing_messages.is_empty());
        Ok(())
    }

    #[test]
    fn test_heartbeat_is_delegated() -> anyhow::Result<()> {
        let state = state_with_log(1, &[]);

        let outcome = Follower.handle(&heartbeat(2, 1), &state, &database())?;

        assert_eq!(outcome.leader, Some(2));
        assert!(outcome.renew_election_timeout);
        Ok(())
    }

    #[test]
    fn test_vote_from_older_term_does_not_carry_over() -> anyhow::Result<()> {
        let mut state = state_with_log(3, &[1]).with_term(3, Some(3));

        let outcome = Follower.handle(&heartbeat(2, 5), &state, &database())?;
        assert_eq!(outcome.term, 5);
        assert_eq!(outcome.voted_for, None);
        state.update(&outcome)?;

        let request = RaftMessage::VoteRequest(vote_request(3, 5, 1, 5));
        let outcome = Follower.handle(&request, &state, &database())?;

        assert_eq!(outcome.voted_for, Some(3));
        match &outcome.outgoing_messages[..] {
            [Directed {
                to: 3,
                message: RaftMessage::VoteResponse(response),
            }] => assert!(response.vote_granted),
            other => panic!("Expected one VoteResponse, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_append_response_is_stamped_with_local_store() -> anyhow::Result<()> {
        let state = state_with_log(1, &[]);
        let request =
            RaftMessage::AppendEntriesRequest(append_request(2, 1, -1, 0, &[1], -1));

        let outcome = Follower.handle(&request, &state, &database())?;

        match &outcome.outgoing_messages[..] {
            [Directed {
                to: 2,
                message: RaftMessage::AppendEntriesResponse(response),
            }] => {
                assert!(response.success);
                assert_eq!(response.store_id, STORE);
            }
            other => panic!("Expected one AppendEntriesResponse, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_other_messages_are_no_ops() -> anyhow::Result<()> {
        let state = state_with_log(1, &[1]);

        for message in [heartbeat_timeout(), new_entry("x"), vote_response(2, 1, true)] {
            let outcome = Follower.handle(&message, &state, &database())?;
            assert_eq!(outcome, Outcome::new(&state));
        }
        Ok(())
    }
}
