use super::append_entries::{
    append_new_entries, append_new_entry, handle_append_entries_request,
};
use super::election::is_quorum;
use super::heartbeat::beat;
use super::vote::handle_vote_request;
use super::{RoleHandler, term_at, validate_store_id};
use crate::error::RaftError;
use crate::messages::{
    AppendEntriesResponse, Directed, Heartbeat, LogCompactionInfo, RaftMessage,
};
use crate::outcome::{Outcome, ShipCommand};
use crate::raft::{LogIndex, ReadableRaftState};
use crate::store::{LocalDatabase, StoreId};

#[derive(Debug, Clone, Copy, Default)]
pub struct Leader;

impl RoleHandler for Leader {
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
                    tracing::info!(
                        id = state.myself(),
                        other_leader = heartbeat.from,
                        term = heartbeat.leader_term,
                        "Stepping down after heartbeat from another leader"
                    );
                    outcome.step_down();
                    beat(state, &mut outcome, heartbeat, store_id)?;
                }
            }
            RaftMessage::HeartbeatTimeout(_) => {
                send_heartbeats(state, &mut outcome, store_id)?;
            }
            RaftMessage::HeartbeatResponse(response) => {
                outcome.heartbeat_responses.insert(response.from);
            }
            RaftMessage::ElectionTimeout(_) => {
                if !is_quorum(
                    state.voting_members().len(),
                    state.heartbeat_responses().len(),
                ) {
                    tracing::info!(
                        id = state.myself(),
                        responses = ?state.heartbeat_responses(),
                        "Stepping down, heartbeats were not acknowledged by a quorum"
                    );
                    outcome.step_down();
                }
                outcome.heartbeat_responses.clear();
            }
            RaftMessage::AppendEntriesRequest(request) => {
                if request.leader_term == state.term() {
                    return Err(RaftError::TwoLeaders {
                        term: request.leader_term,
                    });
                }
                if request.leader_term > state.term() {
                    outcome.step_down();
                }
                handle_append_entries_request(
                    state,
                    &mut outcome,
                    request,
                    store_id,
                )?;
            }
            RaftMessage::AppendEntriesResponse(response) => {
                handle_append_response(state, &mut outcome, response, store_id)?;
            }
            RaftMessage::VoteRequest(request) => {
                if request.term > state.term() {
                    outcome.step_down();
                }
                handle_vote_request(state, &mut outcome, request, store_id)?;
            }
            RaftMessage::NewEntryRequest(request) => {
                append_new_entry(state, &mut outcome, request.content.clone())?;
                let append_index = state.entry_log().append_index() + 1;
                advance_commit(state, &mut outcome, append_index)?;
            }
            RaftMessage::NewEntryBatch(batch) => {
                append_new_entries(state, &mut outcome, batch.contents())?;
                let append_index =
                    state.entry_log().append_index() + batch.len() as LogIndex;
                advance_commit(state, &mut outcome, append_index)?;
            }
            _ => {}
        }

        Ok(outcome)
    }
}

fn send_heartbeats(
    state: &dyn ReadableRaftState,
    outcome: &mut Outcome,
    store_id: StoreId,
) -> Result<(), RaftError> {
    let commit_index = state.commit_index();
    let heartbeat = Heartbeat {
        from: state.myself(),
        store_id,
        leader_term: state.term(),
        commit_index,
        commit_index_term: term_at(state.entry_log(), commit_index)?,
    };

    for member in state.voting_members() {
        if *member != state.myself() {
            outcome.add_outgoing_message(Directed::new(
                *member,
                RaftMessage::Heartbeat(heartbeat.clone()),
            ));
        }
    }
    Ok(())
}

fn handle_append_response(
    state: &dyn ReadableRaftState,
    outcome: &mut Outcome,
    response: &AppendEntriesResponse,
    store_id: StoreId,
) -> Result<(), RaftError> {
    if response.term < state.term() {
        return Ok(());
    }
    if response.term > state.term() {
        tracing::info!(
            id = state.myself(),
            from = response.from,
            term = response.term,
            "Stepping down after seeing a newer term"
        );
        outcome.set_next_term(response.term);
        outcome.step_down();
        return Ok(());
    }

    let log = state.entry_log();

    if !response.success {
        if response.append_index >= log.prev_index() {
            outcome.add_ship_command(ShipCommand::Mismatch {
                last_remote_append_index: response.append_index,
                target: response.from,
            });
        } else {
            outcome.add_outgoing_message(Directed::new(
                response.from,
                RaftMessage::LogCompactionInfo(LogCompactionInfo {
                    from: state.myself(),
                    store_id,
                    leader_term: state.term(),
                    prev_index: log.prev_index(),
                }),
            ));
        }
        return Ok(());
    }

    let previous = outcome.follower_states.get(response.from).match_index;
    let follower_progressed = response.match_index > previous;
    if follower_progressed {
        outcome
            .follower_states
            .on_success_response(response.from, response.match_index);

        advance_commit(state, outcome, log.append_index())?;
    }

    if response.match_index < log.append_index() {
        outcome.add_ship_command(ShipCommand::Match {
            prev_log_index: response.match_index,
            target: response.from,
        });
    }
    Ok(())
}

/// Commits the highest index held by a majority, counting our own log as
/// reaching `own_append_index`, provided that entry is from our term.
pub(super) fn advance_commit(
    state: &dyn ReadableRaftState,
    outcome: &mut Outcome,
    own_append_index: LogIndex,
) -> Result<(), RaftError> {
    let mut indices: Vec<LogIndex> = state
        .voting_members()
        .iter()
        .map(|member| {
            if *member == state.myself() {
                own_append_index
            } else {
                outcome.follower_states.get(*member).match_index
            }
        })
        .collect();
    indices.sort_unstable_by(|a, b| b.cmp(a));
    let Some(&quorum_index) = indices.get(indices.len() / 2) else {
        return Ok(());
    };

    let current_commit = outcome.commit_index.unwrap_or(state.commit_index());
    if quorum_index <= current_commit {
        return Ok(());
    }

    let log = state.entry_log();
    // Entries past our append index are being appended in this term.
    let quorum_term = if quorum_index > log.append_index() {
        Some(state.term())
    } else {
        log.read_entry_term(quorum_index)?
    };
    if quorum_term != Some(state.term()) {
        return Ok(());
    }

    tracing::debug!(
        id = state.myself(),
        commit_index = quorum_index,
        "Commit index advanced"
    );
    outcome.leader_commit = quorum_index;
    outcome.commit_index = Some(quorum_index);
    outcome.add_ship_command(ShipCommand::CommitUpdate);
    Ok(())
}
