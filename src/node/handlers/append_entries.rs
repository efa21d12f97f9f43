use super::term_at;
use crate::error::{LogError, RaftError};
use crate::log::LogEntry;
use crate::messages::{
    AppendEntriesRequest, AppendEntriesResponse, Directed, RaftMessage,
};
use crate::outcome::{LogCommand, Outcome, ShipCommand};
use crate::raft::{LogIndex, MemberId, ReadableRaftState, Term};
use crate::store::StoreId;
use bytes::Bytes;

/// Whether our log agrees with the leader's up to `prev_log_index`.
pub fn log_history_matches(
    state: &dyn ReadableRaftState,
    prev_log_index: LogIndex,
    prev_log_term: Term,
) -> Result<bool, LogError> {
    // A compacted prefix was committed, so it matches by construction.
    if prev_log_index <= state.entry_log().prev_index() {
        return Ok(true);
    }

    // A missing entry reads as None and never equals a real term.
    Ok(state.entry_log().read_entry_term(prev_log_index)? == Some(prev_log_term))
}

/// Advances the commit index to `min(leader_commit, index_of_last_new_entry)`
/// if that moves it forward.
pub fn commit_to_log_on_update(
    state: &dyn ReadableRaftState,
    index_of_last_new_entry: LogIndex,
    leader_commit: LogIndex,
    outcome: &mut Outcome,
) {
    let new_commit_index = leader_commit.min(index_of_last_new_entry);

    if new_commit_index > state.commit_index() {
        outcome.commit_index = Some(new_commit_index);
    }
}

fn respond(
    state: &dyn ReadableRaftState,
    outcome: &mut Outcome,
    to: MemberId,
    store_id: StoreId,
    success: bool,
    match_index: LogIndex,
    append_index: LogIndex,
) {
    let response = AppendEntriesResponse {
        from: state.myself(),
        store_id,
        term: outcome.term,
        success,
        match_index,
        append_index,
    };
    outcome.add_outgoing_message(Directed::new(
        to,
        RaftMessage::AppendEntriesResponse(response),
    ));
}

pub fn handle_append_entries_request(
    state: &dyn ReadableRaftState,
    outcome: &mut Outcome,
    request: &AppendEntriesRequest,
    local_store_id: StoreId,
) -> Result<(), RaftError> {
    let log = state.entry_log();

    if request.leader_term < state.term() {
        tracing::debug!(
            id = state.myself(),
            req_term = request.leader_term,
            current_term = state.term(),
            "AppendEntries rejected: term is older than current term"
        );
        respond(
            state,
            outcome,
            request.from,
            local_store_id,
            false,
            -1,
            log.append_index(),
        );
        return Ok(());
    }

    outcome.renew_election_timeout();
    outcome.set_next_term(request.leader_term);
    outcome.leader = Some(request.from);
    outcome.leader_commit = request.leader_commit;

    if !log_history_matches(state, request.prev_log_index, request.prev_log_term)? {
        tracing::debug!(
            id = state.myself(),
            prev_log_index = request.prev_log_index,
            prev_log_term = request.prev_log_term,
            append_index = log.append_index(),
            "AppendEntries rejected: log history does not match"
        );
        respond(
            state,
            outcome,
            request.from,
            local_store_id,
            false,
            -1,
            log.append_index(),
        );
        return Ok(());
    }

    let base_index = request.prev_log_index + 1;
    let mut offset = 0usize;

    // Skip entries we already hold; truncate at the first conflict.
    while offset < request.entries.len() {
        let log_index = base_index + offset as LogIndex;
        if log_index > log.append_index() {
            break;
        }
        if log_index > log.prev_index() {
            let log_term = log.read_entry_term(log_index)?;
            if log_term != Some(request.entries[offset].term) {
                if log_index <= state.commit_index() {
                    return Err(RaftError::TruncateCommitted {
                        index: log_index,
                        commit_index: state.commit_index(),
                    });
                }
                tracing::info!(
                    id = state.myself(),
                    conflict_index = log_index,
                    old_term = ?log_term,
                    new_term = request.entries[offset].term,
                    "Truncating log due to conflict"
                );
                outcome.add_log_command(LogCommand::Truncate {
                    from_index: log_index,
                });
                break;
            }
        }
        offset += 1;
    }

    if offset < request.entries.len() {
        outcome.add_log_command(LogCommand::BatchAppend {
            base_index: base_index + offset as LogIndex,
            entries: request.entries[offset..].to_vec(),
        });
    }

    let end_match_index = request.prev_log_index + request.entries.len() as LogIndex;
    commit_to_log_on_update(state, end_match_index, request.leader_commit, outcome);

    respond(
        state,
        outcome,
        request.from,
        local_store_id,
        true,
        end_match_index,
        end_match_index,
    );
    Ok(())
}

/// Appends one client entry at the current term and ships it.
pub fn append_new_entry(
    state: &dyn ReadableRaftState,
    outcome: &mut Outcome,
    content: Bytes,
) -> Result<(), RaftError> {
    let prev_log_index = state.entry_log().append_index();
    let prev_log_term = term_at(state.entry_log(), prev_log_index)?;
    let entry = LogEntry::new(state.term(), content);

    outcome.add_ship_command(ShipCommand::NewEntries {
        prev_log_index,
        prev_log_term,
        entries: vec![entry.clone()],
    });
    outcome.add_log_command(LogCommand::Append {
        index: prev_log_index + 1,
        entry,
    });
    Ok(())
}

pub fn append_new_entries(
    state: &dyn ReadableRaftState,
    outcome: &mut Outcome,
    contents: &[Bytes],
) -> Result<(), RaftError> {
    if contents.is_empty() {
        return Ok(());
    }

    let prev_log_index = state.entry_log().append_index();
    let prev_log_term = term_at(state.entry_log(), prev_log_index)?;
    let entries: Vec<LogEntry> = contents
        .iter()
        .map(|content| LogEntry::new(state.term(), content.clone()))
        .collect();

    outcome.add_ship_command(ShipCommand::NewEntries {
        prev_log_index,
        prev_log_term,
        entries: entries.clone(),
    });
    outcome.add_log_command(LogCommand::BatchAppend {
        base_index: prev_log_index + 1,
        entries,
    });
    Ok(())
}
