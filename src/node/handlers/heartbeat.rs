use super::append_entries::{commit_to_log_on_update, log_history_matches};
use crate::error::RaftError;
use crate::messages::{Directed, Heartbeat, HeartbeatResponse, RaftMessage};
use crate::outcome::Outcome;
use crate::raft::ReadableRaftState;
use crate::store::StoreId;

/// Handles a leader heartbeat: adopts the leader, acknowledges it and
/// advances the commit index if our history agrees with the leader's.
pub fn beat(
    state: &dyn ReadableRaftState,
    outcome: &mut Outcome,
    heartbeat: &Heartbeat,
    local_store_id: StoreId,
) -> Result<(), RaftError> {
    if heartbeat.leader_term < state.term() {
        return Ok(());
    }

    outcome.renew_election_timeout();
    outcome.set_next_term(heartbeat.leader_term);
    outcome.leader = Some(heartbeat.from);
    outcome.leader_commit = heartbeat.commit_index;
    outcome.add_outgoing_message(Directed::new(
        heartbeat.from,
        RaftMessage::HeartbeatResponse(HeartbeatResponse {
            from: state.myself(),
            store_id: local_store_id,
        }),
    ));

    if !log_history_matches(
        state,
        heartbeat.commit_index,
        heartbeat.commit_index_term,
    )? {
        return Ok(());
    }

    commit_to_log_on_update(
        state,
        heartbeat.commit_index,
        heartbeat.commit_index,
        outcome,
    );
    Ok(())
}
