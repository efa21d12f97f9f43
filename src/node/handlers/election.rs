//! Starting an election and counting its votes.

use super::term_at;
use crate::error::RaftError;
use crate::messages::{Directed, RaftMessage, VoteRequest};
use crate::outcome::Outcome;
use crate::raft::ReadableRaftState;
use crate::store::StoreId;

/// Moves to the next term and asks every voting member, ourselves
/// included, for a vote.
///
/// Returns `false` without touching `outcome` when we are not a voting
/// member and therefore cannot stand for election.
pub fn start_election(
    state: &dyn ReadableRaftState,
    outcome: &mut Outcome,
    local_store_id: StoreId,
) -> Result<bool, RaftError> {
    let myself = state.myself();
    if !state.voting_members().contains(&myself) {
        tracing::info!(
            id = myself,
            members = ?state.voting_members(),
            "Not a voting member, not starting an election"
        );
        return Ok(false);
    }

    let log = state.entry_log();
    let last_log_index = log.append_index();
    let last_log_term = term_at(log, last_log_index)?;

    outcome.set_next_term(outcome.term + 1);
    outcome.votes_for_me.clear();
    outcome.voted_for = Some(myself);

    let request = VoteRequest {
        from: myself,
        store_id: local_store_id,
        term: outcome.term,
        candidate: myself,
        last_log_index,
        last_log_term,
    };
    for member in state.voting_members() {
        outcome.add_outgoing_message(Directed::new(
            *member,
            RaftMessage::VoteRequest(request.clone()),
        ));
    }

    tracing::info!(
        id = myself,
        term = outcome.term,
        last_log_index,
        last_log_term,
        "Election started"
    );
    Ok(true)
}

/// Whether `votes_excluding_self` plus our own vote is a strict majority
/// of `cluster_size`.
pub fn is_quorum(cluster_size: usize, votes_excluding_self: usize) -> bool {
    (votes_excluding_self + 1) * 2 > cluster_size
}
