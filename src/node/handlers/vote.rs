use super::term_at;
use crate::error::RaftError;
use crate::messages::{Directed, RaftMessage, VoteRequest, VoteResponse};
use crate::outcome::Outcome;
use crate::raft::ReadableRaftState;
use crate::store::StoreId;

/// Whether `request` deserves our vote, judged against the term and vote
/// already recorded in `outcome`.
pub fn should_vote_for(
    state: &dyn ReadableRaftState,
    outcome: &Outcome,
    request: &VoteRequest,
) -> Result<bool, RaftError> {
    if request.term < outcome.term {
        tracing::debug!(
            id = state.myself(),
            candidate = request.candidate,
            req_term = request.term,
            current_term = outcome.term,
            "Vote denied: candidate term is older"
        );
        return Ok(false);
    }

    if let Some(voted_for) = outcome.voted_for
        && voted_for != request.candidate
    {
        tracing::debug!(
            id = state.myself(),
            candidate = request.candidate,
            voted_for,
            "Vote denied: already voted for another candidate"
        );
        return Ok(false);
    }

    let log = state.entry_log();
    let last_log_index = log.append_index();
    let last_log_term = term_at(log, last_log_index)?;

    let log_is_up_to_date = if request.last_log_term != last_log_term {
        request.last_log_term > last_log_term
    } else {
        request.last_log_index >= last_log_index
    };

    if !log_is_up_to_date {
        tracing::debug!(
            id = state.myself(),
            candidate = request.candidate,
            req_last_log_term = request.last_log_term,
            req_last_log_index = request.last_log_index,
            last_log_term,
            last_log_index,
            "Vote denied: candidate's log is not up-to-date"
        );
    }
    Ok(log_is_up_to_date)
}

pub fn handle_vote_request(
    state: &dyn ReadableRaftState,
    outcome: &mut Outcome,
    request: &VoteRequest,
    local_store_id: StoreId,
) -> Result<(), RaftError> {
    if request.term > outcome.term {
        outcome.set_next_term(request.term);
    }

    let vote_granted = should_vote_for(state, outcome, request)?;
    if vote_granted {
        outcome.voted_for = Some(request.candidate);
        outcome.renew_election_timeout();
    }

    outcome.add_outgoing_message(Directed::new(
        request.candidate,
        RaftMessage::VoteResponse(VoteResponse {
            from: state.myself(),
            store_id: local_store_id,
            term: outcome.term,
            vote_granted,
        }),
    ));
    Ok(())
}
