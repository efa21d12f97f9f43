//! Role handlers as pure decision functions.
//!
//! Each handler reads a [`ReadableRaftState`] and one message and returns
//! an [`Outcome`] describing the requested changes. Handlers never touch
//! shared state, so they can be tested without any synchronization.

mod append_entries;
mod candidate;
mod election;
mod follower;
mod heartbeat;
mod leader;
mod vote;

pub use append_entries::{
    append_new_entries, append_new_entry, commit_to_log_on_update,
    handle_append_entries_request, log_history_matches,
};
pub use candidate::Candidate;
pub use election::{is_quorum, start_election};
pub use follower::{Follower, handle_leader_log_compaction};
pub use heartbeat::beat;
pub use leader::Leader;
pub use vote::{handle_vote_request, should_vote_for};

use crate::error::RaftError;
use crate::log::ReadableEntryLog;
use crate::messages::{MessageKind, RaftMessage};
use crate::outcome::Outcome;
use crate::raft::{LogIndex, NO_TERM, ReadableRaftState, Term};
use crate::store::LocalDatabase;

/// The `{validate, handle}` pair every role implements.
pub trait RoleHandler: Send + Sync {
    /// Pre-check run before `handle`; an unprocessable outcome means the
    /// message must be deferred.
    fn validate(
        &self,
        message: &RaftMessage,
        state: &dyn ReadableRaftState,
        database: &dyn LocalDatabase,
    ) -> Result<Outcome, RaftError>;

    fn handle(
        &self,
        message: &RaftMessage,
        state: &dyn ReadableRaftState,
        database: &dyn LocalDatabase,
    ) -> Result<Outcome, RaftError>;
}

/// Store identity check shared by all roles.
pub(crate) fn validate_store_id(
    message: &RaftMessage,
    state: &dyn ReadableRaftState,
    database: &dyn LocalDatabase,
) -> Result<Outcome, RaftError> {
    database.assert_healthy()?;
    let mut outcome = Outcome::new(state);

    let local = database.store_id();
    let foreign = message.store_id();
    if outcome.leader.is_some()
        && !message.kind().is_timeout()
        && local != foreign
    {
        if database.is_empty() {
            // An empty store cannot tell a real mismatch from not having
            // caught up yet.
            outcome.mark_need_for_fresh_snapshot();
            outcome.mark_unprocessable();
        } else if message.kind() != MessageKind::VoteRequest {
            return Err(RaftError::StoreIdMismatch {
                expected: local,
                actual: foreign,
            });
        } else {
            tracing::debug!(
                id = state.myself(),
                from = ?message.sender(),
                "Ignoring vote request from foreign store"
            );
            outcome.mark_unprocessable();
        }
    }

    Ok(outcome)
}

/// Term at `index`, or [`NO_TERM`] when there is no entry there.
pub(crate) fn term_at(
    log: &dyn ReadableEntryLog,
    index: LogIndex,
) -> Result<Term, RaftError> {
    Ok(log.read_entry_term(index)?.unwrap_or(NO_TERM))
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::messages::Timeout;
    use crate::store::InMemoryDatabase;

    fn foreign(message: RaftMessage) -> RaftMessage {
        match message {
            RaftMessage::Heartbeat(mut m) => {
                m.store_id = FOREIGN_STORE;
                RaftMessage::Heartbeat(m)
            }
            RaftMessage::VoteRequest(mut m) => {
                m.store_id = FOREIGN_STORE;
                RaftMessage::VoteRequest(m)
            }
            other => other,
        }
    }

    #[test]
    fn test_matching_store_id_is_processable() -> anyhow::Result<()> {
        let state = state_with_leader(3, 2);
        let outcome =
            validate_store_id(&heartbeat(2, 3), &state, &database())?;

        assert!(outcome.processable);
        assert!(!outcome.needs_fresh_snapshot);
        Ok(())
    }

    #[test]
    fn test_empty_store_mismatch_needs_snapshot() -> anyhow::Result<()> {
        let state = state_with_leader(3, 2);
        let database = InMemoryDatabase::empty(STORE);

        let outcome =
            validate_store_id(&foreign(heartbeat(2, 3)), &state, &database)?;

        assert!(!outcome.processable);
        assert!(outcome.needs_fresh_snapshot);
        Ok(())
    }

    #[test]
    fn test_non_empty_store_mismatch_is_fatal() {
        let state = state_with_leader(3, 2);

        let result =
            validate_store_id(&foreign(heartbeat(2, 3)), &state, &database());

        match result {
            Err(RaftError::StoreIdMismatch { expected, actual }) => {
                assert_eq!(expected, STORE);
                assert_eq!(actual, FOREIGN_STORE);
            }
            other => panic!("Expected StoreIdMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_foreign_vote_request_is_only_unprocessable() -> anyhow::Result<()>
    {
        let state = state_with_leader(3, 2);
        let request = RaftMessage::VoteRequest(vote_request(3, 4, -1, 0));

        let outcome =
            validate_store_id(&foreign(request), &state, &database())?;

        assert!(!outcome.processable);
        assert!(!outcome.needs_fresh_snapshot);
        Ok(())
    }

    #[test]
    fn test_mismatch_ignored_without_known_leader() -> anyhow::Result<()> {
        let state = state_with_log(3, &[]);

        let outcome =
            validate_store_id(&foreign(heartbeat(2, 3)), &state, &database())?;

        assert!(outcome.processable);
        Ok(())
    }

    #[test]
    fn test_mismatch_ignored_for_timeouts() -> anyhow::Result<()> {
        let state = state_with_leader(3, 2);
        let timeout = RaftMessage::HeartbeatTimeout(Timeout {
            from: 1,
            store_id: FOREIGN_STORE,
        });

        let outcome = validate_store_id(&timeout, &state, &database())?;

        assert!(outcome.processable);
        Ok(())
    }

    #[test]
    fn test_unhealthy_store_fails_validation() {
        let state = state_with_leader(3, 2);
        let database = database();
        database.mark_unhealthy();

        let result = validate_store_id(&heartbeat(2, 3), &state, &database);

        assert!(matches!(result, Err(RaftError::UnhealthyStore(_))));
    }
}
