//! Node module: message dispatch and the apply boundary.
//!
//! [`RaftMachine`] owns the role and the [`RaftState`], asks the current
//! role's handler for an [`Outcome`] and applies it. Everything that
//! leaves the node is emitted as a [`RaftEvent`].

pub mod batching;
pub mod handlers;
pub mod shipping;
pub mod timeouts;

use crate::error::RaftError;
use crate::events::RaftEvent;
use crate::log::RaftLog;
use crate::messages::RaftMessage;
use crate::outcome::Outcome;
use crate::raft::{LogIndex, MemberId, RaftState, ReadableRaftState, Role, Term};
use crate::store::{LocalDatabase, StoreId};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, mpsc};

/// The `{validate, handle}` capability every stage of the inbound
/// pipeline offers.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Whether the message would be processed in the current state.
    async fn validate(&self, message: &RaftMessage) -> bool;

    async fn handle(&self, message: RaftMessage);
}

struct Core<L: RaftLog> {
    role: Role,
    state: RaftState<L>,
}

pub struct RaftMachine<L: RaftLog, D: LocalDatabase> {
    myself: MemberId,
    core: Mutex<Core<L>>,
    database: Arc<D>,
    events: mpsc::UnboundedSender<RaftEvent>,
    election_renewals: Arc<Notify>,
}

impl<L: RaftLog, D: LocalDatabase> RaftMachine<L, D> {
    pub fn new(
        state: RaftState<L>,
        database: Arc<D>,
    ) -> (Self, mpsc::UnboundedReceiver<RaftEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let machine = Self {
            myself: state.myself(),
            core: Mutex::new(Core {
                role: Role::Follower,
                state,
            }),
            database,
            events,
            election_renewals: Arc::new(Notify::new()),
        };
        (machine, events_rx)
    }

    pub fn myself(&self) -> MemberId {
        self.myself
    }

    pub fn store_id(&self) -> StoreId {
        self.database.store_id()
    }

    pub fn database(&self) -> &Arc<D> {
        &self.database
    }

    /// Notified whenever an applied outcome asks for the election timer
    /// to be renewed.
    pub fn election_renewals(&self) -> Arc<Notify> {
        Arc::clone(&self.election_renewals)
    }

    pub async fn role(&self) -> Role {
        self.core.lock().await.role
    }

    pub async fn term(&self) -> Term {
        self.core.lock().await.state.term()
    }

    pub async fn leader(&self) -> Option<MemberId> {
        self.core.lock().await.state.leader()
    }

    pub async fn commit_index(&self) -> LogIndex {
        self.core.lock().await.state.commit_index()
    }

    /// Runs `f` against a consistent view of the state.
    pub async fn read_state<R>(&self, f: impl FnOnce(&RaftState<L>) -> R) -> R {
        let core = self.core.lock().await;
        f(&core.state)
    }

    /// Compacts the log up to `upto`, never past the commit index.
    pub async fn prune_log(&self, upto: LogIndex) -> Result<LogIndex, RaftError> {
        let mut core = self.core.lock().await;
        let safe_index = upto.min(core.state.commit_index());
        let prev_index = core.state.entry_log_mut().prune(safe_index)?;
        tracing::debug!(id = self.myself, prev_index, "Log pruned");
        Ok(prev_index)
    }

    async fn process(&self, message: &RaftMessage) -> Result<(), RaftError> {
        let mut core = self.core.lock().await;
        let handler = core.role.handler();

        let validation =
            handler.validate(message, &core.state, self.database.as_ref())?;
        if !validation.processable {
            tracing::debug!(
                id = self.myself,
                kind = ?message.kind(),
                from = ?message.sender(),
                "Message deferred as unprocessable"
            );
            if validation.needs_fresh_snapshot {
                self.emit(RaftEvent::SnapshotNeeded {
                    leader: core.state.leader(),
                });
            }
            return Ok(());
        }

        let outcome =
            handler.handle(message, &core.state, self.database.as_ref())?;
        self.apply(&mut core, outcome)
    }

    fn apply(&self, core: &mut Core<L>, outcome: Outcome) -> Result<(), RaftError> {
        let commit_before = core.state.commit_index();
        core.state.update(&outcome)?;

        let from = core.role;
        let to = outcome.role_after(from);
        if from != to {
            tracing::info!(
                id = self.myself,
                from = ?from,
                to = ?to,
                term = core.state.term(),
                "Role changed"
            );
            core.role = to;
            self.emit(RaftEvent::RoleChanged {
                from,
                to,
                term: core.state.term(),
            });
        }

        if outcome.renew_election_timeout {
            self.election_renewals.notify_one();
        }

        let commit_index = core.state.commit_index();
        if commit_index > commit_before {
            self.emit(RaftEvent::CommitIndexAdvanced { commit_index });
        }

        if outcome.needs_fresh_snapshot {
            self.emit(RaftEvent::SnapshotNeeded {
                leader: core.state.leader(),
            });
        }

        for directed in outcome.outgoing_messages {
            self.emit(RaftEvent::Send(directed));
        }
        for command in outcome.ship_commands {
            self.emit(RaftEvent::Ship(command));
        }
        Ok(())
    }

    fn emit(&self, event: RaftEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!(id = self.myself, "No event listener, event dropped");
        }
    }
}

#[async_trait]
impl<L, D> MessageHandler for RaftMachine<L, D>
where
    L: RaftLog + 'static,
    D: LocalDatabase + 'static,
{
    async fn validate(&self, message: &RaftMessage) -> bool {
        let core = self.core.lock().await;
        match core.role.handler().validate(
            message,
            &core.state,
            self.database.as_ref(),
        ) {
            Ok(outcome) => outcome.processable,
            Err(e) => {
                tracing::warn!(
                    id = self.myself,
                    kind = ?message.kind(),
                    error = ?e,
                    "Message failed validation"
                );
                false
            }
        }
    }

    async fn handle(&self, message: RaftMessage) {
        if let Err(e) = self.process(&message).await {
            tracing::error!(
                id = self.myself,
                kind = ?message.kind(),
                from = ?message.sender(),
                error = ?e,
                "Failed to handle message"
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::MessageHandler;
    use crate::messages::RaftMessage;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    /// Records every dispatched message in order.
    #[derive(Default)]
    pub struct RecordingHandler {
        pub accept: bool,
        pub seen: Mutex<Vec<RaftMessage>>,
    }

    #[async_trait]
    impl MessageHandler for RecordingHandler {
        async fn validate(&self, _message: &RaftMessage) -> bool {
            self.accept
        }

        async fn handle(&self, message: RaftMessage) {
            self.seen.lock().await.push(message);
        }
    }
}
