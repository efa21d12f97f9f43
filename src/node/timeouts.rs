//! Timer tasks that feed timeout messages into a node.

use super::MessageHandler;
use crate::config::Config;
use crate::messages::{RaftMessage, Timeout};
use crate::raft::MemberId;
use crate::store::StoreId;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Election and heartbeat timers of one member. Both stop when dropped.
pub struct Timers {
    election: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

impl Timers {
    /// Spawns both timers.
    ///
    /// The election timer restarts, with fresh jitter, every time
    /// `renewals` is notified.
    pub fn spawn<H: MessageHandler + 'static>(
        handler: Arc<H>,
        renewals: Arc<Notify>,
        myself: MemberId,
        store_id: StoreId,
        config: &Config,
    ) -> Self {
        let timeout = Timeout {
            from: myself,
            store_id,
        };
        let election = tokio::spawn(run_election_timer(
            Arc::clone(&handler),
            renewals,
            timeout.clone(),
            config.election_timeout,
        ));
        let heartbeat = tokio::spawn(run_heartbeat_timer(
            handler,
            timeout,
            config.heartbeat_interval,
        ));
        Self {
            election,
            heartbeat,
        }
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.election.abort();
        self.heartbeat.abort();
    }
}

/// `base` plus a random delay of up to `base`.
fn jittered(base: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    base + Duration::from_millis(rand::rng().random_range(0..=base_ms))
}

async fn run_election_timer<H: MessageHandler>(
    handler: Arc<H>,
    renewals: Arc<Notify>,
    timeout: Timeout,
    election_timeout: Duration,
) {
    let deadline = tokio::time::sleep(jittered(election_timeout));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = renewals.notified() => {
                deadline.as_mut().reset(Instant::now() + jittered(election_timeout));
            }
            _ = &mut deadline => {
                tracing::debug!(id = timeout.from, "Election timeout");
                deadline.as_mut().reset(Instant::now() + jittered(election_timeout));
                handler
                    .handle(RaftMessage::ElectionTimeout(timeout.clone()))
                    .await;
            }
        }
    }
}

async fn run_heartbeat_timer<H: MessageHandler>(
    handler: Arc<H>,
    timeout: Timeout,
    heartbeat_interval: Duration,
) {
    let mut interval = tokio::time::interval(heartbeat_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        interval.tick().await;
        handler
            .handle(RaftMessage::HeartbeatTimeout(timeout.clone()))
            .await;
    }
}
