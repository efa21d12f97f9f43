//! In-process cluster wiring members together over channels.
//!
//! Each member runs a [`RaftMachine`] behind a [`BatchingMessageHandler`].
//! A router task per member delivers the messages it emits, feeds its
//! ship commands through a [`LogShipper`] and publishes its commit index.

use crate::config::Config;
use crate::events::RaftEvent;
use crate::log::InMemoryRaftLog;
use crate::messages::{Directed, NewEntryRequest, RaftMessage, Timeout};
use crate::node::batching::BatchingMessageHandler;
use crate::node::shipping::LogShipper;
use crate::node::timeouts::Timers;
use crate::node::{MessageHandler, RaftMachine};
use crate::raft::{LogIndex, MemberId, RaftState, Role};
use crate::store::{InMemoryDatabase, StoreId};
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc, watch};
use tokio::task::JoinHandle;

pub type Machine = RaftMachine<InMemoryRaftLog, InMemoryDatabase>;
pub type Inbound = BatchingMessageHandler<Machine>;

/// Message delivery between members, with support for partitions.
#[derive(Default)]
struct Network {
    inboxes: RwLock<BTreeMap<MemberId, Arc<Inbound>>>,
    isolated: RwLock<BTreeSet<MemberId>>,
}

impl Network {
    async fn deliver(&self, from: MemberId, directed: Directed) {
        if from != directed.to {
            let isolated = self.isolated.read().await;
            if isolated.contains(&from) || isolated.contains(&directed.to) {
                tracing::trace!(
                    from,
                    to = directed.to,
                    kind = ?directed.message.kind(),
                    "Dropping message across partition"
                );
                return;
            }
        }

        let inbox = self.inboxes.read().await.get(&directed.to).cloned();
        match inbox {
            Some(inbox) => inbox.handle(directed.message).await,
            None => tracing::warn!(from, to = directed.to, "Unknown member"),
        }
    }
}

pub struct Member {
    pub machine: Arc<Machine>,
    pub inbound: Arc<Inbound>,
    commits: watch::Receiver<LogIndex>,
    snapshot_requests: watch::Receiver<usize>,
    timers: Option<Timers>,
    tasks: Vec<JoinHandle<()>>,
}

impl Member {
    pub fn snapshot_requests(&self) -> usize {
        *self.snapshot_requests.borrow()
    }
}

impl Drop for Member {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

pub struct LocalCluster {
    config: Config,
    store_id: StoreId,
    network: Arc<Network>,
    members: BTreeMap<MemberId, Member>,
}

impl LocalCluster {
    /// Starts members `1..=size`, all followers in term 0.
    pub async fn start(size: u32, config: Config) -> anyhow::Result<Self> {
        config.validate()?;
        let store_id = StoreId::random();
        let network = Arc::new(Network::default());
        let ids: BTreeSet<MemberId> = (1..=size).collect();

        let mut members = BTreeMap::new();
        for id in &ids {
            let member =
                Self::start_member(*id, &ids, store_id, &config, &network).await;
            members.insert(*id, member);
        }
        tracing::info!(size, store_id = ?store_id, "Local cluster started");

        Ok(Self {
            config,
            store_id,
            network,
            members,
        })
    }

    async fn start_member(
        id: MemberId,
        ids: &BTreeSet<MemberId>,
        store_id: StoreId,
        config: &Config,
        network: &Arc<Network>,
    ) -> Member {
        let database = Arc::new(InMemoryDatabase::new(store_id));
        let state = RaftState::new(id, ids.clone(), InMemoryRaftLog::new());
        let (machine, events) = RaftMachine::new(state, Arc::clone(&database));
        let machine = Arc::new(machine);

        let (inbound, consumer) = BatchingMessageHandler::spawn(
            Arc::clone(&machine),
            database,
            config,
        );
        let inbound = Arc::new(inbound);
        network
            .inboxes
            .write()
            .await
            .insert(id, Arc::clone(&inbound));

        let (commit_tx, commits) = watch::channel(-1);
        let (snapshot_tx, snapshot_requests) = watch::channel(0);
        let router = tokio::spawn(route(
            Arc::clone(&machine),
            events,
            Arc::clone(network),
            LogShipper::new(id, store_id, config.max_append_entries),
            commit_tx,
            snapshot_tx,
        ));

        Member {
            machine,
            inbound,
            commits,
            snapshot_requests,
            timers: None,
            tasks: vec![consumer, router],
        }
    }

    pub fn store_id(&self) -> StoreId {
        self.store_id
    }

    pub fn member_ids(&self) -> Vec<MemberId> {
        self.members.keys().copied().collect()
    }

    pub fn member(&self, id: MemberId) -> anyhow::Result<&Member> {
        self.members
            .get(&id)
            .ok_or_else(|| anyhow::anyhow!("No member {}", id))
    }

    /// Runs election and heartbeat timers on every member.
    pub fn start_timers(&mut self) {
        for (id, member) in self.members.iter_mut() {
            member.timers = Some(Timers::spawn(
                Arc::clone(&member.inbound),
                member.machine.election_renewals(),
                *id,
                self.store_id,
                &self.config,
            ));
        }
    }

    fn timeout(&self, id: MemberId) -> Timeout {
        Timeout {
            from: id,
            store_id: self.store_id,
        }
    }

    pub async fn trigger_election(&self, id: MemberId) -> anyhow::Result<()> {
        let message = RaftMessage::ElectionTimeout(self.timeout(id));
        self.member(id)?.inbound.handle(message).await;
        Ok(())
    }

    pub async fn trigger_heartbeat(&self, id: MemberId) -> anyhow::Result<()> {
        let message = RaftMessage::HeartbeatTimeout(self.timeout(id));
        self.member(id)?.inbound.handle(message).await;
        Ok(())
    }

    /// Hands a client write to member `id`.
    pub async fn submit(
        &self,
        id: MemberId,
        content: impl Into<Bytes>,
    ) -> anyhow::Result<()> {
        let message = RaftMessage::NewEntryRequest(NewEntryRequest {
            from: id,
            store_id: self.store_id,
            content: content.into(),
        });
        self.member(id)?.inbound.handle(message).await;
        Ok(())
    }

    /// The leader with the highest term, if any member is leading.
    pub async fn leader(&self) -> Option<MemberId> {
        let mut leader = None;
        for (id, member) in &self.members {
            if member.machine.role().await == Role::Leader {
                let term = member.machine.term().await;
                if leader.is_none_or(|(_, t)| term > t) {
                    leader = Some((*id, term));
                }
            }
        }
        leader.map(|(id, _)| id)
    }

    pub async fn wait_for_leader(
        &self,
        timeout: Duration,
    ) -> anyhow::Result<MemberId> {
        tokio::time::timeout(timeout, async {
            loop {
                if let Some(leader) = self.leader().await {
                    return leader;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .map_err(|_| anyhow::anyhow!("No leader elected within {:?}", timeout))
    }

    /// Waits until member `id` has committed `index`.
    pub async fn wait_for_commit(
        &self,
        id: MemberId,
        index: LogIndex,
        timeout: Duration,
    ) -> anyhow::Result<()> {
        let mut commits = self.member(id)?.commits.clone();
        tokio::time::timeout(timeout, commits.wait_for(|c| *c >= index))
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "Member {} did not commit {} within {:?}",
                    id,
                    index,
                    timeout
                )
            })??;
        Ok(())
    }

    /// Cuts member `id` off from every other member.
    pub async fn isolate(&self, id: MemberId) {
        tracing::info!(id, "Isolating member");
        self.network.isolated.write().await.insert(id);
    }

    pub async fn heal(&self, id: MemberId) {
        tracing::info!(id, "Healing member");
        self.network.isolated.write().await.remove(&id);
    }
}

async fn route(
    machine: Arc<Machine>,
    mut events: mpsc::UnboundedReceiver<RaftEvent>,
    network: Arc<Network>,
    mut shipper: LogShipper,
    commits: watch::Sender<LogIndex>,
    snapshot_requests: watch::Sender<usize>,
) {
    let myself = machine.myself();
    while let Some(event) = events.recv().await {
        match event {
            RaftEvent::Send(directed) => network.deliver(myself, directed).await,
            RaftEvent::Ship(command) => {
                let shipped = machine
                    .read_state(|state| shipper.on_command(state, &command))
                    .await;
                match shipped {
                    Ok(messages) => {
                        for directed in messages {
                            network.deliver(myself, directed).await;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(id = myself, error = ?e, "Failed to ship entries");
                    }
                }
            }
            RaftEvent::RoleChanged { to, .. } => {
                if to.is_leader() {
                    shipper.reset();
                }
            }
            RaftEvent::CommitIndexAdvanced { commit_index } => {
                commits.send_replace(commit_index);
            }
            RaftEvent::SnapshotNeeded { leader } => {
                tracing::info!(id = myself, leader = ?leader, "Snapshot needed");
                snapshot_requests.send_modify(|n| *n += 1);
            }
        }
    }
}
