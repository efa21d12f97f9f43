use raft_consensus_core::cluster::LocalCluster;
use raft_consensus_core::config::Config;
use raft_consensus_core::log::{LogEntry, RaftLog};
use raft_consensus_core::raft::{LogIndex, MemberId, Role};
use std::future::Future;
use std::time::Duration;

pub const DEADLINE: Duration = Duration::from_secs(5);

pub fn config() -> Config {
    Config {
        queue_size: 64,
        max_batch: 8,
        max_append_entries: 4,
        ..Config::default()
    }
}

/// Starts a cluster and elects member 1.
pub async fn elected(size: u32, config: Config) -> anyhow::Result<LocalCluster> {
    raft_consensus_core::trace::init_test_tracing();
    let cluster = LocalCluster::start(size, config).await?;
    cluster.trigger_election(1).await?;
    let leader = cluster.wait_for_leader(DEADLINE).await?;
    anyhow::ensure!(leader == 1, "expected member 1 to lead, got {}", leader);
    for id in cluster.member_ids() {
        cluster.wait_for_commit(id, 0, DEADLINE).await?;
    }
    Ok(cluster)
}

/// Polls `check` until it holds or `DEADLINE` passes.
pub async fn eventually<F, Fut>(what: &str, mut check: F) -> anyhow::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(DEADLINE, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("timed out waiting for {}", what))
}

pub async fn role(cluster: &LocalCluster, id: MemberId) -> anyhow::Result<Role> {
    Ok(cluster.member(id)?.machine.role().await)
}

/// Entries `0..=upto` as stored by member `id`.
pub async fn entries(
    cluster: &LocalCluster,
    id: MemberId,
    upto: LogIndex,
) -> anyhow::Result<Vec<LogEntry>> {
    let machine = &cluster.member(id)?.machine;
    let entries = machine
        .read_state(|state| {
            (0..=upto)
                .map(|index| state.raft_log().read_entry(index))
                .collect::<Result<Vec<_>, _>>()
        })
        .await?;
    Ok(entries.into_iter().flatten().collect())
}
