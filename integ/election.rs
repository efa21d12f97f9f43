use crate::support::*;
use raft_consensus_core::cluster::LocalCluster;
use raft_consensus_core::raft::Role;
use std::time::Duration;

#[tokio::test]
async fn test_forced_election_elects_one_leader() -> anyhow::Result<()> {
    let cluster = elected(3, config()).await?;

    for id in cluster.member_ids() {
        let machine = &cluster.member(id)?.machine;
        assert_eq!(machine.term().await, 1);
        assert_eq!(machine.leader().await, Some(1));
    }
    assert_eq!(role(&cluster, 1).await?, Role::Leader);
    assert_eq!(role(&cluster, 2).await?, Role::Follower);
    assert_eq!(role(&cluster, 3).await?, Role::Follower);
    Ok(())
}

#[tokio::test]
async fn test_timers_elect_a_leader() -> anyhow::Result<()> {
    raft_consensus_core::trace::init_test_tracing();
    let config = raft_consensus_core::config::Config {
        election_timeout: Duration::from_millis(150),
        heartbeat_interval: Duration::from_millis(30),
        ..config()
    };
    let mut cluster = LocalCluster::start(3, config).await?;
    cluster.start_timers();

    let leader = cluster.wait_for_leader(DEADLINE).await?;
    cluster.wait_for_commit(leader, 0, DEADLINE).await?;

    let mut leaders = 0;
    for id in cluster.member_ids() {
        if role(&cluster, id).await? == Role::Leader {
            leaders += 1;
        }
    }
    assert!(leaders >= 1);
    Ok(())
}

#[tokio::test]
async fn test_isolated_leader_is_replaced_and_rejoins() -> anyhow::Result<()> {
    let cluster = elected(3, config()).await?;
    let cluster = &cluster;

    cluster.isolate(1).await;
    cluster.trigger_election(2).await?;
    eventually("member 2 to lead", move || async move {
        cluster.leader().await == Some(2)
    })
    .await?;
    assert_eq!(cluster.member(2)?.machine.term().await, 2);

    // Index 0 is the first barrier, index 1 the new leader's.
    for n in 0..3 {
        cluster.submit(2, format!("while-isolated-{}", n)).await?;
    }
    cluster.wait_for_commit(2, 4, DEADLINE).await?;
    cluster.wait_for_commit(3, 4, DEADLINE).await?;
    assert_eq!(cluster.member(1)?.machine.commit_index().await, 0);

    cluster.heal(1).await;
    cluster.trigger_heartbeat(2).await?;
    eventually("member 1 to step down", move || async move {
        role(cluster, 1).await.is_ok_and(|r| r == Role::Follower)
    })
    .await?;

    cluster.submit(2, "after-heal").await?;
    cluster.wait_for_commit(1, 5, DEADLINE).await?;

    let expected = entries(cluster, 2, 5).await?;
    assert_eq!(expected.len(), 6);
    assert_eq!(entries(cluster, 1, 5).await?, expected);
    assert_eq!(cluster.member(1)?.machine.term().await, 2);
    Ok(())
}
