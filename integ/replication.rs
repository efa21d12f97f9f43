use crate::support::*;
use bytes::Bytes;
use raft_consensus_core::config::Config;
use std::sync::Arc;

#[tokio::test]
async fn test_writes_commit_on_every_member() -> anyhow::Result<()> {
    let cluster = elected(3, config()).await?;

    for n in 1..=10 {
        cluster.submit(1, format!("write-{}", n)).await?;
    }
    for id in cluster.member_ids() {
        cluster.wait_for_commit(id, 10, DEADLINE).await?;
    }

    let leader_log = entries(&cluster, 1, 10).await?;
    assert_eq!(leader_log.len(), 11);
    assert!(leader_log[0].content.is_empty());
    let contents: Vec<_> = leader_log[1..].iter().map(|e| e.content.clone()).collect();
    let expected: Vec<_> = (1..=10)
        .map(|n| Bytes::from(format!("write-{}", n)))
        .collect();
    assert_eq!(contents, expected);

    for id in [2, 3] {
        assert_eq!(entries(&cluster, id, 10).await?, leader_log);
    }
    Ok(())
}

#[tokio::test]
async fn test_concurrent_writes_through_a_small_queue() -> anyhow::Result<()> {
    let config = Config {
        queue_size: 2,
        max_batch: 4,
        ..config()
    };
    let cluster = Arc::new(elected(3, config).await?);

    let mut producers = Vec::new();
    for n in 0..40 {
        let cluster = Arc::clone(&cluster);
        producers.push(tokio::spawn(async move {
            cluster.submit(1, format!("write-{}", n)).await
        }));
    }
    for producer in producers {
        producer.await??;
    }

    for id in cluster.member_ids() {
        cluster.wait_for_commit(id, 40, DEADLINE).await?;
    }

    let leader_log = entries(&cluster, 1, 40).await?;
    assert_eq!(leader_log.len(), 41);
    let mut contents: Vec<_> = leader_log[1..].iter().map(|e| e.content.clone()).collect();
    contents.sort();
    contents.dedup();
    assert_eq!(contents.len(), 40);
    assert_eq!(entries(&cluster, 3, 40).await?, leader_log);
    Ok(())
}

#[tokio::test]
async fn test_writes_need_a_majority_to_commit() -> anyhow::Result<()> {
    let cluster = elected(3, config()).await?;

    cluster.isolate(2).await;
    cluster.isolate(3).await;
    cluster.submit(1, "stuck").await?;
    assert!(
        cluster
            .wait_for_commit(1, 1, std::time::Duration::from_millis(200))
            .await
            .is_err()
    );

    cluster.heal(3).await;
    cluster.submit(1, "unstuck").await?;
    cluster.wait_for_commit(1, 2, DEADLINE).await?;
    cluster.wait_for_commit(3, 2, DEADLINE).await?;
    assert_eq!(cluster.member(2)?.machine.commit_index().await, 0);
    Ok(())
}

#[tokio::test]
async fn test_lagging_follower_past_compaction_asks_for_snapshot() -> anyhow::Result<()> {
    let cluster = elected(3, config()).await?;
    let cluster = &cluster;

    cluster.isolate(3).await;
    for n in 1..=5 {
        cluster.submit(1, format!("write-{}", n)).await?;
    }
    cluster.wait_for_commit(1, 5, DEADLINE).await?;
    let prev_index = cluster.member(1)?.machine.prune_log(5).await?;
    assert_eq!(prev_index, 5);

    cluster.heal(3).await;
    cluster.submit(1, "after-compaction").await?;
    eventually("member 3 to request a snapshot", move || async move {
        cluster.member(3).is_ok_and(|m| m.snapshot_requests() > 0)
    })
    .await?;

    assert_eq!(cluster.member(3)?.machine.commit_index().await, 0);
    assert_eq!(cluster.member(1)?.snapshot_requests(), 0);
    Ok(())
}
