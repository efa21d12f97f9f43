use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

use raft_consensus_core::cluster::LocalCluster;
use raft_consensus_core::config::Config;
use raft_consensus_core::raft::LogIndex;
use raft_consensus_core::trace::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "raft-sim")]
#[command(about = "Runs an in-process Raft cluster and replicates writes", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "3")]
    members: u32,

    #[arg(short, long, default_value = "100")]
    writes: usize,

    #[arg(long, default_value = "1024")]
    queue_size: usize,

    #[arg(long, default_value = "16")]
    max_batch: usize,

    #[arg(long, default_value = "64")]
    max_append_entries: usize,

    #[arg(long, default_value = "500")]
    election_timeout_ms: u64,

    #[arg(long, default_value = "100")]
    heartbeat_interval_ms: u64,

    /// Elect through the election timers instead of forcing member 1.
    #[arg(long)]
    timers: bool,

    #[arg(long, default_value = "10")]
    deadline_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    run().await
}

#[tracing::instrument(name = "raft-sim")]
async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing()?;

    let config = Config {
        queue_size: args.queue_size,
        max_batch: args.max_batch,
        max_append_entries: args.max_append_entries,
        election_timeout: Duration::from_millis(args.election_timeout_ms),
        heartbeat_interval: Duration::from_millis(args.heartbeat_interval_ms),
        ..Config::default()
    };
    let deadline = Duration::from_secs(args.deadline_secs);

    let mut cluster = LocalCluster::start(args.members, config).await?;
    if args.timers {
        cluster.start_timers();
    } else {
        cluster.trigger_election(1).await?;
    }
    let leader = cluster.wait_for_leader(deadline).await?;
    tracing::info!(leader, "Leader elected");

    let cluster = Arc::new(cluster);
    let mut producers = Vec::with_capacity(args.writes);
    for n in 0..args.writes {
        let cluster = Arc::clone(&cluster);
        producers.push(tokio::spawn(async move {
            cluster.submit(leader, format!("write-{}", n)).await
        }));
    }
    for producer in producers {
        producer.await??;
    }

    // Index 0 holds the leader's barrier entry.
    let last_index = args.writes as LogIndex;
    for id in cluster.member_ids() {
        cluster.wait_for_commit(id, last_index, deadline).await?;
    }

    for id in cluster.member_ids() {
        let member = cluster.member(id)?;
        println!(
            "member {}: role={:?} term={} commit_index={}",
            id,
            member.machine.role().await,
            member.machine.term().await,
            member.machine.commit_index().await,
        );
    }
    Ok(())
}
