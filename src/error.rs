use crate::raft::{LogIndex, Term};
use crate::store::StoreId;
use thiserror::Error;

/// Failures raised by an entry log implementation.
#[derive(Error, Debug)]
pub enum LogError {
    #[error("Entry log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Index {index} is inside the compacted prefix (prev index {prev_index})")]
    Compacted { index: LogIndex, prev_index: LogIndex },

    #[error("Index {index} is not contiguous with append index {append_index}")]
    OutOfRange {
        index: LogIndex,
        append_index: LogIndex,
    },
}

/// Conditions that stop the processing of a single message.
#[derive(Error, Debug)]
pub enum RaftError {
    #[error("Local store is not healthy: {0}")]
    UnhealthyStore(String),

    #[error("Store id mismatch: expected {expected:?}, received {actual:?}")]
    StoreIdMismatch { expected: StoreId, actual: StoreId },

    #[error(
        "Cannot truncate entry {index} which is at or below commit index {commit_index}"
    )]
    TruncateCommitted {
        index: LogIndex,
        commit_index: LogIndex,
    },

    #[error("Two leaders in the same term {term}")]
    TwoLeaders { term: Term },

    #[error(transparent)]
    Log(#[from] LogError),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Queue size must be at least 1")]
    ZeroQueueSize,

    #[error("Max batch must be at least 1")]
    ZeroMaxBatch,

    #[error("Heartbeat interval {heartbeat_ms}ms must be shorter than election timeout {election_ms}ms")]
    HeartbeatTooSlow { heartbeat_ms: u128, election_ms: u128 },
}

pub type Result<T> = std::result::Result<T, RaftError>;
