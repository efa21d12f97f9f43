//! Entry log contracts used by the consensus core.
//!
//! Role handlers only ever see [`ReadableEntryLog`]. The write side,
//! [`RaftLog`], is reserved for the step that applies an outcome.

use crate::error::LogError;
use crate::raft::{LogIndex, Term};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: Term,
    pub content: Bytes,
}

impl LogEntry {
    pub fn new(term: Term, content: impl Into<Bytes>) -> Self {
        Self {
            term,
            content: content.into(),
        }
    }
}

pub trait ReadableEntryLog {
    /// Highest index discarded by compaction, `-1` if nothing was compacted.
    fn prev_index(&self) -> LogIndex;

    /// Highest appended index, `-1` for an empty log.
    fn append_index(&self) -> LogIndex;

    /// Term of the entry at `index`, or `None` when no such entry exists
    /// (not yet appended or already compacted).
    fn read_entry_term(&self, index: LogIndex)
    -> Result<Option<Term>, LogError>;
}

pub trait RaftLog: ReadableEntryLog + Send + Sync {
    /// Appends at `append_index() + 1` and returns the new append index.
    fn append(&mut self, entries: &[LogEntry]) -> Result<LogIndex, LogError>;

    /// Removes every entry from `from_index` onwards.
    fn truncate(&mut self, from_index: LogIndex) -> Result<(), LogError>;

    /// Compacts the prefix up to `safe_index` and returns the new prev index.
    fn prune(&mut self, safe_index: LogIndex) -> Result<LogIndex, LogError>;

    fn read_entry(&self, index: LogIndex) -> Result<Option<LogEntry>, LogError>;
}

/// Entry log kept entirely in memory.
///
/// `entries[0]` sits at `prev_index + 1`. The term of the last compacted
/// entry is retained so `read_entry_term(prev_index)` still answers.
#[derive(Debug, Clone)]
pub struct InMemoryRaftLog {
    prev_index: LogIndex,
    prev_term: Option<Term>,
    entries: Vec<LogEntry>,
}

impl Default for InMemoryRaftLog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRaftLog {
    pub fn new() -> Self {
        Self {
            prev_index: -1,
            prev_term: None,
            entries: Vec::new(),
        }
    }

    pub fn with_entries(entries: Vec<LogEntry>) -> Self {
        Self {
            prev_index: -1,
            prev_term: None,
            entries,
        }
    }

    fn position(&self, index: LogIndex) -> Option<usize> {
        if index <= self.prev_index || index > self.append_index() {
            return None;
        }
        Some((index - self.prev_index - 1) as usize)
    }
}

impl ReadableEntryLog for InMemoryRaftLog {
    fn prev_index(&self) -> LogIndex {
        self.prev_index
    }

    fn append_index(&self) -> LogIndex {
        self.prev_index + self.entries.len() as LogIndex
    }

    fn read_entry_term(
        &self,
        index: LogIndex,
    ) -> Result<Option<Term>, LogError> {
        if index == self.prev_index {
            return Ok(self.prev_term);
        }
        Ok(self.position(index).map(|pos| self.entries[pos].term))
    }
}

impl RaftLog for InMemoryRaftLog {
    fn append(&mut self, entries: &[LogEntry]) -> Result<LogIndex, LogError> {
        self.entries.extend_from_slice(entries);
        Ok(self.append_index())
    }

    fn truncate(&mut self, from_index: LogIndex) -> Result<(), LogError> {
        if from_index <= self.prev_index {
            return Err(LogError::Compacted {
                index: from_index,
                prev_index: self.prev_index,
            });
        }
        if from_index > self.append_index() {
            return Err(LogError::OutOfRange {
                index: from_index,
                append_index: self.append_index(),
            });
        }
        let keep = (from_index - self.prev_index - 1) as usize;
        self.entries.truncate(keep);
        Ok(())
    }

    fn prune(&mut self, safe_index: LogIndex) -> Result<LogIndex, LogError> {
        let upto = safe_index.min(self.append_index());
        if upto <= self.prev_index {
            return Ok(self.prev_index);
        }
        let count = (upto - self.prev_index) as usize;
        let last = self.entries.drain(..count).last();
        self.prev_term = last.map(|e| e.term);
        self.prev_index = upto;
        Ok(self.prev_index)
    }

    fn read_entry(&self, index: LogIndex) -> Result<Option<LogEntry>, LogError> {
        Ok(self.position(index).map(|pos| self.entries[pos].clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    fn entries(terms: &[Term]) -> Vec<LogEntry> {
        terms.iter().map(|t| LogEntry::new(*t, Bytes::new())).collect()
    }

    #[test]
    fn test_empty_log_has_no_terms() -> anyhow::Result<()> {
        let log = InMemoryRaftLog::new();
        assert_eq!(log.prev_index(), -1);
        assert_eq!(log.append_index(), -1);
        assert_eq!(log.read_entry_term(-1)?, None);
        assert_eq!(log.read_entry_term(0)?, None);
        Ok(())
    }

    #[test]
    fn test_append_and_read_terms() -> anyhow::Result<()> {
        let mut log = InMemoryRaftLog::new();
        let append_index = log.append(&entries(&[1, 1, 2]))?;

        assert_eq!(append_index, 2);
        assert_eq!(log.read_entry_term(0)?, Some(1));
        assert_eq!(log.read_entry_term(2)?, Some(2));
        assert_eq!(log.read_entry_term(3)?, None);
        Ok(())
    }

    #[test]
    fn test_truncate_removes_suffix() -> anyhow::Result<()> {
        let mut log = InMemoryRaftLog::with_entries(entries(&[1, 1, 2, 2]));
        log.truncate(2)?;

        assert_eq!(log.append_index(), 1);
        assert_eq!(log.read_entry_term(2)?, None);
        Ok(())
    }

    #[test]
    fn test_prune_keeps_prev_term() -> anyhow::Result<()> {
        let mut log = InMemoryRaftLog::with_entries(entries(&[1, 2, 3, 3]));
        let prev_index = log.prune(1)?;

        assert_eq!(prev_index, 1);
        assert_eq!(log.append_index(), 3);
        assert_eq!(log.read_entry_term(0)?, None);
        assert_eq!(log.read_entry_term(1)?, Some(2));
        assert_eq!(log.read_entry(2)?.map(|e| e.term), Some(3));
        assert_eq!(log.read_entry(1)?, None);
        Ok(())
    }

    #[test]
    fn test_prune_is_capped_by_append_index() -> anyhow::Result<()> {
        let mut log = InMemoryRaftLog::with_entries(entries(&[1, 1]));
        assert_eq!(log.prune(10)?, 1);
        assert_eq!(log.append_index(), 1);
        assert_eq!(log.prune(0)?, 1);
        Ok(())
    }

    #[test]
    fn test_truncate_inside_compacted_prefix_fails() -> anyhow::Result<()> {
        let mut log = InMemoryRaftLog::with_entries(entries(&[1, 1, 1]));
        log.prune(1)?;

        assert!(matches!(
            log.truncate(1),
            Err(LogError::Compacted {
                index: 1,
                prev_index: 1
            })
        ));
        assert!(matches!(
            log.truncate(5),
            Err(LogError::OutOfRange { .. })
        ));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_readers_see_consistent_bounds()
    -> anyhow::Result<()> {
        let log = Arc::new(RwLock::new(InMemoryRaftLog::new()));

        let writer = {
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                for i in 0..500u64 {
                    let mut log = log.write().await;
                    log.append(&[LogEntry::new(i / 10 + 1, Bytes::new())])?;
                    if i % 50 == 49 {
                        let target = log.append_index() - 5;
                        log.prune(target)?;
                    }
                }
                Ok::<_, LogError>(())
            })
        };

        let mut readers = Vec::new();
        for _ in 0..4 {
            let log = Arc::clone(&log);
            readers.push(tokio::spawn(async move {
                for _ in 0..500 {
                    let log = log.read().await;
                    let prev = log.prev_index();
                    let append = log.append_index();
                    assert!(prev <= append);
                    if append > prev {
                        assert!(log.read_entry_term(append)?.is_some());
                    }
                    drop(log);
                    tokio::task::yield_now().await;
                }
                Ok::<_, LogError>(())
            }));
        }

        writer.await??;
        for reader in readers {
            reader.await??;
        }

        let log = log.read().await;
        assert_eq!(log.append_index(), 499);
        Ok(())
    }
}
