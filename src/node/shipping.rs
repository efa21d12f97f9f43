//! Turning a leader's ship commands into append requests.
//!
//! The leader's role handler only decides *what* needs replicating; the
//! [`LogShipper`] reads the log and produces the messages. It keeps a
//! probe index per follower while walking back over a mismatch.

use crate::error::RaftError;
use crate::log::{LogEntry, RaftLog, ReadableEntryLog};
use crate::messages::{
    AppendEntriesRequest, Directed, LogCompactionInfo, RaftMessage,
};
use crate::outcome::ShipCommand;
use crate::raft::{LogIndex, MemberId, NO_TERM, RaftState, ReadableRaftState, Term};
use crate::store::StoreId;
use std::collections::BTreeMap;

pub struct LogShipper {
    myself: MemberId,
    store_id: StoreId,
    max_entries: usize,
    probes: BTreeMap<MemberId, LogIndex>,
}

impl LogShipper {
    pub fn new(myself: MemberId, store_id: StoreId, max_entries: usize) -> Self {
        Self {
            myself,
            store_id,
            max_entries: max_entries.max(1),
            probes: BTreeMap::new(),
        }
    }

    /// Forgets per-follower progress, e.g. after winning an election.
    pub fn reset(&mut self) {
        self.probes.clear();
    }

    /// Messages realising `command` against the current leader state.
    /// Nothing is shipped once we are no longer the leader.
    pub fn on_command<L: RaftLog>(
        &mut self,
        state: &RaftState<L>,
        command: &ShipCommand,
    ) -> Result<Vec<Directed>, RaftError> {
        if state.leader() != Some(self.myself) {
            tracing::debug!(
                id = self.myself,
                command = ?command,
                "Not leading anymore, dropping ship command"
            );
            return Ok(Vec::new());
        }

        let mut shipped = Vec::new();
        match command {
            ShipCommand::NewEntries {
                prev_log_index,
                prev_log_term,
                entries,
            } => {
                for target in self.followers(state) {
                    shipped.push(self.append(
                        state,
                        target,
                        *prev_log_index,
                        *prev_log_term,
                        entries.clone(),
                    ));
                }
            }
            ShipCommand::Match {
                prev_log_index,
                target,
            } => {
                self.probes.remove(target);
                shipped.push(self.catch_up(state, *target, *prev_log_index)?);
            }
            ShipCommand::Mismatch {
                last_remote_append_index,
                target,
            } => {
                let last_probe = self
                    .probes
                    .get(target)
                    .copied()
                    .unwrap_or(state.raft_log().append_index());
                let prev_log_index =
                    (*last_remote_append_index).min(last_probe - 1).max(-1);
                self.probes.insert(*target, prev_log_index);
                tracing::debug!(
                    id = self.myself,
                    follower = *target,
                    prev_log_index,
                    "Probing follower log after mismatch"
                );
                shipped.push(self.catch_up(state, *target, prev_log_index)?);
            }
            ShipCommand::CommitUpdate => {
                let log = state.raft_log();
                let append_index = log.append_index();
                let append_term =
                    log.read_entry_term(append_index)?.unwrap_or(NO_TERM);
                for target in self.followers(state) {
                    shipped.push(self.append(
                        state,
                        target,
                        append_index,
                        append_term,
                        Vec::new(),
                    ));
                }
            }
        }
        Ok(shipped)
    }

    fn followers<L: RaftLog>(&self, state: &RaftState<L>) -> Vec<MemberId> {
        state
            .voting_members()
            .iter()
            .copied()
            .filter(|member| *member != self.myself)
            .collect()
    }

    /// Sends entries following `prev_log_index`, or compaction info when
    /// those entries are gone.
    fn catch_up<L: RaftLog>(
        &self,
        state: &RaftState<L>,
        target: MemberId,
        prev_log_index: LogIndex,
    ) -> Result<Directed, RaftError> {
        let log = state.raft_log();
        if prev_log_index < log.prev_index() {
            return Ok(Directed::new(
                target,
                RaftMessage::LogCompactionInfo(LogCompactionInfo {
                    from: self.myself,
                    store_id: self.store_id,
                    leader_term: state.term(),
                    prev_index: log.prev_index(),
                }),
            ));
        }

        let prev_log_term =
            log.read_entry_term(prev_log_index)?.unwrap_or(NO_TERM);
        let last = log
            .append_index()
            .min(prev_log_index + self.max_entries as LogIndex);
        let mut entries = Vec::new();
        for index in prev_log_index + 1..=last {
            if let Some(entry) = log.read_entry(index)? {
                entries.push(entry);
            }
        }

        Ok(self.append(state, target, prev_log_index, prev_log_term, entries))
    }

    fn append<L: RaftLog>(
        &self,
        state: &RaftState<L>,
        target: MemberId,
        prev_log_index: LogIndex,
        prev_log_term: Term,
        entries: Vec<LogEntry>,
    ) -> Directed {
        Directed::new(
            target,
            RaftMessage::AppendEntriesRequest(AppendEntriesRequest {
                from: self.myself,
                store_id: self.store_id,
                leader_term: state.term(),
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit: state.commit_index(),
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::super::handlers::test_support::*;
    use super::*;
    use crate::log::InMemoryRaftLog;
    use crate::outcome::Outcome;

    fn leader_state(entry_terms: &[u64]) -> RaftState<InMemoryRaftLog> {
        let mut state = state_with_log(2, entry_terms).with_term(2, Some(1));
        let mut outcome = Outcome::new(&state);
        outcome.leader = Some(1);
        state.update(&outcome).expect("in-memory update");
        state
    }

    fn request(directed: &Directed) -> &AppendEntriesRequest {
        match &directed.message {
            RaftMessage::AppendEntriesRequest(request) => request,
            other => panic!("Expected AppendEntriesRequest, got {:?}", other),
        }
    }

    #[test]
    fn test_new_entries_go_to_every_follower() -> anyhow::Result<()> {
        let state = leader_state(&[1, 2]);
        let mut shipper = LogShipper::new(1, STORE, 8);

        let shipped = shipper.on_command(
            &state,
            &ShipCommand::NewEntries {
                prev_log_index: 0,
                prev_log_term: 1,
                entries: vec![LogEntry::new(2, "")],
            },
        )?;

        let targets: Vec<_> = shipped.iter().map(|d| d.to).collect();
        assert_eq!(targets, vec![2, 3]);
        let first = request(&shipped[0]);
        assert_eq!(first.leader_term, 2);
        assert_eq!(first.prev_log_index, 0);
        assert_eq!(first.entries.len(), 1);
        Ok(())
    }

    #[test]
    fn test_match_sends_following_entries_up_to_limit() -> anyhow::Result<()> {
        let state = leader_state(&[1, 1, 2, 2, 2]);
        let mut shipper = LogShipper::new(1, STORE, 2);

        let shipped = shipper.on_command(
            &state,
            &ShipCommand::Match {
                prev_log_index: 1,
                target: 3,
            },
        )?;

        let sent = request(&shipped[0]);
        assert_eq!(shipped[0].to, 3);
        assert_eq!(sent.prev_log_index, 1);
        assert_eq!(sent.prev_log_term, 1);
        let terms: Vec<_> = sent.entries.iter().map(|e| e.term).collect();
        assert_eq!(terms, vec![2, 2]);
        Ok(())
    }

    #[test]
    fn test_repeated_mismatch_walks_backwards() -> anyhow::Result<()> {
        let state = leader_state(&[1, 1, 2, 2, 2]);
        let mut shipper = LogShipper::new(1, STORE, 8);
        let mismatch = ShipCommand::Mismatch {
            last_remote_append_index: 10,
            target: 2,
        };

        let first = shipper.on_command(&state, &mismatch)?;
        assert_eq!(request(&first[0]).prev_log_index, 3);

        let second = shipper.on_command(&state, &mismatch)?;
        assert_eq!(request(&second[0]).prev_log_index, 2);
        assert_eq!(request(&second[0]).entries.len(), 2);
        Ok(())
    }

    #[test]
    fn test_mismatch_inside_compacted_prefix_sends_compaction_info()
    -> anyhow::Result<()> {
        let mut state = leader_state(&[1, 1, 2, 2]);
        commit(&mut state, 2);
        prune(&mut state, 2);
        let mut shipper = LogShipper::new(1, STORE, 8);

        let shipped = shipper.on_command(
            &state,
            &ShipCommand::Mismatch {
                last_remote_append_index: 0,
                target: 3,
            },
        )?;

        match &shipped[..] {
            [Directed {
                to: 3,
                message: RaftMessage::LogCompactionInfo(info),
            }] => assert_eq!(info.prev_index, 2),
            other => panic!("Expected LogCompactionInfo, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_commit_update_is_an_empty_append() -> anyhow::Result<()> {
        let mut state = leader_state(&[1, 2]);
        commit(&mut state, 1);
        let mut shipper = LogShipper::new(1, STORE, 8);

        let shipped = shipper.on_command(&state, &ShipCommand::CommitUpdate)?;

        assert_eq!(shipped.len(), 2);
        let sent = request(&shipped[1]);
        assert!(sent.entries.is_empty());
        assert_eq!(sent.prev_log_index, 1);
        assert_eq!(sent.prev_log_term, 2);
        assert_eq!(sent.leader_commit, 1);
        Ok(())
    }

    #[test]
    fn test_followers_ship_nothing() -> anyhow::Result<()> {
        let state = state_with_leader(2, 3);
        let mut shipper = LogShipper::new(1, STORE, 8);

        let shipped = shipper.on_command(&state, &ShipCommand::CommitUpdate)?;

        assert!(shipped.is_empty());
        Ok(())
    }
}
