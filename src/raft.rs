use crate::error::RaftError;
use crate::log::{RaftLog, ReadableEntryLog};
use crate::node::handlers::{Candidate, Follower, Leader, RoleHandler};
use crate::outcome::{FollowerStates, Outcome};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub type Term = u64;
pub type LogIndex = i64;
pub type MemberId = u32;

/// Term reported for positions that hold no entry, e.g. the last log
/// term of an empty log. Entries are only ever written in terms >= 1.
pub const NO_TERM: Term = 0;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
pub enum Role {
    #[default]
    Follower,
    Candidate,
    Leader,
}

impl Role {
    pub fn handler(&self) -> &'static dyn RoleHandler {
        match self {
            Role::Follower => &Follower,
            Role::Candidate => &Candidate,
            Role::Leader => &Leader,
        }
    }

    pub fn is_follower(&self) -> bool {
        matches!(self, Role::Follower)
    }

    pub fn is_candidate(&self) -> bool {
        matches!(self, Role::Candidate)
    }

    pub fn is_leader(&self) -> bool {
        matches!(self, Role::Leader)
    }
}

/// The node's view of the cluster, read-only for decision logic.
pub trait ReadableRaftState {
    fn myself(&self) -> MemberId;
    fn voting_members(&self) -> &BTreeSet<MemberId>;
    fn term(&self) -> Term;
    fn leader(&self) -> Option<MemberId>;
    fn leader_commit(&self) -> LogIndex;
    fn voted_for(&self) -> Option<MemberId>;
    fn votes_for_me(&self) -> &BTreeSet<MemberId>;
    fn last_log_index_before_we_became_leader(&self) -> LogIndex;
    fn follower_states(&self) -> &FollowerStates;
    fn heartbeat_responses(&self) -> &BTreeSet<MemberId>;
    fn entry_log(&self) -> &dyn ReadableEntryLog;
    fn commit_index(&self) -> LogIndex;
}

#[derive(Debug)]
pub struct RaftState<L: RaftLog> {
    myself: MemberId,
    voting_members: BTreeSet<MemberId>,

    // Persistent state
    term: Term,
    voted_for: Option<MemberId>,
    entry_log: L,

    // Volatile state
    leader: Option<MemberId>,
    leader_commit: LogIndex,
    commit_index: LogIndex,
    votes_for_me: BTreeSet<MemberId>,
    last_log_index_before_we_became_leader: LogIndex,
    follower_states: FollowerStates,
    heartbeat_responses: BTreeSet<MemberId>,
}

impl<L: RaftLog> RaftState<L> {
    pub fn new(
        myself: MemberId,
        voting_members: BTreeSet<MemberId>,
        entry_log: L,
    ) -> Self {
        Self {
            myself,
            voting_members,
            term: 0,
            voted_for: None,
            entry_log,
            leader: None,
            leader_commit: -1,
            commit_index: -1,
            votes_for_me: BTreeSet::new(),
            last_log_index_before_we_became_leader: -1,
            follower_states: FollowerStates::new(),
            heartbeat_responses: BTreeSet::new(),
        }
    }

    /// Restores the persisted term and vote of a restarted member.
    pub fn with_term(mut self, term: Term, voted_for: Option<MemberId>) -> Self {
        self.term = term;
        self.voted_for = voted_for;
        self
    }

    pub fn entry_log_mut(&mut self) -> &mut L {
        &mut self.entry_log
    }

    pub fn raft_log(&self) -> &L {
        &self.entry_log
    }

    /// Applies the effects described by `outcome`.
    ///
    /// Log commands go first; if one fails the term, vote and leader are
    /// left as they were. The commit index never points past the appended
    /// entries.
    pub fn update(&mut self, outcome: &Outcome) -> Result<(), RaftError> {
        for command in &outcome.log_commands {
            command.apply_to(&mut self.entry_log)?;
        }

        if outcome.term < self.term {
            tracing::warn!(
                id = self.myself,
                current_term = self.term,
                outcome_term = outcome.term,
                "Ignoring outcome term older than current term"
            );
        } else {
            self.term = outcome.term;
        }
        self.voted_for = outcome.voted_for;
        self.leader = outcome.leader;
        self.leader_commit = outcome.leader_commit;
        self.votes_for_me = outcome.votes_for_me.clone();
        self.last_log_index_before_we_became_leader =
            outcome.last_log_index_before_we_became_leader;
        self.follower_states = outcome.follower_states.clone();
        self.heartbeat_responses = outcome.heartbeat_responses.clone();

        if let Some(commit_index) = outcome.commit_index {
            let commit_index = commit_index.min(self.entry_log.append_index());
            if commit_index > self.commit_index {
                self.commit_index = commit_index;
            }
        }

        Ok(())
    }
}

impl<L: RaftLog> ReadableRaftState for RaftState<L> {
    fn myself(&self) -> MemberId {
        self.myself
    }

    fn voting_members(&self) -> &BTreeSet<MemberId> {
        &self.voting_members
    }

    fn term(&self) -> Term {
        self.term
    }

    fn leader(&self) -> Option<MemberId> {
        self.leader
    }

    fn leader_commit(&self) -> LogIndex {
        self.leader_commit
    }

    fn voted_for(&self) -> Option<MemberId> {
        self.voted_for
    }

    fn votes_for_me(&self) -> &BTreeSet<MemberId> {
        &self.votes_for_me
    }

    fn last_log_index_before_we_became_leader(&self) -> LogIndex {
        self.last_log_index_before_we_became_leader
    }

    fn follower_states(&self) -> &FollowerStates {
        &self.follower_states
    }

    fn heartbeat_responses(&self) -> &BTreeSet<MemberId> {
        &self.heartbeat_responses
    }

    fn entry_log(&self) -> &dyn ReadableEntryLog {
        &self.entry_log
    }

    fn commit_index(&self) -> LogIndex {
        self.commit_index
    }
}
