//! The effects of processing one message.
//!
//! An [`Outcome`] is seeded from the current state, filled in by a role
//! handler and consumed once by [`crate::raft::RaftState::update`].

use crate::error::LogError;
use crate::log::{LogEntry, RaftLog, ReadableEntryLog};
use crate::messages::Directed;
use crate::raft::{LogIndex, MemberId, ReadableRaftState, Role, Term};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowerState {
    pub match_index: LogIndex,
}

impl Default for FollowerState {
    fn default() -> Self {
        Self { match_index: -1 }
    }
}

/// Replication progress of each follower, as tracked by a leader.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FollowerStates {
    states: BTreeMap<MemberId, FollowerState>,
}

impl FollowerStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, member: MemberId) -> FollowerState {
        self.states.get(&member).copied().unwrap_or_default()
    }

    pub fn on_success_response(&mut self, member: MemberId, match_index: LogIndex) {
        self.states.insert(member, FollowerState { match_index });
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Mutation of the entry log requested by a role handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogCommand {
    Append { index: LogIndex, entry: LogEntry },
    BatchAppend {
        base_index: LogIndex,
        entries: Vec<LogEntry>,
    },
    Truncate { from_index: LogIndex },
}

impl LogCommand {
    pub fn apply_to<L: RaftLog + ?Sized>(&self, log: &mut L) -> Result<(), LogError> {
        match self {
            LogCommand::Append { index, entry } => {
                check_contiguous(log, *index)?;
                log.append(std::slice::from_ref(entry))?;
            }
            LogCommand::BatchAppend {
                base_index,
                entries,
            } => {
                check_contiguous(log, *base_index)?;
                log.append(entries)?;
            }
            LogCommand::Truncate { from_index } => {
                log.truncate(*from_index)?;
            }
        }
        Ok(())
    }
}

fn check_contiguous<L: RaftLog + ?Sized>(log: &L, index: LogIndex) -> Result<(), LogError> {
    let append_index = log.append_index();
    if index != append_index + 1 {
        return Err(LogError::OutOfRange {
            index,
            append_index,
        });
    }
    Ok(())
}

/// Instruction for the leader's log shipper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShipCommand {
    /// The follower matches up to `prev_log_index`; continue from there.
    Match {
        prev_log_index: LogIndex,
        target: MemberId,
    },
    /// The follower rejected our history; probe backwards.
    Mismatch {
        last_remote_append_index: LogIndex,
        target: MemberId,
    },
    NewEntries {
        prev_log_index: LogIndex,
        prev_log_term: Term,
        entries: Vec<LogEntry>,
    },
    CommitUpdate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// Role to move to; `None` stays in the current role.
    pub next_role: Option<Role>,

    pub term: Term,
    pub leader: Option<MemberId>,
    pub leader_commit: LogIndex,
    pub voted_for: Option<MemberId>,
    pub renew_election_timeout: bool,
    pub needs_fresh_snapshot: bool,
    pub processable: bool,

    /// New commit index; `None` leaves it unchanged.
    pub commit_index: Option<LogIndex>,

    pub votes_for_me: BTreeSet<MemberId>,
    pub last_log_index_before_we_became_leader: LogIndex,
    pub follower_states: FollowerStates,
    pub heartbeat_responses: BTreeSet<MemberId>,

    pub log_commands: Vec<LogCommand>,
    pub outgoing_messages: Vec<Directed>,
    pub ship_commands: Vec<ShipCommand>,

    pub elected_leader: bool,
    pub stepping_down: bool,
}

impl Outcome {
    pub fn new(state: &dyn ReadableRaftState) -> Self {
        Self {
            next_role: None,
            term: state.term(),
            leader: state.leader(),
            leader_commit: state.leader_commit(),
            voted_for: state.voted_for(),
            renew_election_timeout: false,
            needs_fresh_snapshot: false,
            processable: true,
            commit_index: None,
            votes_for_me: state.votes_for_me().clone(),
            last_log_index_before_we_became_leader: state
                .last_log_index_before_we_became_leader(),
            follower_states: state.follower_states().clone(),
            heartbeat_responses: state.heartbeat_responses().clone(),
            log_commands: Vec::new(),
            outgoing_messages: Vec::new(),
            ship_commands: Vec::new(),
            elected_leader: false,
            stepping_down: false,
        }
    }

    pub fn set_next_role(&mut self, role: Role) {
        self.next_role = Some(role);
    }

    /// Adopts `term` if it is newer; the observed term never goes back.
    /// A vote cast in an older term does not carry over.
    pub fn set_next_term(&mut self, term: Term) {
        if term > self.term {
            self.term = term;
            self.voted_for = None;
        }
    }

    pub fn renew_election_timeout(&mut self) {
        self.renew_election_timeout = true;
    }

    pub fn mark_need_for_fresh_snapshot(&mut self) {
        self.needs_fresh_snapshot = true;
    }

    pub fn mark_unprocessable(&mut self) {
        self.processable = false;
    }

    pub fn add_outgoing_message(&mut self, message: Directed) {
        self.outgoing_messages.push(message);
    }

    pub fn add_log_command(&mut self, command: LogCommand) {
        self.log_commands.push(command);
    }

    pub fn add_ship_command(&mut self, command: ShipCommand) {
        self.ship_commands.push(command);
    }

    pub fn step_down(&mut self) {
        self.stepping_down = true;
        self.leader = None;
        self.set_next_role(Role::Follower);
    }

    pub fn elected_leader(&mut self) {
        self.elected_leader = true;
        self.set_next_role(Role::Leader);
    }

    /// The role in effect once this outcome is applied.
    pub fn role_after(&self, current: Role) -> Role {
        self.next_role.unwrap_or(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::InMemoryRaftLog;
    use crate::raft::RaftState;

    fn state() -> RaftState<InMemoryRaftLog> {
        RaftState::new(1, [1, 2, 3].into_iter().collect(), InMemoryRaftLog::new())
            .with_term(4, Some(2))
    }

    #[test]
    fn test_outcome_is_seeded_from_state() {
        let state = state();
        let outcome = Outcome::new(&state);

        assert_eq!(outcome.term, 4);
        assert_eq!(outcome.voted_for, Some(2));
        assert_eq!(outcome.next_role, None);
        assert_eq!(outcome.commit_index, None);
        assert!(outcome.processable);
        assert!(!outcome.needs_fresh_snapshot);
        assert_eq!(outcome.role_after(Role::Candidate), Role::Candidate);
    }

    #[test]
    fn test_set_next_term_never_regresses() {
        let state = state();
        let mut outcome = Outcome::new(&state);

        outcome.set_next_term(2);
        assert_eq!(outcome.term, 4);

        outcome.set_next_term(9);
        assert_eq!(outcome.term, 9);
    }

    #[test]
    fn test_newer_term_clears_vote() {
        let state = state();
        let mut outcome = Outcome::new(&state);

        outcome.set_next_term(4);
        assert_eq!(outcome.voted_for, Some(2));

        outcome.set_next_term(5);
        assert_eq!(outcome.term, 5);
        assert_eq!(outcome.voted_for, None);
    }

    #[test]
    fn test_append_command_must_be_contiguous() {
        let mut log = InMemoryRaftLog::new();
        let command = LogCommand::Append {
            index: 3,
            entry: LogEntry::new(1, "x"),
        };

        assert!(matches!(
            command.apply_to(&mut log),
            Err(LogError::OutOfRange {
                index: 3,
                append_index: -1
            })
        ));
    }

    #[test]
    fn test_follower_states_default_to_no_match() {
        let mut states = FollowerStates::new();
        assert_eq!(states.get(7).match_index, -1);

        states.on_success_response(7, 12);
        assert_eq!(states.get(7).match_index, 12);
        assert_eq!(states.len(), 1);
    }
}
