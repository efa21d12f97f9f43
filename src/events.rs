use crate::messages::Directed;
use crate::outcome::ShipCommand;
use crate::raft::{LogIndex, MemberId, Role, Term};

/// Effects of an applied outcome that reach beyond the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum RaftEvent {
    RoleChanged { from: Role, to: Role, term: Term },
    CommitIndexAdvanced { commit_index: LogIndex },
    SnapshotNeeded { leader: Option<MemberId> },
    Send(Directed),
    Ship(ShipCommand),
}
