use crate::log::LogEntry;
use crate::raft::{LogIndex, MemberId, Term};
use crate::store::StoreId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    pub from: MemberId,
    pub store_id: StoreId,
    pub leader_term: Term,
    pub commit_index: LogIndex,
    pub commit_index_term: Term,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatResponse {
    pub from: MemberId,
    pub store_id: StoreId,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AppendEntriesRequest {
    pub from: MemberId,
    pub store_id: StoreId,
    pub leader_term: Term,
    pub prev_log_index: LogIndex,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry>,
    pub leader_commit: LogIndex,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AppendEntriesResponse {
    pub from: MemberId,
    pub store_id: StoreId,
    pub term: Term,
    pub success: bool,
    pub match_index: LogIndex,
    pub append_index: LogIndex,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VoteRequest {
    pub from: MemberId,
    pub store_id: StoreId,
    pub term: Term,
    pub candidate: MemberId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VoteResponse {
    pub from: MemberId,
    pub store_id: StoreId,
    pub term: Term,
    pub vote_granted: bool,
}

/// Tells a follower how far the leader has compacted its log.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LogCompactionInfo {
    pub from: MemberId,
    pub store_id: StoreId,
    pub leader_term: Term,
    pub prev_index: LogIndex,
}

/// A client write to be replicated.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NewEntryRequest {
    pub from: MemberId,
    pub store_id: StoreId,
    pub content: Bytes,
}

/// Consecutive client writes coalesced into one message.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NewEntryBatch {
    pub store_id: StoreId,
    contents: Vec<Bytes>,
}

impl NewEntryBatch {
    pub fn with_capacity(capacity: usize, store_id: StoreId) -> Self {
        Self {
            store_id,
            contents: Vec::with_capacity(capacity),
        }
    }

    pub fn add(&mut self, content: Bytes) {
        self.contents.push(content);
    }

    pub fn contents(&self) -> &[Bytes] {
        &self.contents
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }
}

/// Locally generated timer expiry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Timeout {
    pub from: MemberId,
    pub store_id: StoreId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Heartbeat,
    HeartbeatResponse,
    AppendEntriesRequest,
    AppendEntriesResponse,
    VoteRequest,
    VoteResponse,
    LogCompactionInfo,
    NewEntryRequest,
    NewEntryBatch,
    ElectionTimeout,
    HeartbeatTimeout,
}

impl MessageKind {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            MessageKind::ElectionTimeout | MessageKind::HeartbeatTimeout
        )
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum RaftMessage {
    Heartbeat(Heartbeat),
    HeartbeatResponse(HeartbeatResponse),
    AppendEntriesRequest(AppendEntriesRequest),
    AppendEntriesResponse(AppendEntriesResponse),
    VoteRequest(VoteRequest),
    VoteResponse(VoteResponse),
    LogCompactionInfo(LogCompactionInfo),
    NewEntryRequest(NewEntryRequest),
    NewEntryBatch(NewEntryBatch),
    ElectionTimeout(Timeout),
    HeartbeatTimeout(Timeout),
}

impl RaftMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            RaftMessage::Heartbeat(_) => MessageKind::Heartbeat,
            RaftMessage::HeartbeatResponse(_) => MessageKind::HeartbeatResponse,
            RaftMessage::AppendEntriesRequest(_) => {
                MessageKind::AppendEntriesRequest
            }
            RaftMessage::AppendEntriesResponse(_) => {
                MessageKind::AppendEntriesResponse
            }
            RaftMessage::VoteRequest(_) => MessageKind::VoteRequest,
            RaftMessage::VoteResponse(_) => MessageKind::VoteResponse,
            RaftMessage::LogCompactionInfo(_) => MessageKind::LogCompactionInfo,
            RaftMessage::NewEntryRequest(_) => MessageKind::NewEntryRequest,
            RaftMessage::NewEntryBatch(_) => MessageKind::NewEntryBatch,
            RaftMessage::ElectionTimeout(_) => MessageKind::ElectionTimeout,
            RaftMessage::HeartbeatTimeout(_) => MessageKind::HeartbeatTimeout,
        }
    }

    pub fn store_id(&self) -> StoreId {
        match self {
            RaftMessage::Heartbeat(m) => m.store_id,
            RaftMessage::HeartbeatResponse(m) => m.store_id,
            RaftMessage::AppendEntriesRequest(m) => m.store_id,
            RaftMessage::AppendEntriesResponse(m) => m.store_id,
            RaftMessage::VoteRequest(m) => m.store_id,
            RaftMessage::VoteResponse(m) => m.store_id,
            RaftMessage::LogCompactionInfo(m) => m.store_id,
            RaftMessage::NewEntryRequest(m) => m.store_id,
            RaftMessage::NewEntryBatch(m) => m.store_id,
            RaftMessage::ElectionTimeout(m) => m.store_id,
            RaftMessage::HeartbeatTimeout(m) => m.store_id,
        }
    }

    /// Sender of the message; a coalesced batch has none.
    pub fn sender(&self) -> Option<MemberId> {
        match self {
            RaftMessage::Heartbeat(m) => Some(m.from),
            RaftMessage::HeartbeatResponse(m) => Some(m.from),
            RaftMessage::AppendEntriesRequest(m) => Some(m.from),
            RaftMessage::AppendEntriesResponse(m) => Some(m.from),
            RaftMessage::VoteRequest(m) => Some(m.from),
            RaftMessage::VoteResponse(m) => Some(m.from),
            RaftMessage::LogCompactionInfo(m) => Some(m.from),
            RaftMessage::NewEntryRequest(m) => Some(m.from),
            RaftMessage::NewEntryBatch(_) => None,
            RaftMessage::ElectionTimeout(m) => Some(m.from),
            RaftMessage::HeartbeatTimeout(m) => Some(m.from),
        }
    }
}

/// A message addressed to one member.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Directed {
    pub to: MemberId,
    pub message: RaftMessage,
}

impl Directed {
    pub fn new(to: MemberId, message: RaftMessage) -> Self {
        Self { to, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_are_timeout_class() {
        let store_id = StoreId::new(1, 1);
        let election = RaftMessage::ElectionTimeout(Timeout { from: 1, store_id });
        let heartbeat = RaftMessage::HeartbeatTimeout(Timeout { from: 1, store_id });
        let vote = RaftMessage::VoteRequest(VoteRequest {
            from: 2,
            store_id,
            term: 1,
            candidate: 2,
            last_log_index: -1,
            last_log_term: 0,
        });

        assert!(election.kind().is_timeout());
        assert!(heartbeat.kind().is_timeout());
        assert!(!vote.kind().is_timeout());
        assert_eq!(vote.sender(), Some(2));
    }

    #[test]
    fn test_batch_keeps_insertion_order() {
        let mut batch = NewEntryBatch::with_capacity(2, StoreId::new(1, 1));
        assert!(batch.is_empty());

        batch.add(Bytes::from_static(b"a"));
        batch.add(Bytes::from_static(b"c"));

        assert_eq!(batch.len(), 2);
        assert_eq!(
            batch.contents(),
            &[Bytes::from_static(b"a"), Bytes::from_static(b"c")]
        );
        assert_eq!(RaftMessage::NewEntryBatch(batch).sender(), None);
    }
}
