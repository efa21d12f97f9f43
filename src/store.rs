//! Identity and health of the local data store.

use crate::error::RaftError;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Binds a local store to one specific database instance.
///
/// Two ids identify the same store only when every field matches.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct StoreId {
    pub creation_time: u64,
    pub random_id: u64,
}

impl StoreId {
    pub fn new(creation_time: u64, random_id: u64) -> Self {
        Self {
            creation_time,
            random_id,
        }
    }

    /// Mints a fresh id for a newly created store.
    pub fn random() -> Self {
        let creation_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            creation_time,
            random_id: rand::random(),
        }
    }
}

/// Read side of the local store as seen by the role handlers.
pub trait LocalDatabase: Send + Sync {
    /// Fails with [`RaftError::UnhealthyStore`] if the store cannot be used.
    fn assert_healthy(&self) -> Result<(), RaftError>;

    fn store_id(&self) -> StoreId;

    /// True until the store has been initialized with real data.
    fn is_empty(&self) -> bool;
}

#[derive(Debug)]
pub struct InMemoryDatabase {
    store_id: StoreId,
    healthy: AtomicBool,
    empty: AtomicBool,
}

impl InMemoryDatabase {
    pub fn new(store_id: StoreId) -> Self {
        Self {
            store_id,
            healthy: AtomicBool::new(true),
            empty: AtomicBool::new(false),
        }
    }

    pub fn empty(store_id: StoreId) -> Self {
        let database = Self::new(store_id);
        database.empty.store(true, Ordering::SeqCst);
        database
    }

    pub fn mark_unhealthy(&self) {
        self.healthy.store(false, Ordering::SeqCst);
    }

    pub fn mark_initialized(&self) {
        self.empty.store(false, Ordering::SeqCst);
    }
}

impl LocalDatabase for InMemoryDatabase {
    fn assert_healthy(&self) -> Result<(), RaftError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RaftError::UnhealthyStore(format!(
                "store {:?} has been marked unhealthy",
                self.store_id
            )))
        }
    }

    fn store_id(&self) -> StoreId {
        self.store_id
    }

    fn is_empty(&self) -> bool {
        self.empty.load(Ordering::SeqCst)
    }
}
