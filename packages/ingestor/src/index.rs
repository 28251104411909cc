//! Ownership Index Client
//!
//! Read-only batch queries against the store that knows which addresses the
//! backend tracks and which outpoints it has already recorded as spent.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

use crate::decoder::OutPoint;

/// Errors that can occur while querying the ownership index
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection timeout after {0}ms")]
    Timeout(u64),

    #[error("Max reconnection attempts ({0}) exceeded")]
    MaxReconnectAttemptsExceeded(u32),

    #[error("Index unavailable: {0}")]
    Unavailable(String),
}

/// Batch lookups against the ownership / spend index.
///
/// Requests may contain duplicates. Responses carry only the matching subset,
/// in any order and multiplicity.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OwnershipIndex: Send + Sync {
    /// Which of `addresses` are tracked
    async fn tracked_addresses(&self, addresses: &[String]) -> Result<Vec<String>, IndexError>;

    /// Which of `outpoints` are already recorded
    async fn known_spends(&self, outpoints: &[OutPoint]) -> Result<Vec<OutPoint>, IndexError>;
}

#[async_trait]
impl<T: OwnershipIndex + ?Sized> OwnershipIndex for Arc<T> {
    async fn tracked_addresses(&self, addresses: &[String]) -> Result<Vec<String>, IndexError> {
        (**self).tracked_addresses(addresses).await
    }

    async fn known_spends(&self, outpoints: &[OutPoint]) -> Result<Vec<OutPoint>, IndexError> {
        (**self).known_spends(outpoints).await
    }
}

/// In-process ownership index
#[derive(Debug, Default)]
pub struct MemoryOwnershipIndex {
    addresses: RwLock<HashSet<String>>,
    spends: RwLock<HashSet<OutPoint>>,
}

impl MemoryOwnershipIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `address`
    pub fn track_address(&self, address: impl Into<String>) {
        self.addresses.write().insert(address.into());
    }

    /// Record `outpoint` as a known spend
    pub fn record_spend(&self, outpoint: OutPoint) {
        self.spends.write().insert(outpoint);
    }

    pub fn is_tracked(&self, address: &str) -> bool {
        self.addresses.read().contains(address)
    }
}

#[async_trait]
impl OwnershipIndex for MemoryOwnershipIndex {
    async fn tracked_addresses(&self, addresses: &[String]) -> Result<Vec<String>, IndexError> {
        let tracked = self.addresses.read();
        let mut seen = HashSet::new();
        Ok(addresses
            .iter()
            .filter(|address| tracked.contains(*address) && seen.insert(*address))
            .cloned()
            .collect())
    }

    async fn known_spends(&self, outpoints: &[OutPoint]) -> Result<Vec<OutPoint>, IndexError> {
        let spends = self.spends.read();
        let mut seen = HashSet::new();
        Ok(outpoints
            .iter()
            .filter(|outpoint| spends.contains(*outpoint) && seen.insert(*outpoint))
            .cloned()
            .collect())
    }
}
