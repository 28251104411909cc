//! Satwatch Ingestor Library
//!
//! This crate decides which freshly observed Bitcoin transactions (from the
//! mempool or a newly connected block) touch addresses the backend tracks.
//! Transactions are correlated against an external ownership index and
//! against each other within the same batch, with a dedup cache absorbing
//! repeated deliveries of the same transaction.

pub mod address;
pub mod batch;
pub mod bundle;
pub mod cache;
pub mod config;
pub mod decoder;
pub mod filter;
pub mod index;
pub mod redis_index;

use tracing_subscriber::EnvFilter;

// Re-export commonly used types
pub use address::{AddressResolver, ScriptAddressResolver};
pub use batch::BatchSequencer;
pub use bundle::Bundle;
pub use cache::DedupCache;
pub use config::IngestorConfig;
pub use decoder::{decode_block, decode_transaction, OutPoint, Transaction};
pub use filter::{FilterError, RelevanceFilter};
pub use index::{IndexError, MemoryOwnershipIndex, OwnershipIndex};
pub use redis_index::{RedisIndexConfig, RedisOwnershipIndex};

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
