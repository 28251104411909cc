//! Redis Ownership Index
//!
//! Ownership index backed by two Redis sets: tracked addresses, and known
//! spends stored as `txid:vout` members. Each batch query is a single
//! `SMISMEMBER` round trip.
//!
//! Connection setup retries with exponential backoff.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::decoder::OutPoint;
use crate::index::{IndexError, OwnershipIndex};

/// Default Redis endpoint
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default set holding tracked addresses
pub const DEFAULT_ADDRESSES_KEY: &str = "satwatch:addresses";

/// Default set holding recorded spends
pub const DEFAULT_SPENDS_KEY: &str = "satwatch:spends";

/// Maximum number of reconnection attempts before giving up
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Initial backoff delay for reconnection
pub const INITIAL_BACKOFF_MS: u64 = 100;

/// Maximum backoff delay for reconnection
pub const MAX_BACKOFF_MS: u64 = 30000;

/// Connection timeout in milliseconds
pub const CONNECTION_TIMEOUT_MS: u64 = 5000;

/// Configuration for the Redis ownership index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RedisIndexConfig {
    /// Redis connection URL
    pub url: String,
    /// Set of tracked addresses
    pub addresses_key: String,
    /// Set of recorded spends (`txid:vout` members)
    pub spends_key: String,
    /// Maximum reconnection attempts
    pub max_reconnect_attempts: u32,
    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: u64,
    /// Connection timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for RedisIndexConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REDIS_URL.to_string(),
            addresses_key: DEFAULT_ADDRESSES_KEY.to_string(),
            spends_key: DEFAULT_SPENDS_KEY.to_string(),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            initial_backoff_ms: INITIAL_BACKOFF_MS,
            max_backoff_ms: MAX_BACKOFF_MS,
            timeout_ms: CONNECTION_TIMEOUT_MS,
        }
    }
}

impl RedisIndexConfig {
    /// Create a new config with the specified Redis URL
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Calculate backoff delay for a given attempt number
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self
            .initial_backoff_ms
            .saturating_mul(2u64.pow(attempt.min(10)));
        Duration::from_millis(delay_ms.min(self.max_backoff_ms))
    }
}

/// Redis connection manager with reconnection support
#[derive(Debug)]
pub struct RedisIndexConnection {
    config: RedisIndexConfig,
    reconnect_attempts: u32,
}

impl RedisIndexConnection {
    pub fn new(config: RedisIndexConfig) -> Self {
        Self {
            config,
            reconnect_attempts: 0,
        }
    }

    pub fn config(&self) -> &RedisIndexConfig {
        &self.config
    }

    /// Get current reconnection attempt count
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Reset reconnection counter
    pub fn reset_reconnect_counter(&mut self) {
        self.reconnect_attempts = 0;
    }

    /// Calculate delay before next reconnection attempt
    pub fn next_backoff_delay(&self) -> Duration {
        self.config.backoff_delay(self.reconnect_attempts)
    }

    /// Open a multiplexed connection, bounded by the configured timeout
    pub async fn connect(&mut self) -> Result<MultiplexedConnection, IndexError> {
        info!("Connecting to ownership index at {}", self.config.url);

        let client = redis::Client::open(self.config.url.as_str())
            .map_err(|e| IndexError::ConnectionFailed(e.to_string()))?;
        let connection = timeout(
            Duration::from_millis(self.config.timeout_ms),
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| IndexError::Timeout(self.config.timeout_ms))?
        .map_err(|e| IndexError::ConnectionFailed(e.to_string()))?;

        self.reset_reconnect_counter();
        info!("Connected to ownership index");

        Ok(connection)
    }

    /// Attempt to reconnect with exponential backoff
    ///
    /// Returns a connection if successful, or an error if max attempts exceeded
    pub async fn reconnect(&mut self) -> Result<MultiplexedConnection, IndexError> {
        while self.reconnect_attempts < self.config.max_reconnect_attempts {
            let delay = self.next_backoff_delay();
            warn!(
                "Attempting to reconnect (attempt {}/{}), waiting {:?}",
                self.reconnect_attempts + 1,
                self.config.max_reconnect_attempts,
                delay
            );

            sleep(delay).await;
            self.reconnect_attempts += 1;

            match self.connect().await {
                Ok(connection) => return Ok(connection),
                Err(e) => {
                    error!("Reconnection attempt {} failed: {}", self.reconnect_attempts, e);
                }
            }
        }

        Err(IndexError::MaxReconnectAttemptsExceeded(
            self.config.max_reconnect_attempts,
        ))
    }

    /// Connect, falling back to the backoff loop if the first attempt fails
    pub async fn connect_with_retry(&mut self) -> Result<MultiplexedConnection, IndexError> {
        match self.connect().await {
            Ok(connection) => Ok(connection),
            Err(e) => {
                warn!("Initial connection failed: {}", e);
                self.reconnect().await
            }
        }
    }
}

/// Ownership index stored in Redis sets
#[derive(Clone)]
pub struct RedisOwnershipIndex {
    connection: MultiplexedConnection,
    addresses_key: String,
    spends_key: String,
}

impl RedisOwnershipIndex {
    /// Create an index over an established connection
    ///
    /// # Arguments
    /// * `connection` - An established Redis multiplexed connection
    /// * `addresses_key` - Set holding tracked addresses
    /// * `spends_key` - Set holding recorded spends
    pub fn new(
        connection: MultiplexedConnection,
        addresses_key: impl Into<String>,
        spends_key: impl Into<String>,
    ) -> Self {
        Self {
            connection,
            addresses_key: addresses_key.into(),
            spends_key: spends_key.into(),
        }
    }

    /// Connect using `config`, retrying with backoff
    pub async fn connect(config: &RedisIndexConfig) -> Result<Self, IndexError> {
        let connection = RedisIndexConnection::new(config.clone())
            .connect_with_retry()
            .await?;
        Ok(Self::new(
            connection,
            config.addresses_key.clone(),
            config.spends_key.clone(),
        ))
    }

    pub fn addresses_key(&self) -> &str {
        &self.addresses_key
    }

    pub fn spends_key(&self) -> &str {
        &self.spends_key
    }

    async fn members(&self, key: &str, members: &[String]) -> Result<Vec<bool>, IndexError> {
        let mut connection = self.connection.clone();
        let flags: Vec<bool> = redis::cmd("SMISMEMBER")
            .arg(key)
            .arg(members)
            .query_async(&mut connection)
            .await?;

        if flags.len() != members.len() {
            return Err(IndexError::Unavailable(format!(
                "SMISMEMBER on {} returned {} flags for {} members",
                key,
                flags.len(),
                members.len()
            )));
        }
        Ok(flags)
    }
}

#[async_trait]
impl OwnershipIndex for RedisOwnershipIndex {
    async fn tracked_addresses(&self, addresses: &[String]) -> Result<Vec<String>, IndexError> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }

        let flags = self.members(&self.addresses_key, addresses).await?;
        let tracked: Vec<String> = select_members(addresses, &flags).cloned().collect();
        debug!(
            "{} of {} addresses tracked",
            tracked.len(),
            addresses.len()
        );
        Ok(tracked)
    }

    async fn known_spends(&self, outpoints: &[OutPoint]) -> Result<Vec<OutPoint>, IndexError> {
        if outpoints.is_empty() {
            return Ok(Vec::new());
        }

        let members: Vec<String> = outpoints.iter().map(ToString::to_string).collect();
        let flags = self.members(&self.spends_key, &members).await?;
        let known: Vec<OutPoint> = select_members(outpoints, &flags).cloned().collect();
        debug!("{} of {} outpoints known", known.len(), outpoints.len());
        Ok(known)
    }
}

/// Items whose matching flag is set
fn select_members<'a, T>(items: &'a [T], flags: &'a [bool]) -> impl Iterator<Item = &'a T> + 'a {
    items
        .iter()
        .zip(flags)
        .filter_map(|(item, present)| present.then_some(item))
}
