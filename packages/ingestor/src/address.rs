//! Address Resolution
//!
//! Maps an output's locking script to the address string the ownership index
//! is keyed by. Non-standard scripts have no address and fail with
//! [`ResolveError::NonStandard`]; callers are expected to skip them.

use bitcoin::{Address, Network, Script};
use thiserror::Error;

/// Errors that can occur while resolving a script to an address
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Script has no standard address form: {0}")]
    NonStandard(String),
}

/// Pure mapping from locking script to address string
pub trait AddressResolver: Send + Sync {
    /// Resolve `script` to an address, or fail for non-standard scripts
    fn resolve(&self, script: &[u8]) -> Result<String, ResolveError>;
}

/// Resolves standard Bitcoin output scripts (P2PKH, P2SH, segwit v0, taproot
/// and future witness versions) for a fixed network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptAddressResolver {
    network: Network,
}

impl ScriptAddressResolver {
    pub fn new(network: Network) -> Self {
        Self { network }
    }

    /// Network addresses are rendered for
    pub fn network(&self) -> Network {
        self.network
    }
}

impl Default for ScriptAddressResolver {
    fn default() -> Self {
        Self::new(Network::Bitcoin)
    }
}

impl AddressResolver for ScriptAddressResolver {
    fn resolve(&self, script: &[u8]) -> Result<String, ResolveError> {
        Address::from_script(Script::from_bytes(script), self.network)
            .map(|address| address.to_string())
            .map_err(|e| ResolveError::NonStandard(e.to_string()))
    }
}
