//! Transaction Decoder
//!
//! Decodes raw Bitcoin transactions and blocks into the minimal records the
//! relevance filter works on: a transaction id, the outpoints its inputs spend,
//! and the locking scripts of its outputs.

use std::fmt;
use std::str::FromStr;

use bitcoin::consensus::encode::deserialize;
use thiserror::Error;

/// Errors that can occur during transaction decoding
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Failed to decode consensus bytes: {0}")]
    Consensus(String),

    #[error("Invalid hex: {0}")]
    Hex(String),

    #[error("Empty input data")]
    EmptyInput,

    #[error("Invalid outpoint: {0}")]
    InvalidOutPoint(String),
}

/// Reference to a single spendable output: `(txid, vout)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    /// Hex id of the transaction that created the output
    pub txid: String,
    /// Index of the output within that transaction
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: impl Into<String>, vout: u32) -> Self {
        Self {
            txid: txid.into(),
            vout,
        }
    }
}

/// Renders as `txid:vout`, the form used by external stores.
impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

impl FromStr for OutPoint {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (txid, vout) = s
            .rsplit_once(':')
            .ok_or_else(|| DecodeError::InvalidOutPoint(s.to_string()))?;
        if txid.is_empty() {
            return Err(DecodeError::InvalidOutPoint(s.to_string()));
        }
        let vout = vout
            .parse()
            .map_err(|_| DecodeError::InvalidOutPoint(s.to_string()))?;
        Ok(OutPoint::new(txid, vout))
    }
}

impl From<&bitcoin::OutPoint> for OutPoint {
    fn from(outpoint: &bitcoin::OutPoint) -> Self {
        OutPoint::new(outpoint.txid.to_string(), outpoint.vout)
    }
}

/// A transaction input, reduced to the outpoint it spends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    pub previous_output: OutPoint,
}

/// A transaction output, reduced to its locking script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub script: Vec<u8>,
}

/// Transaction as seen by the relevance filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Transaction id in its hex display form
    pub txid: String,
    /// Inputs in transaction order (coinbase inputs are omitted)
    pub inputs: Vec<TxInput>,
    /// Outputs in transaction order
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    pub fn new(txid: impl Into<String>) -> Self {
        Self {
            txid: txid.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Add an input spending `previous_output`
    pub fn with_input(mut self, previous_output: OutPoint) -> Self {
        self.inputs.push(TxInput { previous_output });
        self
    }

    /// Add an output locked by `script`
    pub fn with_output(mut self, script: impl Into<Vec<u8>>) -> Self {
        self.outputs.push(TxOutput {
            script: script.into(),
        });
        self
    }

    /// Outpoints spent by this transaction
    pub fn spent_outpoints(&self) -> impl Iterator<Item = &OutPoint> {
        self.inputs.iter().map(|input| &input.previous_output)
    }

    /// Outpoint of this transaction's output at `vout`
    pub fn outpoint(&self, vout: u32) -> OutPoint {
        OutPoint::new(self.txid.clone(), vout)
    }
}

impl From<&bitcoin::Transaction> for Transaction {
    fn from(tx: &bitcoin::Transaction) -> Self {
        let inputs = tx
            .input
            .iter()
            .filter(|txin| !txin.previous_output.is_null())
            .map(|txin| TxInput {
                previous_output: OutPoint::from(&txin.previous_output),
            })
            .collect();
        let outputs = tx
            .output
            .iter()
            .map(|txout| TxOutput {
                script: txout.script_pubkey.to_bytes(),
            })
            .collect();

        Transaction {
            txid: tx.compute_txid().to_string(),
            inputs,
            outputs,
        }
    }
}

/// Decode a transaction from consensus-encoded bytes
///
/// # Arguments
/// * `raw` - The serialized transaction, as published on a `rawtx` feed
///
/// # Returns
/// The reduced [`Transaction`] record
pub fn decode_transaction(raw: &[u8]) -> Result<Transaction, DecodeError> {
    if raw.is_empty() {
        return Err(DecodeError::EmptyInput);
    }

    let tx: bitcoin::Transaction =
        deserialize(raw).map_err(|e| DecodeError::Consensus(e.to_string()))?;
    Ok(Transaction::from(&tx))
}

/// Decode a transaction from its hex serialization
pub fn decode_transaction_hex(hex_str: &str) -> Result<Transaction, DecodeError> {
    decode_transaction(&hex_to_bytes(hex_str)?)
}

/// Decode every transaction of a consensus-encoded block, in block order
pub fn decode_block(raw: &[u8]) -> Result<Vec<Transaction>, DecodeError> {
    if raw.is_empty() {
        return Err(DecodeError::EmptyInput);
    }

    let block: bitcoin::Block =
        deserialize(raw).map_err(|e| DecodeError::Consensus(e.to_string()))?;
    Ok(block.txdata.iter().map(Transaction::from).collect())
}

/// Parse a hex string to bytes (with or without 0x prefix)
pub fn hex_to_bytes(hex_str: &str) -> Result<Vec<u8>, DecodeError> {
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    hex::decode(hex_str).map_err(|e| DecodeError::Hex(e.to_string()))
}
