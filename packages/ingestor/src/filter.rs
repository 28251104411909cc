//! Relevance Filtering
//!
//! Selects the transactions of a bundle that touch tracked addresses.
//!
//! A transaction is relevant when
//! - one of its outputs pays a tracked address, or
//! - one of its inputs spends an outpoint the index already knows, or
//! - one of its inputs spends an output of a relevant transaction in the same
//!   slice (chain propagation). This catches funding and spending
//!   transactions that arrive together, before the funding output has been
//!   recorded in the spend index.
//!
//! Each slice costs at most two index round trips: one for the derived
//! addresses, one for the spent outpoints that could not be settled locally.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};

use crate::address::{AddressResolver, ScriptAddressResolver};
use crate::batch::BatchSequencer;
use crate::bundle::Bundle;
use crate::cache::DedupCache;
use crate::config::IngestorConfig;
use crate::decoder::{OutPoint, Transaction};
use crate::index::{IndexError, OwnershipIndex};

/// Errors that can occur while filtering a slice
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Ownership index query failed: {0}")]
    Index(#[from] IndexError),
}

/// Relevance filter over an ownership index
pub struct RelevanceFilter<I, R = ScriptAddressResolver> {
    index: I,
    resolver: R,
    cache: Arc<DedupCache>,
    sequencer: BatchSequencer,
}

impl<I: OwnershipIndex> RelevanceFilter<I, ScriptAddressResolver> {
    /// Build a filter for `config.network` with `config`'s slice size.
    ///
    /// The dedup cache is passed in rather than created so that every filter
    /// in the process shares one instance.
    pub fn from_config(config: &IngestorConfig, index: I, cache: Arc<DedupCache>) -> Self {
        RelevanceFilter::new(index, ScriptAddressResolver::new(config.network), cache)
            .with_max_slice_size(config.max_slice_size)
    }
}

impl<I, R> RelevanceFilter<I, R>
where
    I: OwnershipIndex,
    R: AddressResolver,
{
    pub fn new(index: I, resolver: R, cache: Arc<DedupCache>) -> Self {
        Self {
            index,
            resolver,
            cache,
            sequencer: BatchSequencer::default(),
        }
    }

    /// Override the maximum slice size used by [`Self::filter_bundle`]
    pub fn with_max_slice_size(mut self, max_slice_size: usize) -> Self {
        self.sequencer = BatchSequencer::new(max_slice_size);
        self
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    pub fn cache(&self) -> &Arc<DedupCache> {
        &self.cache
    }

    pub fn sequencer(&self) -> &BatchSequencer {
        &self.sequencer
    }

    /// Filter a whole bundle, slice by slice, preserving bundle order.
    ///
    /// Chain propagation only applies within a slice.
    pub async fn filter_bundle(&self, bundle: &Bundle) -> Result<Vec<Transaction>, FilterError> {
        self.filter_all(bundle.as_slice()).await
    }

    /// Same as [`Self::filter_bundle`] for a plain transaction list
    pub async fn filter_all(&self, txs: &[Transaction]) -> Result<Vec<Transaction>, FilterError> {
        self.sequencer.run(txs, |slice| self.filter(slice)).await
    }

    /// Filter a single slice, returning its relevant transactions in order
    pub async fn filter(&self, txs: &[Transaction]) -> Result<Vec<Transaction>, FilterError> {
        let positions = self.relevant_positions(txs).await?;
        Ok(positions.into_iter().map(|pos| txs[pos].clone()).collect())
    }

    /// Ascending positions of the relevant transactions of a single slice.
    ///
    /// Fails as a whole if either index query fails. The dedup cache is only
    /// updated once both queries have succeeded.
    pub async fn relevant_positions(&self, txs: &[Transaction]) -> Result<Vec<usize>, FilterError> {
        let mut relevant = vec![false; txs.len()];
        let mut skipped = vec![false; txs.len()];

        // Populated for every transaction, cached or not, so that a cached
        // transaction can still be found as the funder of a co-batched spend.
        let mut position_by_txid: HashMap<&str, usize> = HashMap::with_capacity(txs.len());

        // Txids resolved earlier in this slice. A repeated copy is skipped
        // like a cache hit, since the cache is only written on success.
        let mut resolved: HashSet<&str> = HashSet::with_capacity(txs.len());

        let mut positions_by_address: HashMap<String, Vec<usize>> = HashMap::new();
        let mut addresses: Vec<String> = Vec::new();

        for (pos, tx) in txs.iter().enumerate() {
            position_by_txid.entry(tx.txid.as_str()).or_insert(pos);

            if self.cache.has(&tx.txid) || !resolved.insert(tx.txid.as_str()) {
                skipped[pos] = true;
                continue;
            }

            for output in &tx.outputs {
                let address = match self.resolver.resolve(&output.script) {
                    Ok(address) => address,
                    Err(e) => {
                        trace!("Skipping output of {}: {}", tx.txid, e);
                        continue;
                    }
                };

                match positions_by_address.entry(address) {
                    Entry::Occupied(mut entry) => push_position(entry.get_mut(), pos),
                    Entry::Vacant(entry) => {
                        addresses.push(entry.key().clone());
                        entry.insert(vec![pos]);
                    }
                }
            }
        }

        let mut address_matches = 0;
        if !addresses.is_empty() {
            for address in self.index.tracked_addresses(&addresses).await? {
                if let Some(positions) = positions_by_address.get(&address) {
                    address_matches += 1;
                    mark(&mut relevant, positions);
                }
            }
        }

        let mut positions_by_outpoint: HashMap<&OutPoint, Vec<usize>> = HashMap::new();
        let mut outpoints: Vec<OutPoint> = Vec::new();
        let mut chained = 0;

        for (pos, tx) in txs.iter().enumerate() {
            if skipped[pos] || relevant[pos] {
                continue;
            }

            for outpoint in tx.spent_outpoints() {
                let funded_by_relevant = position_by_txid
                    .get(outpoint.txid.as_str())
                    .is_some_and(|&funder| funder != pos && relevant[funder]);

                if funded_by_relevant {
                    relevant[pos] = true;
                    chained += 1;
                    break;
                }

                match positions_by_outpoint.entry(outpoint) {
                    Entry::Occupied(mut entry) => push_position(entry.get_mut(), pos),
                    Entry::Vacant(entry) => {
                        outpoints.push(outpoint.clone());
                        entry.insert(vec![pos]);
                    }
                }
            }
        }

        let mut spend_matches = 0;
        if !outpoints.is_empty() {
            for outpoint in self.index.known_spends(&outpoints).await? {
                if let Some(positions) = positions_by_outpoint.get(&outpoint) {
                    spend_matches += 1;
                    mark(&mut relevant, positions);
                }
            }
        }

        // Cache hits are re-inserted too, which refreshes their recency
        self.cache.insert_many(txs.iter().map(|tx| tx.txid.clone()));

        let positions: Vec<usize> = relevant
            .iter()
            .enumerate()
            .filter_map(|(pos, &is_relevant)| is_relevant.then_some(pos))
            .collect();

        debug!(
            "Filtered slice of {}: {} relevant ({} skipped, {} addresses/{} matched, {} chained, {} outpoints/{} matched)",
            txs.len(),
            positions.len(),
            skipped.iter().filter(|&&s| s).count(),
            addresses.len(),
            address_matches,
            chained,
            outpoints.len(),
            spend_matches
        );

        Ok(positions)
    }
}

/// Append `pos` unless it is already the last entry. Positions are visited in
/// ascending order, so this keeps each list unique.
fn push_position(positions: &mut Vec<usize>, pos: usize) {
    if positions.last() != Some(&pos) {
        positions.push(pos);
    }
}

fn mark(relevant: &mut [bool], positions: &[usize]) {
    for &pos in positions {
        relevant[pos] = true;
    }
}
