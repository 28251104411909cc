//! Mock Pipeline Integration Tests
//!
//! Runs the full pipeline with an in-memory ownership index (no external
//! dependencies): raw transactions → decode → bundle → relevance filter.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::address::NetworkUnchecked;
use bitcoin::consensus::encode::serialize;
use bitcoin::hashes::Hash;
use bitcoin::transaction::Version;
use bitcoin::{Address, Amount, PubkeyHash, ScriptBuf, Sequence, TxIn, TxOut, Txid, Witness};

use satwatch_ingestor::address::{AddressResolver, ScriptAddressResolver};
use satwatch_ingestor::decoder::{decode_transaction, OutPoint, Transaction};
use satwatch_ingestor::index::{IndexError, MemoryOwnershipIndex, OwnershipIndex};
use satwatch_ingestor::{init_tracing, Bundle, DedupCache, FilterError, RelevanceFilter};

const TRACKED: &str = "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2";
const UNTRACKED: &str = "3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy";
const OTHER: &str = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq";

fn script_of(address: &str) -> ScriptBuf {
    address
        .parse::<Address<NetworkUnchecked>>()
        .unwrap()
        .assume_checked()
        .script_pubkey()
}

fn external_txid(n: u8) -> Txid {
    Txid::from_byte_array([n; 32])
}

/// Build a raw transaction spending `prev` and paying `address`
fn raw_payment(prev: bitcoin::OutPoint, address: &str) -> Vec<u8> {
    raw_payment_script(prev, script_of(address))
}

fn raw_payment_script(prev: bitcoin::OutPoint, script_pubkey: ScriptBuf) -> Vec<u8> {
    let tx = bitcoin::Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: prev,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(10_000),
            script_pubkey,
        }],
    };
    serialize(&tx)
}

fn spend_of(tx: &Transaction, vout: u32) -> bitcoin::OutPoint {
    bitcoin::OutPoint {
        txid: tx.txid.parse().unwrap(),
        vout,
    }
}

fn tracked_index() -> MemoryOwnershipIndex {
    let index = MemoryOwnershipIndex::new();
    index.track_address(TRACKED);
    index
}

fn new_filter<I: OwnershipIndex>(index: I) -> RelevanceFilter<I> {
    RelevanceFilter::new(
        index,
        ScriptAddressResolver::default(),
        Arc::new(DedupCache::default()),
    )
}

fn ids(txs: &[Transaction]) -> Vec<String> {
    txs.iter().map(|tx| tx.txid.clone()).collect()
}

/// Unique P2PKH transaction number `n`, spending an external outpoint
fn bulk_tx(n: u32) -> Transaction {
    let mut hash = [0u8; 20];
    hash[..4].copy_from_slice(&n.to_be_bytes());
    let script = ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(hash));
    Transaction::new(format!("{n:064x}"))
        .with_input(OutPoint::new(format!("{:064x}", u64::MAX - n as u64), 0))
        .with_output(script.to_bytes())
}

/// Mock feed standing in for one upstream delivery channel
struct MockTxFeed {
    raw: VecDeque<Vec<u8>>,
}

impl MockTxFeed {
    fn new() -> Self {
        Self {
            raw: VecDeque::new(),
        }
    }

    fn push(&mut self, raw: Vec<u8>) {
        self.raw.push_back(raw);
    }

    /// Drain everything delivered so far into a bundle
    fn drain_bundle(&mut self) -> Bundle {
        let mut bundle = Bundle::new();
        while let Some(raw) = self.raw.pop_front() {
            bundle.add(decode_transaction(&raw).ok());
        }
        bundle
    }
}

/// Index wrapper recording call counts and the peak number of in-flight calls
struct CountingIndex {
    inner: MemoryOwnershipIndex,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl CountingIndex {
    fn new(inner: MemoryOwnershipIndex) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    async fn enter(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl OwnershipIndex for CountingIndex {
    async fn tracked_addresses(&self, addresses: &[String]) -> Result<Vec<String>, IndexError> {
        self.enter().await;
        let result = self.inner.tracked_addresses(addresses).await;
        self.leave();
        result
    }

    async fn known_spends(&self, outpoints: &[OutPoint]) -> Result<Vec<OutPoint>, IndexError> {
        self.enter().await;
        let result = self.inner.known_spends(outpoints).await;
        self.leave();
        result
    }
}

/// Index that is always down
struct FailingIndex;

#[async_trait]
impl OwnershipIndex for FailingIndex {
    async fn tracked_addresses(&self, _: &[String]) -> Result<Vec<String>, IndexError> {
        Err(IndexError::Unavailable("index offline".to_string()))
    }

    async fn known_spends(&self, _: &[OutPoint]) -> Result<Vec<OutPoint>, IndexError> {
        Err(IndexError::Unavailable("index offline".to_string()))
    }
}

// ==================== Basic Pipeline Tests ====================

#[tokio::test]
async fn test_pipeline_funding_and_spend_in_same_bundle() {
    init_tracing();
    let filter = new_filter(tracked_index());

    let tx1_raw = raw_payment(bitcoin::OutPoint::new(external_txid(1), 0), TRACKED);
    let tx1 = decode_transaction(&tx1_raw).unwrap();
    let tx2_raw = raw_payment(spend_of(&tx1, 0), UNTRACKED);
    let tx3_raw = raw_payment(bitcoin::OutPoint::new(external_txid(3), 0), OTHER);

    let mut feed = MockTxFeed::new();
    feed.push(tx1_raw);
    feed.push(tx2_raw);
    feed.push(tx3_raw);
    let bundle = feed.drain_bundle();
    assert_eq!(bundle.len(), 3);

    let result = filter.filter_bundle(&bundle).await.unwrap();

    let expected = bundle.to_vec();
    assert_eq!(ids(&result), vec![expected[0].txid.clone(), expected[1].txid.clone()]);
}

#[tokio::test]
async fn test_pipeline_undecodable_delivery_is_dropped() {
    let filter = new_filter(tracked_index());

    let mut feed = MockTxFeed::new();
    feed.push(vec![0xde, 0xad, 0xbe, 0xef]);
    feed.push(raw_payment(bitcoin::OutPoint::new(external_txid(1), 0), TRACKED));
    let bundle = feed.drain_bundle();

    assert_eq!(bundle.len(), 1);
    assert_eq!(filter.filter_bundle(&bundle).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_pipeline_result_is_ordered_subsequence() {
    let index = tracked_index();
    index.record_spend(OutPoint::new(format!("{:064x}", u64::MAX - 7), 0));
    let filter = new_filter(index);

    let mut bundle: Bundle = (0..20).map(bulk_tx).collect();
    bundle.add(decode_transaction(&raw_payment(
        bitcoin::OutPoint::new(external_txid(9), 0),
        TRACKED,
    ))
    .unwrap());
    let input = bundle.to_vec();

    let result = filter.filter_bundle(&bundle).await.unwrap();

    // tx 7 spends a known outpoint, the last tx pays a tracked address
    assert_eq!(ids(&result), vec![input[7].txid.clone(), input[20].txid.clone()]);

    let mut cursor = input.iter();
    for tx in &result {
        assert!(cursor.any(|candidate| candidate == tx), "not an ordered subsequence");
    }
}

// ==================== Script Handling Tests ====================

#[tokio::test]
async fn test_pipeline_non_standard_output_is_tolerated() {
    let filter = new_filter(tracked_index());

    // OP_RETURN output, input matching nothing
    let raw = raw_payment_script(
        bitcoin::OutPoint::new(external_txid(4), 0),
        ScriptBuf::from_bytes(vec![0x6a, 0x01, 0x00]),
    );
    let mut bundle = Bundle::new();
    bundle.add(decode_transaction(&raw).unwrap());

    let result = filter.filter_bundle(&bundle).await;
    assert!(result.unwrap().is_empty());
}

#[tokio::test]
async fn test_pipeline_genesis_block_has_no_matches() {
    let filter = new_filter(tracked_index());
    let bundle = Bundle::from_block(&bitcoin::constants::genesis_block(bitcoin::Network::Bitcoin));

    assert!(filter.filter_bundle(&bundle).await.unwrap().is_empty());
}

#[test]
fn test_resolver_agrees_with_tracked_fixture() {
    let resolver = ScriptAddressResolver::default();
    assert_eq!(resolver.resolve(script_of(TRACKED).as_bytes()).unwrap(), TRACKED);
}

// ==================== Double Spend Tests ====================

#[tokio::test]
async fn test_pipeline_double_spend_fan_in() {
    let index = MemoryOwnershipIndex::new();
    let contested = bitcoin::OutPoint::new(external_txid(5), 1);
    index.record_spend(OutPoint::from(&contested));
    let filter = new_filter(index);

    let b1 = decode_transaction(&raw_payment(contested, UNTRACKED)).unwrap();
    let b2 = decode_transaction(&raw_payment(contested, OTHER)).unwrap();
    let bundle: Bundle = vec![b1.clone(), b2.clone()].into_iter().collect();

    let result = filter.filter_bundle(&bundle).await.unwrap();
    assert_eq!(result, vec![b1, b2]);
}

// ==================== Redelivery Tests ====================

#[tokio::test]
async fn test_pipeline_redelivery_across_channels() {
    let filter = new_filter(tracked_index());
    let raw = raw_payment(bitcoin::OutPoint::new(external_txid(6), 0), TRACKED);

    let mut mempool = MockTxFeed::new();
    let mut blocks = MockTxFeed::new();
    mempool.push(raw.clone());
    blocks.push(raw);

    let first = filter.filter_bundle(&mempool.drain_bundle()).await.unwrap();
    assert_eq!(first.len(), 1);
    assert!(filter.cache().has(&first[0].txid));

    // Second sighting: output resolution is skipped, nothing is re-derived
    let second = filter.filter_bundle(&blocks.drain_bundle()).await.unwrap();
    assert!(second.is_empty());
}

#[tokio::test]
async fn test_pipeline_duplicate_delivery_in_one_bundle() {
    let filter = new_filter(tracked_index());
    let raw = raw_payment(bitcoin::OutPoint::new(external_txid(7), 0), TRACKED);

    let mut feed = MockTxFeed::new();
    feed.push(raw.clone());
    feed.push(raw);
    let bundle = feed.drain_bundle();
    assert_eq!(bundle.len(), 2);

    let result = filter.filter_bundle(&bundle).await.unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0], bundle.as_slice()[0]);
}

#[tokio::test]
async fn test_pipeline_redelivered_funder_still_chains_through_spend_index() {
    let index = Arc::new(tracked_index());
    let filter = new_filter(Arc::clone(&index));

    let funder_raw = raw_payment(bitcoin::OutPoint::new(external_txid(8), 0), TRACKED);
    let funder = decode_transaction(&funder_raw).unwrap();
    filter.filter(&[funder.clone()]).await.unwrap();

    // The downstream consumer records the funder's output once it is relevant
    index.record_spend(funder.outpoint(0));

    let spender = decode_transaction(&raw_payment(spend_of(&funder, 0), UNTRACKED)).unwrap();
    let bundle: Bundle = vec![funder, spender.clone()].into_iter().collect();

    let result = filter.filter_bundle(&bundle).await.unwrap();
    assert_eq!(result, vec![spender]);
}

// ==================== Failure Tests ====================

#[tokio::test]
async fn test_pipeline_index_failure_is_surfaced() {
    let filter = new_filter(FailingIndex);
    let bundle: Bundle = (0..3).map(bulk_tx).collect();

    let result = filter.filter_bundle(&bundle).await;

    assert!(matches!(result, Err(FilterError::Index(IndexError::Unavailable(_)))));
    assert!(filter.cache().is_empty());
}

#[tokio::test]
async fn test_pipeline_recovers_after_failed_delivery() {
    let down = new_filter(FailingIndex);
    let cache = Arc::clone(down.cache());
    let raw = raw_payment(bitcoin::OutPoint::new(external_txid(2), 0), TRACKED);
    let mut bundle = Bundle::new();
    bundle.add(decode_transaction(&raw).unwrap());

    assert!(down.filter_bundle(&bundle).await.is_err());

    // Same cache, index back online: the redelivered tx is still found
    let up = RelevanceFilter::new(tracked_index(), ScriptAddressResolver::default(), cache);
    assert_eq!(up.filter_bundle(&bundle).await.unwrap().len(), 1);
}

// ==================== Slicing Tests ====================

#[tokio::test]
async fn test_pipeline_slice_boundary_does_not_change_result() {
    let index = Arc::new(MemoryOwnershipIndex::new());
    for n in (0..5001u32).step_by(97).chain([5000]) {
        let tx = bulk_tx(n);
        index.track_address(
            ScriptAddressResolver::default()
                .resolve(&tx.outputs[0].script)
                .unwrap(),
        );
    }

    let bundle: Bundle = (0..5001).map(bulk_tx).collect();

    let sliced = new_filter(Arc::clone(&index));
    assert_eq!(sliced.sequencer().max_slice_size(), 5000);
    let unsliced = new_filter(Arc::clone(&index)).with_max_slice_size(5001);

    let a = sliced.filter_bundle(&bundle).await.unwrap();
    let b = unsliced.filter_bundle(&bundle).await.unwrap();

    assert_eq!(a.len(), 53);
    assert_eq!(a, b);
    // The tx right after the split point is kept
    assert_eq!(a.last().unwrap().txid, format!("{:064x}", 5000));
}

#[tokio::test]
async fn test_pipeline_slices_run_sequentially() {
    let index = CountingIndex::new(tracked_index());
    let filter = new_filter(index).with_max_slice_size(10);
    let bundle: Bundle = (0..40).map(bulk_tx).collect();

    filter.filter_bundle(&bundle).await.unwrap();

    // Two queries per slice, never overlapping
    assert_eq!(filter.index().calls.load(Ordering::SeqCst), 8);
    assert_eq!(filter.index().max_in_flight.load(Ordering::SeqCst), 1);
}

// ==================== Concurrency Tests ====================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_filters_share_cache() {
    let cache = Arc::new(DedupCache::new(10_000));
    let index = Arc::new(tracked_index());
    let mempool_filter = Arc::new(RelevanceFilter::new(
        Arc::clone(&index),
        ScriptAddressResolver::default(),
        Arc::clone(&cache),
    ));
    let block_filter = Arc::new(RelevanceFilter::new(
        Arc::clone(&index),
        ScriptAddressResolver::default(),
        Arc::clone(&cache),
    ));

    let first: Bundle = (0..3000).map(bulk_tx).collect();
    let second: Bundle = (2000..5000).map(bulk_tx).collect();

    let a = tokio::spawn({
        let filter = Arc::clone(&mempool_filter);
        async move { filter.filter_bundle(&first).await }
    });
    let b = tokio::spawn({
        let filter = Arc::clone(&block_filter);
        async move { filter.filter_bundle(&second).await }
    });

    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    assert_eq!(cache.len(), 5000);
    assert!(cache.has(&bulk_tx(0).txid));
    assert!(cache.has(&bulk_tx(4999).txid));
}

// ==================== High Volume Tests ====================

#[tokio::test]
async fn test_pipeline_handles_full_slice() {
    let index = MemoryOwnershipIndex::new();
    index.record_spend(OutPoint::new(format!("{:064x}", u64::MAX - 4999), 0));
    let filter = new_filter(index);
    let bundle: Bundle = (0..5000).map(bulk_tx).collect();

    let start = Instant::now();
    let result = filter.filter_bundle(&bundle).await.unwrap();
    let duration = start.elapsed();

    assert_eq!(result.len(), 1);
    assert_eq!(filter.cache().len(), 5000);
    assert!(duration < Duration::from_secs(5), "Filtering took too long: {:?}", duration);
}
