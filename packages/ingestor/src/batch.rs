//! Batch Splitter / Sequencer
//!
//! Splits a large bundle into bounded slices and drives a per-slice stage over
//! them one at a time. Slices never run concurrently, so at most one slice's
//! queries are outstanding against the index and peak memory is bounded by a
//! single slice's working set.

use std::future::Future;

use tracing::{debug, warn};

/// Default maximum number of transactions per slice
pub const DEFAULT_MAX_SLICE_SIZE: usize = 5000;

/// Sequential slice pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSequencer {
    max_slice_size: usize,
}

impl BatchSequencer {
    /// Create a sequencer with the given slice bound (zero is treated as one)
    pub fn new(max_slice_size: usize) -> Self {
        Self {
            max_slice_size: max_slice_size.max(1),
        }
    }

    pub fn max_slice_size(&self) -> usize {
        self.max_slice_size
    }

    /// Contiguous slices of at most `max_slice_size` items, in order
    pub fn slices<'a, T>(&self, items: &'a [T]) -> std::slice::Chunks<'a, T> {
        items.chunks(self.max_slice_size)
    }

    /// Number of slices `len` items split into
    pub fn slice_count(&self, len: usize) -> usize {
        len.div_ceil(self.max_slice_size)
    }

    /// Run `stage` over each slice strictly in sequence and concatenate the
    /// results in slice order.
    ///
    /// The first failing slice aborts the run and its error is returned;
    /// later slices are never started.
    pub async fn run<'a, T, U, E, F, Fut>(&self, items: &'a [T], mut stage: F) -> Result<Vec<U>, E>
    where
        F: FnMut(&'a [T]) -> Fut,
        Fut: Future<Output = Result<Vec<U>, E>>,
    {
        let total = self.slice_count(items.len());
        let mut output = Vec::new();

        for (number, slice) in self.slices(items).enumerate() {
            debug!("Processing slice {}/{} ({} items)", number + 1, total, slice.len());
            match stage(slice).await {
                Ok(results) => output.extend(results),
                Err(e) => {
                    warn!("Slice {}/{} failed, aborting batch", number + 1, total);
                    return Err(e);
                }
            }
        }

        Ok(output)
    }
}

impl Default for BatchSequencer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SLICE_SIZE)
    }
}
