//! Seeded reservoir sampling (Algorithm R) over the aggregation pass.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;

/// Uniform sample of at most `capacity` records from a stream of unknown
/// length.
///
/// The first `capacity` records are kept; record `i` after that replaces a
/// random slot with probability `capacity / i`. A fixed seed makes the sample
/// reproducible for identical input.
#[derive(Debug, Clone)]
pub struct ReservoirSample {
    capacity: usize,
    seen: u64,
    items: Vec<Value>,
    rng: StdRng,
}

impl ReservoirSample {
    /// Creates an empty reservoir.
    #[must_use]
    pub fn new(capacity: usize, seed: u64) -> Self {
        Self {
            capacity,
            seen: 0,
            items: Vec::with_capacity(capacity.min(1024)),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Offers one record. It is cloned only when selected.
    pub fn offer(&mut self, record: &Value) {
        self.seen += 1;
        if self.items.len() < self.capacity {
            self.items.push(record.clone());
            return;
        }
        if self.capacity == 0 {
            return;
        }
        let slot = self.rng.gen_range(0..self.seen);
        if let Ok(slot) = usize::try_from(slot) {
            if slot < self.capacity {
                self.items[slot] = record.clone();
            }
        }
    }

    /// Records offered so far.
    #[must_use]
    pub fn seen(&self) -> u64 {
        self.seen
    }

    /// Maximum sample size.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current sample.
    #[must_use]
    pub fn items(&self) -> &[Value] {
        &self.items
    }

    /// Consumes the reservoir, returning the sample.
    #[must_use]
    pub fn into_items(self) -> Vec<Value> {
        self.items
    }
}
