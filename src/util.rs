//! Small support utilities shared by the trainers.

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

/// Uniform reservoir sampler keeping up to `size` items.
///
/// With a fixed seed the selected sample is reproducible for the same
/// input sequence.
#[derive(Debug)]
pub struct ReservoirSampler<T> {
    sampled: Vec<T>,
    size:    usize,
    total:   u64,
    rng:     StdRng,
}
impl<T> ReservoirSampler<T> {
    #[inline(always)]
    pub fn new(size: usize, seed: u64) -> Self {
        Self {
            sampled: Vec::with_capacity(size.min(1024)),
            size,
            total: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Offers one item to the reservoir.
    #[inline(never)]
    pub fn add(&mut self, item: T) {
        if self.size == 0 {
            return;
        }
        self.total += 1;
        if self.sampled.len() < self.size {
            self.sampled.push(item);
        } else {
            let n = self.rng.random_range(0..self.total) as usize;
            if n < self.sampled.len() {
                self.sampled[n] = item;
            }
        }
    }

    /// Returns the number of items offered so far.
    #[inline(always)]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Consumes the sampler and returns the selected items.
    #[inline(always)]
    pub fn into_sampled(self) -> Vec<T> {
        self.sampled
    }
}

/// Sorts `(key, frequency)` pairs by descending frequency with ascending
/// keys as the tie-break, the canonical ordering used all over training.
#[inline(never)]
pub fn sort_by_freq<K: Ord + Clone, V: Ord + Copy>(pairs: &mut [(K, V)]) {
    pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
}
