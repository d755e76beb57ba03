//! Random Sample Source
//!
//! Uniform `[min, max)` samples from a `rand` RNG. Seeded from the OS by
//! default; tests can pin a seed for reproducible sequences.

use parking_lot::Mutex;
use rand::SeedableRng;
use rand::distr::{Distribution, Uniform};
use rand::rngs::StdRng;

use crate::application::ports::SampleSource;
use crate::domain::DomainError;
use crate::domain::live_data::SampleRange;

/// Uniform random sample source over a `SampleRange`.
#[derive(Debug)]
pub struct RandomSampleSource {
    range: SampleRange,
    distribution: Uniform<f64>,
    rng: Mutex<StdRng>,
}

impl RandomSampleSource {
    /// Create a source seeded from the operating system.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidRange` if the range cannot back a
    /// uniform distribution.
    pub fn new(range: SampleRange) -> Result<Self, DomainError> {
        Self::with_rng(range, StdRng::from_os_rng())
    }

    /// Create a source with a fixed seed.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidRange` if the range cannot back a
    /// uniform distribution.
    pub fn seeded(range: SampleRange, seed: u64) -> Result<Self, DomainError> {
        Self::with_rng(range, StdRng::seed_from_u64(seed))
    }

    fn with_rng(range: SampleRange, rng: StdRng) -> Result<Self, DomainError> {
        // `Uniform::new` shrinks its scale so `max` is never returned.
        let distribution =
            Uniform::new(range.min(), range.max()).map_err(|_| DomainError::InvalidRange {
                min: range.min(),
                max: range.max(),
            })?;
        Ok(Self {
            range,
            distribution,
            rng: Mutex::new(rng),
        })
    }

    /// The range samples are drawn from.
    #[must_use]
    pub const fn range(&self) -> SampleRange {
        self.range
    }
}

impl SampleSource for RandomSampleSource {
    fn next_sample(&self) -> f64 {
        self.distribution.sample(&mut *self.rng.lock())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn default_range_samples_stay_in_bounds() {
        let source = RandomSampleSource::new(SampleRange::default()).unwrap();
        for _ in 0..10_000 {
            let v = source.next_sample();
            assert!((90.0..100.0).contains(&v), "{v} out of range");
        }
    }

    #[test]
    fn same_seed_same_sequence() {
        let a = RandomSampleSource::seeded(SampleRange::default(), 42).unwrap();
        let b = RandomSampleSource::seeded(SampleRange::default(), 42).unwrap();
        let xs: Vec<f64> = (0..16).map(|_| a.next_sample()).collect();
        let ys: Vec<f64> = (0..16).map(|_| b.next_sample()).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn samples_vary() {
        let source = RandomSampleSource::seeded(SampleRange::default(), 7).unwrap();
        let first = source.next_sample();
        assert!((0..100).any(|_| source.next_sample() != first));
    }

    proptest! {
        #[test]
        fn samples_lie_within_configured_range(
            seed in any::<u64>(),
            min in -1.0e6f64..1.0e6,
            width in 1.0e-3f64..1.0e6,
        ) {
            let range = SampleRange::new(min, min + width).unwrap();
            let source = RandomSampleSource::seeded(range, seed).unwrap();
            for _ in 0..64 {
                let v = source.next_sample();
                prop_assert!(range.contains(v), "{} not in [{}, {})", v, range.min(), range.max());
            }
        }
    }
}
