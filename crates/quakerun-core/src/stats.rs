//! Running duration statistics per operation.

use serde::{Deserialize, Serialize};

/// Incremental accumulator for a stream of samples.
///
/// Mean and variance use Welford's update so that long runs of nearly equal
/// durations do not lose precision to cancellation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunningStats {
    n: u64,
    sum: f64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl Default for RunningStats {
    fn default() -> Self {
        Self {
            n: 0,
            sum: 0.0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one sample.
    pub fn push(&mut self, x: f64) {
        self.n += 1;
        self.sum += x;
        let delta = x - self.mean;
        self.mean += delta / self.n as f64;
        self.m2 += delta * (x - self.mean);
        self.min = self.min.min(x);
        self.max = self.max.max(x);
    }

    pub fn count(&self) -> u64 {
        self.n
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Arithmetic mean, or NaN with no samples.
    pub fn mean(&self) -> f64 {
        if self.n == 0 {
            f64::NAN
        } else {
            self.sum / self.n as f64
        }
    }

    /// Sample standard deviation (n - 1 denominator).
    ///
    /// NaN for fewer than two samples: a single duration has no
    /// computable spread, and that is reported as such rather than as 0.
    pub fn stddev(&self) -> f64 {
        if self.n < 2 {
            f64::NAN
        } else {
            (self.m2 / (self.n - 1) as f64).sqrt()
        }
    }

    /// Smallest sample, or NaN with no samples.
    pub fn min(&self) -> f64 {
        if self.n == 0 {
            f64::NAN
        } else {
            self.min
        }
    }

    /// Largest sample, or NaN with no samples.
    pub fn max(&self) -> f64 {
        if self.n == 0 {
            f64::NAN
        } else {
            self.max
        }
    }
}

/// Summary of the successful task durations for one operation.
///
/// `stddev` is NaN when `count < 2`; `mean`, `min` and `max` are NaN when
/// only failures were seen. NaN is written as JSON `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationStats {
    pub count: u64,
    #[serde(with = "nan_as_null")]
    pub mean: f64,
    #[serde(with = "nan_as_null")]
    pub stddev: f64,
    #[serde(with = "nan_as_null")]
    pub min: f64,
    #[serde(with = "nan_as_null")]
    pub max: f64,
    /// Sum of successful durations, in seconds.
    pub total: f64,
    /// Largest peak memory reported by a successful attempt, in MB.
    pub max_memory_mb: f64,
    /// Failed attempts (not tasks) for this operation.
    pub failures: u64,
}

impl OperationStats {
    /// Build a summary from an accumulator plus side counters.
    pub fn from_running(stats: &RunningStats, max_memory_mb: f64, failures: u64) -> Self {
        Self {
            count: stats.count(),
            mean: stats.mean(),
            stddev: stats.stddev(),
            min: stats.min(),
            max: stats.max(),
            total: stats.sum(),
            max_memory_mb,
            failures,
        }
    }

    /// Returns true if a numeric stddev is available.
    pub fn has_variance(&self) -> bool {
        !self.stddev.is_nan()
    }
}

/// Serialize non-finite floats as `null` and read `null` back as NaN.
pub mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_some(value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}
