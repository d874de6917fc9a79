//! Latency sample statistics.
//!
//! Percentiles use nearest-rank selection over the exact sorted samples; the
//! histogram is a diagnostic view and never feeds percentile math. Aggregates
//! across conversations are computed over merged raw samples; averaging
//! per-group percentiles is statistically invalid and is deliberately not
//! offered anywhere in this module's API.

use std::{collections::BTreeMap, time::Duration};

use serde::Serialize;

/// Summary of one duration sample set.
///
/// An empty sample set produces the all-zero sentinel value rather than an
/// error; `samples` disambiguates "no data" from "everything was instant".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    /// Number of samples the remaining fields summarize.
    pub samples: usize,
    /// Histogram keyed by bucket lower bound in microseconds.
    pub histogram: BTreeMap<u64, u64>,
    #[serde(with = "micros")]
    pub percentile10: Duration,
    #[serde(with = "micros")]
    pub percentile25: Duration,
    #[serde(with = "micros")]
    pub percentile50: Duration,
    #[serde(with = "micros")]
    pub percentile75: Duration,
    #[serde(with = "micros")]
    pub percentile90: Duration,
    #[serde(with = "micros")]
    pub percentile95: Duration,
    #[serde(with = "micros")]
    pub percentile99: Duration,
    #[serde(with = "micros")]
    pub average: Duration,
    #[serde(with = "micros")]
    pub median: Duration,
    #[serde(with = "micros")]
    pub fastest: Duration,
    #[serde(with = "micros")]
    pub slowest: Duration,
}

impl Statistics {
    /// Compute summary statistics over a sample set.
    ///
    /// Samples are copied and sorted; the input order does not matter. A zero
    /// `bucket_width` buckets the histogram by exact duration value.
    pub fn compute(samples: &[Duration], bucket_width: Duration) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let n = sorted.len();

        let total: Duration = sorted.iter().sum();
        let width = bucket_width.as_micros() as u64;
        let mut histogram = BTreeMap::new();
        for sample in &sorted {
            let micros = sample.as_micros() as u64;
            let bucket = if width == 0 { micros } else { micros / width * width };
            *histogram.entry(bucket).or_insert(0) += 1;
        }

        let rank = |p: usize| nearest_rank(&sorted, p);

        Self {
            samples: n,
            histogram,
            percentile10: rank(10),
            percentile25: rank(25),
            percentile50: rank(50),
            percentile75: rank(75),
            percentile90: rank(90),
            percentile95: rank(95),
            percentile99: rank(99),
            average: total / n as u32,
            median: rank(50),
            fastest: sorted[0],
            slowest: sorted[n - 1],
        }
    }
}

/// Per-category statistics for one conversation or the whole capture.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LatencyStats {
    pub network: Statistics,
    pub local: Statistics,
    pub remote: Statistics,
}

/// Nearest-rank selection: index `ceil(p/100 * n) - 1`, clamped to the
/// sample range. Picks an existing sample instead of interpolating.
fn nearest_rank(sorted: &[Duration], percentile: usize) -> Duration {
    let n = sorted.len();
    let index = (percentile * n).div_ceil(100).saturating_sub(1).min(n - 1);
    sorted[index]
}

/// Serialize durations as integer microseconds.
pub(crate) mod micros {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_micros() as u64)
    }
}
