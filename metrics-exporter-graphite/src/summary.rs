use std::fmt;

use metrics_util::storage::Summary;

use crate::snapshot::HistogramSample;

/// A named statistic reported for each histogram.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Percentile {
    /// 25th percentile.
    P25,
    /// Arithmetic mean.
    Mean,
    /// 75th percentile.
    P75,
    /// 95th percentile.
    P95,
    /// 99th percentile.
    P99,
    /// 99.9th percentile.
    P999,
}

impl Percentile {
    /// All percentiles, in the order they are written out.
    pub const ALL: [Percentile; 6] = [
        Percentile::P25,
        Percentile::Mean,
        Percentile::P75,
        Percentile::P95,
        Percentile::P99,
        Percentile::P999,
    ];

    /// Returns the name used as the final segment of the metric path.
    pub const fn name(self) -> &'static str {
        match self {
            Percentile::P25 => "p25",
            Percentile::Mean => "mean",
            Percentile::P75 => "p75",
            Percentile::P95 => "p95",
            Percentile::P99 => "p99",
            Percentile::P999 => "p999",
        }
    }

    /// Returns the quantile this percentile corresponds to, or `None` for the mean.
    pub const fn quantile(self) -> Option<f64> {
        match self {
            Percentile::P25 => Some(0.25),
            Percentile::Mean => None,
            Percentile::P75 => Some(0.75),
            Percentile::P95 => Some(0.95),
            Percentile::P99 => Some(0.99),
            Percentile::P999 => Some(0.999),
        }
    }

    const fn index(self) -> usize {
        match self {
            Percentile::P25 => 0,
            Percentile::Mean => 1,
            Percentile::P75 => 2,
            Percentile::P95 => 3,
            Percentile::P99 => 4,
            Percentile::P999 => 5,
        }
    }
}

impl fmt::Display for Percentile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The reduced form of a histogram: one optional value per [`Percentile`].
///
/// A missing value means there was no data for that percentile in the window.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PercentileSummary {
    values: [Option<f64>; 6],
}

impl PercentileSummary {
    /// Creates an empty `PercentileSummary`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the value for the given percentile.
    #[must_use]
    pub fn with(mut self, percentile: Percentile, value: f64) -> Self {
        self.set(percentile, value);
        self
    }

    /// Sets the value for the given percentile.
    pub fn set(&mut self, percentile: Percentile, value: f64) {
        self.values[percentile.index()] = Some(value);
    }

    /// Gets the value for the given percentile, if present.
    pub fn get(&self, percentile: Percentile) -> Option<f64> {
        self.values[percentile.index()]
    }

    /// Returns an iterator over the present percentiles, in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (Percentile, f64)> + '_ {
        Percentile::ALL.into_iter().filter_map(move |p| self.get(p).map(|v| (p, v)))
    }
}

/// Reduces a histogram sample to its percentile summary.
pub trait Summarizer {
    /// Summarizes the given histogram sample.
    fn summarize(&self, sample: &HistogramSample) -> PercentileSummary;
}

/// The default summarizer.
///
/// Quantiles are estimated with a [DDSketch][ddsketch]-backed [`Summary`], and the mean is computed exactly. Non-finite
/// values are ignored, and a sample with no finite values yields an empty summary.
///
/// [ddsketch]: https://arxiv.org/abs/1908.10693
#[derive(Clone, Copy, Debug, Default)]
pub struct SketchSummarizer;

impl Summarizer for SketchSummarizer {
    fn summarize(&self, sample: &HistogramSample) -> PercentileSummary {
        let mut summary = PercentileSummary::new();

        // NaN and infinities would skew both the sketch and the mean, so only finite values are summarized.
        let mut sketch = Summary::with_defaults();
        let mut sum = 0.0;
        let mut count = 0usize;
        for value in sample.values().iter().copied().filter(|v| v.is_finite()) {
            sketch.add(value);
            sum += value;
            count += 1;
        }

        if count == 0 {
            return summary;
        }

        for percentile in Percentile::ALL {
            let value = match percentile.quantile() {
                Some(q) => sketch.quantile(q),
                None => Some(sum / count as f64),
            };

            if let Some(value) = value {
                summary.set(percentile, value);
            }
        }

        summary
    }
}

impl<F> Summarizer for F
where
    F: Fn(&HistogramSample) -> PercentileSummary,
{
    fn summarize(&self, sample: &HistogramSample) -> PercentileSummary {
        self(sample)
    }
}
