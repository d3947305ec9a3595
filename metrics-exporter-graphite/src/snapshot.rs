use std::sync::Arc;

use thiserror::Error;

use crate::key::KeyPath;

/// A metric value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    /// An unsigned integer.
    Unsigned(u64),

    /// A signed integer.
    Signed(i64),

    /// A floating-point number.
    Float(f64),
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Unsigned(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Signed(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Unsigned(u64::from(value))
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Signed(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

/// The samples recorded by a histogram over a window.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HistogramSample {
    values: Vec<f64>,
}

impl HistogramSample {
    /// Creates a new `HistogramSample` from the given values.
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    /// Returns the recorded values.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Returns the number of recorded values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if no values were recorded.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<f64> for HistogramSample {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        Self { values: iter.into_iter().collect() }
    }
}

/// A single metric in a snapshot.
#[derive(Clone, Debug, PartialEq)]
pub enum Metric {
    /// A counter.
    Counter {
        /// Metric key.
        key: KeyPath,
        /// Counter value for the window.
        value: Value,
    },

    /// A gauge.
    Gauge {
        /// Metric key.
        key: KeyPath,
        /// Latest gauge value.
        value: Value,
    },

    /// A histogram.
    Histogram {
        /// Metric key.
        key: KeyPath,
        /// Samples recorded during the window.
        sample: HistogramSample,
    },

    /// A metric of a kind that cannot be rendered as Graphite lines.
    ///
    /// Aggregation stores backed by foreign metric sources can use this to pass through metrics they do not
    /// understand. These metrics are never written out.
    Unknown {
        /// Metric key.
        key: KeyPath,
        /// Name of the metric kind, as reported by the source.
        kind: String,
    },
}

impl Metric {
    /// Creates a counter metric.
    pub fn counter<K, V>(key: K, value: V) -> Self
    where
        K: Into<KeyPath>,
        V: Into<Value>,
    {
        Metric::Counter { key: key.into(), value: value.into() }
    }

    /// Creates a gauge metric.
    pub fn gauge<K, V>(key: K, value: V) -> Self
    where
        K: Into<KeyPath>,
        V: Into<Value>,
    {
        Metric::Gauge { key: key.into(), value: value.into() }
    }

    /// Creates a histogram metric.
    pub fn histogram<K>(key: K, sample: HistogramSample) -> Self
    where
        K: Into<KeyPath>,
    {
        Metric::Histogram { key: key.into(), sample }
    }

    /// Returns the key of the metric.
    pub fn key(&self) -> &KeyPath {
        match self {
            Metric::Counter { key, .. }
            | Metric::Gauge { key, .. }
            | Metric::Histogram { key, .. }
            | Metric::Unknown { key, .. } => key,
        }
    }
}

/// An ordered set of metrics collected over a fixed window.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    window_secs: u64,
    metrics: Vec<Metric>,
}

impl Snapshot {
    /// Creates a new `Snapshot` covering `window_secs` seconds.
    pub fn new(window_secs: u64, metrics: Vec<Metric>) -> Self {
        Self { window_secs, metrics }
    }

    /// Returns the window, in seconds, that this snapshot covers.
    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    /// Returns the metrics in this snapshot.
    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    /// Consumes the snapshot and returns its metrics.
    pub fn into_metrics(self) -> Vec<Metric> {
        self.metrics
    }

    /// Returns the number of metrics in this snapshot.
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Returns `true` if this snapshot holds no metrics.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub(crate) fn retain<F>(&mut self, f: F)
    where
        F: FnMut(&Metric) -> bool,
    {
        self.metrics.retain(f);
    }
}

/// Errors returned by an [`AggregationStore`] when a window cannot be produced.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The store could not produce a snapshot.
    #[error("aggregation store unavailable: {reason}")]
    Unavailable {
        /// Details about the failure.
        reason: String,
    },
}

/// A source of windowed metric snapshots.
///
/// The pusher asks the store for a snapshot once per push interval, passing the interval in whole seconds as the
/// window size. Stores are expected to return all metrics accumulated over roughly that trailing window.
pub trait AggregationStore {
    /// Returns a snapshot of the metrics accumulated over the trailing `window_secs` seconds.
    ///
    /// # Errors
    ///
    /// If the store cannot produce a snapshot, an error is returned and the current push cycle is abandoned.
    fn get_window(&self, window_secs: u64) -> Result<Snapshot, SnapshotError>;
}

impl<S> AggregationStore for Arc<S>
where
    S: AggregationStore + ?Sized,
{
    fn get_window(&self, window_secs: u64) -> Result<Snapshot, SnapshotError> {
        (**self).get_window(window_secs)
    }
}

impl<S> AggregationStore for Box<S>
where
    S: AggregationStore + ?Sized,
{
    fn get_window(&self, window_secs: u64) -> Result<Snapshot, SnapshotError> {
        (**self).get_window(window_secs)
    }
}
