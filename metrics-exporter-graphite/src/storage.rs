use std::sync::{
    atomic::{
        AtomicBool, AtomicU64,
        Ordering::{AcqRel, Acquire, Relaxed, Release},
    },
    Arc,
};

use metrics::{CounterFn, GaugeFn, HistogramFn, Key};
use metrics_util::{
    registry::Storage,
    storage::{reservoir::AtomicSamplingReservoir, AtomicBucket},
};

use crate::snapshot::HistogramSample;

pub(crate) struct AtomicCounter {
    is_absolute: AtomicBool,
    last: AtomicU64,
    current: AtomicU64,
}

impl AtomicCounter {
    fn new() -> Self {
        Self { is_absolute: AtomicBool::new(false), last: AtomicU64::new(0), current: AtomicU64::new(0) }
    }

    /// Returns how much the counter grew since the last flush.
    pub fn flush(&self) -> u64 {
        let current = self.current.load(Acquire);
        let last = self.last.swap(current, AcqRel);
        current.wrapping_sub(last)
    }
}

impl CounterFn for AtomicCounter {
    fn increment(&self, value: u64) {
        self.is_absolute.store(false, Release);
        self.current.fetch_add(value, Relaxed);
    }

    fn absolute(&self, value: u64) {
        // The first absolute value only establishes the baseline, otherwise the delta would be measured from zero.
        if !self.is_absolute.swap(true, Release) {
            self.last.store(value, Release);
        }

        self.current.store(value, Release);
    }
}

pub(crate) struct AtomicGauge {
    inner: AtomicU64,
}

impl AtomicGauge {
    fn new() -> Self {
        Self { inner: AtomicU64::new(0.0f64.to_bits()) }
    }

    /// Returns the latest gauge value.
    pub fn flush(&self) -> f64 {
        f64::from_bits(self.inner.load(Acquire))
    }

    fn update<F>(&self, f: F)
    where
        F: Fn(f64) -> f64,
    {
        let mut current = self.inner.load(Acquire);
        loop {
            let new = f(f64::from_bits(current)).to_bits();
            match self.inner.compare_exchange_weak(current, new, AcqRel, Relaxed) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

impl GaugeFn for AtomicGauge {
    fn increment(&self, value: f64) {
        self.update(|current| current + value);
    }

    fn decrement(&self, value: f64) {
        self.update(|current| current - value);
    }

    fn set(&self, value: f64) {
        self.inner.store(value.to_bits(), Release);
    }
}

pub(crate) enum AtomicHistogram {
    Raw(AtomicBucket<f64>),
    Sampled(AtomicSamplingReservoir),
}

impl AtomicHistogram {
    /// Creates a new `AtomicHistogram` based on the given sampling configuration.
    fn new(sampling: bool, reservoir_size: usize) -> Self {
        if sampling {
            AtomicHistogram::Sampled(AtomicSamplingReservoir::new(reservoir_size))
        } else {
            AtomicHistogram::Raw(AtomicBucket::new())
        }
    }

    /// Records a new value in the histogram.
    pub fn record(&self, value: f64) {
        match self {
            AtomicHistogram::Raw(bucket) => bucket.push(value),
            AtomicHistogram::Sampled(reservoir) => reservoir.push(value),
        }
    }

    /// Drains the values recorded since the last flush.
    ///
    /// When sampling is enabled, only the values held in the reservoir are returned.
    pub fn flush(&self) -> HistogramSample {
        let mut values = Vec::new();
        match self {
            AtomicHistogram::Raw(bucket) => bucket.clear_with(|block| values.extend_from_slice(block)),
            AtomicHistogram::Sampled(reservoir) => reservoir.consume(|drain| values.extend(drain)),
        }

        HistogramSample::new(values)
    }
}

impl HistogramFn for AtomicHistogram {
    fn record(&self, value: f64) {
        self.record(value);
    }
}

/// Windowed metrics storage.
///
/// Every flush of a metric returns what it accumulated since the previous flush, so a registry backed by this storage
/// can hand out one window's worth of data per push cycle.
///
/// # Behavior
///
/// - Counters are aggregated by summing the increments since the last flush.
/// - Gauges simply maintain their standard "last write wins" behavior and emit the latest value when flushed.
/// - Histograms have their individual values stored, and drained on flush, so they can be summarized per window.
///
/// # Absolute versus incremental updates to counters
///
/// If a counter is updated absolutely, and the _last_ update was not an absolute value, the counter's state is reset
/// such that the next immediate flush will return a delta of zero. A counter therefore needs two consecutive absolute
/// updates before it will start emitting deltas.
pub(crate) struct WindowedStorage {
    histogram_sampling: bool,
    histogram_reservoir_size: usize,
}

impl WindowedStorage {
    /// Creates a new `WindowedStorage`.
    pub fn new(histogram_sampling: bool, histogram_reservoir_size: usize) -> Self {
        Self { histogram_sampling, histogram_reservoir_size }
    }
}

impl Storage<Key> for WindowedStorage {
    type Counter = Arc<AtomicCounter>;
    type Gauge = Arc<AtomicGauge>;
    type Histogram = Arc<AtomicHistogram>;

    fn counter(&self, _: &Key) -> Self::Counter {
        Arc::new(AtomicCounter::new())
    }

    fn gauge(&self, _: &Key) -> Self::Gauge {
        Arc::new(AtomicGauge::new())
    }

    fn histogram(&self, _: &Key) -> Self::Histogram {
        Arc::new(AtomicHistogram::new(self.histogram_sampling, self.histogram_reservoir_size))
    }
}
