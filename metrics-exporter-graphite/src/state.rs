use metrics::Key;
use metrics_util::registry::Registry;
use tracing::trace;

use crate::{
    key::KeyPath,
    snapshot::{AggregationStore, Metric, Snapshot, SnapshotError},
    storage::WindowedStorage,
};

/// Exporter state configuration.
pub struct StateConfiguration {
    /// Whether or not to sample histograms.
    pub histogram_sampling: bool,

    /// Reservoir size when histogram sampling is enabled.
    pub histogram_reservoir_size: usize,
}

/// Exporter state.
///
/// Holds the registry that the recorder writes into, and serves as the default [`AggregationStore`]: each window fetch
/// drains whatever the registry accumulated since the previous one.
pub(crate) struct State {
    registry: Registry<Key, WindowedStorage>,
}

impl State {
    /// Creates a new `State` from the given configuration.
    pub fn new(config: &StateConfiguration) -> Self {
        State {
            registry: Registry::new(WindowedStorage::new(
                config.histogram_sampling,
                config.histogram_reservoir_size,
            )),
        }
    }

    /// Returns a reference to the registry.
    pub fn registry(&self) -> &Registry<Key, WindowedStorage> {
        &self.registry
    }
}

fn sorted_by_key<H>(handles: impl IntoIterator<Item = (Key, H)>) -> Vec<(KeyPath, H)> {
    let mut handles = handles.into_iter().map(|(key, handle)| (KeyPath::from(&key), handle)).collect::<Vec<_>>();
    handles.sort_by(|(a, _), (b, _)| a.cmp(b));
    handles
}

impl AggregationStore for State {
    fn get_window(&self, window_secs: u64) -> Result<Snapshot, SnapshotError> {
        let counters = sorted_by_key(self.registry.get_counter_handles());
        let gauges = sorted_by_key(self.registry.get_gauge_handles());
        let histograms = sorted_by_key(self.registry.get_histogram_handles());

        let mut metrics = Vec::with_capacity(counters.len() + gauges.len() + histograms.len());
        for (key, counter) in counters {
            metrics.push(Metric::counter(key, counter.flush()));
        }

        for (key, gauge) in gauges {
            metrics.push(Metric::gauge(key, gauge.flush()));
        }

        for (key, histogram) in histograms {
            metrics.push(Metric::histogram(key, histogram.flush()));
        }

        trace!(window_secs, num_metrics = metrics.len(), "Collected metrics window.");

        Ok(Snapshot::new(window_secs, metrics))
    }
}
