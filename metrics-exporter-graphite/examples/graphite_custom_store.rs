use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use metrics_exporter_graphite::{
    AggregationStore, GraphiteBuilder, HistogramSample, KeyPath, Metric, Snapshot, SnapshotError,
};

/// A store that reports how many windows have been requested, plus a fake latency distribution.
struct UptimeStore {
    windows: AtomicU64,
}

impl AggregationStore for UptimeStore {
    fn get_window(&self, window_secs: u64) -> Result<Snapshot, SnapshotError> {
        let windows = self.windows.fetch_add(1, Ordering::Relaxed) + 1;
        let latency = (1..=100).map(|i| f64::from(i) / 100.0).collect::<HistogramSample>();

        Ok(Snapshot::new(
            window_secs,
            vec![
                Metric::counter(KeyPath::node(["uptime", "windows"]), windows),
                Metric::gauge(KeyPath::node(["uptime", "seconds"]), (windows * window_secs) as f64),
                Metric::histogram(KeyPath::node(["request", "latency seconds"]), latency),
            ],
        ))
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let handle = GraphiteBuilder::new()
        .with_host_and_port("localhost", 2003)
        .with_prefix("custom_store_example")
        .with_push_interval(Duration::from_secs(5))
        .build_with_store(UptimeStore { windows: AtomicU64::new(0) })
        .expect("failed to build Graphite pusher");

    loop {
        std::thread::sleep(Duration::from_secs(1));
        let timer = handle.timer();
        tracing::info!(pushes = timer.sequence(), "Waiting for the next push.");
    }
}
