use std::{
    io::{self, BufRead as _, BufReader},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread::sleep,
    time::{Duration, Instant, SystemTime},
};

use metrics::{Key, Label, Recorder};
use metrics_exporter_graphite::{
    AggregationStore, GraphiteBuilder, GraphiteHandle, HistogramSample, Metric, Percentile, PercentileSummary, Snapshot,
    SnapshotError,
};

static METADATA: metrics::Metadata =
    metrics::Metadata::new(module_path!(), metrics::Level::INFO, Some(module_path!()));

const PUSH_INTERVAL: Duration = Duration::from_millis(50);
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A store that always returns a single counter, and counts how often it was asked.
#[derive(Default)]
struct CountingStore {
    fetches: AtomicUsize,
}

impl AggregationStore for CountingStore {
    fn get_window(&self, window_secs: u64) -> Result<Snapshot, SnapshotError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(Snapshot::new(window_secs, vec![Metric::counter("heartbeat", 1u64)]))
    }
}

/// A store that always returns the same mix of counters and histograms.
struct MixedStore;

impl AggregationStore for MixedStore {
    fn get_window(&self, window_secs: u64) -> Result<Snapshot, SnapshotError> {
        Ok(Snapshot::new(
            window_secs,
            vec![
                Metric::counter("allowed", 1u64),
                Metric::counter("blocked", 2u64),
                Metric::histogram("latency", HistogramSample::new(vec![1.0, 3.0])),
                Metric::histogram("ignored_latency", HistogramSample::new(vec![5.0])),
            ],
        ))
    }
}

fn local_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap_or_else(|e| panic!("failed to bind listener: {e:?}"));
    let addr = listener.local_addr().unwrap_or_else(|e| panic!("failed to get local address: {e:?}"));
    (listener, addr)
}

fn accept_within(listener: &TcpListener, timeout: Duration) -> TcpStream {
    listener.set_nonblocking(true).expect("failed to set listener to non-blocking");

    let deadline = Instant::now() + timeout;
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false).expect("failed to set stream to blocking");
                stream.set_read_timeout(Some(timeout)).expect("failed to set read timeout");
                return stream;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock && Instant::now() < deadline => {
                sleep(Duration::from_millis(10));
            }
            Err(e) => panic!("no connection accepted: {e:?}"),
        }
    }
}

fn wait_for_pushes(handle: &GraphiteHandle, pushes: u64) {
    let deadline = Instant::now() + TEST_TIMEOUT;
    while handle.timer().sequence() < pushes {
        assert!(Instant::now() < deadline, "pusher did not fire {pushes} times in time");
        sleep(Duration::from_millis(10));
    }
}

#[test]
fn pushes_recorded_metrics() {
    let (listener, addr) = local_listener();

    let (recorder, _handle) = GraphiteBuilder::new()
        .with_remote_address(addr.to_string())
        .expect("address should parse")
        .with_prefix("it")
        .with_push_interval(PUSH_INTERVAL)
        .build()
        .unwrap_or_else(|e| panic!("failed to build Graphite recorder: {e:?}"));

    let before = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).expect("clock before epoch").as_secs();

    let key = Key::from_parts("requests", vec![Label::new("method", "get")]);
    recorder.register_counter(&key, &METADATA).increment(5);
    recorder.register_gauge(&Key::from_name("open connections"), &METADATA).set(3.0);

    let stream = accept_within(&listener, TEST_TIMEOUT);
    let mut lines = BufReader::new(stream).lines();

    let mut seen_counter = false;
    let mut seen_gauge = false;
    while !(seen_counter && seen_gauge) {
        let line = lines
            .next()
            .expect("connection closed before all metrics were seen")
            .unwrap_or_else(|e| panic!("failed to read line: {e:?}"));

        let parts = line.split(' ').collect::<Vec<_>>();
        assert_eq!(parts.len(), 3, "malformed line: {line}");

        let ts = parts[2].parse::<u64>().unwrap_or_else(|e| panic!("bad timestamp in {line}: {e:?}"));
        assert!(ts >= before);

        match (parts[0], parts[1]) {
            ("it.requests.method.get", "5") => seen_counter = true,
            ("it.open_connections", "3.000000") => seen_gauge = true,
            _ => {}
        }
    }
}

#[test]
fn unreachable_remote_keeps_rescheduling() {
    let (listener, addr) = local_listener();
    drop(listener);

    let store = Arc::new(CountingStore::default());
    let handle = GraphiteBuilder::new()
        .with_remote_address(addr.to_string())
        .expect("address should parse")
        .with_prefix("it")
        .with_push_interval(PUSH_INTERVAL)
        .build_with_store(Arc::clone(&store))
        .unwrap_or_else(|e| panic!("failed to build Graphite pusher: {e:?}"));

    wait_for_pushes(&handle, 5);

    // Connecting fails before the store is consulted, so nothing is drained.
    assert_eq!(store.fetches.load(Ordering::SeqCst), 0);
}

#[test]
fn reconnects_after_remote_closes() {
    let (listener, addr) = local_listener();

    let handle = GraphiteBuilder::new()
        .with_remote_address(addr.to_string())
        .expect("address should parse")
        .with_prefix("it")
        .with_push_interval(PUSH_INTERVAL)
        .build_with_store(CountingStore::default())
        .unwrap_or_else(|e| panic!("failed to build Graphite pusher: {e:?}"));

    let first = accept_within(&listener, TEST_TIMEOUT);
    let mut line = String::new();
    BufReader::new(&first).read_line(&mut line).expect("failed to read first line");
    assert!(line.starts_with("it.heartbeat 1 "), "unexpected line: {line}");
    drop(first);

    // Once writes to the closed connection start failing, the pusher connects again.
    let second = accept_within(&listener, TEST_TIMEOUT);
    line.clear();
    BufReader::new(&second).read_line(&mut line).expect("failed to read line after reconnecting");
    assert!(line.starts_with("it.heartbeat 1 "), "unexpected line: {line}");

    assert!(handle.timer().sequence() >= 2);
}

#[test]
fn builder_whitelist_and_summarizer_are_applied() {
    let (listener, addr) = local_listener();

    let mean_only = |sample: &HistogramSample| {
        let mean = sample.values().iter().sum::<f64>() / sample.len() as f64;
        PercentileSummary::new().with(Percentile::Mean, mean)
    };

    let _handle = GraphiteBuilder::new()
        .with_remote_address(addr.to_string())
        .expect("address should parse")
        .with_prefix("it")
        .with_push_interval(PUSH_INTERVAL)
        .with_whitelist(["allowed", "latency"])
        .with_summarizer(mean_only)
        .build_with_store(MixedStore)
        .unwrap_or_else(|e| panic!("failed to build Graphite pusher: {e:?}"));

    let stream = accept_within(&listener, TEST_TIMEOUT);
    let mut lines = BufReader::new(stream).lines();

    // Three push cycles' worth of lines, two lines per cycle.
    let mut seen = Vec::new();
    for _ in 0..6 {
        let line = lines
            .next()
            .expect("connection closed before enough lines were seen")
            .unwrap_or_else(|e| panic!("failed to read line: {e:?}"));

        let parts = line.split(' ').collect::<Vec<_>>();
        assert_eq!(parts.len(), 3, "malformed line: {line}");
        match (parts[0], parts[1]) {
            ("it.allowed", "1") | ("it.latency.mean", "2.000000") => seen.push(parts[0].to_string()),
            _ => panic!("unexpected line: {line}"),
        }
    }

    assert_eq!(seen.iter().filter(|path| *path == "it.allowed").count(), 3);
    assert_eq!(seen.iter().filter(|path| *path == "it.latency.mean").count(), 3);
}
