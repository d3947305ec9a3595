use std::{
    collections::HashSet,
    io::{self, Write as _},
    sync::Arc,
    thread::sleep,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    filter::filter,
    key::KeyPath,
    snapshot::AggregationStore,
    summary::Summarizer,
    writer::PayloadWriter,
};

use super::{Connector, ForwarderConfiguration, PushError};

/// The pusher's current schedule.
///
/// The sequence number starts at zero and is bumped every time the timer fires and is rescheduled, so it doubles as a
/// count of push cycles started.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerHandle {
    sequence: u64,
    deadline: Instant,
}

impl TimerHandle {
    /// Returns the number of times the timer has fired.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns when the timer will fire next.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

// Roughly thirty years: the furthest a deadline is pushed out when the interval itself cannot be represented.
const MAX_DEADLINE_OFFSET: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// Returns the instant one interval from now, clamped to a far-off deadline if the interval overflows `Instant`.
fn deadline_after(interval: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(interval).or_else(|| now.checked_add(MAX_DEADLINE_OFFSET)).unwrap_or(now)
}

/// A fixed-interval timer whose current handle can be read from other threads.
pub(crate) struct Timer {
    interval: Duration,
    current: TimerHandle,
    shared: Arc<Mutex<TimerHandle>>,
}

impl Timer {
    pub fn new(interval: Duration) -> Self {
        let current = TimerHandle { sequence: 0, deadline: deadline_after(interval) };
        Self { interval, current, shared: Arc::new(Mutex::new(current)) }
    }

    /// Returns the shared slot holding the current handle.
    pub fn shared(&self) -> Arc<Mutex<TimerHandle>> {
        Arc::clone(&self.shared)
    }

    /// Sleeps until the current deadline.
    ///
    /// If the deadline has already passed, we don't sleep at all.
    fn wait(&self) {
        if let Some(sleep_duration) = self.current.deadline.checked_duration_since(Instant::now()) {
            sleep(sleep_duration);
        }
    }

    /// Schedules the next fire, one interval from now.
    fn reschedule(&mut self) {
        self.current = TimerHandle {
            sequence: self.current.sequence.wrapping_add(1),
            deadline: deadline_after(self.interval),
        };
        *self.shared.lock() = self.current;
    }
}

/// Result of a successful push cycle.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum CycleOutcome {
    /// The payload was written to the remote server.
    Sent { lines: usize, bytes: usize },

    /// There was nothing to write.
    Empty,
}

/// Periodically pushes metrics from an aggregation store to a remote Graphite server.
pub(crate) struct Pusher<S, C: Connector> {
    store: S,
    connector: C,
    connection: Option<C::Connection>,
    summarizer: Box<dyn Summarizer + Send>,
    writer: PayloadWriter,
    whitelist: Option<HashSet<KeyPath>>,
    timer: Timer,
}

impl<S, C> Pusher<S, C>
where
    S: AggregationStore,
    C: Connector,
{
    /// Create a new `Pusher`.
    ///
    /// No connection is opened until the first push cycle.
    pub fn new(
        config: ForwarderConfiguration,
        store: S,
        connector: C,
        summarizer: Box<dyn Summarizer + Send>,
    ) -> Self {
        Pusher {
            store,
            connector,
            connection: None,
            summarizer,
            writer: PayloadWriter::new(config.prefix),
            whitelist: config.whitelist,
            timer: Timer::new(config.push_interval),
        }
    }

    /// Returns the shared slot holding the current timer handle.
    pub fn timer_handle(&self) -> Arc<Mutex<TimerHandle>> {
        self.timer.shared()
    }

    fn window_secs(&self) -> u64 {
        self.timer.interval.as_secs()
    }

    fn ensure_connected(&mut self) -> Result<(), PushError> {
        if self.connection.is_none() {
            let connection = self.connector.connect().map_err(PushError::Connect)?;
            debug!("Connected to remote Graphite server.");
            self.connection = Some(connection);
        }

        Ok(())
    }

    fn send_payload(&mut self) -> Result<(), PushError> {
        // The connection is only put back if the write succeeds, so a failed connection is dropped (and closed) here.
        let mut connection = self.connection.take().ok_or_else(|| {
            PushError::Write(io::Error::new(io::ErrorKind::NotConnected, "no connection to remote server"))
        })?;

        let payload = self.writer.payload();
        connection.write_all(payload).and_then(|()| connection.flush()).map_err(PushError::Write)?;

        self.connection = Some(connection);
        Ok(())
    }

    /// Runs a single push cycle.
    ///
    /// The connection is established before any metrics are fetched, so that an unreachable server does not cause the
    /// aggregation store to be drained for nothing.
    fn run_cycle(&mut self) -> Result<CycleOutcome, PushError> {
        self.ensure_connected()?;

        let snapshot = self.store.get_window(self.window_secs())?;
        let snapshot = filter(snapshot, self.whitelist.as_ref());

        self.writer.clear();
        let lines = self.writer.write_metrics(snapshot.metrics(), self.summarizer.as_ref());
        if self.writer.is_empty() {
            return Ok(CycleOutcome::Empty);
        }

        self.send_payload()?;

        Ok(CycleOutcome::Sent { lines, bytes: self.writer.payload().len() })
    }

    /// Handles a single timer fire: reschedules the timer, then runs a push cycle.
    ///
    /// Failures are logged and otherwise swallowed, as the next cycle starts from scratch anyway.
    fn tick(&mut self) {
        self.timer.reschedule();

        match self.run_cycle() {
            Ok(CycleOutcome::Sent { lines, bytes }) => {
                debug!(lines, bytes, "Pushed metrics to remote Graphite server.");
            }
            Ok(CycleOutcome::Empty) => debug!("No metrics to push."),
            Err(e) => warn!(error = %e, "Failed to push metrics to remote Graphite server."),
        }
    }

    /// Run the pusher, sending metrics to the remote server at the configured interval.
    ///
    /// Cycles never overlap: if a cycle takes longer than the push interval, the next one starts as soon as it
    /// finishes.
    pub fn run(mut self) {
        loop {
            self.timer.wait();
            self.tick();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        io,
        sync::{
            atomic::{AtomicU64, AtomicUsize, Ordering},
            Arc,
        },
        time::{Duration, Instant},
    };

    use parking_lot::Mutex;

    use super::{CycleOutcome, Pusher, Timer};
    use crate::{
        forwarder::{Connector, ForwarderConfiguration, PushError},
        key::KeyPath,
        snapshot::{AggregationStore, Metric, Snapshot, SnapshotError},
        summary::SketchSummarizer,
        writer::PayloadWriter,
    };

    const TS: u64 = 1_700_000_000;

    fn fixed_clock() -> u64 {
        TS
    }

    #[derive(Default)]
    struct RemoteLog {
        connects: usize,
        refuse_connects: bool,
        fail_writes: bool,
        writes: Vec<(usize, Vec<u8>)>,
    }

    /// An in-memory remote server that records every connection and write.
    #[derive(Clone, Default)]
    struct FakeRemote(Arc<Mutex<RemoteLog>>);

    impl FakeRemote {
        fn refuse_connects(&self, refuse: bool) {
            self.0.lock().refuse_connects = refuse;
        }

        fn fail_writes(&self, fail: bool) {
            self.0.lock().fail_writes = fail;
        }

        fn connects(&self) -> usize {
            self.0.lock().connects
        }

        fn writes(&self) -> Vec<(usize, String)> {
            self.0
                .lock()
                .writes
                .iter()
                .map(|(id, buf)| (*id, String::from_utf8(buf.clone()).expect("payload should be UTF-8")))
                .collect()
        }
    }

    struct FakeConnection {
        id: usize,
        remote: FakeRemote,
    }

    impl io::Write for FakeConnection {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut log = self.remote.0.lock();
            if log.fail_writes {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "connection reset"));
            }

            log.writes.push((self.id, buf.to_vec()));
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Connector for FakeRemote {
        type Connection = FakeConnection;

        fn connect(&self) -> io::Result<FakeConnection> {
            let mut log = self.0.lock();
            if log.refuse_connects {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"));
            }

            log.connects += 1;
            Ok(FakeConnection { id: log.connects, remote: self.clone() })
        }
    }

    /// A store that always returns the same metrics, or always fails.
    #[derive(Default)]
    struct FixedStore {
        metrics: Vec<Metric>,
        fail: bool,
        fetches: AtomicUsize,
        last_window: AtomicU64,
    }

    impl FixedStore {
        fn with_metrics(metrics: Vec<Metric>) -> Arc<Self> {
            Arc::new(FixedStore { metrics, ..Default::default() })
        }

        fn failing() -> Arc<Self> {
            Arc::new(FixedStore { fail: true, ..Default::default() })
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    impl AggregationStore for FixedStore {
        fn get_window(&self, window_secs: u64) -> Result<Snapshot, SnapshotError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.last_window.store(window_secs, Ordering::SeqCst);
            if self.fail {
                return Err(SnapshotError::Unavailable { reason: "store closed".into() });
            }

            Ok(Snapshot::new(window_secs, self.metrics.clone()))
        }
    }

    fn pusher(
        store: &Arc<FixedStore>,
        remote: &FakeRemote,
        whitelist: Option<HashSet<KeyPath>>,
    ) -> Pusher<Arc<FixedStore>, FakeRemote> {
        let config = ForwarderConfiguration {
            prefix: "app".to_string(),
            push_interval: Duration::from_secs(60),
            whitelist,
        };

        let mut pusher = Pusher::new(config, Arc::clone(store), remote.clone(), Box::new(SketchSummarizer));
        pusher.writer = PayloadWriter::new("app").with_clock(fixed_clock);
        pusher
    }

    #[test]
    fn cycle_writes_payload() {
        let store = FixedStore::with_metrics(vec![
            Metric::counter("requests", 42u64),
            Metric::gauge("connections", 3.5),
        ]);
        let remote = FakeRemote::default();
        let mut pusher = pusher(&store, &remote, None);

        let outcome = pusher.run_cycle().expect("cycle should succeed");
        assert_eq!(outcome, CycleOutcome::Sent { lines: 2, bytes: 63 });
        assert_eq!(store.last_window.load(Ordering::SeqCst), 60);
        assert_eq!(
            remote.writes(),
            vec![(1, "app.requests 42 1700000000\napp.connections 3.500000 1700000000\n".to_string())]
        );
    }

    #[test]
    fn connection_is_reused() {
        let store = FixedStore::with_metrics(vec![Metric::counter("requests", 1u64)]);
        let remote = FakeRemote::default();
        let mut pusher = pusher(&store, &remote, None);

        pusher.tick();
        pusher.tick();
        pusher.tick();

        assert_eq!(remote.connects(), 1);
        let ids = remote.writes().into_iter().map(|(id, _)| id).collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 1, 1]);
    }

    #[test]
    fn reconnects_after_write_failure() {
        let store = FixedStore::with_metrics(vec![Metric::counter("requests", 1u64)]);
        let remote = FakeRemote::default();
        let mut pusher = pusher(&store, &remote, None);

        pusher.tick();
        assert_eq!(remote.connects(), 1);

        remote.fail_writes(true);
        let result = pusher.run_cycle();
        assert!(matches!(result, Err(PushError::Write(_))));
        assert!(pusher.connection.is_none());

        remote.fail_writes(false);
        pusher.tick();

        assert_eq!(remote.connects(), 2);
        let ids = remote.writes().into_iter().map(|(id, _)| id).collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn connect_failure_skips_fetch() {
        let store = FixedStore::with_metrics(vec![Metric::counter("requests", 1u64)]);
        let remote = FakeRemote::default();
        remote.refuse_connects(true);
        let mut pusher = pusher(&store, &remote, None);

        let result = pusher.run_cycle();
        assert!(matches!(result, Err(PushError::Connect(_))));
        assert_eq!(store.fetches(), 0);
        assert!(remote.writes().is_empty());

        remote.refuse_connects(false);
        pusher.tick();
        assert_eq!(store.fetches(), 1);
        assert_eq!(remote.writes().len(), 1);
    }

    #[test]
    fn empty_payload_skips_write() {
        let store = FixedStore::with_metrics(vec![]);
        let remote = FakeRemote::default();
        let mut pusher = pusher(&store, &remote, None);
        let handle = pusher.timer_handle();

        assert_eq!(pusher.run_cycle().expect("cycle should succeed"), CycleOutcome::Empty);

        pusher.tick();
        assert!(remote.writes().is_empty());
        assert_eq!(handle.lock().sequence(), 1);
        assert!(pusher.connection.is_some());
    }

    #[test]
    fn whitelist_is_applied() {
        let store = FixedStore::with_metrics(vec![
            Metric::counter("counterA", 1u64),
            Metric::gauge("gaugeB", 2.0),
        ]);
        let remote = FakeRemote::default();
        let whitelist = HashSet::from([KeyPath::leaf("counterA")]);
        let mut pusher = pusher(&store, &remote, Some(whitelist));

        pusher.tick();
        assert_eq!(remote.writes(), vec![(1, "app.counterA 1 1700000000\n".to_string())]);
    }

    #[test]
    fn whitelist_filtering_everything_skips_write() {
        let store = FixedStore::with_metrics(vec![Metric::gauge("gaugeB", 2.0)]);
        let remote = FakeRemote::default();
        let mut pusher = pusher(&store, &remote, Some(HashSet::from([KeyPath::leaf("counterA")])));

        assert_eq!(pusher.run_cycle().expect("cycle should succeed"), CycleOutcome::Empty);
        assert!(remote.writes().is_empty());
    }

    #[test]
    fn snapshot_failure_keeps_connection() {
        let store = FixedStore::failing();
        let remote = FakeRemote::default();
        let mut pusher = pusher(&store, &remote, None);

        let result = pusher.run_cycle();
        assert!(matches!(result, Err(PushError::Snapshot(_))));
        assert!(pusher.connection.is_some());
        assert!(remote.writes().is_empty());
    }

    #[test]
    fn failing_ticks_keep_rescheduling() {
        let store = FixedStore::with_metrics(vec![Metric::counter("requests", 1u64)]);
        let remote = FakeRemote::default();
        remote.refuse_connects(true);
        let mut pusher = pusher(&store, &remote, None);
        let handle = pusher.timer_handle();

        let start = Instant::now();
        for _ in 0..1000 {
            pusher.tick();
        }

        let current = *handle.lock();
        assert_eq!(current.sequence(), 1000);
        assert!(current.deadline() >= start + Duration::from_secs(60));
        assert_eq!(remote.connects(), 0);
        assert_eq!(store.fetches(), 0);
    }

    #[test]
    fn oversized_interval_clamps_deadline() {
        let start = Instant::now();
        let mut timer = Timer::new(Duration::MAX);
        assert!(timer.current.deadline > start);

        timer.reschedule();
        let current = *timer.shared().lock();
        assert_eq!(current.sequence(), 1);
        assert!(current.deadline() > start);
    }
}
