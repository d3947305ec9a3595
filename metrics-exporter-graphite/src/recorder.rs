use std::sync::Arc;

use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
use parking_lot::Mutex;

use crate::{forwarder::sync::TimerHandle, state::State};

/// A recorder that accumulates metrics for a Graphite pusher.
///
/// Metrics recorded here are drained by the pusher once per push interval.
pub struct GraphiteRecorder {
    state: Arc<State>,
}

impl GraphiteRecorder {
    pub(crate) fn new(state: Arc<State>) -> Self {
        GraphiteRecorder { state }
    }
}

impl Recorder for GraphiteRecorder {
    // Graphite has no notion of metric metadata, so descriptions are dropped.
    fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
        self.state
            .registry()
            .get_or_create_counter(key, |existing| Counter::from_arc(Arc::clone(existing)))
    }

    fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> Gauge {
        self.state
            .registry()
            .get_or_create_gauge(key, |existing| Gauge::from_arc(Arc::clone(existing)))
    }

    fn register_histogram(&self, key: &Key, _: &Metadata<'_>) -> Histogram {
        self.state
            .registry()
            .get_or_create_histogram(key, |existing| Histogram::from_arc(Arc::clone(existing)))
    }
}

/// Handle to a running Graphite pusher.
///
/// The handle is cheap to clone. Keep one around to observe the pusher's schedule, for example to wait for a push to
/// happen in tests.
#[derive(Clone, Debug)]
pub struct GraphiteHandle {
    timer: Arc<Mutex<TimerHandle>>,
}

impl GraphiteHandle {
    pub(crate) fn new(timer: Arc<Mutex<TimerHandle>>) -> Self {
        GraphiteHandle { timer }
    }

    /// Returns the pusher's current timer handle.
    pub fn timer(&self) -> TimerHandle {
        *self.timer.lock()
    }
}
