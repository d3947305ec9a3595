use std::{
    collections::HashSet,
    sync::Arc,
    time::{Duration, Instant},
};

use thiserror::Error;

use crate::{
    forwarder::{sync::Pusher, ForwarderConfiguration, RemoteAddr, TcpConnector},
    key::KeyPath,
    recorder::{GraphiteHandle, GraphiteRecorder},
    snapshot::AggregationStore,
    state::{State, StateConfiguration},
    summary::{SketchSummarizer, Summarizer},
};

const DEFAULT_PUSH_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_HISTOGRAM_RESERVOIR_SIZE: usize = 1024;

type Parts = (ForwarderConfiguration, TcpConnector, Box<dyn Summarizer + Send>, StateConfiguration);

/// Errors that could occur while building or installing a Graphite recorder/exporter.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Failed to parse the remote address.
    #[error("invalid remote address: {reason}")]
    InvalidRemoteAddress {
        /// Details about the parsing failure.
        reason: String,
    },

    /// No remote address was configured.
    #[error("no remote address configured")]
    MissingRemoteAddress,

    /// No metric prefix was configured.
    #[error("no metric prefix configured")]
    MissingPrefix,

    /// The push interval was zero, or too large to schedule.
    #[error("push interval must be greater than zero and representable as a deadline")]
    InvalidPushInterval,

    /// A connect or write timeout was zero.
    #[error("{name} timeout must be greater than zero")]
    InvalidTimeout {
        /// Which timeout was invalid.
        name: &'static str,
    },

    /// Histogram sampling was enabled with a reservoir size of zero.
    #[error("histogram reservoir size must be greater than zero when sampling is enabled")]
    InvalidReservoirSize,

    /// Failed to spawn the background thread for the pusher.
    #[error("failed to spawn background thread for exporter")]
    Backend,

    /// Failed to install the recorder due to an existing global recorder already being installed.
    #[error("failed to install exporter as global recorder")]
    FailedToInstall,
}

/// Builder for a Graphite exporter.
///
/// A remote address and a metric prefix must be configured before building.
pub struct GraphiteBuilder {
    remote_addr: Option<RemoteAddr>,
    prefix: Option<String>,
    push_interval: Duration,
    whitelist: Option<HashSet<KeyPath>>,
    connect_timeout: Duration,
    write_timeout: Duration,
    histogram_sampling: bool,
    histogram_reservoir_size: usize,
    summarizer: Box<dyn Summarizer + Send>,
}

impl GraphiteBuilder {
    /// Creates a new `GraphiteBuilder` with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the remote address to push metrics to.
    ///
    /// The address needs to be in the format of `<host>:<port>`, where IPv6 hosts are wrapped in brackets. The host is
    /// resolved again every time the exporter (re)connects.
    ///
    /// # Errors
    ///
    /// If the given address is not able to be parsed as a valid address, an error will be returned indicating the
    /// reason.
    pub fn with_remote_address<A>(mut self, addr: A) -> Result<Self, BuildError>
    where
        A: AsRef<str>,
    {
        self.remote_addr = Some(
            RemoteAddr::try_from(addr.as_ref())
                .map_err(|reason| BuildError::InvalidRemoteAddress { reason })?,
        );
        Ok(self)
    }

    /// Set the remote host and port to push metrics to.
    #[must_use]
    pub fn with_host_and_port<H>(mut self, host: H, port: u16) -> Self
    where
        H: Into<String>,
    {
        self.remote_addr = Some(RemoteAddr::new(host, port));
        self
    }

    /// Set the prefix prepended to every metric path.
    ///
    /// A metric named `requests` is written as `<prefix>.requests`.
    #[must_use]
    pub fn with_prefix<P>(mut self, prefix: P) -> Self
    where
        P: Into<String>,
    {
        self.prefix = Some(prefix.into());
        self
    }

    /// Set the push interval.
    ///
    /// Metrics are pushed once per interval, and the interval (in whole seconds) is also the window requested from the
    /// aggregation store.
    ///
    /// Defaults to 60 seconds.
    #[must_use]
    pub fn with_push_interval(mut self, push_interval: Duration) -> Self {
        self.push_interval = push_interval;
        self
    }

    /// Restricts the exported metrics to the given keys.
    ///
    /// Keys are matched exactly against each metric's [`KeyPath`], before it is flattened or sanitized. Labeled
    /// metrics therefore need to be whitelisted with their full path, such as `KeyPath::from(&key)`.
    ///
    /// Defaults to exporting all metrics.
    #[must_use]
    pub fn with_whitelist<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<KeyPath>,
    {
        self.whitelist = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Set the timeout for connecting to the remote server.
    ///
    /// Defaults to 5 seconds.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the write timeout for pushing metrics.
    ///
    /// When the write timeout is reached, the payload being sent at the time is dropped, the connection is closed, and
    /// a new connection is made on the next push.
    ///
    /// Defaults to 5 seconds.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Sets whether or not to enable histogram sampling.
    ///
    /// When enabled, histograms utilize [reservoir sampling][reservoir] to hold a fixed number of values per push
    /// interval, no matter how many values are recorded. Percentiles are then computed over the reservoir.
    ///
    /// Defaults to `false`.
    ///
    /// [reservoir]: https://en.wikipedia.org/wiki/Reservoir_sampling
    #[must_use]
    pub fn with_histogram_sampling(mut self, histogram_sampling: bool) -> Self {
        self.histogram_sampling = histogram_sampling;
        self
    }

    /// Sets the reservoir size for histogram sampling.
    ///
    /// Must be greater than zero when sampling is enabled. Defaults to 1,024.
    #[must_use]
    pub fn with_histogram_reservoir_size(mut self, reservoir_size: usize) -> Self {
        self.histogram_reservoir_size = reservoir_size;
        self
    }

    /// Sets the summarizer used to reduce histograms to percentiles.
    ///
    /// Defaults to [`SketchSummarizer`].
    #[must_use]
    pub fn with_summarizer<Z>(mut self, summarizer: Z) -> Self
    where
        Z: Summarizer + Send + 'static,
    {
        self.summarizer = Box::new(summarizer);
        self
    }

    fn into_parts(self) -> Result<Parts, BuildError> {
        let remote_addr = self.remote_addr.ok_or(BuildError::MissingRemoteAddress)?;
        let prefix = self.prefix.filter(|p| !p.is_empty()).ok_or(BuildError::MissingPrefix)?;

        if self.push_interval.is_zero() || Instant::now().checked_add(self.push_interval).is_none() {
            return Err(BuildError::InvalidPushInterval);
        }
        if self.connect_timeout.is_zero() {
            return Err(BuildError::InvalidTimeout { name: "connect" });
        }
        if self.write_timeout.is_zero() {
            return Err(BuildError::InvalidTimeout { name: "write" });
        }
        if self.histogram_sampling && self.histogram_reservoir_size == 0 {
            return Err(BuildError::InvalidReservoirSize);
        }

        let forwarder_config =
            ForwarderConfiguration { prefix, push_interval: self.push_interval, whitelist: self.whitelist };
        let connector = TcpConnector::new(remote_addr, self.connect_timeout, self.write_timeout);
        let state_config = StateConfiguration {
            histogram_sampling: self.histogram_sampling,
            histogram_reservoir_size: self.histogram_reservoir_size,
        };

        Ok((forwarder_config, connector, self.summarizer, state_config))
    }

    /// Builds the recorder.
    ///
    /// The pusher will be spawned on a background thread to push metrics to the remote server, but the recorder must be
    /// manually installed by the caller.
    ///
    /// # Errors
    ///
    /// If the configuration is incomplete or invalid, or if the background thread cannot be spawned, an error will be
    /// returned.
    pub fn build(self) -> Result<(GraphiteRecorder, GraphiteHandle), BuildError> {
        let (forwarder_config, connector, summarizer, state_config) = self.into_parts()?;

        let state = Arc::new(State::new(&state_config));
        let recorder = GraphiteRecorder::new(Arc::clone(&state));
        let handle = spawn_pusher(forwarder_config, state, connector, summarizer)?;

        Ok((recorder, handle))
    }

    /// Builds a pusher for a caller-provided aggregation store.
    ///
    /// No recorder is created: the pusher pulls its metrics from `store` instead.
    ///
    /// # Errors
    ///
    /// If the configuration is incomplete or invalid, or if the background thread cannot be spawned, an error will be
    /// returned.
    pub fn build_with_store<S>(self, store: S) -> Result<GraphiteHandle, BuildError>
    where
        S: AggregationStore + Send + 'static,
    {
        let (forwarder_config, connector, summarizer, _) = self.into_parts()?;

        spawn_pusher(forwarder_config, store, connector, summarizer)
    }

    /// Builds and installs the recorder.
    ///
    /// The pusher will be spawned on a background thread to push metrics to the remote server, and the recorder will be
    /// installed as the global recorder.
    ///
    /// # Errors
    ///
    /// If the configuration is incomplete or invalid, if the background thread cannot be spawned, or if a global
    /// recorder is already installed, an error will be returned.
    pub fn install(self) -> Result<GraphiteHandle, BuildError> {
        let (recorder, handle) = self.build()?;

        metrics::set_global_recorder(recorder).map_err(|_| BuildError::FailedToInstall)?;

        Ok(handle)
    }
}

fn spawn_pusher<S>(
    config: ForwarderConfiguration,
    store: S,
    connector: TcpConnector,
    summarizer: Box<dyn Summarizer + Send>,
) -> Result<GraphiteHandle, BuildError>
where
    S: AggregationStore + Send + 'static,
{
    let pusher = Pusher::new(config, store, connector, summarizer);
    let handle = GraphiteHandle::new(pusher.timer_handle());

    std::thread::Builder::new()
        .name("metrics-exporter-graphite-pusher".to_string())
        .spawn(move || pusher.run())
        .map_err(|_| BuildError::Backend)?;

    Ok(handle)
}

impl Default for GraphiteBuilder {
    fn default() -> Self {
        GraphiteBuilder {
            remote_addr: None,
            prefix: None,
            push_interval: DEFAULT_PUSH_INTERVAL,
            whitelist: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            histogram_sampling: false,
            histogram_reservoir_size: DEFAULT_HISTOGRAM_RESERVOIR_SIZE,
            summarizer: Box::new(SketchSummarizer),
        }
    }
}
