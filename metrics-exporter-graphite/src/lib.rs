//! A [`metrics`]-compatible exporter for pushing metrics to a [Graphite][graphite] server.
//!
//! [graphite]: https://graphite.readthedocs.io/en/latest/feeding-carbon.html#the-plaintext-protocol
//!
//! # Usage
//!
//! Using the exporter is straightforward:
//!
//! ```no_run
//! # use metrics_exporter_graphite::GraphiteBuilder;
//! // First, create a builder.
//! //
//! // A remote address and a metric prefix are required. Everything else, such as the push interval or a whitelist of
//! // metrics to export, has a sensible default.
//! let builder = GraphiteBuilder::new()
//!     .with_remote_address("graphite.local:2003")
//!     .expect("failed to parse remote address")
//!     .with_prefix("my_app");
//!
//! // Normally, most users will want to "install" the exporter which sets it as the global recorder for all `metrics`
//! // calls, and creates the background thread that pushes the metrics to the remote Graphite server.
//! let handle = builder.install().expect("failed to install recorder/exporter");
//!
//! // The returned handle can be used to observe the pusher's schedule.
//! println!("next push at {:?}", handle.timer().deadline());
//! ```
//!
//! For scenarios where you need access to the `Recorder` object, perhaps to wrap it in a layer stack, call
//! [`GraphiteBuilder::build`] instead of [`GraphiteBuilder::install`]. To push metrics from somewhere other than the
//! `metrics` facade, implement [`AggregationStore`] and call [`GraphiteBuilder::build_with_store`].
//!
//! # Wire format
//!
//! Metrics are written using the plaintext protocol, one line per value:
//!
//! ```text
//! <prefix>.<path> <value> <unix timestamp in seconds>
//! ```
//!
//! Counters report how much they grew during the push interval, and gauges report their latest value. Histograms are
//! reduced to a set of percentiles (`p25`, `mean`, `p75`, `p95`, `p99` and `p999`), each written as its own line with
//! the percentile name appended to the path.
//!
//! Metric names and labels are joined with `.` to form the path, after which spaces are replaced with `_` and `/` is
//! replaced with `.`. Integers are written as plain digits and floating-point values in fixed-point notation with six
//! fractional digits.
//!
//! # Connection handling
//!
//! A single TCP connection is opened lazily on the first push, and reused for every push after that. If connecting or
//! writing fails, a warning is logged, the connection is dropped, and a fresh connection is attempted on the next push
//! interval. The exporter never gives up, and never retries faster than the push interval.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod builder;
pub use self::builder::{BuildError, GraphiteBuilder};

mod filter;
pub use self::filter::filter;

mod forwarder;
pub use self::forwarder::sync::TimerHandle;

mod key;
pub use self::key::KeyPath;

mod recorder;
pub use self::recorder::{GraphiteHandle, GraphiteRecorder};

mod snapshot;
pub use self::snapshot::{AggregationStore, HistogramSample, Metric, Snapshot, SnapshotError, Value};

mod summary;
pub use self::summary::{Percentile, PercentileSummary, SketchSummarizer, Summarizer};

mod state;
mod storage;
mod writer;
