use std::{io::Write as _, time::SystemTime};

use tracing::trace;

use crate::{
    key::KeyPath,
    snapshot::{Metric, Value},
    summary::{Percentile, Summarizer},
};

/// Returns the current time in whole seconds since the Unix epoch.
pub(crate) fn unix_timestamp() -> u64 {
    SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Writes metrics into a single buffer of Graphite plaintext lines.
///
/// Each line has the form `<prefix>.<path> <value> <timestamp>\n`. The buffer is sent as one write per push cycle, so
/// the writer keeps it around between cycles and only clears it, to avoid reallocating on every flush.
pub(crate) struct PayloadWriter {
    prefix: String,
    buf: Vec<u8>,
    int_writer: itoa::Buffer,
    clock: fn() -> u64,
}

impl PayloadWriter {
    /// Creates a new `PayloadWriter` that prepends `prefix` to every metric path.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), buf: Vec::new(), int_writer: itoa::Buffer::new(), clock: unix_timestamp }
    }

    /// Overrides the source of line timestamps.
    #[cfg(test)]
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    /// Clears any previously written lines.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Returns the lines written since the last clear.
    pub fn payload(&self) -> &[u8] {
        &self.buf
    }

    /// Returns `true` if no lines were written since the last clear.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Writes all of the given metrics, returning the number of lines written.
    pub fn write_metrics<'a, I>(&mut self, metrics: I, summarizer: &dyn Summarizer) -> usize
    where
        I: IntoIterator<Item = &'a Metric>,
    {
        metrics.into_iter().map(|metric| self.write_metric(metric, summarizer)).sum()
    }

    /// Writes a single metric, returning the number of lines written.
    ///
    /// Counters and gauges produce one line. Histograms produce one line per percentile present in their summary, with
    /// the percentile name appended to the path. Unknown metrics produce nothing.
    pub fn write_metric(&mut self, metric: &Metric, summarizer: &dyn Summarizer) -> usize {
        match metric {
            Metric::Counter { key, value } | Metric::Gauge { key, value } => {
                usize::from(self.write_line(key, None, *value))
            }
            Metric::Histogram { key, sample } => {
                let summary = summarizer.summarize(sample);

                let mut lines = 0;
                for (percentile, value) in summary.iter() {
                    if self.write_line(key, Some(percentile), Value::Float(value)) {
                        lines += 1;
                    }
                }
                lines
            }
            Metric::Unknown { key, kind } => {
                trace!(metric_name = %key, kind = %kind, "Skipping metric of unknown kind.");
                0
            }
        }
    }

    fn write_line(&mut self, key: &KeyPath, percentile: Option<Percentile>, value: Value) -> bool {
        if let Value::Float(v) = value {
            if !v.is_finite() {
                trace!(metric_name = %key, value = v, "Skipping non-finite metric value.");
                return false;
            }
        }

        self.buf.extend_from_slice(self.prefix.as_bytes());
        self.buf.push(b'.');
        key.write_sanitized(&mut self.buf);
        if let Some(percentile) = percentile {
            self.buf.push(b'.');
            self.buf.extend_from_slice(percentile.name().as_bytes());
        }

        self.buf.push(b' ');
        match value {
            Value::Unsigned(v) => self.buf.extend_from_slice(self.int_writer.format(v).as_bytes()),
            Value::Signed(v) => self.buf.extend_from_slice(self.int_writer.format(v).as_bytes()),
            // Writing into a `Vec<u8>` cannot fail.
            Value::Float(v) => {
                let _ = write!(self.buf, "{v:.6}");
            }
        }

        self.buf.push(b' ');
        let ts = (self.clock)();
        self.buf.extend_from_slice(self.int_writer.format(ts).as_bytes());
        self.buf.push(b'\n');

        true
    }
}
