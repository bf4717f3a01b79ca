//! Metrics infrastructure for the meshgate commissioning gateway.
//!
//! Every metric the gateway records is declared here as a [`Metric`] constant
//! so names stay consistent between the recording sites and any exporter.
//! Recording goes through the `metrics` facade, which is a no-op until a
//! recorder is installed.
//!
//! # Example
//!
//! ```rust,ignore
//! use meshgate_metrics::{metric_defs, describe_metrics, GatewayLabels};
//!
//! describe_metrics();
//!
//! let labels = GatewayLabels::new("gw-01", "tcp");
//! metrics::counter!(metric_defs::AUTH_REJECTED.name, &labels.to_labels()).increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// The kind of metric (counter, gauge, or histogram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A gauge that can go up and down.
    Gauge,
    /// A histogram for recording distributions.
    Histogram,
}

impl MetricKind {
    /// Returns the kind as a lowercase string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric declaration with its metadata.
///
/// ```rust
/// use meshgate_metrics::{Metric, MetricKind};
/// use meshgate_metrics::metrics::Unit;
///
/// const RESETS: Metric = Metric::counter("meshgate.device.resets")
///     .with_description("Factory resets performed")
///     .with_unit(Unit::Count);
///
/// assert_eq!(RESETS.kind, MetricKind::Counter);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "meshgate.joiner.added").
    pub name: &'static str,
    /// The kind of metric.
    pub kind: MetricKind,
    /// Human-readable description.
    pub description: &'static str,
    /// The unit of measurement, if any.
    pub unit: Option<Unit>,
    /// Expected label keys beyond the standard gateway labels.
    pub labels: &'static [&'static str],
}

impl Metric {
    const fn new(name: &'static str, kind: MetricKind) -> Self {
        Self {
            name,
            kind,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Declare a counter.
    pub const fn counter(name: &'static str) -> Self {
        Self::new(name, MetricKind::Counter)
    }

    /// Declare a gauge.
    pub const fn gauge(name: &'static str) -> Self {
        Self::new(name, MetricKind::Gauge)
    }

    /// Declare a histogram.
    pub const fn histogram(name: &'static str) -> Self {
        Self::new(name, MetricKind::Histogram)
    }

    /// Set the description.
    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Set the unit.
    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Set the expected extra label keys.
    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Register this metric's description with the installed recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => describe_counter!(self.name, unit, self.description),
            (MetricKind::Counter, None) => describe_counter!(self.name, self.description),
            (MetricKind::Gauge, Some(unit)) => describe_gauge!(self.name, unit, self.description),
            (MetricKind::Gauge, None) => describe_gauge!(self.name, self.description),
            (MetricKind::Histogram, Some(unit)) => describe_histogram!(self.name, unit, self.description),
            (MetricKind::Histogram, None) => describe_histogram!(self.name, self.description),
        }
    }
}

/// All metric definitions for the gateway.
pub mod metric_defs {
    use super::{Metric, Unit};

    /// Labels present on every gateway metric.
    pub const STANDARD_LABELS: &[&str] = &["device", "transport"];

    // ========================================================================
    // Serial Link
    // ========================================================================

    /// Command lines framed from the serial stream.
    pub const SERIAL_LINES: Metric = Metric::counter("meshgate.serial.lines")
        .with_description("Command lines framed from the serial stream")
        .with_unit(Unit::Count);

    /// Partial lines dropped because the line buffer filled up.
    pub const SERIAL_OVERFLOWS: Metric = Metric::counter("meshgate.serial.overflows")
        .with_description("Partial lines dropped on line buffer overflow")
        .with_unit(Unit::Count);

    // ========================================================================
    // Command Handling
    // ========================================================================

    /// Commands rejected by signature verification.
    pub const AUTH_REJECTED: Metric = Metric::counter("meshgate.auth.rejected")
        .with_description("Commands rejected by signature verification")
        .with_unit(Unit::Count)
        .with_labels(&["reason"]);

    /// Commands that could not take the stack lock in time.
    pub const LOCK_BUSY: Metric = Metric::counter("meshgate.lock.busy")
        .with_description("Commands aborted because the stack lock was busy")
        .with_unit(Unit::Count)
        .with_labels(&["operation"]);

    /// Time spent dispatching one command line.
    pub const DISPATCH_DURATION: Metric = Metric::histogram("meshgate.dispatch.duration_us")
        .with_description("Time spent dispatching one command line")
        .with_unit(Unit::Microseconds)
        .with_labels(&["verb"]);

    // ========================================================================
    // Commissioning
    // ========================================================================

    /// Joiner credentials registered with the commissioner.
    pub const JOINER_ADDED: Metric = Metric::counter("meshgate.joiner.added")
        .with_description("Joiner credentials registered with the commissioner")
        .with_unit(Unit::Count);

    /// Joiner registrations that failed.
    pub const JOINER_FAILED: Metric = Metric::counter("meshgate.joiner.failed")
        .with_description("Joiner registrations that failed")
        .with_unit(Unit::Count)
        .with_labels(&["code"]);

    /// Commissioner joiner events observed from the stack.
    pub const COMMISSIONER_EVENTS: Metric = Metric::counter("meshgate.commissioner.events")
        .with_description("Commissioner joiner events observed from the stack")
        .with_unit(Unit::Count)
        .with_labels(&["event"]);

    /// Networks formed from scratch.
    pub const NETWORK_FORMED: Metric = Metric::counter("meshgate.network.formed")
        .with_description("Networks formed from scratch")
        .with_unit(Unit::Count);

    // ========================================================================
    // Health
    // ========================================================================

    /// Dispatches that exceeded the watchdog timeout.
    pub const WATCHDOG_ALERTS: Metric = Metric::counter("meshgate.watchdog.alerts")
        .with_description("Dispatches that exceeded the watchdog timeout")
        .with_unit(Unit::Count);

    /// Returns a slice of all defined metrics.
    pub const ALL: &[&Metric] = &[
        &SERIAL_LINES,
        &SERIAL_OVERFLOWS,
        &AUTH_REJECTED,
        &LOCK_BUSY,
        &DISPATCH_DURATION,
        &JOINER_ADDED,
        &JOINER_FAILED,
        &COMMISSIONER_EVENTS,
        &NETWORK_FORMED,
        &WATCHDOG_ALERTS,
    ];
}

/// Labels identifying the gateway instance a metric came from.
#[derive(Debug, Clone)]
pub struct GatewayLabels {
    /// Device name.
    pub device: String,
    /// Serial transport in use (`stdio`, `tcp`).
    pub transport: String,
}

impl GatewayLabels {
    /// Create labels for a gateway instance.
    pub fn new(device: impl Into<String>, transport: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            transport: transport.into(),
        }
    }

    /// Converts the labels to the metrics crate label format.
    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        vec![
            ("device", self.device.clone()),
            ("transport", self.transport.clone()),
        ]
    }

    /// Returns labels with additional key-value pairs.
    pub fn with(&self, extra: &[(&'static str, String)]) -> Vec<(&'static str, String)> {
        let mut labels = self.to_labels();
        labels.extend_from_slice(extra);
        labels
    }
}

/// Describe all gateway metrics to the installed recorder.
///
/// Call once at startup, after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

/// Install a Prometheus exporter listening on `addr` and describe all metrics.
#[cfg(feature = "prometheus")]
pub fn install_prometheus(
    addr: std::net::SocketAddr,
) -> Result<(), metrics_exporter_prometheus::BuildError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    describe_metrics();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_labels() {
        let labels = GatewayLabels::new("gw-01", "stdio");
        let label_vec = labels.to_labels();

        assert_eq!(label_vec.len(), 2);
        assert!(label_vec.contains(&("device", "gw-01".to_string())));
        assert!(label_vec.contains(&("transport", "stdio".to_string())));
    }

    #[test]
    fn test_with_extra_labels() {
        let labels = GatewayLabels::new("gw-01", "tcp");
        let extended = labels.with(&[("reason", "mismatch".to_string())]);

        assert_eq!(extended.len(), 3);
        assert!(extended.contains(&("reason", "mismatch".to_string())));
    }

    #[test]
    fn test_metric_definitions() {
        assert_eq!(metric_defs::AUTH_REJECTED.name, "meshgate.auth.rejected");
        assert_eq!(metric_defs::AUTH_REJECTED.labels, &["reason"]);
        assert_eq!(metric_defs::DISPATCH_DURATION.kind, MetricKind::Histogram);
        assert_eq!(metric_defs::DISPATCH_DURATION.unit, Some(Unit::Microseconds));
        assert_eq!(metric_defs::NETWORK_FORMED.kind, MetricKind::Counter);
    }

    #[test]
    fn test_all_metric_names_unique() {
        let mut names: Vec<_> = metric_defs::ALL.iter().map(|m| m.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), metric_defs::ALL.len());
        assert!(names.iter().all(|n| n.starts_with("meshgate.")));
    }

    #[test]
    fn test_describe_without_recorder() {
        // No recorder installed: describing must be a harmless no-op.
        describe_metrics();
    }
}
