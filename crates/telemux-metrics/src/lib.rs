//! Metric definitions for the telemux firmware core.
//!
//! Every metric the core emits is declared here as a structured [`Metric`]
//! constant so names and labels live in one place. The `metrics` crate is
//! re-exported for convenience.
//!
//! ```rust,ignore
//! use telemux_metrics::{describe_metrics, metric_defs};
//!
//! // Register descriptions once at startup.
//! describe_metrics();
//!
//! metrics::counter!(metric_defs::RECORDS_CLASSIFIED.name, "kind" => "position_sentence")
//!     .increment(1);
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

/// A metric declaration with its metadata.
///
/// Declared at compile time via the const constructors, registered once at
/// startup via [`Metric::describe`].
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g. "telemux.classifier.records").
    pub name: &'static str,
    /// The kind of metric.
    pub kind: MetricKind,
    /// Human-readable description.
    pub description: &'static str,
    /// Unit of measurement, if any.
    pub unit: Option<Unit>,
    /// Expected label keys.
    pub labels: &'static [&'static str],
}

impl Metric {
    /// Creates a new counter metric with the given name.
    pub const fn counter(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Counter,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Creates a new gauge metric with the given name.
    pub const fn gauge(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Gauge,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Creates a new histogram metric with the given name.
    pub const fn histogram(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Histogram,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Sets the description for the metric.
    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Sets the unit for the metric.
    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Sets the expected label keys for the metric.
    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Registers this metric's description with the metrics recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => {
                describe_counter!(self.name, unit, self.description);
            }
            (MetricKind::Counter, None) => {
                describe_counter!(self.name, self.description);
            }
            (MetricKind::Gauge, Some(unit)) => {
                describe_gauge!(self.name, unit, self.description);
            }
            (MetricKind::Gauge, None) => {
                describe_gauge!(self.name, self.description);
            }
            (MetricKind::Histogram, Some(unit)) => {
                describe_histogram!(self.name, unit, self.description);
            }
            (MetricKind::Histogram, None) => {
                describe_histogram!(self.name, self.description);
            }
        }
    }
}

/// All metric definitions for the firmware core.
pub mod metric_defs {
    use super::{Metric, Unit};

    // ========================================================================
    // Stream Classifier
    // ========================================================================

    /// Records classified, by kind.
    ///
    /// Labels: kind (control_response, control_status, position_sentence,
    /// unclassified)
    pub const RECORDS_CLASSIFIED: Metric = Metric::counter("telemux.classifier.records")
        .with_description("Records classified, by kind")
        .with_unit(Unit::Count)
        .with_labels(&["kind"]);

    /// Records discarded because no delimiter arrived within the buffer bound.
    pub const CLASSIFIER_OVERFLOWS: Metric = Metric::counter("telemux.classifier.overflows")
        .with_description("Records discarded for exceeding the accumulator bound")
        .with_unit(Unit::Count);

    /// Records dropped because the destination ring channel was full.
    ///
    /// Labels: channel (control, position)
    pub const RECORDS_DROPPED: Metric = Metric::counter("telemux.classifier.records_dropped")
        .with_description("Records dropped on a full ring channel")
        .with_unit(Unit::Count)
        .with_labels(&["channel"]);

    // ========================================================================
    // Command Arbiter
    // ========================================================================

    /// Command exchanges completed successfully.
    pub const COMMANDS_OK: Metric = Metric::counter("telemux.arbiter.commands_ok")
        .with_description("Command exchanges completed successfully")
        .with_unit(Unit::Count);

    /// Command exchanges that timed out with no matching response.
    pub const COMMAND_TIMEOUTS: Metric = Metric::counter("telemux.arbiter.timeouts")
        .with_description("Command exchanges that timed out")
        .with_unit(Unit::Count);

    /// Send attempts rejected because another command was in flight.
    pub const COMMANDS_BUSY: Metric = Metric::counter("telemux.arbiter.busy")
        .with_description("Send attempts rejected while another command was in flight")
        .with_unit(Unit::Count);

    /// Command round-trip latency in milliseconds.
    pub const COMMAND_LATENCY: Metric = Metric::histogram("telemux.arbiter.latency_ms")
        .with_description("Command round-trip latency in milliseconds")
        .with_unit(Unit::Milliseconds);

    // ========================================================================
    // Connection Supervisor
    // ========================================================================

    /// Current subsystem state as a numeric code.
    ///
    /// Labels: subsystem (network, position, messaging)
    /// Values: 0=disconnected 1=connecting 2=connected 3=degraded 4=recovering
    pub const SUBSYSTEM_STATE: Metric = Metric::gauge("telemux.supervisor.state")
        .with_description("Current subsystem state code")
        .with_labels(&["subsystem"]);

    /// Health probes that failed.
    ///
    /// Labels: subsystem
    pub const PROBE_FAILURES: Metric = Metric::counter("telemux.supervisor.probe_failures")
        .with_description("Health probes that failed")
        .with_unit(Unit::Count)
        .with_labels(&["subsystem"]);

    /// Recovery attempts, by tier.
    ///
    /// Labels: subsystem, tier (lightweight, full)
    pub const RECOVERIES: Metric = Metric::counter("telemux.supervisor.recoveries")
        .with_description("Recovery attempts, by tier")
        .with_unit(Unit::Count)
        .with_labels(&["subsystem", "tier"]);

    /// Recoveries that left the subsystem still unhealthy.
    ///
    /// Labels: subsystem
    pub const RECOVERIES_EXHAUSTED: Metric = Metric::counter("telemux.supervisor.recoveries_exhausted")
        .with_description("Recoveries that left the subsystem still unhealthy")
        .with_unit(Unit::Count)
        .with_labels(&["subsystem"]);

    // ========================================================================
    // Task Scheduler & Heartbeat Monitor
    // ========================================================================

    /// Age of each worker's last heartbeat in milliseconds.
    ///
    /// Labels: worker
    pub const WORKER_HEARTBEAT_AGE: Metric = Metric::gauge("telemux.sched.heartbeat_age_ms")
        .with_description("Age of the worker's last heartbeat in milliseconds")
        .with_unit(Unit::Milliseconds)
        .with_labels(&["worker"]);

    /// Estimated stack headroom per worker in bytes.
    ///
    /// Labels: worker
    pub const WORKER_STACK_HEADROOM: Metric = Metric::gauge("telemux.sched.stack_headroom_bytes")
        .with_description("Estimated stack headroom in bytes")
        .with_unit(Unit::Bytes)
        .with_labels(&["worker"]);

    /// Times a worker was flagged unhealthy by the monitor sweep.
    ///
    /// Labels: worker
    pub const WORKER_FLAGGED: Metric = Metric::counter("telemux.sched.worker_flagged")
        .with_description("Times a worker was flagged unhealthy")
        .with_unit(Unit::Count)
        .with_labels(&["worker"]);

    /// Background jobs executed by the drainer.
    pub const JOBS_EXECUTED: Metric = Metric::counter("telemux.sched.jobs_executed")
        .with_description("Background jobs executed")
        .with_unit(Unit::Count);

    /// Background job submissions rejected on a full queue.
    pub const JOBS_REJECTED: Metric = Metric::counter("telemux.sched.jobs_rejected")
        .with_description("Background job submissions rejected on a full queue")
        .with_unit(Unit::Count);

    /// Returns a slice of all defined metrics.
    pub const ALL: &[&Metric] = &[
        // Stream Classifier
        &RECORDS_CLASSIFIED,
        &CLASSIFIER_OVERFLOWS,
        &RECORDS_DROPPED,
        // Command Arbiter
        &COMMANDS_OK,
        &COMMAND_TIMEOUTS,
        &COMMANDS_BUSY,
        &COMMAND_LATENCY,
        // Connection Supervisor
        &SUBSYSTEM_STATE,
        &PROBE_FAILURES,
        &RECOVERIES,
        &RECOVERIES_EXHAUSTED,
        // Task Scheduler
        &WORKER_HEARTBEAT_AGE,
        &WORKER_STACK_HEADROOM,
        &WORKER_FLAGGED,
        &JOBS_EXECUTED,
        &JOBS_REJECTED,
    ];
}

/// Registers all metric descriptions with the metrics recorder.
///
/// Call once at startup, after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_definitions() {
        assert_eq!(metric_defs::RECORDS_CLASSIFIED.name, "telemux.classifier.records");
        assert_eq!(metric_defs::RECORDS_CLASSIFIED.kind, MetricKind::Counter);
        assert_eq!(metric_defs::RECORDS_CLASSIFIED.labels, &["kind"]);

        assert_eq!(metric_defs::SUBSYSTEM_STATE.kind, MetricKind::Gauge);
        assert_eq!(metric_defs::COMMAND_LATENCY.kind, MetricKind::Histogram);
        assert_eq!(metric_defs::COMMAND_LATENCY.unit, Some(Unit::Milliseconds));
    }

    #[test]
    fn test_all_metrics_listed() {
        assert_eq!(metric_defs::ALL.len(), 16);
        // Names must be unique.
        let mut names: Vec<_> = metric_defs::ALL.iter().map(|m| m.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), metric_defs::ALL.len());
    }

    #[test]
    fn test_metric_builder() {
        const TEST: Metric = Metric::counter("test.counter")
            .with_description("A test counter")
            .with_unit(Unit::Count)
            .with_labels(&["kind"]);

        assert_eq!(TEST.name, "test.counter");
        assert_eq!(TEST.description, "A test counter");
        assert_eq!(TEST.unit, Some(Unit::Count));
        assert_eq!(TEST.labels, &["kind"]);
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(MetricKind::Counter.as_str(), "counter");
        assert_eq!(MetricKind::Gauge.as_str(), "gauge");
        assert_eq!(MetricKind::Histogram.as_str(), "histogram");
    }
}
