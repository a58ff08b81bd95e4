//! OpenTelemetry pool gauges.
//!
//! With the `otel` feature enabled, [`PoolInstruments`] records the pool
//! snapshot through the global meter on every monitor tick. Without it the
//! type is a no-op.
//!
//! Metric names follow the OpenTelemetry database client conventions.

use crate::metrics::PoolMetrics;

/// Metric names following OpenTelemetry semantic conventions.
pub mod metric_names {
    /// Gauge: connections currently leased.
    pub const DB_CLIENT_CONNECTIONS_USAGE: &str = "db.client.connections.usage";
    /// Gauge: idle connections in the pool.
    pub const DB_CLIENT_CONNECTIONS_IDLE: &str = "db.client.connections.idle";
    /// Gauge: maximum connections allowed in the pool.
    pub const DB_CLIENT_CONNECTIONS_MAX: &str = "db.client.connections.max";
    /// Gauge: callers waiting for a connection.
    pub const DB_CLIENT_CONNECTIONS_PENDING_REQUESTS: &str =
        "db.client.connections.pending_requests";
    /// Gauge: `total / max * 100`.
    pub const DB_CLIENT_CONNECTIONS_UTILIZATION: &str = "db.client.connections.utilization";
}

/// Attribute key naming the pool.
pub const POOL_NAME_ATTRIBUTE: &str = "db.client.connections.pool.name";

/// Pool gauges backed by the global OpenTelemetry meter.
#[cfg(feature = "otel")]
pub struct PoolInstruments {
    usage: opentelemetry::metrics::Gauge<u64>,
    idle: opentelemetry::metrics::Gauge<u64>,
    max: opentelemetry::metrics::Gauge<u64>,
    pending: opentelemetry::metrics::Gauge<u64>,
    utilization: opentelemetry::metrics::Gauge<f64>,
    attributes: Vec<opentelemetry::KeyValue>,
}

#[cfg(feature = "otel")]
impl PoolInstruments {
    /// Create the gauges for the pool tagged `pool_name`.
    pub fn new(pool_name: &str) -> Self {
        use opentelemetry::{KeyValue, global};

        let meter = global::meter("sluice-pool");

        let usage = meter
            .u64_gauge(metric_names::DB_CLIENT_CONNECTIONS_USAGE)
            .with_description("Number of connections currently in use")
            .with_unit("connections")
            .build();

        let idle = meter
            .u64_gauge(metric_names::DB_CLIENT_CONNECTIONS_IDLE)
            .with_description("Number of idle connections available")
            .with_unit("connections")
            .build();

        let max = meter
            .u64_gauge(metric_names::DB_CLIENT_CONNECTIONS_MAX)
            .with_description("Maximum number of connections allowed")
            .with_unit("connections")
            .build();

        let pending = meter
            .u64_gauge(metric_names::DB_CLIENT_CONNECTIONS_PENDING_REQUESTS)
            .with_description("Number of callers waiting for a connection")
            .with_unit("requests")
            .build();

        let utilization = meter
            .f64_gauge(metric_names::DB_CLIENT_CONNECTIONS_UTILIZATION)
            .with_description("Connections held as a percentage of the maximum")
            .with_unit("%")
            .build();

        Self {
            usage,
            idle,
            max,
            pending,
            utilization,
            attributes: vec![KeyValue::new(POOL_NAME_ATTRIBUTE, pool_name.to_string())],
        }
    }

    /// Record one pool snapshot.
    pub fn record(&self, metrics: &PoolMetrics) {
        self.usage
            .record(u64::from(metrics.active_connections), &self.attributes);
        self.idle
            .record(u64::from(metrics.idle_connections), &self.attributes);
        self.max
            .record(u64::from(metrics.max_connections), &self.attributes);
        self.pending
            .record(u64::from(metrics.waiting_requests), &self.attributes);
        self.utilization
            .record(metrics.utilization_percent, &self.attributes);
    }
}

/// No-op pool gauges when the otel feature is disabled.
#[cfg(not(feature = "otel"))]
#[derive(Debug, Clone, Default)]
pub struct PoolInstruments;

#[cfg(not(feature = "otel"))]
impl PoolInstruments {
    /// Create a new no-op recorder.
    #[must_use]
    pub fn new(_pool_name: &str) -> Self {
        Self
    }

    /// Record one pool snapshot (no-op).
    pub fn record(&self, _metrics: &PoolMetrics) {}
}
