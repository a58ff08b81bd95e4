//! Point-in-time pool metrics.

use serde::Serialize;

use crate::lifecycle::ConnectionManager;
use crate::pool::PoolHandle;

/// Capacity assumed when a snapshot is built without a configured maximum.
pub const FALLBACK_MAX_CONNECTIONS: u32 = 20;

/// Utilization snapshot of a pool.
///
/// Reading a snapshot never changes pool state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolMetrics {
    /// Physical connections held, idle or leased.
    pub total_connections: u32,
    /// Connections sitting idle in the pool.
    pub idle_connections: u32,
    /// Connections leased to callers.
    pub active_connections: u32,
    /// Callers queued for a connection.
    pub waiting_requests: u32,
    /// Configured capacity.
    pub max_connections: u32,
    /// `total / max * 100`. Not clamped.
    pub utilization_percent: f64,
}

impl PoolMetrics {
    /// Build a snapshot from raw counts.
    ///
    /// `max` falls back to [`FALLBACK_MAX_CONNECTIONS`] when unknown.
    #[must_use]
    pub fn from_counts(total: u32, idle: u32, waiting: u32, max: Option<u32>) -> Self {
        let max_connections = max.unwrap_or(FALLBACK_MAX_CONNECTIONS);
        let utilization_percent = if max_connections == 0 {
            0.0
        } else {
            f64::from(total) / f64::from(max_connections) * 100.0
        };

        Self {
            total_connections: total,
            idle_connections: idle,
            active_connections: total.saturating_sub(idle),
            waiting_requests: waiting,
            max_connections,
            utilization_percent,
        }
    }

    /// Whether the pool holds more connections than its capacity.
    ///
    /// A correctly behaving pool never does; seeing this is a bug signal.
    #[must_use]
    pub fn is_over_capacity(&self) -> bool {
        self.total_connections > self.max_connections
    }
}

impl<M: ConnectionManager> PoolHandle<M> {
    /// Current utilization snapshot.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let (total, idle, waiting) = self.counts();
        PoolMetrics::from_counts(
            total,
            idle,
            u32::try_from(waiting).unwrap_or(u32::MAX),
            Some(self.config().max_connections),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_pool() {
        let m = PoolMetrics::from_counts(0, 0, 0, Some(5));
        assert_eq!(m.total_connections, 0);
        assert_eq!(m.active_connections, 0);
        assert_eq!(m.max_connections, 5);
        assert_eq!(m.utilization_percent, 0.0);
        assert!(!m.is_over_capacity());
    }

    #[test]
    fn test_fallback_max() {
        let m = PoolMetrics::from_counts(10, 4, 0, None);
        assert_eq!(m.max_connections, 20);
        assert!((m.utilization_percent - 50.0).abs() < f64::EPSILON);
        assert_eq!(m.active_connections, 6);
    }

    #[test]
    fn test_overshoot_is_reported_not_clamped() {
        let m = PoolMetrics::from_counts(6, 0, 0, Some(5));
        assert!((m.utilization_percent - 120.0).abs() < 1e-9);
        assert!(m.is_over_capacity());
    }

    #[test]
    fn test_serialized_field_names() {
        let json = serde_json::to_value(PoolMetrics::from_counts(2, 1, 3, Some(4))).unwrap();
        assert_eq!(json["totalConnections"], 2);
        assert_eq!(json["activeConnections"], 1);
        assert_eq!(json["waitingRequests"], 3);
        assert_eq!(json["utilizationPercent"], 50.0);
    }

    proptest! {
        #[test]
        fn prop_metrics_invariants(
            (max, total, idle) in (1u32..500)
                .prop_flat_map(|max| (Just(max), 0..=max))
                .prop_flat_map(|(max, total)| (Just(max), Just(total), 0..=total)),
            waiting in 0u32..100,
        ) {
            let m = PoolMetrics::from_counts(total, idle, waiting, Some(max));
            prop_assert_eq!(m.active_connections, total - idle);
            let expected = f64::from(total) / f64::from(max) * 100.0;
            prop_assert!((m.utilization_percent - expected).abs() < 1e-9);
            prop_assert!(m.utilization_percent <= 100.0);
            prop_assert!(!m.is_over_capacity());
        }
    }
}
