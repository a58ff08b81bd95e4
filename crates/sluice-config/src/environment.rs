//! Deployment environments and their pool tuning.
//!
//! Each environment maps to one row of a fixed tuning table. Unknown tags
//! select the development row, so a typo never silently picks production
//! sizing.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Deployment environment the pool is tuned for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Production deployment.
    Production,
    /// Pre-production staging deployment.
    Staging,
    /// Automated test runs.
    Test,
    /// Local development (the fallback for unknown tags).
    #[default]
    Development,
}

/// Pool sizing and timeout tuning for one environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolTuning {
    /// Minimum number of connections kept by the pool.
    pub min_connections: u32,
    /// Maximum number of connections the pool may open.
    pub max_connections: u32,
    /// Upper bound on waiting for a connection.
    pub connection_timeout: Duration,
    /// How long an unused connection may stay idle.
    pub idle_timeout: Duration,
    /// Server-side `statement_timeout`.
    pub statement_timeout: Duration,
    /// Client-side query timeout.
    pub query_timeout: Duration,
    /// Whether TLS with CA verification is required.
    pub require_tls: bool,
}

const PRODUCTION: PoolTuning = PoolTuning {
    min_connections: 10,
    max_connections: 100,
    connection_timeout: Duration::from_millis(5_000),
    idle_timeout: Duration::from_millis(30_000),
    statement_timeout: Duration::from_millis(30_000),
    query_timeout: Duration::from_millis(30_000),
    require_tls: true,
};

const STAGING: PoolTuning = PoolTuning {
    min_connections: 5,
    max_connections: 50,
    connection_timeout: Duration::from_millis(5_000),
    idle_timeout: Duration::from_millis(30_000),
    statement_timeout: Duration::from_millis(30_000),
    query_timeout: Duration::from_millis(30_000),
    require_tls: false,
};

const TEST: PoolTuning = PoolTuning {
    min_connections: 1,
    max_connections: 5,
    connection_timeout: Duration::from_millis(3_000),
    idle_timeout: Duration::from_millis(10_000),
    statement_timeout: Duration::from_millis(10_000),
    query_timeout: Duration::from_millis(10_000),
    require_tls: false,
};

// Generous statement timeouts make interactive debugging bearable.
const DEVELOPMENT: PoolTuning = PoolTuning {
    min_connections: 2,
    max_connections: 20,
    connection_timeout: Duration::from_millis(5_000),
    idle_timeout: Duration::from_millis(30_000),
    statement_timeout: Duration::from_millis(60_000),
    query_timeout: Duration::from_millis(60_000),
    require_tls: false,
};

impl Environment {
    /// All known environments.
    pub const ALL: [Environment; 4] = [
        Environment::Production,
        Environment::Staging,
        Environment::Test,
        Environment::Development,
    ];

    /// Map an environment tag to a known environment.
    ///
    /// Matching is case-sensitive. Anything other than `production`,
    /// `staging` or `test` (including a missing tag) yields
    /// [`Environment::Development`].
    #[must_use]
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag {
            Some("production") => Self::Production,
            Some("staging") => Self::Staging,
            Some("test") => Self::Test,
            Some("development") | None => Self::Development,
            Some(other) => {
                tracing::debug!(tag = other, "unknown environment tag, using development tuning");
                Self::Development
            }
        }
    }

    /// The canonical tag for this environment.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Staging => "staging",
            Self::Test => "test",
            Self::Development => "development",
        }
    }

    /// Tuning row for this environment.
    #[must_use]
    pub fn tuning(self) -> PoolTuning {
        match self {
            Self::Production => PRODUCTION,
            Self::Staging => STAGING,
            Self::Test => TEST,
            Self::Development => DEVELOPMENT,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
