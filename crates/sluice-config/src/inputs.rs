//! Raw connection inputs gathered from the process environment.

/// Environment variable names read by [`ConnectionInputs::from_env`].
pub mod vars {
    /// Deployment environment tag.
    pub const NODE_ENV: &str = "NODE_ENV";
    /// Database host.
    pub const DATABASE_HOST: &str = "DATABASE_HOST";
    /// Database port.
    pub const DATABASE_PORT: &str = "DATABASE_PORT";
    /// Database name.
    pub const DATABASE_NAME: &str = "DATABASE_NAME";
    /// Login user.
    pub const DATABASE_USER: &str = "DATABASE_USER";
    /// Login password.
    pub const DATABASE_PASSWORD: &str = "DATABASE_PASSWORD";
    /// PEM-encoded CA bundle used to verify the server in production.
    pub const DATABASE_SSL_CA: &str = "DATABASE_SSL_CA";
    /// Full connection URL, overriding the discrete parameters.
    pub const DATABASE_URL: &str = "DATABASE_URL";
    /// Connection URL of the read replica.
    pub const DATABASE_READ_REPLICA_URL: &str = "DATABASE_READ_REPLICA_URL";
}

/// Default database host.
pub const DEFAULT_HOST: &str = "localhost";
/// Default database port.
pub const DEFAULT_PORT: u16 = 5432;
/// Default database name.
pub const DEFAULT_DATABASE: &str = "social_media_platform";
/// Default login user.
pub const DEFAULT_USER: &str = "postgres";

/// Connection parameters as supplied by the deployment.
///
/// Every field is optional; defaults are applied during resolution. Empty
/// values are treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInputs {
    /// Deployment environment tag (`NODE_ENV`).
    pub environment: Option<String>,
    /// Database host.
    pub host: Option<String>,
    /// Database port, unparsed.
    pub port: Option<String>,
    /// Database name.
    pub database: Option<String>,
    /// Login user.
    pub user: Option<String>,
    /// Login password.
    pub password: Option<String>,
    /// PEM CA bundle.
    pub ssl_ca: Option<String>,
    /// Full connection URL.
    pub database_url: Option<String>,
    /// Read replica connection URL.
    pub read_replica_url: Option<String>,
}

impl ConnectionInputs {
    /// Read inputs from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read inputs through an arbitrary lookup function.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        Self {
            environment: get(vars::NODE_ENV),
            host: get(vars::DATABASE_HOST),
            port: get(vars::DATABASE_PORT),
            database: get(vars::DATABASE_NAME),
            user: get(vars::DATABASE_USER),
            password: get(vars::DATABASE_PASSWORD),
            ssl_ca: get(vars::DATABASE_SSL_CA),
            database_url: get(vars::DATABASE_URL),
            read_replica_url: get(vars::DATABASE_READ_REPLICA_URL),
        }
    }

    /// Port to connect to, falling back to [`DEFAULT_PORT`] when absent or
    /// unparsable.
    #[must_use]
    pub fn port_or_default(&self) -> u16 {
        match self.port.as_deref() {
            None => DEFAULT_PORT,
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(port = raw, "invalid DATABASE_PORT, using {DEFAULT_PORT}");
                DEFAULT_PORT
            }),
        }
    }
}
