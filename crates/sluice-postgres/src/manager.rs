//! `tokio-postgres` connection manager.

use std::future::Future;

use async_trait::async_trait;
use sluice_config::{ConnectionTarget, PoolConfiguration, SessionSettings, TlsMode};
use sluice_pool::{ConnectionManager, IdleErrorSink};
use tokio_postgres::config::SslMode;
use tokio_postgres::{Client, Config, NoTls};

use crate::error::PostgresError;
use crate::tls::RustlsConnect;

/// Opens `tokio-postgres` connections for a pool.
///
/// Each connection's I/O driver runs on its own task. When the driver fails
/// (the server restarted, the socket dropped) the failure goes to the pool's
/// error sink instead of surfacing as a panic or an unobserved task error.
#[derive(Debug)]
pub struct PostgresManager {
    pg: Config,
    tls: Option<RustlsConnect>,
    session: SessionSettings,
}

impl PostgresManager {
    /// Build a manager for the connection target, TLS mode and application
    /// tag in `config`.
    pub fn new(config: &PoolConfiguration) -> Result<Self, PostgresError> {
        let mut pg = match &config.target {
            ConnectionTarget::Params {
                host,
                port,
                database,
                user,
                password,
            } => {
                let mut pg = Config::new();
                pg.host(host).port(*port).dbname(database).user(user);
                if let Some(password) = password {
                    pg.password(password);
                }
                pg
            }
            ConnectionTarget::Url(url) => url
                .parse::<Config>()
                .map_err(PostgresError::InvalidTarget)?,
        };

        pg.application_name(&config.application_name)
            .connect_timeout(config.connection_timeout);

        let tls = match &config.tls {
            TlsMode::Disabled => {
                pg.ssl_mode(SslMode::Disable);
                None
            }
            TlsMode::Verified { ca_pem } => {
                pg.ssl_mode(SslMode::Require);
                Some(RustlsConnect::new(ca_pem.as_deref())?)
            }
        };

        Ok(Self {
            pg,
            tls,
            session: config.session_settings(),
        })
    }

    /// The client options connections are opened with.
    #[must_use]
    pub fn pg_config(&self) -> &Config {
        &self.pg
    }

    /// Whether connections use TLS.
    #[must_use]
    pub fn uses_tls(&self) -> bool {
        self.tls.is_some()
    }
}

/// Drive a connection's I/O until it closes, reporting failures.
fn spawn_driver<F>(connection: F, errors: IdleErrorSink)
where
    F: Future<Output = Result<(), tokio_postgres::Error>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            errors.report(&e);
        }
        tracing::trace!(
            connection_id = errors.connection_id(),
            "database connection driver finished"
        );
    });
}

#[async_trait]
impl ConnectionManager for PostgresManager {
    type Connection = Client;
    type Error = tokio_postgres::Error;

    async fn connect(&self, errors: IdleErrorSink) -> Result<Client, tokio_postgres::Error> {
        let client = match &self.tls {
            Some(tls) => {
                let (client, connection) = self.pg.connect(tls.clone()).await?;
                spawn_driver(connection, errors);
                client
            }
            None => {
                let (client, connection) = self.pg.connect(NoTls).await?;
                spawn_driver(connection, errors);
                client
            }
        };
        Ok(client)
    }

    async fn apply_session_settings(
        &self,
        conn: &mut Client,
        settings: &SessionSettings,
    ) -> Result<(), tokio_postgres::Error> {
        conn.batch_execute(&settings.batch()).await
    }

    async fn ping(&self, conn: &mut Client) -> Result<(), tokio_postgres::Error> {
        conn.simple_query("SELECT 1").await.map(|_| ())
    }

    async fn reset(&self, conn: &mut Client) -> Result<(), tokio_postgres::Error> {
        // DISCARD ALL must run on its own, outside a transaction block.
        conn.batch_execute("DISCARD ALL").await?;
        conn.batch_execute(&self.session.batch()).await
    }

    fn is_broken(&self, conn: &Client) -> bool {
        conn.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_config::{ConnectionInputs, Environment};
    use std::time::Duration;
    use tokio_postgres::config::Host;

    fn inputs() -> ConnectionInputs {
        ConnectionInputs {
            host: Some("db.internal".into()),
            port: Some("6432".into()),
            database: Some("app".into()),
            user: Some("svc".into()),
            password: Some("secret".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_discrete_params() {
        let config = PoolConfiguration::resolve_for(Environment::Staging, &inputs());
        let manager = PostgresManager::new(&config).unwrap();
        let pg = manager.pg_config();

        assert_eq!(pg.get_hosts(), &[Host::Tcp("db.internal".into())]);
        assert_eq!(pg.get_ports(), &[6432]);
        assert_eq!(pg.get_dbname(), Some("app"));
        assert_eq!(pg.get_user(), Some("svc"));
        assert_eq!(pg.get_password(), Some(&b"secret"[..]));
        assert_eq!(
            pg.get_application_name(),
            Some("social-media-platform-staging")
        );
        assert_eq!(pg.get_connect_timeout(), Some(&Duration::from_secs(5)));
        assert_eq!(pg.get_ssl_mode(), SslMode::Disable);
        assert!(!manager.uses_tls());
    }

    #[test]
    fn test_production_uses_tls() {
        let config = PoolConfiguration::resolve_for(Environment::Production, &inputs());
        let manager = PostgresManager::new(&config).unwrap();
        assert!(manager.uses_tls());
        assert_eq!(manager.pg_config().get_ssl_mode(), SslMode::Require);
    }

    #[test]
    fn test_replica_url_target() {
        let config = PoolConfiguration::resolve_for(Environment::Test, &inputs())
            .for_replica("postgresql://reader@replica.internal:5433/app");
        let manager = PostgresManager::new(&config).unwrap();
        let pg = manager.pg_config();

        assert_eq!(pg.get_hosts(), &[Host::Tcp("replica.internal".into())]);
        assert_eq!(pg.get_ports(), &[5433]);
        assert_eq!(pg.get_user(), Some("reader"));
        assert_eq!(
            pg.get_application_name(),
            Some("social-media-platform-test-read-replica")
        );
    }

    #[test]
    fn test_bad_ca_bundle() {
        let mut raw = inputs();
        raw.ssl_ca = Some("garbage".into());
        let config = PoolConfiguration::resolve_for(Environment::Production, &raw);
        assert!(matches!(
            PostgresManager::new(&config),
            Err(PostgresError::Tls(_))
        ));
    }
}
