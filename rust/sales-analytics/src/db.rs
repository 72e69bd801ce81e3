//! Connection pooling for the `sales` fact table store.

use crate::config::AppConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bb8::{ManageConnection, Pool};
use diesel_async::{AsyncPgConnection, SimpleAsyncConnection};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use std::fs::File;
use std::io::BufReader;
use tokio_postgres::{Config as PgConfig, NoTls};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{error, info};

pub type PgPool = Pool<SalesConnectionManager>;

/// Builds the pool and performs a single connectivity check. A failed check is
/// logged rather than returned so the service can come up before the database.
pub async fn connect_pool(config: &AppConfig) -> Result<PgPool> {
    let manager = SalesConnectionManager::from_config(config)?;
    let pool = Pool::builder()
        .max_size(config.max_pool_size)
        .connection_timeout(config.request_timeout)
        .build(manager)
        .await
        .context("failed to build PostgreSQL connection pool")?;

    match pool.get().await {
        Ok(_) => info!("database connectivity check succeeded"),
        Err(err) => error!(error = ?err, "initial database connectivity check failed"),
    }

    Ok(pool)
}

/// Builds the pool without opening any connection.
pub fn lazy_pool(config: &AppConfig) -> Result<PgPool> {
    let manager = SalesConnectionManager::from_config(config)?;
    Ok(Pool::builder()
        .max_size(config.max_pool_size)
        .connection_timeout(config.request_timeout)
        .build_unchecked(manager))
}

#[derive(Clone)]
pub struct SalesConnectionManager {
    config: PgConfig,
    tls: Option<MakeRustlsConnect>,
}

impl SalesConnectionManager {
    fn from_config(config: &AppConfig) -> Result<Self> {
        let pg_config = config
            .database_url
            .parse::<PgConfig>()
            .context("invalid DATABASE_URL")?;

        let tls = match config.pg_ssl_root_cert.as_deref() {
            Some(root) => Some(tls_connector(
                root,
                config.pg_ssl_cert.as_deref(),
                config.pg_ssl_key.as_deref(),
            )?),
            None => None,
        };

        Ok(Self {
            config: pg_config,
            tls,
        })
    }
}

#[async_trait]
impl ManageConnection for SalesConnectionManager {
    type Connection = AsyncPgConnection;
    type Error = anyhow::Error;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let conn = match &self.tls {
            None => {
                let (client, connection) = self.config.connect(NoTls).await?;
                AsyncPgConnection::try_from_client_and_connection(client, connection).await
            }
            Some(connector) => {
                let (client, connection) = self.config.connect(connector.clone()).await?;
                AsyncPgConnection::try_from_client_and_connection(client, connection).await
            }
        };
        conn.map_err(|err| anyhow::anyhow!(err))
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.batch_execute("SELECT 1").await?;
        Ok(())
    }

    fn has_broken(&self, _: &mut Self::Connection) -> bool {
        false
    }
}

fn tls_connector(
    root_cert: &str,
    client_cert: Option<&str>,
    client_key: Option<&str>,
) -> Result<MakeRustlsConnect> {
    let mut roots = RootCertStore::empty();
    for cert in read_certs(root_cert, "PGSSLROOTCERT")? {
        roots
            .add(cert)
            .map_err(|_| anyhow::anyhow!("invalid certificate in PGSSLROOTCERT"))?;
    }

    let builder = ClientConfig::builder().with_root_certificates(roots);
    let tls = match (client_cert, client_key) {
        (None, None) => builder.with_no_client_auth(),
        (Some(cert), Some(key)) => builder
            .with_client_auth_cert(read_certs(cert, "PGSSLCERT")?, read_key(key)?)
            .context("failed to build client TLS config")?,
        _ => anyhow::bail!("PGSSLCERT and PGSSLKEY must both be set (or neither)"),
    };

    Ok(MakeRustlsConnect::new(tls))
}

fn read_certs(path: &str, label: &str) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).with_context(|| format!("failed to open {label} file '{path}'"))?;
    let chain = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("failed to parse {label}"))?;

    if chain.is_empty() {
        anyhow::bail!("{label} contained no certificates");
    }
    Ok(chain)
}

fn read_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).with_context(|| format!("failed to open PGSSLKEY file '{path}'"))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .context("failed to parse PGSSLKEY")?
        .context("PGSSLKEY contained no private keys")
}
