use anyhow::Context;
use axum::{
    body::{self, Body},
    http::{self, Request, StatusCode},
    Router,
};
use rustls::{ClientConfig, RootCertStore};
use rustls_pemfile::certs;
use sales_analytics::{
    cache::{DisabledCache, MemoryCache, ResponseCache},
    config::AppConfig,
    db,
    query::AnalyticsEngine,
    server,
    state::AppState,
};
use serde_json::Value;
use std::{
    env,
    fs::{self, File},
    future::Future,
    io::BufReader,
    path::PathBuf,
    sync::{Arc, Once},
};
use tokio::{task::JoinHandle, time::sleep, time::Duration};
use tokio_postgres::{Client, Config as PgConfig, NoTls};
use tokio_postgres_rustls::MakeRustlsConnect;
use tower::ServiceExt;

pub const API_TOKEN: &str = "test-api-token";
const DB_CONNECT_RETRIES: usize = 40;
const DB_CONNECT_DELAY_MS: u64 = 250;

static TRACING_INIT: Once = Once::new();

/// Runs a test closure against a router backed by the seeded fixture database.
/// Skips (with a message) when `ANALYTICS_TEST_DATABASE_URL` is not set.
pub async fn with_analytics_harness<F, Fut>(test: F)
where
    F: FnOnce(AnalyticsHarness) -> Fut,
    Fut: Future<Output = ()>,
{
    with_configured_harness(|_| {}, test).await;
}

/// Like [`with_analytics_harness`], with `configure` applied to the test
/// configuration before the pool is built.
#[allow(dead_code)]
pub async fn with_configured_harness<C, F, Fut>(configure: C, test: F)
where
    C: FnOnce(&mut AppConfig),
    F: FnOnce(AnalyticsHarness) -> Fut,
    Fut: Future<Output = ()>,
{
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });

    let database_url = match env::var("ANALYTICS_TEST_DATABASE_URL") {
        Ok(url) if !url.trim().is_empty() => url,
        _ => {
            eprintln!(
                "[analytics-test] skipping database test: ANALYTICS_TEST_DATABASE_URL is not set"
            );
            return;
        }
    };

    seed_fixture_database(&database_url)
        .await
        .expect("failed to seed fixture database");

    let mut config = test_config(database_url);
    configure(&mut config);
    let config = Arc::new(config);
    let pool = db::connect_pool(&config)
        .await
        .expect("failed to build fixture pool");
    let cache = Arc::new(MemoryCache::new());
    let engine = AnalyticsEngine::new(pool, Arc::clone(&config), cache.clone());
    let router = server::router(AppState::new(config, engine));

    test(AnalyticsHarness { router, cache }).await;
}

/// Router over a pool that never connects. Only usable for requests that are
/// rejected before any query runs.
pub fn offline_router(api_token: Option<&str>) -> Router {
    let mut config = AppConfig::embedded("postgres://analytics@127.0.0.1:1/unused".to_string());
    config.api_token = api_token.map(str::to_string);
    let config = Arc::new(config);
    let pool = db::lazy_pool(&config).expect("lazy pool should build");
    let cache: Arc<dyn ResponseCache> = Arc::new(DisabledCache);
    let engine = AnalyticsEngine::new(pool, Arc::clone(&config), cache);
    server::router(AppState::new(config, engine))
}

fn test_config(database_url: String) -> AppConfig {
    let mut config = AppConfig::embedded(database_url);
    config.max_pool_size = 4;
    config.pg_ssl_root_cert = env::var("PGSSLROOTCERT").ok();
    config.pg_ssl_cert = env::var("PGSSLCERT").ok();
    config.pg_ssl_key = env::var("PGSSLKEY").ok();
    config.api_token = Some(API_TOKEN.to_string());
    config
}

#[derive(Clone)]
pub struct AnalyticsHarness {
    router: Router,
    cache: Arc<MemoryCache>,
}

impl AnalyticsHarness {
    pub async fn get(&self, path: &str) -> http::Response<Body> {
        self.request(path, Some(API_TOKEN)).await
    }

    #[allow(dead_code)]
    pub async fn get_unauthenticated(&self, path: &str) -> http::Response<Body> {
        self.request(path, None).await
    }

    #[allow(dead_code)]
    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    async fn request(&self, path: &str, token: Option<&str>) -> http::Response<Body> {
        send(self.router.clone(), path, token).await
    }
}

pub async fn send(router: Router, path: &str, token: Option<&str>) -> http::Response<Body> {
    let mut builder = Request::builder().method("GET").uri(path);
    if let Some(token) = token {
        builder = builder.header(http::header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = builder
        .body(Body::empty())
        .expect("failed to build harness request");
    router
        .oneshot(request)
        .await
        .expect("router should handle harness request")
}

pub async fn read_json(response: http::Response<Body>) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("response body should be readable");
    let value =
        serde_json::from_slice::<Value>(&bytes).expect("response body should be valid JSON");
    (status, value)
}

async fn seed_fixture_database(database_url: &str) -> anyhow::Result<()> {
    let mut attempts = 0usize;
    let (client, task) = loop {
        let config: PgConfig = database_url.parse()?;
        match connect_with_env_tls(config).await {
            Ok(connected) => break connected,
            Err(err) => {
                if attempts >= DB_CONNECT_RETRIES {
                    return Err(err);
                }
                attempts += 1;
                sleep(Duration::from_millis(DB_CONNECT_DELAY_MS)).await;
            }
        }
    };

    client.batch_execute(&load_fixture("schema.sql")?).await?;
    client.batch_execute(&load_fixture("seed.sql")?).await?;
    drop(client);
    let _ = task.await;
    Ok(())
}

fn load_fixture(name: &str) -> anyhow::Result<String> {
    let path = fixture_root().join(name);
    fs::read_to_string(&path)
        .map_err(|err| anyhow::anyhow!("failed to read fixture {name} from {path:?}: {err}"))
}

fn fixture_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

async fn connect_with_env_tls(config: PgConfig) -> anyhow::Result<(Client, JoinHandle<()>)> {
    match tls_connector_from_env()? {
        Some(connector) => {
            let (client, connection) = config.connect(connector).await?;
            let task = tokio::spawn(async move {
                if let Err(err) = connection.await {
                    eprintln!("fixture connection closed with error: {err}");
                }
            });
            Ok((client, task))
        }
        None => {
            let (client, connection) = config.connect(NoTls).await?;
            let task = tokio::spawn(async move {
                if let Err(err) = connection.await {
                    eprintln!("fixture connection closed with error: {err}");
                }
            });
            Ok((client, task))
        }
    }
}

fn tls_connector_from_env() -> anyhow::Result<Option<MakeRustlsConnect>> {
    let root_cert = match env::var("PGSSLROOTCERT") {
        Ok(value) if !value.trim().is_empty() => value,
        _ => return Ok(None),
    };

    let mut reader =
        BufReader::new(File::open(&root_cert).context("failed to open PGSSLROOTCERT")?);
    let mut root_store = RootCertStore::empty();
    for cert in certs(&mut reader) {
        let cert = cert.context("failed to parse PGSSLROOTCERT")?;
        root_store
            .add(cert)
            .map_err(|_| anyhow::anyhow!("invalid certificate in PGSSLROOTCERT"))?;
    }

    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    Ok(Some(MakeRustlsConnect::new(config)))
}
