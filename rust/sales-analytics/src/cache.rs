//! Fail-open response caching.
//!
//! Backends never report errors to callers: an unreachable cache behaves as a
//! permanent miss and writes become no-ops.

use crate::{
    config::AppConfig,
    error::{Result, ServiceError},
    filters::FilterSet,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::{aio::ConnectionManager, AsyncCommands};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::{
    collections::{BTreeMap, HashMap},
    future::Future,
    sync::Arc,
    time::Duration,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound on a single cache read or write issued on the request path.
const OPERATION_TIMEOUT: Duration = Duration::from_secs(1);

#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String, ttl: Duration);
}

/// Selects the backend for `config`. Missing or unreachable Redis degrades to
/// [`DisabledCache`].
pub async fn from_config(config: &AppConfig) -> Arc<dyn ResponseCache> {
    let Some(url) = config.redis_url.as_deref() else {
        warn!("no Redis URL configured; response caching is disabled");
        return Arc::new(DisabledCache);
    };

    match RedisCache::connect(url).await {
        Ok(cache) => {
            info!("response cache connected");
            Arc::new(cache)
        }
        Err(err) => {
            warn!(error = %err, "failed to connect to Redis; continuing without cache");
            Arc::new(DisabledCache)
        }
    }
}

/// Key for one endpoint invocation: `<namespace>:<json>` where the JSON object
/// carries the filter parameters plus `extras`, sorted by field name.
pub fn cache_key(namespace: &str, filters: &FilterSet, extras: &[(&str, String)]) -> String {
    let mut params: BTreeMap<String, String> = filters
        .cache_params()
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect();
    for (name, value) in extras {
        params.insert((*name).to_string(), value.clone());
    }

    let body: Vec<String> = params
        .into_iter()
        .map(|(name, value)| format!("{}:{}", Value::String(name), Value::String(value)))
        .collect();

    format!("{namespace}:{{{}}}", body.join(","))
}

/// Returns the cached value under `key` or computes, stores and returns it.
/// Entries that no longer deserialize are recomputed. A backend that stalls
/// past [`OPERATION_TIMEOUT`] counts as a miss on read and is skipped on write.
pub async fn get_or_compute<T, F, Fut>(
    cache: &dyn ResponseCache,
    key: &str,
    ttl: Duration,
    compute: F,
) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let cached = match tokio::time::timeout(OPERATION_TIMEOUT, cache.get(key)).await {
        Ok(cached) => cached,
        Err(_) => {
            warn!(%key, "cache read timed out");
            None
        }
    };

    if let Some(raw) = cached {
        match serde_json::from_str::<T>(&raw) {
            Ok(value) => {
                debug!(%key, "cache hit");
                return Ok(value);
            }
            Err(err) => warn!(%key, error = %err, "discarding undecodable cache entry"),
        }
    }

    let value = compute().await?;
    let encoded = serde_json::to_string(&value)
        .map_err(|err| ServiceError::Internal(anyhow::anyhow!(err)))?;
    if tokio::time::timeout(OPERATION_TIMEOUT, cache.set(key, encoded, ttl))
        .await
        .is_err()
    {
        warn!(%key, "cache write timed out");
    }
    Ok(value)
}

pub struct DisabledCache;

#[async_trait]
impl ResponseCache for DisabledCache {
    async fn get(&self, _key: &str) -> Option<String> {
        None
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) {}
}

/// Redis backend. The connection manager re-establishes the connection after
/// Redis restarts, so caching resumes without a service restart.
pub struct RedisCache {
    connection: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let connection = tokio::time::timeout(CONNECT_TIMEOUT, client.get_connection_manager())
            .await
            .map_err(|_| anyhow::anyhow!("timed out connecting to Redis"))??;
        Ok(Self { connection })
    }
}

#[async_trait]
impl ResponseCache for RedisCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.connection.clone();
        match conn.get::<_, Option<String>>(key).await {
            Ok(value) => value,
            Err(err) => {
                warn!(%key, error = %err, "redis GET failed");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        let mut conn = self.connection.clone();
        let seconds = ttl.as_secs().max(1);
        if let Err(err) = conn.set_ex::<_, _, ()>(key, value, seconds).await {
            warn!(%key, error = %err, "redis SET failed");
        }
    }
}

/// In-process TTL map for tests and embedded use. Expired entries are dropped
/// on read and swept on every write.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResponseCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((value, expires_at)) if Instant::now() < *expires_at => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, (_, expires_at)| now < *expires_at);
        entries.insert(key.to_string(), (value, now + ttl));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{DateWindow, FilterQuery};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn filters(query: FilterQuery) -> FilterSet {
        FilterSet::from_query(query).unwrap()
    }

    fn usa_january() -> FilterSet {
        filters(FilterQuery {
            start_date: Some("2024-01-01".into()),
            end_date: Some("2024-02-01".into()),
            country: Some("USA".into()),
            ..FilterQuery::default()
        })
    }

    #[test]
    fn key_is_namespace_plus_sorted_json() {
        let key = cache_key("kpis:v1", &usa_january(), &[]);
        assert_eq!(
            key,
            r#"kpis:v1:{"country":"USA","endDate":"2024-02-01","startDate":"2024-01-01"}"#
        );
    }

    #[test]
    fn extras_are_merged_in_order() {
        let key = cache_key(
            "geographic:regional",
            &usa_january(),
            &[("page", "2".to_string()), ("limit", "20".to_string())],
        );
        assert_eq!(
            key,
            r#"geographic:regional:{"country":"USA","endDate":"2024-02-01","limit":"20","page":"2","startDate":"2024-01-01"}"#
        );
    }

    #[test]
    fn logically_identical_requests_share_a_key() {
        let a = filters(FilterQuery {
            customer_segment: Some("Premium".into()),
            start_date: Some("2024-01-01".into()),
            end_date: Some("2024-02-01".into()),
            marketing_channel: Some("Email".into()),
            ..FilterQuery::default()
        });
        let b = FilterSet {
            window: a.window,
            marketing_channel: Some("Email".into()),
            customer_segment: Some("Premium".into()),
            country: None,
            product_category: None,
        };
        assert_eq!(cache_key("x", &a, &[]), cache_key("x", &b, &[]));
        assert_ne!(
            cache_key("x", &a, &[]),
            cache_key("x", &a.with_window(DateWindow {
                start: a.window.start,
                end: a.window.start
            }), &[])
        );
    }

    #[test]
    fn values_are_json_escaped() {
        let filters = FilterSet {
            country: Some("C\"te d'Ivoire".into()),
            ..usa_january()
        };
        let key = cache_key("revenue:trends", &filters, &[]);
        assert!(key.contains(r#""country":"C\"te d'Ivoire""#), "{key}");
    }

    #[tokio::test]
    async fn memory_cache_round_trip_and_expiry() {
        let cache = MemoryCache::new();
        let body = json!({"data": [{"date": "2024-01-05", "revenue": 100.0}]});

        cache
            .set("k", body.to_string(), Duration::from_millis(50))
            .await;
        let hit = cache.get("k").await.expect("entry should be live");
        assert_eq!(serde_json::from_str::<Value>(&hit).unwrap(), body);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.get("k").await, None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn memory_cache_sweeps_expired_entries_on_write() {
        let cache = MemoryCache::new();
        for key in ["a", "b", "c"] {
            cache.set(key, "stale".into(), Duration::from_millis(20)).await;
        }
        assert_eq!(cache.len(), 3);

        tokio::time::sleep(Duration::from_millis(50)).await;
        cache.set("d", "fresh".into(), Duration::from_secs(60)).await;

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("d").await.as_deref(), Some("fresh"));
    }

    /// Backend whose commands never complete in time.
    struct StalledCache {
        writes: AtomicUsize,
    }

    #[async_trait]
    impl ResponseCache for StalledCache {
        async fn get(&self, _key: &str) -> Option<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Some("\"stale\"".into())
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Duration) {
            tokio::time::sleep(Duration::from_secs(60)).await;
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn stalled_backend_does_not_block_computation() {
        let cache = StalledCache {
            writes: AtomicUsize::new(0),
        };
        let calls = AtomicUsize::new(0);

        let value: Value = tokio::time::timeout(
            Duration::from_secs(10),
            get_or_compute(&cache, "k", Duration::from_secs(60), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"data": 1}))
            }),
        )
        .await
        .expect("cache stalls are bounded")
        .unwrap();

        assert_eq!(value, json!({"data": 1}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn disabled_cache_always_misses() {
        let cache = DisabledCache;
        cache.set("k", "v".into(), Duration::from_secs(60)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn get_or_compute_short_circuits_on_hit() {
        let cache = MemoryCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: Value = get_or_compute(&cache, "k", Duration::from_secs(60), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"data": 1}))
            })
            .await
            .unwrap();
            assert_eq!(value, json!({"data": 1}));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn undecodable_entries_are_recomputed() {
        let cache = MemoryCache::new();
        cache
            .set("k", "{not json".into(), Duration::from_secs(60))
            .await;

        let value: Value = get_or_compute(&cache, "k", Duration::from_secs(60), || async {
            Ok(json!([1, 2, 3]))
        })
        .await
        .unwrap();

        assert_eq!(value, json!([1, 2, 3]));
        assert_eq!(cache.get("k").await.as_deref(), Some("[1,2,3]"));
    }

    #[tokio::test]
    async fn failed_computation_is_not_cached() {
        let cache = MemoryCache::new();
        let result: Result<Value> = get_or_compute(&cache, "k", Duration::from_secs(60), || async {
            Err(ServiceError::Internal(anyhow::anyhow!("boom")))
        })
        .await;

        assert!(result.is_err());
        assert!(cache.is_empty());
    }
}
