//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::cache::{NoopCache, ReadThroughCache};
use crate::config::Config;
use crate::environment::Environment;
use crate::models::Query;
use crate::pool::BackendPool;
use crate::routing::LocalityResolver;
use crate::series::{Series, Value};
use crate::transport::BackendTransport;
use crate::Result;

/// Always resolves to the same host.
pub struct StaticResolver(pub Option<String>);

#[async_trait]
impl LocalityResolver for StaticResolver {
    async fn resolve_host(&self, _key: &[u8], _start: i64, _end: i64) -> Result<Option<String>> {
        Ok(self.0.clone())
    }
}

/// Answers each slice by calling a function with the decoded query.
pub struct FnTransport<F> {
    respond: F,
    calls: AtomicUsize,
}

impl<F> FnTransport<F>
where
    F: Fn(&Query) -> Result<Vec<Series>> + Send + Sync + 'static,
{
    pub fn new(respond: F) -> Arc<Self> {
        Arc::new(Self {
            respond,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<F> BackendTransport for FnTransport<F>
where
    F: Fn(&Query) -> Result<Vec<Series>> + Send + Sync + 'static,
{
    async fn run(&self, query_json: &str, _backend_addr: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let query: Query = serde_json::from_str(query_json)?;
        let series = (self.respond)(&query)?;
        Ok(serde_json::to_string(&series)?)
    }
}

/// One series per metric with a point every 600s inside the window,
/// valued at its own timestamp.
pub fn fake_backend(query: &Query) -> Result<Vec<Series>> {
    let start = query.range.start_secs();
    let end = query.range.end_secs();
    let first = (start + 599).div_euclid(600) * 600;
    let points: Vec<(i64, Value)> = (first..=end)
        .step_by(600)
        .map(|t| (t, Value::Int(t)))
        .collect();

    Ok(query
        .sub_queries
        .iter()
        .map(|sq| {
            Series::new(sq.metric.clone())
                .with_tag("host", "web01")
                .with_points(points.clone())
        })
        .collect())
}

pub fn environment(transport: Arc<dyn BackendTransport>, config: Config) -> Environment {
    environment_with_cache(transport, config, Arc::new(NoopCache))
}

pub fn environment_with_cache(
    transport: Arc<dyn BackendTransport>,
    config: Config,
    cache: Arc<dyn ReadThroughCache>,
) -> Environment {
    let pool = BackendPool::new();
    pool.register("tsd1", "tsd1:4242", 4);

    Environment {
        config: Arc::new(config),
        resolver: Arc::new(StaticResolver(Some("tsd1".to_string()))),
        pool: Arc::new(pool),
        transport,
        cache,
    }
}
