use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::MergeStrategy;
use crate::environment::Environment;
use crate::expression::SeriesSource;
use crate::merge::{QueryAwareResultsMerger, ResultsMerger};
use crate::metrics;
use crate::models::Query;
use crate::series::Series;
use crate::splitter::QuerySplitter;
use crate::{Result, SplicerError};

static POOL_NUMBER: AtomicU64 = AtomicU64::new(0);

/// Runs single-sub-query queries against the backends, splitting wide
/// windows into slices and merging what comes back.
#[derive(Clone)]
pub struct Dispatcher {
    env: Environment,
    splitter: QuerySplitter,
}

impl Dispatcher {
    pub fn new(env: Environment) -> Self {
        let splitter = QuerySplitter::from_config(&env.config);
        Self { env, splitter }
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// `query` must carry exactly one sub-query.
    pub async fn run_sub_query(&self, query: &Query) -> Result<Vec<Series>> {
        let sub_query = match query.sub_queries.as_slice() {
            [only] => only,
            other => {
                return Err(SplicerError::Internal(format!(
                    "Expected one sub query per dispatch, got {}",
                    other.len()
                )))
            }
        };

        if query.range.span_ms() <= self.env.config.split_threshold_ms() {
            debug!("Running {} without splitting", sub_query.metric);
            return execute_slice(&self.env, query.clone()).await;
        }

        let slices = self.splitter.split(query);
        info!("Split {} into {} slices", sub_query.metric, slices.len());
        let results = self.dispatch(slices).await?;

        match self.env.config.merge_strategy {
            MergeStrategy::QueryAware => {
                Ok(QueryAwareResultsMerger::new(sub_query).merge_all(&results))
            }
            MergeStrategy::Signature => {
                let with_data: Vec<Vec<Series>> =
                    results.into_iter().filter(|r| !r.is_empty()).collect();
                Ok(ResultsMerger::new().merge_all(&with_data)?)
            }
        }
    }

    /// Runs every slice and returns their results in slice order. A single
    /// slice runs inline; more get a worker pool scoped to this call.
    pub async fn dispatch(&self, mut slices: Vec<Query>) -> Result<Vec<Vec<Series>>> {
        if slices.len() == 1 {
            if let Some(only) = slices.pop() {
                return Ok(vec![execute_slice(&self.env, only).await?]);
            }
        }

        let pool_id = POOL_NUMBER.fetch_add(1, Ordering::Relaxed);
        let span = info_span!("splice-pool", id = pool_id);
        let workers = Arc::new(Semaphore::new(self.env.config.workers_per_query.max(1)));
        let total = slices.len();

        let mut tasks = JoinSet::new();
        for (index, slice) in slices.into_iter().enumerate() {
            let env = self.env.clone();
            let workers = workers.clone();
            tasks.spawn(
                async move {
                    let _worker = workers.acquire_owned().await.map_err(|e| {
                        SplicerError::Internal(format!("Worker pool closed: {}", e))
                    })?;
                    execute_slice(&env, slice).await.map(|series| (index, series))
                }
                .instrument(span.clone()),
            );
        }

        let mut results: Vec<Option<Vec<Series>>> = (0..total).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok((index, series))) => results[index] = Some(series),
                Ok(Err(e)) => {
                    warn!(parent: &span, "Slice failed, abandoning query: {}", e);
                    tasks.abort_all();
                    return Err(e);
                }
                Err(e) => {
                    tasks.abort_all();
                    return Err(e.into());
                }
            }
        }
        debug!(parent: &span, "All {} slices done", total);

        results
            .into_iter()
            .enumerate()
            .map(|(i, r)| {
                r.ok_or_else(|| SplicerError::Internal(format!("Slice {} produced no result", i)))
            })
            .collect()
    }
}

/// Cache, route, lease, call, parse. The lease is released before the
/// response is parsed, whatever the outcome of the call.
async fn execute_slice(env: &Environment, slice: Query) -> Result<Vec<Series>> {
    let key = slice.to_json()?;
    if let Some(cached) = env.cache.get(&key).await {
        metrics::record_cache_hit();
        return parse_response(&cached);
    }

    let metric = slice
        .sub_queries
        .first()
        .map(|sq| sq.metric.as_str())
        .ok_or_else(|| SplicerError::validation("Slice has no sub query"))?;

    let host = env
        .resolver
        .resolve_host(
            metric.as_bytes(),
            slice.range.start_secs(),
            slice.range.end_secs(),
        )
        .await?;
    if host.is_none() {
        warn!("No locality for {}, using any backend", metric);
    }

    let lease = env
        .pool
        .acquire(host.as_deref(), env.config.acquire_timeout())
        .await?;
    metrics::record_slice_dispatched();

    let started = Instant::now();
    let response = env.transport.run(&key, lease.addr()).await;
    drop(lease);
    metrics::record_backend_rtt(started.elapsed().as_secs_f64());

    let body = response.map_err(|e| {
        metrics::record_slice_failure();
        e
    })?;
    let series = parse_response(&body)?;
    env.cache.put(&key, &body).await;
    Ok(series)
}

fn parse_response(body: &str) -> Result<Vec<Series>> {
    Series::from_json_array(body)
        .map_err(|e| SplicerError::Transport(format!("Malformed backend response: {}", e)))
}

#[async_trait]
impl SeriesSource for Dispatcher {
    async fn fetch(&self, query: &Query) -> Result<Vec<Series>> {
        self.run_sub_query(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::Config;
    use crate::models::{SubQuery, TimeRange};
    use crate::pool::BackendPool;
    use std::time::Duration;
    use crate::testing::{environment, environment_with_cache, fake_backend, FnTransport};
    use pretty_assertions::assert_eq;

    fn query(start: i64, end: i64) -> Query {
        Query::new(TimeRange::new(start, end).unwrap()).with_sub_query(SubQuery::new("sum", "sys.cpu"))
    }

    #[tokio::test]
    async fn test_short_query_runs_once() {
        let transport = FnTransport::new(fake_backend);
        let dispatcher = Dispatcher::new(environment(transport.clone(), Config::default()));

        let series = dispatcher.run_sub_query(&query(0, 3_600_000)).await.unwrap();
        assert_eq!(transport.calls(), 1);
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].dps.len(), 7);
    }

    #[test_log::test(tokio::test)]
    async fn test_wide_query_is_split_and_merged() {
        let transport = FnTransport::new(fake_backend);
        let dispatcher = Dispatcher::new(environment(transport.clone(), Config::default()));

        let series = dispatcher.run_sub_query(&query(0, 10_000_000)).await.unwrap();
        assert_eq!(transport.calls(), 3);
        assert_eq!(series.len(), 1);

        let expected: Vec<i64> = (0..=10_000).step_by(600).collect();
        assert_eq!(series[0].dps.timestamps().into_iter().collect::<Vec<_>>(), expected);
    }

    #[tokio::test]
    async fn test_dispatch_keeps_slice_order() {
        let transport = FnTransport::new(fake_backend);
        let dispatcher = Dispatcher::new(environment(transport, Config::default()));
        let slices = QuerySplitter::new(3_600_000, 0).split(&query(0, 5 * 3_600_000));

        let results = dispatcher.dispatch(slices.clone()).await.unwrap();
        assert_eq!(results.len(), slices.len());
        for (slice, result) in slices.iter().zip(&results) {
            let first = *result[0].dps.timestamps().iter().next().unwrap();
            assert_eq!(first, slice.range.start_secs());
        }
    }

    #[tokio::test]
    async fn test_backend_failure_aborts_query() {
        let transport = FnTransport::new(|q: &Query| {
            if q.range.start >= 3_600_000 {
                Err(SplicerError::Transport("503".into()))
            } else {
                fake_backend(q)
            }
        });
        let dispatcher = Dispatcher::new(environment(transport, Config::default()));

        let err = dispatcher.run_sub_query(&query(0, 10_000_000)).await.unwrap_err();
        assert!(matches!(err, SplicerError::Transport(_)));
    }

    #[tokio::test]
    async fn test_failed_call_returns_address_to_pool() {
        let transport = FnTransport::new(|_: &Query| Err(SplicerError::Transport("refused".into())));
        let mut env = environment(transport, Config::default());
        let pool = BackendPool::new();
        pool.register("tsd1", "tsd1:4242", 1);
        env.pool = Arc::new(pool);
        let dispatcher = Dispatcher::new(env.clone());

        assert!(dispatcher.run_sub_query(&query(0, 3_600_000)).await.is_err());

        let lease = env
            .pool
            .acquire(Some("tsd1"), Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(lease.addr(), "tsd1:4242");
    }

    #[tokio::test]
    async fn test_signature_strategy_skips_empty_slices() {
        let transport = FnTransport::new(|q: &Query| {
            if q.range.start == 3_600_000 {
                Ok(Vec::new())
            } else {
                fake_backend(q)
            }
        });
        let config = Config {
            merge_strategy: MergeStrategy::Signature,
            ..Config::default()
        };
        let dispatcher = Dispatcher::new(environment(transport, config));

        let series = dispatcher.run_sub_query(&query(0, 10_000_000)).await.unwrap();
        assert_eq!(series.len(), 1);
        assert!(series[0].dps.get(3600).is_some());
        assert!(series[0].dps.get(4200).is_none());
        assert!(series[0].dps.get(7200).is_some());
    }

    #[tokio::test]
    async fn test_cache_short_circuits_backend() {
        let transport = FnTransport::new(fake_backend);
        let env = environment_with_cache(
            transport.clone(),
            Config::default(),
            Arc::new(MemoryCache::new(16)),
        );
        let dispatcher = Dispatcher::new(env);

        let first = dispatcher.run_sub_query(&query(0, 3_600_000)).await.unwrap();
        let second = dispatcher.run_sub_query(&query(0, 3_600_000)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_rejects_multiple_sub_queries() {
        let transport = FnTransport::new(fake_backend);
        let dispatcher = Dispatcher::new(environment(transport, Config::default()));
        let mut q = query(0, 1000);
        q.sub_queries.push(SubQuery::new("sum", "other"));
        assert!(dispatcher.run_sub_query(&q).await.is_err());
    }
}
