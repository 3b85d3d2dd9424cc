use futures::future::try_join_all;
use tracing::{debug, info};

use crate::dispatch::Dispatcher;
use crate::environment::Environment;
use crate::expression::{parse_expression, ExpressionTree};
use crate::metric_query::parse_sub_query;
use crate::models::{Query, SubQuery, TimeRange};
use crate::series::Series;
use crate::Result;

/// Entry points the HTTP layer calls into.
#[derive(Clone)]
pub struct QueryEngine {
    dispatcher: Dispatcher,
}

impl QueryEngine {
    pub fn new(env: Environment) -> Self {
        Self {
            dispatcher: Dispatcher::new(env),
        }
    }

    pub fn environment(&self) -> &Environment {
        self.dispatcher.environment()
    }

    /// Runs every sub-query on its own copy of `query`, one after another,
    /// and concatenates the results in sub-query order. Only one
    /// sub-query's worker pool is busy at a time.
    pub async fn run_query(&self, query: &Query) -> Result<Vec<Series>> {
        query.validate()?;
        info!("Running {} sub queries", query.sub_queries.len());

        let mut series = Vec::new();
        for sub_query in &query.sub_queries {
            let single = query.with_sub_query(sub_query.clone());
            series.extend(self.dispatcher.run_sub_query(&single).await?);
        }
        Ok(series)
    }

    /// Parses and evaluates each expression over `query`'s window. Metric
    /// queries inside the expressions replace `query`'s own sub-queries.
    pub async fn run_expressions(&self, query: &Query, expressions: &[String]) -> Result<Vec<Series>> {
        TimeRange::new(query.range.start, query.range.end)?;

        let mut raw_queries = Vec::new();
        let trees = expressions
            .iter()
            .map(|expr| parse_expression(expr, &mut raw_queries))
            .collect::<Result<Vec<ExpressionTree>>>()?;

        let leaves = raw_queries
            .iter()
            .map(|raw| {
                let sub_query = parse_sub_query(raw)?;
                sub_query.validate()?;
                Ok(sub_query)
            })
            .collect::<Result<Vec<SubQuery>>>()?;
        debug!("Parsed {} expressions over {} metric queries", trees.len(), leaves.len());

        let window = Query {
            sub_queries: Vec::new(),
            ..query.clone()
        };
        let results = try_join_all(
            trees
                .iter()
                .map(|tree| tree.evaluate(&window, &leaves, &self.dispatcher)),
        )
        .await?;
        Ok(results.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::series::Value;
    use crate::testing::{environment, fake_backend, FnTransport};
    use crate::transport::BackendTransport;
    use crate::SplicerError;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn engine() -> QueryEngine {
        QueryEngine::new(environment(FnTransport::new(fake_backend), Config::default()))
    }

    fn window() -> Query {
        Query::new(TimeRange::new(0, 3_600_000).unwrap())
    }

    #[tokio::test]
    async fn test_run_query_keeps_sub_query_order() {
        let mut query = window().with_sub_query(SubQuery::new("sum", "first"));
        query.sub_queries.push(SubQuery::new("max", "second"));

        let series = engine().run_query(&query).await.unwrap();
        let metrics: Vec<&str> = series.iter().map(|s| s.metric.as_str()).collect();
        assert_eq!(metrics, vec!["first", "second"]);
    }

    /// Tracks how many backend calls overlap.
    #[derive(Default)]
    struct Overlap {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl BackendTransport for Overlap {
        async fn run(&self, query_json: &str, _backend_addr: &str) -> Result<String> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            let query: Query = serde_json::from_str(query_json)?;
            Ok(serde_json::to_string(&fake_backend(&query)?)?)
        }
    }

    #[tokio::test]
    async fn test_run_query_runs_sub_queries_in_turn() {
        let transport = Arc::new(Overlap::default());
        let engine = QueryEngine::new(environment(transport.clone(), Config::default()));
        let mut query = window().with_sub_query(SubQuery::new("sum", "first"));
        query.sub_queries.push(SubQuery::new("sum", "second"));
        query.sub_queries.push(SubQuery::new("sum", "third"));

        let series = engine.run_query(&query).await.unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(transport.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_query_validates() {
        let err = engine().run_query(&window()).await.unwrap_err();
        assert!(matches!(err, SplicerError::Validation(_)));

        let bad = window().with_sub_query(SubQuery::new("nope", "m"));
        assert!(engine().run_query(&bad).await.is_err());
    }

    #[tokio::test]
    async fn test_run_expressions_flattens_in_order() {
        let expressions = vec![
            "scale(sum:sys.cpu,,2)".to_string(),
            "alias(sum:sys.mem{host=web01},,mem-@host)".to_string(),
        ];
        let series = engine().run_expressions(&window(), &expressions).await.unwrap();

        assert_eq!(series.len(), 2);
        assert_eq!(series[0].metric, "sys.cpu");
        assert_eq!(series[0].dps.get(600), Some(&Value::Int(1200)));
        assert_eq!(series[1].display_metric(), "mem-web01");
    }

    #[tokio::test]
    async fn test_run_expressions_rejects_bad_leaf() {
        let expressions = vec!["id(nope:sys.cpu)".to_string()];
        let err = engine().run_expressions(&window(), &expressions).await.unwrap_err();
        assert!(matches!(err, SplicerError::Validation(_)));

        let expressions = vec!["id(sum:sys.cpu".to_string()];
        assert!(engine().run_expressions(&window(), &expressions).await.is_err());
    }
}
