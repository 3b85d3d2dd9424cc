use futures::future::{try_join_all, BoxFuture, FutureExt};
use tracing::debug;

use super::{FunctionKind, SeriesSource};
use crate::models::{Query, SubQuery};
use crate::series::Series;
use crate::{Result, SplicerError};

/// A function argument that produces series.
#[derive(Debug, Clone, PartialEq)]
pub enum Child {
    Tree(ExpressionTree),
    /// Index into the metric query list collected while parsing.
    Query(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionTree {
    pub function: FunctionKind,
    pub children: Vec<Child>,
    pub params: Vec<String>,
}

impl ExpressionTree {
    pub fn new(function: FunctionKind) -> Self {
        Self {
            function,
            children: Vec::new(),
            params: Vec::new(),
        }
    }

    pub fn add_sub_expression(&mut self, tree: ExpressionTree) {
        self.children.push(Child::Tree(tree));
    }

    pub fn add_sub_metric_query(&mut self, index: usize) {
        self.children.push(Child::Query(index));
    }

    pub fn add_function_parameter(&mut self, param: String) {
        self.params.push(param);
    }

    /// Evaluates children concurrently, then applies this node's function
    /// to their results in parameter order. `leaves` is the parsed metric
    /// query list the `Child::Query` indexes point into.
    pub fn evaluate<'a>(
        &'a self,
        query: &'a Query,
        leaves: &'a [SubQuery],
        source: &'a dyn SeriesSource,
    ) -> BoxFuture<'a, Result<Vec<Series>>> {
        async move {
            let child_query = self.function.child_query(query, &self.params)?;

            let pending = self.children.iter().map(|child| {
                let child_query = &child_query;
                async move {
                    match child {
                        Child::Tree(tree) => tree.evaluate(child_query, leaves, source).await,
                        Child::Query(index) => {
                            let leaf = leaves.get(*index).ok_or_else(|| {
                                SplicerError::Internal(format!("No metric query at index {}", index))
                            })?;
                            source.fetch(&child_query.with_sub_query(leaf.clone())).await
                        }
                    }
                }
            });
            let results = try_join_all(pending).await?;

            debug!(
                "Evaluating {} over {} child results",
                self.function,
                results.len()
            );
            self.function.evaluate(query, results, &self.params)
        }
        .boxed()
    }
}
