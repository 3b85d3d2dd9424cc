//! The expression DSL: `func(param,,param,...)` where a parameter is a
//! nested call, a flat metric query, or a literal.

mod functions;
mod parser;
mod reader;
mod tree;

pub use functions::{parse_duration_param, FunctionKind};
pub use parser::parse_expression;
pub use reader::ExprReader;
pub use tree::{Child, ExpressionTree};

use async_trait::async_trait;

use crate::models::Query;
use crate::series::Series;
use crate::Result;

/// Produces the merged series for a query with one sub-query.
#[async_trait]
pub trait SeriesSource: Send + Sync {
    async fn fetch(&self, query: &Query) -> Result<Vec<Series>>;
}
