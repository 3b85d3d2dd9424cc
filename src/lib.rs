pub mod aggregation;
pub mod api;
pub mod cache;
pub mod config;
pub mod datetime;
pub mod dispatch;
pub mod engine;
pub mod environment;
pub mod error;
pub mod expression;
pub mod logging;
pub mod merge;
pub mod metric_query;
pub mod metrics;
pub mod models;
pub mod partitioning;
pub mod pool;
pub mod routing;
pub mod series;
pub mod splitter;
pub mod transport;

#[cfg(test)]
mod testing;

pub use error::{Result, SplicerError};
