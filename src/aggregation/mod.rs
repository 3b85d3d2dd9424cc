//! Multi-series aggregation: the aggregator catalogue and the
//! interpolating iterator that drives it.

mod aggregators;
mod iterator;

pub use aggregators::{
    Aggregators, Average, Count, Dev, Estimation, Max, MaxCache, MaxLatest, Min, MovingAverage,
    Multiply, Percentile, Sum,
};
pub use iterator::AggregationIterator;

/// How an input without a real point at the current timestamp contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    /// Linear interpolation between the surrounding real points.
    Lerp,
    /// Zero if missing.
    Zim,
    /// The type's maximum if missing.
    Max,
    /// The type's minimum if missing.
    Min,
}

/// One input's value at the current timestamp. `index` is the position of
/// the input series in the iterator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample<T> {
    pub index: usize,
    pub value: T,
}

impl<T> Sample<T> {
    pub fn new(index: usize, value: T) -> Self {
        Self { index, value }
    }
}

pub trait Aggregator: Send {
    fn name(&self) -> &str;

    fn interpolation(&self) -> Interpolation;

    fn run_long(&mut self, timestamp: i64, values: &[Sample<i64>]) -> i64;

    fn run_double(&mut self, timestamp: i64, values: &[Sample<f64>]) -> f64;
}

impl<A: Aggregator + ?Sized> Aggregator for Box<A> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn interpolation(&self) -> Interpolation {
        (**self).interpolation()
    }

    fn run_long(&mut self, timestamp: i64, values: &[Sample<i64>]) -> i64 {
        (**self).run_long(timestamp, values)
    }

    fn run_double(&mut self, timestamp: i64, values: &[Sample<f64>]) -> f64 {
        (**self).run_double(timestamp, values)
    }
}
