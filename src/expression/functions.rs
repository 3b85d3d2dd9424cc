//! Function bodies of the expression DSL. Every body is a plain function
//! over already-evaluated child results.

use std::fmt;
use std::str::FromStr;

use crate::aggregation::{AggregationIterator, MaxCache, MaxLatest, MovingAverage, Multiply, Sum};
use crate::models::Query;
use crate::series::{DataPoint, Points, Series, Value};
use crate::{Result, SplicerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    Id,
    Alias,
    Scale,
    Abs,
    Sum,
    Multiply,
    Difference,
    Divide,
    MovingAverage,
    HighestCurrent,
    HighestMax,
    TimeShift,
}

impl FromStr for FunctionKind {
    type Err = SplicerError;

    fn from_str(name: &str) -> Result<Self> {
        let kind = match name {
            "id" => FunctionKind::Id,
            "alias" => FunctionKind::Alias,
            "scale" => FunctionKind::Scale,
            "abs" => FunctionKind::Abs,
            "sum" | "sumSeries" => FunctionKind::Sum,
            "multiply" | "multiplySeries" => FunctionKind::Multiply,
            "difference" | "differenceSeries" => FunctionKind::Difference,
            "divide" | "divideSeries" => FunctionKind::Divide,
            "movingAverage" => FunctionKind::MovingAverage,
            "highestCurrent" => FunctionKind::HighestCurrent,
            "highestMax" => FunctionKind::HighestMax,
            "timeShift" => FunctionKind::TimeShift,
            _ => {
                return Err(SplicerError::validation(format!(
                    "Could not find function for name: {}",
                    name
                )))
            }
        };
        Ok(kind)
    }
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FunctionKind {
    pub fn name(&self) -> &'static str {
        match self {
            FunctionKind::Id => "id",
            FunctionKind::Alias => "alias",
            FunctionKind::Scale => "scale",
            FunctionKind::Abs => "abs",
            FunctionKind::Sum => "sumSeries",
            FunctionKind::Multiply => "multiplySeries",
            FunctionKind::Difference => "differenceSeries",
            FunctionKind::Divide => "divideSeries",
            FunctionKind::MovingAverage => "movingAverage",
            FunctionKind::HighestCurrent => "highestCurrent",
            FunctionKind::HighestMax => "highestMax",
            FunctionKind::TimeShift => "timeShift",
        }
    }

    /// The query this node's children run against. Only `timeShift`
    /// changes it, and always on a copy.
    pub fn child_query(&self, query: &Query, params: &[String]) -> Result<Query> {
        match self {
            FunctionKind::TimeShift => {
                let shift_ms = time_shift_ms(params)?;
                Ok(query.slice_of(query.range.shifted_back(shift_ms)))
            }
            _ => Ok(query.clone()),
        }
    }

    pub fn evaluate(
        &self,
        query: &Query,
        inputs: Vec<Vec<Series>>,
        params: &[String],
    ) -> Result<Vec<Series>> {
        let (start, end) = (query.range.start_secs(), query.range.end_secs());
        match self {
            FunctionKind::Id => Ok(first_child(inputs)),
            FunctionKind::Alias => alias(first_child(inputs), params),
            FunctionKind::Scale => scale(first_child(inputs), params),
            FunctionKind::Abs => Ok(abs(first_child(inputs))),
            FunctionKind::Sum => Ok(sum_series(flatten(inputs), start, end)),
            FunctionKind::Multiply => Ok(multiply_series(flatten(inputs), start, end)),
            FunctionKind::Difference => {
                let (x, y) = two_operands(inputs, self.name())?;
                Ok(difference_series(&x, &y, start, end))
            }
            FunctionKind::Divide => {
                let (x, y) = two_operands(inputs, self.name())?;
                Ok(divide_series(&x, &y, start, end))
            }
            FunctionKind::MovingAverage => {
                moving_average(flatten(inputs), start, end, params)
            }
            FunctionKind::HighestCurrent => {
                highest(first_child(inputs), start, end, params, Highest::Current)
            }
            FunctionKind::HighestMax => {
                highest(first_child(inputs), start, end, params, Highest::Max)
            }
            FunctionKind::TimeShift => {
                let shift_secs = time_shift_ms(params)? / 1000;
                Ok(time_shift(first_child(inputs), shift_secs))
            }
        }
    }
}

fn first_child(inputs: Vec<Vec<Series>>) -> Vec<Series> {
    inputs.into_iter().next().unwrap_or_default()
}

fn flatten(inputs: Vec<Vec<Series>>) -> Vec<Series> {
    inputs.into_iter().flatten().collect()
}

/// Exactly two series: two single-series children, or one child holding two.
fn two_operands(inputs: Vec<Vec<Series>>, function: &str) -> Result<(Series, Series)> {
    let shape: Vec<usize> = inputs.iter().map(Vec::len).collect();
    let mut series = flatten(inputs);
    match (shape.as_slice(), series.len()) {
        ([1, 1], 2) | ([2], 2) => {
            let y = series.pop();
            let x = series.pop();
            x.zip(y).ok_or_else(|| SplicerError::Internal("operand vanished".into()))
        }
        _ => Err(SplicerError::evaluation(format!(
            "{} expects two input series, got children of sizes {:?}",
            function, shape
        ))),
    }
}

fn required_param<'a>(params: &'a [String], what: &str) -> Result<&'a str> {
    params
        .first()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .ok_or_else(|| SplicerError::validation(format!("Missing parameter: {}", what)))
}

/// Parses a quoted duration such as `'10min'` into milliseconds.
/// Units: `sec`, `min`, `hr`, `day(s)`, `week(s)`.
pub fn parse_duration_param(param: &str) -> Result<i64> {
    let invalid = || SplicerError::validation(format!("Invalid duration parameter: {}", param));

    let inner = param
        .strip_prefix('\'')
        .and_then(|p| p.strip_suffix('\''))
        .ok_or_else(invalid)?;
    let digits = inner.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return Err(invalid());
    }
    let (amount, unit) = inner.split_at(digits);
    let amount: i64 = amount.parse().map_err(|_| invalid())?;

    let unit_ms: i64 = match unit {
        "sec" => 1_000,
        "min" => 60_000,
        "hr" => 3_600_000,
        "day" | "days" => 86_400_000,
        "week" | "weeks" => 7 * 86_400_000,
        other => {
            return Err(SplicerError::validation(format!("unknown time unit={}", other)))
        }
    };
    amount.checked_mul(unit_ms).ok_or_else(invalid)
}

fn time_shift_ms(params: &[String]) -> Result<i64> {
    let param = required_param(params, "time shift amount")?;
    let shift = parse_duration_param(param)?;
    if shift <= 0 {
        return Err(SplicerError::validation("timeshift <= 0"));
    }
    Ok(shift)
}

/// Moves every point forward so the output lines up with the unshifted
/// window.
pub fn time_shift(series: Vec<Series>, shift_secs: i64) -> Vec<Series> {
    series
        .into_iter()
        .map(|mut s| {
            s.dps = s.dps.shift(shift_secs);
            s
        })
        .collect()
}

/// Replaces `@tagk` in the template with each series' value for `tagk`.
/// Longer keys are replaced first so `@host` never eats `@hostgroup`.
pub fn alias(series: Vec<Series>, params: &[String]) -> Result<Vec<Series>> {
    let template = params.join(",");
    if template.trim().is_empty() {
        return Err(SplicerError::validation("Missing parameter: alias template"));
    }

    Ok(series
        .into_iter()
        .map(|mut s| {
            let mut keys: Vec<&String> = s.tags.keys().collect();
            keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

            let mut name = template.clone();
            for key in keys {
                name = name.replace(&format!("@{}", key), &s.tags[key]);
            }
            s.alias = Some(name);
            s
        })
        .collect())
}

pub fn scale(series: Vec<Series>, params: &[String]) -> Result<Vec<Series>> {
    let raw = required_param(params, "scaling factor")?;
    let factor: f64 = raw
        .parse()
        .map_err(|_| SplicerError::validation(format!("Invalid scaling factor: {}", raw)))?;

    Ok(series
        .into_iter()
        .map(|mut s| {
            s.dps = s.dps.map_values(|v| scale_value(v, factor));
            s
        })
        .collect())
}

fn scale_value(value: Value, factor: f64) -> Value {
    match value {
        Value::Float(v) => Value::Float(v * factor),
        Value::Int(v) if factor.fract() == 0.0 && factor.abs() < i64::MAX as f64 => {
            Value::Int(v.saturating_mul(factor as i64))
        }
        Value::Int(v) => Value::Int((v as f64 * factor) as i64),
    }
}

pub fn abs(series: Vec<Series>) -> Vec<Series> {
    series
        .into_iter()
        .map(|mut s| {
            s.dps = s.dps.map_values(|v| v.abs());
            s
        })
        .collect()
}

fn single_output(template: &Series, points: impl Iterator<Item = DataPoint>) -> Vec<Series> {
    let mut out = template.copy_meta();
    out.dps = points.collect::<Points>();
    vec![out]
}

fn views(series: &[Series]) -> Vec<Vec<DataPoint>> {
    series.iter().map(|s| s.dps.to_data_points()).collect()
}

pub fn sum_series(series: Vec<Series>, start: i64, end: i64) -> Vec<Series> {
    let Some(first) = series.first() else {
        return Vec::new();
    };
    let iter = AggregationIterator::new(views(&series), start, end, Sum::new(), false);
    single_output(first, iter)
}

pub fn multiply_series(series: Vec<Series>, start: i64, end: i64) -> Vec<Series> {
    let Some(first) = series.first() else {
        return Vec::new();
    };
    let iter = AggregationIterator::new(views(&series), start, end, Multiply, false);
    single_output(first, iter)
}

/// `x - y` over the stretch where both operands have data.
pub fn difference_series(x: &Series, y: &Series, start: i64, end: i64) -> Vec<Series> {
    let negated = y.dps.map_values(|v| v.negate()).to_data_points();
    let iter = AggregationIterator::endpoint_aligned(
        vec![x.dps.to_data_points(), negated],
        start,
        end,
        Sum::new(),
        false,
    );
    single_output(x, iter)
}

/// `x / y` over the stretch where both operands have data. No point is
/// emitted at a timestamp where `y` is zero.
pub fn divide_series(x: &Series, y: &Series, start: i64, end: i64) -> Vec<Series> {
    let zeros = y.dps.near_zero_timestamps();
    let iter = AggregationIterator::endpoint_aligned(
        vec![x.dps.to_data_points(), y.dps.reciprocal_data_points()],
        start,
        end,
        Multiply,
        false,
    );
    single_output(x, iter.filter(|dp| !zeros.contains(&dp.timestamp)))
}

pub fn moving_average(
    series: Vec<Series>,
    start: i64,
    end: i64,
    params: &[String],
) -> Result<Vec<Series>> {
    let window = required_param(params, "moving average window")?;
    let aggregator = if window.chars().all(|c| c.is_ascii_digit()) {
        let count: i64 = window
            .parse()
            .map_err(|_| SplicerError::validation(format!("Invalid window={}", window)))?;
        if count <= 0 {
            return Err(SplicerError::validation("numPoints <= 0"));
        }
        MovingAverage::points(count)
    } else if window.starts_with('\'') {
        MovingAverage::seconds(parse_duration_param(window)? / 1000)
    } else {
        return Err(SplicerError::validation(format!(
            "Invalid moving window parameter: {}",
            window
        )));
    };

    let Some(first) = series.first() else {
        return Ok(Vec::new());
    };
    let iter = AggregationIterator::new(views(&series), start, end, aggregator, false);
    Ok(single_output(first, iter))
}

#[derive(Debug, Clone, Copy)]
enum Highest {
    Current,
    Max,
}

/// The `k` series ranking highest by latest value or running max, in
/// descending order. With `k` at or above the series count everything is
/// returned as is.
fn highest(
    series: Vec<Series>,
    start: i64,
    end: i64,
    params: &[String],
    by: Highest,
) -> Result<Vec<Series>> {
    let raw = required_param(params, "number of series")?;
    let k: usize = raw
        .parse()
        .ok()
        .filter(|k| *k >= 1)
        .ok_or_else(|| SplicerError::validation(format!("Invalid number of series: {}", raw)))?;

    if k >= series.len() {
        return Ok(series);
    }

    let values = match by {
        Highest::Current => {
            let mut iter = AggregationIterator::new(views(&series), start, end, MaxLatest::new(), false);
            for _ in iter.by_ref() {}
            iter.into_aggregator().into_values()
        }
        Highest::Max => {
            let mut iter = AggregationIterator::new(views(&series), start, end, MaxCache::new(), false);
            for _ in iter.by_ref() {}
            iter.into_aggregator().into_values()
        }
    };

    let mut ranked: Vec<(usize, f64)> = (0..series.len())
        .map(|i| (i, values.get(i).copied().flatten().unwrap_or(f64::NEG_INFINITY)))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let mut slots: Vec<Option<Series>> = series.into_iter().map(Some).collect();
    Ok(ranked
        .into_iter()
        .take(k)
        .filter_map(|(i, _)| slots[i].take())
        .collect())
}
