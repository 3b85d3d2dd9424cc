use std::collections::VecDeque;

use super::{Aggregator, Interpolation, Sample};
use crate::series::Value;

fn clamp_i64(v: i128) -> i64 {
    v.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Registry of the named aggregators a sub-query may ask for.
pub struct Aggregators;

const PERCENTILES: [(&str, f64); 6] = [
    ("50", 50.0),
    ("75", 75.0),
    ("90", 90.0),
    ("95", 95.0),
    ("99", 99.0),
    ("999", 99.9),
];

impl Aggregators {
    pub fn get(name: &str) -> Option<Box<dyn Aggregator>> {
        let agg: Box<dyn Aggregator> = match name {
            "sum" => Box::new(Sum::new()),
            "zimsum" => Box::new(Sum::zim()),
            "min" => Box::new(Min::new()),
            "mimmin" => Box::new(Min::mim()),
            "max" => Box::new(Max::new()),
            "mimmax" => Box::new(Max::mim()),
            "avg" => Box::new(Average),
            "dev" => Box::new(Dev),
            "count" => Box::new(Count),
            "multiply" => Box::new(Multiply),
            other => return Self::percentile(other).map(|p| Box::new(p) as Box<dyn Aggregator>),
        };
        Some(agg)
    }

    fn percentile(name: &str) -> Option<Percentile> {
        let (rest, estimation) = if let Some(rest) = name.strip_prefix("ep") {
            if let Some(p) = rest.strip_suffix("r3") {
                (p, Estimation::R3)
            } else if let Some(p) = rest.strip_suffix("r7") {
                (p, Estimation::R7)
            } else {
                return None;
            }
        } else {
            (name.strip_prefix('p')?, Estimation::Legacy)
        };

        PERCENTILES
            .iter()
            .find(|(suffix, _)| *suffix == rest)
            .map(|(_, p)| Percentile::new(name.to_string(), *p, estimation))
    }

    pub fn names() -> Vec<String> {
        let mut names: Vec<String> = [
            "sum", "zimsum", "min", "mimmin", "max", "mimmax", "avg", "dev", "count", "multiply",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        for (suffix, _) in PERCENTILES {
            names.push(format!("p{}", suffix));
            names.push(format!("ep{}r3", suffix));
            names.push(format!("ep{}r7", suffix));
        }
        names
    }
}

pub struct Sum {
    name: &'static str,
    interpolation: Interpolation,
}

impl Sum {
    pub fn new() -> Self {
        Self { name: "sum", interpolation: Interpolation::Lerp }
    }

    pub fn zim() -> Self {
        Self { name: "zimsum", interpolation: Interpolation::Zim }
    }
}

impl Default for Sum {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregator for Sum {
    fn name(&self) -> &str {
        self.name
    }

    fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    fn run_long(&mut self, _timestamp: i64, values: &[Sample<i64>]) -> i64 {
        clamp_i64(values.iter().map(|s| s.value as i128).sum())
    }

    fn run_double(&mut self, _timestamp: i64, values: &[Sample<f64>]) -> f64 {
        values.iter().map(|s| s.value).sum()
    }
}

pub struct Min {
    name: &'static str,
    interpolation: Interpolation,
}

impl Min {
    pub fn new() -> Self {
        Self { name: "min", interpolation: Interpolation::Lerp }
    }

    /// Missing inputs count as the maximum so they never win.
    pub fn mim() -> Self {
        Self { name: "mimmin", interpolation: Interpolation::Max }
    }
}

impl Default for Min {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregator for Min {
    fn name(&self) -> &str {
        self.name
    }

    fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    fn run_long(&mut self, _timestamp: i64, values: &[Sample<i64>]) -> i64 {
        values.iter().map(|s| s.value).min().unwrap_or(0)
    }

    fn run_double(&mut self, _timestamp: i64, values: &[Sample<f64>]) -> f64 {
        values.iter().map(|s| s.value).fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |a| a.min(v)))
        }).unwrap_or(0.0)
    }
}

pub struct Max {
    name: &'static str,
    interpolation: Interpolation,
}

impl Max {
    pub fn new() -> Self {
        Self { name: "max", interpolation: Interpolation::Lerp }
    }

    /// Missing inputs count as the minimum so they never win.
    pub fn mim() -> Self {
        Self { name: "mimmax", interpolation: Interpolation::Min }
    }
}

impl Default for Max {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregator for Max {
    fn name(&self) -> &str {
        self.name
    }

    fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    fn run_long(&mut self, _timestamp: i64, values: &[Sample<i64>]) -> i64 {
        values.iter().map(|s| s.value).max().unwrap_or(0)
    }

    fn run_double(&mut self, _timestamp: i64, values: &[Sample<f64>]) -> f64 {
        values.iter().map(|s| s.value).fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |a| a.max(v)))
        }).unwrap_or(0.0)
    }
}

pub struct Average;

impl Aggregator for Average {
    fn name(&self) -> &str {
        "avg"
    }

    fn interpolation(&self) -> Interpolation {
        Interpolation::Lerp
    }

    fn run_long(&mut self, _timestamp: i64, values: &[Sample<i64>]) -> i64 {
        if values.is_empty() {
            return 0;
        }
        let sum: i128 = values.iter().map(|s| s.value as i128).sum();
        clamp_i64(sum / values.len() as i128)
    }

    fn run_double(&mut self, _timestamp: i64, values: &[Sample<f64>]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        values.iter().map(|s| s.value).sum::<f64>() / values.len() as f64
    }
}

/// Population standard deviation, Welford's method.
pub struct Dev;

impl Dev {
    fn deviation(values: impl Iterator<Item = f64>) -> f64 {
        let mut n = 0u64;
        let mut mean = 0.0;
        let mut m2 = 0.0;
        for x in values {
            n += 1;
            let delta = x - mean;
            mean += delta / n as f64;
            m2 += delta * (x - mean);
        }
        if n < 2 {
            return 0.0;
        }
        (m2 / n as f64).sqrt()
    }
}

impl Aggregator for Dev {
    fn name(&self) -> &str {
        "dev"
    }

    fn interpolation(&self) -> Interpolation {
        Interpolation::Lerp
    }

    fn run_long(&mut self, _timestamp: i64, values: &[Sample<i64>]) -> i64 {
        Self::deviation(values.iter().map(|s| s.value as f64)) as i64
    }

    fn run_double(&mut self, _timestamp: i64, values: &[Sample<f64>]) -> f64 {
        Self::deviation(values.iter().map(|s| s.value))
    }
}

pub struct Count;

impl Aggregator for Count {
    fn name(&self) -> &str {
        "count"
    }

    fn interpolation(&self) -> Interpolation {
        Interpolation::Zim
    }

    fn run_long(&mut self, _timestamp: i64, values: &[Sample<i64>]) -> i64 {
        values.len() as i64
    }

    fn run_double(&mut self, _timestamp: i64, values: &[Sample<f64>]) -> f64 {
        values.len() as f64
    }
}

pub struct Multiply;

impl Aggregator for Multiply {
    fn name(&self) -> &str {
        "multiply"
    }

    fn interpolation(&self) -> Interpolation {
        Interpolation::Lerp
    }

    fn run_long(&mut self, _timestamp: i64, values: &[Sample<i64>]) -> i64 {
        if values.is_empty() {
            return 0;
        }
        let product = values.iter().fold(1i128, |acc, s| acc.saturating_mul(s.value as i128));
        clamp_i64(product)
    }

    fn run_double(&mut self, _timestamp: i64, values: &[Sample<f64>]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        values.iter().map(|s| s.value).product()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Estimation {
    /// Interpolated at `p * (n + 1)`.
    Legacy,
    /// Nearest rank, ties to even.
    R3,
    /// Interpolated at `p * (n - 1) + 1`.
    R7,
}

pub struct Percentile {
    name: String,
    percent: f64,
    estimation: Estimation,
}

impl Percentile {
    pub fn new(name: String, percent: f64, estimation: Estimation) -> Self {
        Self { name, percent, estimation }
    }

    fn evaluate(&self, mut values: Vec<f64>) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        values.sort_by(|a, b| a.total_cmp(b));
        let n = values.len();
        if n == 1 {
            return values[0];
        }
        let p = self.percent / 100.0;

        match self.estimation {
            Estimation::Legacy => interpolate_rank(&values, p * (n as f64 + 1.0)),
            Estimation::R3 => {
                let rank = round_half_even(n as f64 * p).clamp(1.0, n as f64) as usize;
                values[rank - 1]
            }
            Estimation::R7 => interpolate_rank(&values, p * (n as f64 - 1.0) + 1.0),
        }
    }
}

/// Value at 1-based fractional rank `pos`, clamped to the sample.
fn interpolate_rank(sorted: &[f64], pos: f64) -> f64 {
    let n = sorted.len();
    if pos < 1.0 {
        return sorted[0];
    }
    if pos >= n as f64 {
        return sorted[n - 1];
    }
    let lower = pos.floor();
    let idx = lower as usize;
    let lo = sorted[idx - 1];
    let hi = sorted[idx];
    lo + (pos - lower) * (hi - lo)
}

fn round_half_even(v: f64) -> f64 {
    let floor = v.floor();
    let diff = v - floor;
    if (diff - 0.5).abs() < f64::EPSILON {
        if floor % 2.0 == 0.0 {
            floor
        } else {
            floor + 1.0
        }
    } else {
        v.round()
    }
}

impl Aggregator for Percentile {
    fn name(&self) -> &str {
        &self.name
    }

    fn interpolation(&self) -> Interpolation {
        Interpolation::Lerp
    }

    fn run_long(&mut self, _timestamp: i64, values: &[Sample<i64>]) -> i64 {
        self.evaluate(values.iter().map(|s| s.value as f64).collect()) as i64
    }

    fn run_double(&mut self, _timestamp: i64, values: &[Sample<f64>]) -> f64 {
        self.evaluate(values.iter().map(|s| s.value).collect())
    }
}

/// Average of the sums at preceding timestamps. The current sum only
/// enters the window for later points. Emits 0 until the window is full.
pub struct MovingAverage {
    window: i64,
    time_window: bool,
    history: VecDeque<(i64, Value)>,
}

impl MovingAverage {
    /// Window of `count` preceding points.
    pub fn points(count: i64) -> Self {
        Self { window: count, time_window: false, history: VecDeque::new() }
    }

    /// Window reaching `seconds` back.
    pub fn seconds(seconds: i64) -> Self {
        Self { window: seconds, time_window: true, history: VecDeque::new() }
    }

    /// Number of prior entries in the window, or `None` while it is not full.
    fn window_len(&self) -> Option<usize> {
        let (first_ts, _) = *self.history.front()?;
        for (count, (ts, _)) in self.history.iter().enumerate().skip(1) {
            if !self.time_window && count as i64 >= self.window {
                return Some(count);
            }
            if self.time_window && first_ts - ts > self.window {
                return Some(count);
            }
        }
        None
    }

    fn push(&mut self, timestamp: i64, sum: Value) -> Option<usize> {
        self.history.push_front((timestamp, sum));
        let len = self.window_len();
        if let Some(len) = len {
            self.history.truncate(len + 1);
        }
        len
    }
}

impl Aggregator for MovingAverage {
    fn name(&self) -> &str {
        "movingAverage"
    }

    fn interpolation(&self) -> Interpolation {
        Interpolation::Lerp
    }

    fn run_long(&mut self, timestamp: i64, values: &[Sample<i64>]) -> i64 {
        let sum = clamp_i64(values.iter().map(|s| s.value as i128).sum());
        match self.push(timestamp, Value::Int(sum)) {
            Some(len) => {
                let total: i128 = self
                    .history
                    .iter()
                    .skip(1)
                    .take(len)
                    .map(|(_, v)| match v {
                        Value::Int(i) => *i as i128,
                        Value::Float(f) => *f as i128,
                    })
                    .sum();
                clamp_i64(total / len as i128)
            }
            None => 0,
        }
    }

    fn run_double(&mut self, timestamp: i64, values: &[Sample<f64>]) -> f64 {
        let sum: f64 = values.iter().map(|s| s.value).sum();
        match self.push(timestamp, Value::Float(sum)) {
            Some(len) => {
                let total: f64 = self.history.iter().skip(1).take(len).map(|(_, v)| v.as_f64()).sum();
                total / len as f64
            }
            None => 0.0,
        }
    }
}

fn record(slots: &mut Vec<Option<f64>>, index: usize, value: f64, keep_max: bool) {
    if slots.len() <= index {
        slots.resize(index + 1, None);
    }
    let slot = &mut slots[index];
    *slot = match *slot {
        Some(old) if keep_max => Some(old.max(value)),
        _ => Some(value),
    };
}

/// Emits the max across inputs while remembering each input's running max.
#[derive(Default)]
pub struct MaxCache {
    maxes: Vec<Option<f64>>,
}

impl MaxCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_values(self) -> Vec<Option<f64>> {
        self.maxes
    }
}

impl Aggregator for MaxCache {
    fn name(&self) -> &str {
        "maxCache"
    }

    fn interpolation(&self) -> Interpolation {
        Interpolation::Lerp
    }

    fn run_long(&mut self, _timestamp: i64, values: &[Sample<i64>]) -> i64 {
        for s in values {
            record(&mut self.maxes, s.index, s.value as f64, true);
        }
        values.iter().map(|s| s.value).max().unwrap_or(0)
    }

    fn run_double(&mut self, _timestamp: i64, values: &[Sample<f64>]) -> f64 {
        for s in values {
            record(&mut self.maxes, s.index, s.value, true);
        }
        values.iter().map(|s| s.value).fold(f64::MIN, f64::max)
    }
}

/// Emits the max across inputs while remembering each input's latest value.
#[derive(Default)]
pub struct MaxLatest {
    latest: Vec<Option<f64>>,
}

impl MaxLatest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_values(self) -> Vec<Option<f64>> {
        self.latest
    }
}

impl Aggregator for MaxLatest {
    fn name(&self) -> &str {
        "maxLatest"
    }

    fn interpolation(&self) -> Interpolation {
        Interpolation::Lerp
    }

    fn run_long(&mut self, _timestamp: i64, values: &[Sample<i64>]) -> i64 {
        for s in values {
            record(&mut self.latest, s.index, s.value as f64, false);
        }
        values.iter().map(|s| s.value).max().unwrap_or(0)
    }

    fn run_double(&mut self, _timestamp: i64, values: &[Sample<f64>]) -> f64 {
        for s in values {
            record(&mut self.latest, s.index, s.value, false);
        }
        values.iter().map(|s| s.value).fold(f64::MIN, f64::max)
    }
}
