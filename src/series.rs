//! The series model shared by the merger, the dispatcher and the
//! expression engine.

use serde::{Deserialize, Serialize, Serializer};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

/// One point value. The numeric kind reported by the backend is kept.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
}

impl Value {
    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Int(v) => v as f64,
            Value::Float(v) => v,
        }
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Value::Int(_))
    }

    pub fn abs(&self) -> Value {
        match *self {
            Value::Int(v) => Value::Int(v.saturating_abs()),
            Value::Float(v) => Value::Float(v.abs()),
        }
    }

    pub fn negate(&self) -> Value {
        match *self {
            Value::Int(v) => Value::Int(v.saturating_neg()),
            Value::Float(v) => Value::Float(-v),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataPoint {
    /// Epoch seconds.
    pub timestamp: i64,
    pub value: Value,
}

impl DataPoint {
    pub fn new(timestamp: i64, value: Value) -> Self {
        Self { timestamp, value }
    }
}

/// Timestamp-ordered point map. Keys go over the wire as decimal strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Points(BTreeMap<i64, Value>);

impl Points {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, timestamp: i64, value: Value) {
        self.0.insert(timestamp, value);
    }

    pub fn add_point(&mut self, dp: DataPoint) {
        self.0.insert(dp.timestamp, dp.value);
    }

    pub fn get(&self, timestamp: i64) -> Option<&Value> {
        self.0.get(&timestamp)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, Value)> + '_ {
        self.0.iter().map(|(ts, v)| (*ts, *v))
    }

    pub fn timestamps(&self) -> BTreeSet<i64> {
        self.0.keys().copied().collect()
    }

    /// Copies every point of `other` in; `other` wins on collisions.
    pub fn union_with(&mut self, other: &Points) {
        for (ts, v) in other.iter() {
            self.0.insert(ts, v);
        }
    }

    pub fn map_values(&self, f: impl Fn(Value) -> Value) -> Points {
        Points(self.0.iter().map(|(ts, v)| (*ts, f(*v))).collect())
    }

    pub fn shift(&self, seconds: i64) -> Points {
        Points(self.0.iter().map(|(ts, v)| (ts + seconds, *v)).collect())
    }

    pub fn to_data_points(&self) -> Vec<DataPoint> {
        self.iter().map(|(ts, v)| DataPoint::new(ts, v)).collect()
    }

    /// Points with `y` replaced by `1/y`. Points with `y` close to zero
    /// are dropped.
    pub fn reciprocal_data_points(&self) -> Vec<DataPoint> {
        self.iter()
            .filter(|(_, v)| v.as_f64().abs() > RECIPROCAL_EPSILON)
            .map(|(ts, v)| DataPoint::new(ts, Value::Float(1.0 / v.as_f64())))
            .collect()
    }

    /// Timestamps whose value has no reciprocal.
    pub fn near_zero_timestamps(&self) -> BTreeSet<i64> {
        self.iter()
            .filter(|(_, v)| v.as_f64().abs() <= RECIPROCAL_EPSILON)
            .map(|(ts, _)| ts)
            .collect()
    }
}

const RECIPROCAL_EPSILON: f64 = 1e-7;

impl FromIterator<(i64, Value)> for Points {
    fn from_iter<I: IntoIterator<Item = (i64, Value)>>(iter: I) -> Self {
        Points(iter.into_iter().collect())
    }
}

impl FromIterator<DataPoint> for Points {
    fn from_iter<I: IntoIterator<Item = DataPoint>>(iter: I) -> Self {
        Points(iter.into_iter().map(|dp| (dp.timestamp, dp.value)).collect())
    }
}

/// One named, tagged time series as returned by a backend.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Series {
    pub metric: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub aggregate_tags: Option<Vec<String>>,
    #[serde(default)]
    pub tsuids: Option<Vec<String>>,
    #[serde(default)]
    pub dps: Points,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireSeries<'a> {
    metric: &'a str,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    tags: &'a BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    aggregate_tags: Option<&'a Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tsuids: Option<&'a Vec<String>>,
    dps: &'a Points,
}

impl Serialize for Series {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        WireSeries {
            metric: self.display_metric(),
            tags: &self.tags,
            aggregate_tags: self.aggregate_tags.as_ref(),
            tsuids: self.tsuids.as_ref(),
            dps: &self.dps,
        }
        .serialize(serializer)
    }
}

impl PartialEq for Series {
    fn eq(&self, other: &Self) -> bool {
        self.metric == other.metric
            && self.alias == other.alias
            && self.tags == other.tags
            && sorted(&self.aggregate_tags) == sorted(&other.aggregate_tags)
            && self.tsuids == other.tsuids
            && self.dps == other.dps
    }
}

fn sorted(values: &Option<Vec<String>>) -> Option<BTreeSet<&str>> {
    values
        .as_ref()
        .map(|v| v.iter().map(String::as_str).collect())
}

impl Series {
    pub fn new(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            ..Default::default()
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_points(mut self, points: impl IntoIterator<Item = (i64, Value)>) -> Self {
        self.dps = points.into_iter().collect();
        self
    }

    /// The name callers see: the alias when one is set.
    pub fn display_metric(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.metric)
    }

    /// Same identity, no points.
    pub fn copy_meta(&self) -> Series {
        Series {
            metric: self.metric.clone(),
            alias: self.alias.clone(),
            tags: self.tags.clone(),
            aggregate_tags: self.aggregate_tags.clone(),
            tsuids: self.tsuids.clone(),
            dps: Points::new(),
        }
    }

    /// Hash of the sorted aggregate tags, tag pairs and tsuids.
    pub fn signature(&self) -> u64 {
        let mut hasher = DefaultHasher::new();

        if let Some(agg) = &self.aggregate_tags {
            let mut agg: Vec<&String> = agg.iter().collect();
            agg.sort();
            agg.hash(&mut hasher);
        }

        // BTreeMap iterates in key order
        for (k, v) in &self.tags {
            k.hash(&mut hasher);
            v.hash(&mut hasher);
        }

        if let Some(tsuids) = &self.tsuids {
            let mut tsuids: Vec<&String> = tsuids.iter().collect();
            tsuids.sort();
            tsuids.hash(&mut hasher);
        }

        hasher.finish()
    }

    /// Structural identity used when signatures collide.
    pub fn identical(&self, other: &Series) -> bool {
        match (&self.aggregate_tags, &other.aggregate_tags) {
            (None, None) => {}
            (Some(mine), Some(theirs)) => {
                if !theirs.iter().all(|t| mine.contains(t)) {
                    return false;
                }
            }
            _ => return false,
        }

        if self.tags != other.tags {
            return false;
        }

        match (&self.tsuids, &other.tsuids) {
            (None, None) => true,
            (Some(mine), Some(theirs)) => theirs.iter().all(|t| mine.contains(t)),
            _ => false,
        }
    }

    pub fn from_json_array(body: &str) -> serde_json::Result<Vec<Series>> {
        serde_json::from_str(body)
    }
}
