use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::aggregation::Aggregators;
use crate::datetime::parse_date_time;
use crate::{Result, SplicerError};

/// Inclusive window in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Result<Self> {
        if end <= start {
            return Err(SplicerError::validation(format!(
                "End time {} must be greater than start time {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    pub fn span_ms(&self) -> i64 {
        self.end - self.start
    }

    pub fn start_secs(&self) -> i64 {
        self.start / 1000
    }

    pub fn end_secs(&self) -> i64 {
        self.end / 1000
    }

    pub fn shifted_back(&self, ms: i64) -> TimeRange {
        TimeRange {
            start: self.start - ms,
            end: self.end - ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateOptions {
    #[serde(default)]
    pub counter: bool,
    #[serde(default = "default_counter_max")]
    pub counter_max: i64,
    #[serde(default)]
    pub reset_value: i64,
}

fn default_counter_max() -> i64 {
    i64::MAX
}

impl Default for RateOptions {
    fn default() -> Self {
        Self {
            counter: false,
            counter_max: i64::MAX,
            reset_value: 0,
        }
    }
}

/// One leaf metric request, laid out the way backends expect it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubQuery {
    pub aggregator: String,
    pub metric: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downsample: Option<String>,
    #[serde(default)]
    pub rate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_options: Option<RateOptions>,
}

impl SubQuery {
    pub fn new(aggregator: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            aggregator: aggregator.into(),
            metric: metric.into(),
            tags: BTreeMap::new(),
            downsample: None,
            rate: false,
            rate_options: None,
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.metric.trim().is_empty() {
            return Err(SplicerError::validation("Missing metric"));
        }
        if Aggregators::get(&self.aggregator).is_none() {
            return Err(SplicerError::validation(format!(
                "No such aggregator: {}",
                self.aggregator
            )));
        }
        if let Some(ds) = &self.downsample {
            validate_downsample(ds)?;
        }
        Ok(())
    }
}

fn validate_downsample(spec: &str) -> Result<()> {
    let (interval, aggregator) = spec
        .split_once('-')
        .ok_or_else(|| SplicerError::validation(format!("Invalid downsample: {}", spec)))?;
    crate::datetime::parse_duration_ms(interval)?;
    if Aggregators::get(aggregator).is_none() {
        return Err(SplicerError::validation(format!(
            "No such downsample aggregator: {}",
            aggregator
        )));
    }
    Ok(())
}

/// A validated top-level query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    #[serde(flatten)]
    pub range: TimeRange,
    #[serde(default)]
    pub padding: bool,
    #[serde(default)]
    pub ms_resolution: bool,
    #[serde(rename = "queries", default)]
    pub sub_queries: Vec<SubQuery>,
}

impl Query {
    pub fn new(range: TimeRange) -> Self {
        Self {
            range,
            padding: false,
            ms_resolution: false,
            sub_queries: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        TimeRange::new(self.range.start, self.range.end)?;
        if self.sub_queries.is_empty() {
            return Err(SplicerError::validation("Missing sub queries"));
        }
        for sub_query in &self.sub_queries {
            sub_query.validate()?;
        }
        Ok(())
    }

    /// A copy carrying only `sub_query`.
    pub fn with_sub_query(&self, sub_query: SubQuery) -> Query {
        Query {
            range: self.range,
            padding: self.padding,
            ms_resolution: self.ms_resolution,
            sub_queries: vec![sub_query],
        }
    }

    /// A copy over a different window.
    pub fn slice_of(&self, range: TimeRange) -> Query {
        Query {
            range,
            ..self.clone()
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A start or end time as a client sends it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeSpec {
    Epoch(i64),
    Text(String),
}

impl TimeSpec {
    pub fn resolve(&self, now_ms: i64) -> Result<i64> {
        match self {
            TimeSpec::Epoch(v) => parse_date_time(&v.to_string(), now_ms),
            TimeSpec::Text(s) => parse_date_time(s, now_ms),
        }
    }
}

/// Query body as received over HTTP, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub start: Option<TimeSpec>,
    #[serde(default)]
    pub end: Option<TimeSpec>,
    #[serde(default)]
    pub padding: bool,
    #[serde(default)]
    pub ms_resolution: bool,
    #[serde(default)]
    pub queries: Vec<SubQuery>,
    #[serde(default)]
    pub expressions: Vec<String>,
}

impl QueryRequest {
    pub fn time_range(&self, now_ms: i64) -> Result<TimeRange> {
        let start = self
            .start
            .as_ref()
            .ok_or_else(|| SplicerError::validation("Missing start time"))?
            .resolve(now_ms)?;
        let end = match &self.end {
            Some(end) => end.resolve(now_ms)?,
            None => now_ms,
        };
        TimeRange::new(start, end)
    }

    /// Resolves times and carries the sub-queries over. Sub-queries are
    /// only required when no expression is present.
    pub fn to_query(&self, now_ms: i64) -> Result<Query> {
        let query = Query {
            range: self.time_range(now_ms)?,
            padding: self.padding,
            ms_resolution: self.ms_resolution,
            sub_queries: self.queries.clone(),
        };
        if self.expressions.is_empty() {
            query.validate()?;
        }
        Ok(query)
    }
}
