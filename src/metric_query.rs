//! The flat `m=` query syntax:
//! `aggregator:[interval-agg:][rate[{counter[,max[,reset]]}]:]metric[{tag=value,...}]`

use std::collections::BTreeMap;

use crate::models::{RateOptions, SubQuery};
use crate::{Result, SplicerError};

pub fn parse_sub_query(query: &str) -> Result<SubQuery> {
    let query = query.trim();
    if query.is_empty() {
        return Err(SplicerError::validation("The query string was empty"));
    }

    let parts: Vec<&str> = query.split(':').collect();
    if parts.len() < 2 || parts.len() > 5 {
        return Err(SplicerError::validation(format!(
            "Invalid parameter m={} ({} :-separated parts)",
            query,
            if parts.len() < 2 { "not enough" } else { "too many" }
        )));
    }

    let mut tags = BTreeMap::new();
    let metric = parse_with_metric(parts[parts.len() - 1], &mut tags)?;
    let mut sub_query = SubQuery::new(parts[0], metric);
    sub_query.tags = tags;

    for part in &parts[1..parts.len() - 1] {
        if part.to_ascii_lowercase().starts_with("rate") {
            sub_query.rate = true;
            if part.contains('{') {
                sub_query.rate_options = Some(parse_rate_options(part)?);
            }
        } else if part.chars().next().map_or(false, |c| c.is_ascii_digit()) {
            sub_query.downsample = Some(part.to_string());
        }
    }

    Ok(sub_query)
}

/// Splits `metric{a=b,...}` into the metric name, filling `tags`.
pub fn parse_with_metric(spec: &str, tags: &mut BTreeMap<String, String>) -> Result<String> {
    let Some(curly) = spec.find('{') else {
        return Ok(spec.to_string());
    };
    if !spec.ends_with('}') {
        return Err(SplicerError::validation(format!(
            "Missing '}}' at the end of: {}",
            spec
        )));
    }

    let inner = &spec[curly + 1..spec.len() - 1];
    if !inner.is_empty() {
        for tag in inner.split(',') {
            parse_tag(tags, tag).map_err(|e| {
                SplicerError::validation(format!("When parsing tag '{}': {}", tag, e))
            })?;
        }
    }
    Ok(spec[..curly].to_string())
}

/// Adds one `key=value` pair. A repeated key must repeat its value.
pub fn parse_tag(tags: &mut BTreeMap<String, String>, tag: &str) -> Result<()> {
    let kv: Vec<&str> = tag.split('=').collect();
    if kv.len() != 2 || kv[0].is_empty() || kv[1].is_empty() {
        return Err(SplicerError::validation(format!("invalid tag: {}", tag)));
    }

    match tags.get(kv[0]) {
        Some(existing) if existing == kv[1] => Ok(()),
        Some(existing) => Err(SplicerError::validation(format!(
            "duplicate tag: {}, already set to {}",
            tag, existing
        ))),
        None => {
            tags.insert(kv[0].to_string(), kv[1].to_string());
            Ok(())
        }
    }
}

/// Parses `rate{counter[,max[,reset]]}`.
pub fn parse_rate_options(spec: &str) -> Result<RateOptions> {
    let invalid = |why: &str| SplicerError::validation(format!("Invalid rate options {}: {}", spec, why));

    let open = spec.find('{').ok_or_else(|| invalid("missing '{'"))?;
    if !spec.ends_with('}') {
        return Err(invalid("missing '}'"));
    }

    let inner = &spec[open + 1..spec.len() - 1];
    if inner.is_empty() {
        return Ok(RateOptions::default());
    }

    let parts: Vec<&str> = inner.split(',').collect();
    if parts.len() > 3 {
        return Err(invalid("too many options"));
    }

    let counter = parts[0] == "counter";
    let counter_max = match parts.get(1) {
        Some(v) if !v.is_empty() => v.parse::<i64>().map_err(|_| invalid("counter max is not a number"))?,
        _ => i64::MAX,
    };
    let reset_value = match parts.get(2) {
        Some(v) if !v.is_empty() => v.parse::<i64>().map_err(|_| invalid("reset value is not a number"))?,
        _ => 0,
    };

    Ok(RateOptions {
        counter,
        counter_max,
        reset_value,
    })
}
