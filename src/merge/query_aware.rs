use std::collections::HashMap;

use tracing::debug;

use super::blind::merge_pair;
use crate::models::SubQuery;
use crate::series::Series;

/// Key shared by every series without a grouped-by tag.
pub const NO_TAGS: &str = "<no_tags>";

/// Merges slices of one sub-query, matching series on the tags that
/// sub-query grouped by. Series found on one side only pass through.
#[derive(Debug, Clone)]
pub struct QueryAwareResultsMerger {
    group_by: Vec<String>,
}

impl QueryAwareResultsMerger {
    pub fn new(sub_query: &SubQuery) -> Self {
        Self {
            group_by: sub_query.tags.keys().cloned().collect(),
        }
    }

    pub fn merge_all(&self, slices: &[Vec<Series>]) -> Vec<Series> {
        match slices {
            [] => Vec::new(),
            [only] => only.clone(),
            [first, rest @ ..] => rest
                .iter()
                .fold(first.clone(), |acc, slice| self.merge(&acc, slice)),
        }
    }

    /// Points from `right` win on timestamp collisions.
    pub fn merge(&self, left: &[Series], right: &[Series]) -> Vec<Series> {
        let mut right_index: HashMap<String, &Series> = HashMap::new();
        let mut right_order = Vec::with_capacity(right.len());
        for series in right {
            let key = self.tag_string(series);
            if right_index.insert(key.clone(), series).is_none() {
                right_order.push(key);
            }
        }

        let mut merged = Vec::with_capacity(left.len().max(right.len()));
        for series in left {
            let key = self.tag_string(series);
            match right_index.remove(&key) {
                Some(later) => merged.push(merge_pair(series, later)),
                None => {
                    debug!("Did not find counterpart for {}", key);
                    merged.push(series.clone());
                }
            }
        }

        for key in right_order {
            if let Some(only_right) = right_index.remove(&key) {
                merged.push(only_right.clone());
            }
        }

        merged
    }

    /// `k=v` pairs for grouped-by tags, sorted by key and comma joined.
    pub fn tag_string(&self, series: &Series) -> String {
        let pairs: Vec<String> = series
            .tags
            .iter()
            .filter(|(k, _)| self.group_by.contains(k))
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        if pairs.is_empty() {
            NO_TAGS.to_string()
        } else {
            pairs.join(",")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::Value;
    use pretty_assertions::assert_eq;

    fn sub_query(tags: &[&str]) -> SubQuery {
        tags.iter()
            .fold(SubQuery::new("sum", "sys.cpu"), |q, k| q.with_tag(*k, "*"))
    }

    fn series(tags: &[(&str, &str)], points: &[(i64, i64)]) -> Series {
        tags.iter()
            .fold(Series::new("sys.cpu"), |s, (k, v)| s.with_tag(*k, *v))
            .with_points(points.iter().map(|(t, v)| (*t, Value::Int(*v))))
    }

    #[test]
    fn test_tag_string_uses_query_tags_only() {
        let result = series(&[("x", "b"), ("y", "b"), ("z", "b"), ("host", "h1")], &[]);

        let merger = QueryAwareResultsMerger::new(&sub_query(&["x", "y", "z"]));
        assert_eq!(merger.tag_string(&result), "x=b,y=b,z=b");

        let merger = QueryAwareResultsMerger::new(&sub_query(&["z", "x"]));
        assert_eq!(merger.tag_string(&result), "x=b,z=b");

        let merger = QueryAwareResultsMerger::new(&sub_query(&[]));
        assert_eq!(merger.tag_string(&result), NO_TAGS);
        assert_eq!(merger.tag_string(&series(&[], &[])), NO_TAGS);
    }

    #[test]
    fn test_merge_carries_unmatched_series() {
        let merger = QueryAwareResultsMerger::new(&sub_query(&["host"]));
        let first = vec![
            series(&[("host", "a")], &[(1, 1)]),
            series(&[("host", "b")], &[(1, 5)]),
        ];
        let second = vec![
            series(&[("host", "a"), ("extra", "echo")], &[(2, 2)]),
            series(&[("host", "c")], &[(2, 9)]),
        ];

        let merged = merger.merge(&first, &second);
        assert_eq!(
            merged,
            vec![
                series(&[("host", "a")], &[(1, 1), (2, 2)]),
                series(&[("host", "b")], &[(1, 5)]),
                series(&[("host", "c")], &[(2, 9)]),
            ]
        );
    }

    #[test]
    fn test_merge_all_edge_cases() {
        let merger = QueryAwareResultsMerger::new(&sub_query(&[]));
        assert!(merger.merge_all(&[]).is_empty());

        let only = vec![series(&[], &[(1, 1)])];
        assert_eq!(merger.merge_all(&[only.clone()]), only);

        let slices = vec![
            vec![series(&[], &[(1, 1)])],
            Vec::new(),
            vec![series(&[], &[(3, 3), (1, 7)])],
        ];
        assert_eq!(
            merger.merge_all(&slices),
            vec![series(&[], &[(1, 7), (3, 3)])]
        );
    }

    #[test]
    fn test_merge_does_not_touch_inputs() {
        let merger = QueryAwareResultsMerger::new(&sub_query(&["host"]));
        let first = vec![series(&[("host", "a")], &[(1, 1)])];
        let second = vec![series(&[("host", "a")], &[(2, 2)])];
        let (f, s) = (first.clone(), second.clone());
        merger.merge(&first, &second);
        assert_eq!(first, f);
        assert_eq!(second, s);
    }
}
