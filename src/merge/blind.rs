use std::collections::HashMap;

use tracing::debug;

use super::MergeError;
use crate::series::Series;

/// Merges two result sets of the same sub-query by series signature,
/// without knowing the query that produced them.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResultsMerger;

impl ResultsMerger {
    pub fn new() -> Self {
        Self
    }

    /// Both sides must be non-empty, equally long and carry one metric.
    /// Points from `second` win on timestamp collisions.
    pub fn merge(&self, first: &[Series], second: &[Series]) -> Result<Vec<Series>, MergeError> {
        if first.is_empty() || first.len() != second.len() {
            return Err(MergeError::ShapeMismatch {
                left: first.len(),
                right: second.len(),
            });
        }

        let metric = &first[0].metric;
        if let Some(other) = first
            .iter()
            .chain(second.iter())
            .find(|s| &s.metric != metric)
        {
            return Err(MergeError::MetricMismatch {
                expected: metric.clone(),
                found: other.metric.clone(),
            });
        }

        let mut table: HashMap<u64, Vec<&Series>> = HashMap::new();
        for series in first {
            table.entry(series.signature()).or_default().push(series);
        }

        let mut merged = Vec::with_capacity(second.len());
        for series in second {
            let candidates = table.get(&series.signature()).map(Vec::as_slice).unwrap_or(&[]);
            let counterpart = match candidates {
                [only] => Some(*only),
                many => many.iter().copied().find(|c| c.identical(series)),
            };

            match counterpart {
                Some(earlier) => merged.push(merge_pair(earlier, series)),
                None => {
                    debug!("No counterpart for series {} {:?}", series.metric, series.tags);
                    return Err(MergeError::MissingCounterpart {
                        metric: series.metric.clone(),
                        tags: format!("{:?}", series.tags),
                    });
                }
            }
        }

        Ok(merged)
    }

    /// Left fold over slices in order.
    pub fn merge_all(&self, slices: &[Vec<Series>]) -> Result<Vec<Series>, MergeError> {
        let mut iter = slices.iter();
        let mut acc = match iter.next() {
            Some(first) => first.clone(),
            None => return Ok(Vec::new()),
        };
        for slice in iter {
            acc = self.merge(&acc, slice)?;
        }
        Ok(acc)
    }
}

/// Fresh series with `earlier`'s metadata and the union of both point maps.
pub(crate) fn merge_pair(earlier: &Series, later: &Series) -> Series {
    let mut merged = earlier.copy_meta();
    merged.dps = earlier.dps.clone();
    merged.dps.union_with(&later.dps);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::Value;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    fn cpu(host: &str, points: &[(i64, i64)]) -> Series {
        Series::new("sys.cpu")
            .with_tag("host", host)
            .with_points(points.iter().map(|(t, v)| (*t, Value::Int(*v))))
    }

    #[test]
    fn test_merge_unions_points() {
        let a = vec![cpu("a", &[(1, 1), (2, 2)]), cpu("b", &[(1, 10)])];
        let b = vec![cpu("b", &[(3, 30)]), cpu("a", &[(2, 20), (3, 3)])];
        let merged = ResultsMerger::new().merge(&a, &b).unwrap();

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0], cpu("b", &[(1, 10), (3, 30)]));
        // later slice wins at ts 2
        assert_eq!(merged[1], cpu("a", &[(1, 1), (2, 20), (3, 3)]));
    }

    #[test]
    fn test_merge_is_non_mutating_and_idempotent() {
        let a = vec![cpu("a", &[(1, 1), (2, 2)])];
        let snapshot = a.clone();
        let merged = ResultsMerger::new().merge(&a, &a).unwrap();
        assert_eq!(a, snapshot);
        assert_eq!(merged, snapshot);
    }

    #[test]
    fn test_metric_mismatch() {
        let a = vec![cpu("a", &[(1, 1)])];
        let b = vec![Series::new("sys.mem").with_tag("host", "a")];
        assert!(matches!(
            ResultsMerger::new().merge(&a, &b),
            Err(MergeError::MetricMismatch { .. })
        ));
    }

    #[test]
    fn test_missing_counterpart() {
        let a = vec![cpu("a", &[(1, 1)])];
        let b = vec![cpu("z", &[(2, 1)])];
        assert!(matches!(
            ResultsMerger::new().merge(&a, &b),
            Err(MergeError::MissingCounterpart { .. })
        ));
    }

    #[test]
    fn test_shape_mismatch() {
        let a = vec![cpu("a", &[(1, 1)])];
        assert!(matches!(
            ResultsMerger::new().merge(&a, &[]),
            Err(MergeError::ShapeMismatch { left: 1, right: 0 })
        ));
    }

    #[test]
    fn test_fold_is_associative_on_point_sets() {
        let merger = ResultsMerger::new();
        let a = vec![cpu("a", &[(1, 1), (2, 1)])];
        let b = vec![cpu("a", &[(2, 2), (3, 2)])];
        let c = vec![cpu("a", &[(3, 3), (4, 3)])];

        let left = merger.merge(&merger.merge(&a, &b).unwrap(), &c).unwrap();
        let right = merger.merge(&a, &merger.merge(&b, &c).unwrap()).unwrap();

        let keys = |s: &Vec<Series>| s[0].dps.timestamps();
        assert_eq!(keys(&left), keys(&right));
        assert_eq!(keys(&left), BTreeSet::from([1, 2, 3, 4]));

        let folded = merger.merge_all(&[a, b, c]).unwrap();
        assert_eq!(folded, left);
    }
}
