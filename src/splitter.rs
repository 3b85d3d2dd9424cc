use crate::config::Config;
use crate::models::{Query, TimeRange};

/// Cuts a query's window into slices aligned on multiples of the slice
/// width, counted from epoch 0.
///
/// Every slice but the last asks for `overflow` extra milliseconds so a
/// downsample bucket straddling a boundary comes back whole. The last
/// slice stops at the query's own end.
#[derive(Debug, Clone, Copy)]
pub struct QuerySplitter {
    slice_ms: i64,
    overflow_ms: i64,
}

impl QuerySplitter {
    pub fn new(slice_ms: i64, overflow_ms: i64) -> Self {
        Self {
            slice_ms: slice_ms.max(1),
            overflow_ms: overflow_ms.max(0),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.slice_size_ms(), config.overflow_ms())
    }

    /// Cuts `query` at every multiple of the slice width. The first slice
    /// starts at the query start rather than at the floored boundary, so
    /// no slice reaches before the requested window.
    pub fn split(&self, query: &Query) -> Vec<Query> {
        let TimeRange { start, end } = query.range;
        let width = self.slice_ms;

        let mut boundary = (start.div_euclid(width) + 1) * width;
        if end <= boundary {
            return vec![query.clone()];
        }

        let mut slices = Vec::new();
        slices.push(query.slice_of(self.padded(start, boundary, end)));

        while boundary + width < end {
            slices.push(query.slice_of(self.padded(boundary, boundary + width, end)));
            boundary += width;
        }

        slices.push(query.slice_of(TimeRange { start: boundary, end }));
        slices
    }

    fn padded(&self, start: i64, boundary: i64, end: i64) -> TimeRange {
        TimeRange {
            start,
            end: (boundary + self.overflow_ms).min(end),
        }
    }

    /// Slice windows without the overflow pad.
    pub fn unpadded_ranges(&self, query: &Query) -> Vec<TimeRange> {
        Self::new(self.slice_ms, 0)
            .split(query)
            .into_iter()
            .map(|q| q.range)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubQuery;
    use pretty_assertions::assert_eq;

    const HOUR: i64 = 3_600_000;
    const PAD: i64 = 300_000;

    fn query(start: i64, end: i64) -> Query {
        Query::new(TimeRange::new(start, end).unwrap()).with_sub_query(SubQuery::new("sum", "m"))
    }

    #[test]
    fn test_split_scenario() {
        let slices = QuerySplitter::new(HOUR, PAD).split(&query(0, 10_000_000));
        let ranges: Vec<TimeRange> = slices.iter().map(|q| q.range).collect();
        assert_eq!(
            ranges,
            vec![
                TimeRange { start: 0, end: HOUR + PAD },
                TimeRange { start: HOUR, end: 2 * HOUR + PAD },
                TimeRange { start: 2 * HOUR, end: 10_000_000 },
            ]
        );
        assert_eq!(slices.len() as i64, (10_000_000 + HOUR - 1) / HOUR);
        assert_eq!(slices[0].sub_queries, query(0, 1).sub_queries);
    }

    #[test]
    fn test_short_query_not_split() {
        let slices = QuerySplitter::new(HOUR, PAD).split(&query(HOUR + 10, 2 * HOUR));
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].range, TimeRange { start: HOUR + 10, end: 2 * HOUR });
    }

    #[test]
    fn test_pad_never_passes_end() {
        let slices = QuerySplitter::new(HOUR, PAD).split(&query(0, HOUR + 1000));
        assert_eq!(
            slices.iter().map(|q| q.range).collect::<Vec<_>>(),
            vec![
                TimeRange { start: 0, end: HOUR + 1000 },
                TimeRange { start: HOUR, end: HOUR + 1000 },
            ]
        );
    }

    #[test]
    fn test_unpadded_slices_cover_range_exactly() {
        let splitter = QuerySplitter::new(HOUR, PAD);
        let cases = [
            (0, 1),
            (0, HOUR),
            (1, HOUR + 1),
            (123_456, 9 * HOUR + 17),
            (5 * HOUR, 5 * HOUR + 3 * HOUR),
            (7_777_777, 77_777_777),
        ];
        for (start, end) in cases {
            let ranges = splitter.unpadded_ranges(&query(start, end));
            assert_eq!(ranges.first().unwrap().start, start);
            assert_eq!(ranges.last().unwrap().end, end);
            for pair in ranges.windows(2) {
                assert_eq!(pair[0].end, pair[1].start, "gap or overlap in {:?}", ranges);
            }
            for range in &ranges {
                assert!(range.start < range.end);
            }
        }
    }
}
