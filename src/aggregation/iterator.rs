use super::{Aggregator, Interpolation, Sample};
use crate::series::{DataPoint, Value};

/// Read position over one input series.
struct Cursor {
    points: Vec<DataPoint>,
    pos: usize,
}

impl Cursor {
    fn prev(&self) -> Option<&DataPoint> {
        self.pos.checked_sub(1).map(|i| &self.points[i])
    }

    fn peek(&self) -> Option<&DataPoint> {
        self.points.get(self.pos)
    }

    fn started(&self) -> bool {
        self.pos > 0
    }
}

/// What one input contributes at a timestamp.
enum Contribution {
    Real(Value),
    Highest,
    Lowest,
}

/// Merges N sorted series into one, emitting a point at every timestamp
/// where any input has a real point and interpolating the others.
///
/// Inputs that have not started yet are left out under `Lerp`. Inputs that
/// already ended hold their last value under `Lerp`. Under the other modes
/// both cases take the mode's substitute value.
///
/// The endpoint-aligned form skips ahead until every input has a real
/// point, and stops as soon as any input runs out of points in the window.
pub struct AggregationIterator<A: Aggregator> {
    cursors: Vec<Cursor>,
    aggregator: A,
    interpolation: Interpolation,
    end: i64,
    aligned: bool,
}

impl<A: Aggregator> AggregationIterator<A> {
    /// `start` and `end` are inclusive epoch seconds.
    pub fn new(series: Vec<Vec<DataPoint>>, start: i64, end: i64, aggregator: A, rate: bool) -> Self {
        let interpolation = aggregator.interpolation();
        let cursors = series
            .into_iter()
            .map(|points| {
                let points = if rate { to_rates(&points) } else { points };
                Cursor {
                    points: points.into_iter().filter(|dp| dp.timestamp >= start).collect(),
                    pos: 0,
                }
            })
            .collect();

        Self {
            cursors,
            aggregator,
            interpolation,
            end,
            aligned: false,
        }
    }

    pub fn endpoint_aligned(
        series: Vec<Vec<DataPoint>>,
        start: i64,
        end: i64,
        aggregator: A,
        rate: bool,
    ) -> Self {
        let mut iter = Self::new(series, start, end, aggregator, rate);
        iter.aligned = true;
        iter.align_first_timestamps();
        iter
    }

    /// Consumes timestamps until the next step has a real value from
    /// every input.
    fn align_first_timestamps(&mut self) {
        while let Some(min) = self.next_timestamp() {
            let lagging = self
                .cursors
                .iter()
                .any(|c| !c.started() && c.peek().map_or(true, |dp| dp.timestamp > min));
            if !lagging || !self.has_next() {
                break;
            }
            self.advance_to(min);
        }
    }

    fn in_window(&self, cursor: &Cursor) -> bool {
        cursor.peek().map_or(false, |dp| dp.timestamp <= self.end)
    }

    pub fn has_next(&self) -> bool {
        if self.cursors.is_empty() {
            return false;
        }
        if self.aligned {
            self.cursors.iter().all(|c| self.in_window(c))
        } else {
            self.cursors.iter().any(|c| self.in_window(c))
        }
    }

    fn next_timestamp(&self) -> Option<i64> {
        self.cursors
            .iter()
            .filter_map(|c| c.peek().map(|dp| dp.timestamp))
            .filter(|ts| *ts <= self.end)
            .min()
    }

    fn advance_to(&mut self, timestamp: i64) {
        for cursor in &mut self.cursors {
            if cursor.peek().map_or(false, |dp| dp.timestamp == timestamp) {
                cursor.pos += 1;
            }
        }
    }

    fn contribution(&self, cursor: &Cursor, timestamp: i64) -> Option<Contribution> {
        let prev = cursor.prev();
        if let Some(dp) = prev {
            if dp.timestamp == timestamp {
                return Some(Contribution::Real(dp.value));
            }
        }

        match self.interpolation {
            Interpolation::Zim => Some(Contribution::Real(Value::Int(0))),
            Interpolation::Max => Some(Contribution::Highest),
            Interpolation::Min => Some(Contribution::Lowest),
            Interpolation::Lerp => {
                let prev = prev?;
                match cursor.peek() {
                    Some(next) => Some(Contribution::Real(lerp(prev, next, timestamp))),
                    None => Some(Contribution::Real(prev.value)),
                }
            }
        }
    }

    /// Hands back the aggregator, e.g. to read state it collected.
    pub fn into_aggregator(self) -> A {
        self.aggregator
    }
}

impl<A: Aggregator> Iterator for AggregationIterator<A> {
    type Item = DataPoint;

    fn next(&mut self) -> Option<DataPoint> {
        if !self.has_next() {
            return None;
        }
        let timestamp = self.next_timestamp()?;
        self.advance_to(timestamp);

        let contributions: Vec<(usize, Contribution)> = self
            .cursors
            .iter()
            .enumerate()
            .filter_map(|(i, c)| self.contribution(c, timestamp).map(|v| (i, v)))
            .collect();

        let all_ints = contributions.iter().all(|(_, c)| match c {
            Contribution::Real(v) => v.is_int(),
            _ => true,
        });

        let value = if all_ints {
            let samples: Vec<Sample<i64>> = contributions
                .iter()
                .map(|(i, c)| {
                    let v = match c {
                        Contribution::Real(Value::Int(v)) => *v,
                        Contribution::Real(Value::Float(v)) => *v as i64,
                        Contribution::Highest => i64::MAX,
                        Contribution::Lowest => i64::MIN,
                    };
                    Sample::new(*i, v)
                })
                .collect();
            Value::Int(self.aggregator.run_long(timestamp, &samples))
        } else {
            let samples: Vec<Sample<f64>> = contributions
                .iter()
                .map(|(i, c)| {
                    let v = match c {
                        Contribution::Real(v) => v.as_f64(),
                        Contribution::Highest => f64::MAX,
                        Contribution::Lowest => f64::MIN,
                    };
                    Sample::new(*i, v)
                })
                .collect();
            Value::Float(self.aggregator.run_double(timestamp, &samples))
        };

        Some(DataPoint::new(timestamp, value))
    }
}

fn lerp(prev: &DataPoint, next: &DataPoint, timestamp: i64) -> Value {
    let dx = next.timestamp - prev.timestamp;
    if dx == 0 {
        return prev.value;
    }
    match (prev.value, next.value) {
        (Value::Int(y0), Value::Int(y1)) => {
            let offset = (timestamp - prev.timestamp) as i128 * (y1 as i128 - y0 as i128) / dx as i128;
            let v = y0 as i128 + offset;
            Value::Int(v.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
        }
        (y0, y1) => {
            let (y0, y1) = (y0.as_f64(), y1.as_f64());
            Value::Float(y0 + (timestamp - prev.timestamp) as f64 * (y1 - y0) / dx as f64)
        }
    }
}

/// Per-second rate between consecutive points, stamped at the later one.
fn to_rates(points: &[DataPoint]) -> Vec<DataPoint> {
    points
        .windows(2)
        .filter_map(|pair| {
            let dt = pair[1].timestamp - pair[0].timestamp;
            if dt <= 0 {
                return None;
            }
            let dv = pair[1].value.as_f64() - pair[0].value.as_f64();
            Some(DataPoint::new(pair[1].timestamp, Value::Float(dv / dt as f64)))
        })
        .collect()
}
