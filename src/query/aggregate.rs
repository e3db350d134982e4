//! Aggregator library
//!
//! A fixed set of stateless reducers over a point sequence, plus a
//! caller-supplied escape hatch. The aggregation key is parsed into
//! [`Aggregation`] once at the facade boundary so the hot path
//! dispatches on an enum rather than re-matching strings.
//!
//! Every reducer returns [`AggregateValue::Undefined`] on empty input,
//! except `raw` which returns an empty point list.

use crate::query::error::QueryError;
use crate::storage::Point;
use std::sync::Arc;

/// Caller-supplied reducer
pub type CustomReducer = Arc<dyn Fn(&[Point]) -> AggregateValue + Send + Sync>;

/// Result of applying an aggregation
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateValue {
    /// The empty-input sentinel (and n<2 for the reducers that need a
    /// pair)
    Undefined,
    /// A single scalar
    Number(f64),
    /// A short list (mode ties, rate-of-change series)
    Numbers(Vec<f64>),
    /// A symbolic value (`trend`)
    Text(String),
    /// The untransformed sequence (`raw`)
    Points(Vec<Point>),
}

impl AggregateValue {
    /// The scalar, if this is a single number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AggregateValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// A parsed aggregation kind
#[derive(Clone)]
pub enum Aggregation {
    Raw,
    Sum,
    Average,
    Min,
    Max,
    Count,
    Median,
    Mode,
    StdDev,
    Variance,
    First,
    Last,
    Range,
    Iqr,
    RateOfChange,
    Trend,
    /// `percentile_N`, 0 ≤ N ≤ 100
    Percentile(u8),
    /// Caller-supplied reducer; keyed as `"custom"` in the query cache
    Custom(CustomReducer),
}

impl std::fmt::Debug for Aggregation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Aggregation({})", self.key())
    }
}

impl Aggregation {
    /// Parse an aggregation key
    ///
    /// `custom` cannot be parsed from a key — construct
    /// [`Aggregation::Custom`] directly and run it through
    /// `Tsdb::query_with`.
    pub fn parse(key: &str) -> Result<Self, QueryError> {
        let agg = match key {
            "raw" => Aggregation::Raw,
            "sum" => Aggregation::Sum,
            "average" => Aggregation::Average,
            "min" => Aggregation::Min,
            "max" => Aggregation::Max,
            "count" => Aggregation::Count,
            "median" => Aggregation::Median,
            "mode" => Aggregation::Mode,
            "stddev" => Aggregation::StdDev,
            "variance" => Aggregation::Variance,
            "first" => Aggregation::First,
            "last" => Aggregation::Last,
            "range" => Aggregation::Range,
            "iqr" => Aggregation::Iqr,
            "rate_of_change" => Aggregation::RateOfChange,
            "trend" => Aggregation::Trend,
            other => {
                let n = other
                    .strip_prefix("percentile_")
                    .and_then(|n| n.parse::<u8>().ok())
                    .filter(|n| *n <= 100);
                match n {
                    Some(n) => Aggregation::Percentile(n),
                    None => return Err(QueryError::UnsupportedAggregation(key.to_string())),
                }
            }
        };
        Ok(agg)
    }

    /// The string key this aggregation fingerprints under
    pub fn key(&self) -> String {
        match self {
            Aggregation::Raw => "raw".to_string(),
            Aggregation::Sum => "sum".to_string(),
            Aggregation::Average => "average".to_string(),
            Aggregation::Min => "min".to_string(),
            Aggregation::Max => "max".to_string(),
            Aggregation::Count => "count".to_string(),
            Aggregation::Median => "median".to_string(),
            Aggregation::Mode => "mode".to_string(),
            Aggregation::StdDev => "stddev".to_string(),
            Aggregation::Variance => "variance".to_string(),
            Aggregation::First => "first".to_string(),
            Aggregation::Last => "last".to_string(),
            Aggregation::Range => "range".to_string(),
            Aggregation::Iqr => "iqr".to_string(),
            Aggregation::RateOfChange => "rate_of_change".to_string(),
            Aggregation::Trend => "trend".to_string(),
            Aggregation::Percentile(n) => format!("percentile_{n}"),
            Aggregation::Custom(_) => "custom".to_string(),
        }
    }

    /// Apply this aggregation to a point sequence
    pub fn apply(&self, points: &[Point]) -> AggregateValue {
        if let Aggregation::Raw = self {
            return AggregateValue::Points(points.to_vec());
        }
        if let Aggregation::Custom(reducer) = self {
            return reducer(points);
        }
        if points.is_empty() {
            return AggregateValue::Undefined;
        }

        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        let n = values.len();

        match self {
            Aggregation::Sum => AggregateValue::Number(values.iter().sum()),
            Aggregation::Average => {
                AggregateValue::Number(values.iter().sum::<f64>() / n as f64)
            }
            Aggregation::Min => AggregateValue::Number(
                values.iter().cloned().fold(f64::INFINITY, f64::min),
            ),
            Aggregation::Max => AggregateValue::Number(
                values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            ),
            Aggregation::Count => AggregateValue::Number(n as f64),
            Aggregation::Median => {
                let sorted = sorted_values(&values);
                let mid = n / 2;
                if n % 2 == 1 {
                    AggregateValue::Number(sorted[mid])
                } else {
                    AggregateValue::Number((sorted[mid - 1] + sorted[mid]) / 2.0)
                }
            }
            Aggregation::Mode => mode(&values),
            Aggregation::Variance => match sample_variance(&values) {
                Some(variance) => AggregateValue::Number(variance),
                None => AggregateValue::Undefined,
            },
            Aggregation::StdDev => match sample_variance(&values) {
                Some(variance) => AggregateValue::Number(variance.sqrt()),
                None => AggregateValue::Undefined,
            },
            Aggregation::First => AggregateValue::Number(values[0]),
            Aggregation::Last => AggregateValue::Number(values[n - 1]),
            Aggregation::Range => {
                let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
                let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                AggregateValue::Number(max - min)
            }
            Aggregation::Iqr => {
                let sorted = sorted_values(&values);
                let q1 = sorted[n / 4];
                let q3_idx = 3 * n / 4;
                let q3 = if n % 2 == 0 && q3_idx > 0 {
                    (sorted[q3_idx] + sorted[q3_idx - 1]) / 2.0
                } else {
                    sorted[q3_idx]
                };
                AggregateValue::Number(q3 - q1)
            }
            Aggregation::RateOfChange => {
                if n < 2 {
                    return AggregateValue::Undefined;
                }
                let changes = values
                    .windows(2)
                    .map(|w| (w[1] - w[0]) / w[0])
                    .collect();
                AggregateValue::Numbers(changes)
            }
            Aggregation::Trend => {
                let direction = if n <= 1 {
                    "steady"
                } else if values[n - 1] > values[0] {
                    "up"
                } else if values[n - 1] < values[0] {
                    "down"
                } else {
                    "steady"
                };
                AggregateValue::Text(direction.to_string())
            }
            Aggregation::Percentile(p) => {
                let sorted = sorted_values(&values);
                // rank = N/100·(n−1)+1, i.e. a zero-based position of
                // N/100·(n−1), linearly interpolated
                let pos = f64::from(*p) / 100.0 * (n - 1) as f64;
                let lo = pos.floor() as usize;
                let frac = pos - lo as f64;
                let value = if lo + 1 < n {
                    sorted[lo] + frac * (sorted[lo + 1] - sorted[lo])
                } else {
                    sorted[lo]
                };
                AggregateValue::Number(value)
            }
            // Raw and Custom handled above
            Aggregation::Raw | Aggregation::Custom(_) => unreachable!(),
        }
    }
}

fn sorted_values(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    sorted
}

/// Sample variance (n−1 denominator); `None` for n < 2
fn sample_variance(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    Some(sum_sq / (n - 1) as f64)
}

/// Value(s) with the highest frequency, in first-appearance order;
/// a single winner is returned unwrapped
fn mode(values: &[f64]) -> AggregateValue {
    let mut counts: Vec<(f64, usize)> = Vec::new();
    for &value in values {
        match counts.iter_mut().find(|(v, _)| *v == value) {
            Some((_, count)) => *count += 1,
            None => counts.push((value, 1)),
        }
    }
    let best = counts.iter().map(|(_, c)| *c).max().unwrap_or(0);
    let modes: Vec<f64> = counts
        .into_iter()
        .filter(|(_, c)| *c == best)
        .map(|(v, _)| v)
        .collect();
    if modes.len() == 1 {
        AggregateValue::Number(modes[0])
    } else {
        AggregateValue::Numbers(modes)
    }
}
