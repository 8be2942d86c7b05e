//! Common types and enums used throughout the SDK.

use crate::error::{Error, Result};
use crate::time::json_type_name;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// How a time series is addressed on the wire
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Identifier {
    /// Internal numeric id, `{"id": N}`
    Id(i64),
    /// User-defined external id, `{"externalId": "..."}`
    ExternalId(String),
}

impl Identifier {
    /// Numeric id, if this is one
    pub fn as_id(&self) -> Option<i64> {
        match self {
            Identifier::Id(id) => Some(*id),
            Identifier::ExternalId(_) => None,
        }
    }

    /// External id, if this is one
    pub fn as_external_id(&self) -> Option<&str> {
        match self {
            Identifier::Id(_) => None,
            Identifier::ExternalId(xid) => Some(xid),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Id(id) => write!(f, "id={}", id),
            Identifier::ExternalId(xid) => write!(f, "external_id='{}'", xid),
        }
    }
}

/// Aggregate functions the datapoints API can compute per granularity bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Aggregate {
    /// Time-weighted average
    Average,
    /// Maximum value
    Max,
    /// Minimum value
    Min,
    /// Number of datapoints
    Count,
    /// Sum of values
    Sum,
    /// Linear interpolation at the bucket start
    Interpolation,
    /// Step interpolation at the bucket start
    StepInterpolation,
    /// Sum of absolute differences between neighbouring points
    TotalVariation,
    /// Variance of the interpolated function
    ContinuousVariance,
    /// Variance of the datapoint values
    DiscreteVariance,
}

impl Aggregate {
    /// Every known aggregate
    pub const ALL: [Aggregate; 10] = [
        Aggregate::Average,
        Aggregate::Max,
        Aggregate::Min,
        Aggregate::Count,
        Aggregate::Sum,
        Aggregate::Interpolation,
        Aggregate::StepInterpolation,
        Aggregate::TotalVariation,
        Aggregate::ContinuousVariance,
        Aggregate::DiscreteVariance,
    ];

    /// Name used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregate::Average => "average",
            Aggregate::Max => "max",
            Aggregate::Min => "min",
            Aggregate::Count => "count",
            Aggregate::Sum => "sum",
            Aggregate::Interpolation => "interpolation",
            Aggregate::StepInterpolation => "stepInterpolation",
            Aggregate::TotalVariation => "totalVariation",
            Aggregate::ContinuousVariance => "continuousVariance",
            Aggregate::DiscreteVariance => "discreteVariance",
        }
    }

    /// Snake-case spelling accepted from callers
    fn snake_name(&self) -> &'static str {
        match self {
            Aggregate::StepInterpolation => "step_interpolation",
            Aggregate::TotalVariation => "total_variation",
            Aggregate::ContinuousVariance => "continuous_variance",
            Aggregate::DiscreteVariance => "discrete_variance",
            other => other.as_str(),
        }
    }
}

impl FromStr for Aggregate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Aggregate::ALL
            .iter()
            .copied()
            .find(|agg| agg.as_str() == s || agg.snake_name() == s)
            .ok_or_else(|| {
                Error::validation(
                    format!(
                        "Unknown aggregate `{}`, expected one of {:?}",
                        s,
                        Aggregate::ALL.iter().map(Aggregate::as_str).collect::<Vec<_>>()
                    ),
                    Some("aggregates".to_string()),
                    Some(s.to_string()),
                )
            })
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated `[start, end)` query window in ms since epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Inclusive start
    pub start: i64,
    /// Exclusive end
    pub end: i64,
}

impl TimeWindow {
    /// Create a window, rejecting empty or reversed ranges
    pub fn new(start: i64, end: i64) -> Result<Self> {
        if end <= start {
            return Err(Error::invalid_range(start, end));
        }
        Ok(Self { start, end })
    }

    /// Window length in ms
    pub fn duration_ms(&self) -> i64 {
        self.end - self.start
    }

    /// Whether a timestamp falls inside the window
    pub fn contains(&self, timestamp: i64) -> bool {
        self.start <= timestamp && timestamp < self.end
    }
}

/// A caller-supplied datapoint limit before normalization.
///
/// `Unbounded`, `-1` and positive infinity all mean "no limit".
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LimitInput {
    /// No limit
    Unbounded,
    /// An integral limit, `-1` meaning unbounded
    Count(i64),
    /// A float limit; only `inf` (unbounded) is accepted, integral floats such as `10.0` are rejected
    Float(f64),
}

impl LimitInput {
    /// Normalize to `None` (unbounded) or a non-negative count
    pub fn normalize(self) -> Result<Option<u64>> {
        match self {
            LimitInput::Unbounded | LimitInput::Count(-1) => Ok(None),
            LimitInput::Float(f) if f == f64::INFINITY => Ok(None),
            LimitInput::Count(n) if n >= 0 => Ok(Some(n as u64)),
            other => Err(Error::wrong_type(
                "limit",
                "a non-negative integer -OR- one of [None, -1, inf]",
                other.to_string(),
            )),
        }
    }

    /// Read a limit from a JSON value; `null` is unbounded
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(LimitInput::Unbounded),
            Value::Number(n) => match n.as_i64() {
                Some(count) => Ok(LimitInput::Count(count)),
                None => match n.as_u64() {
                    Some(count) => Ok(LimitInput::Count(i64::try_from(count).unwrap_or(i64::MAX))),
                    None => Ok(LimitInput::Float(n.as_f64().unwrap_or(f64::NAN))),
                },
            },
            other => Err(Error::wrong_type(
                "limit",
                "a non-negative integer -OR- one of [None, -1, inf]",
                json_type_name(other),
            )),
        }
    }
}

impl From<i64> for LimitInput {
    fn from(n: i64) -> Self {
        LimitInput::Count(n)
    }
}

impl From<i32> for LimitInput {
    fn from(n: i32) -> Self {
        LimitInput::Count(n.into())
    }
}

impl From<u64> for LimitInput {
    fn from(n: u64) -> Self {
        LimitInput::Count(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

impl From<usize> for LimitInput {
    fn from(n: usize) -> Self {
        LimitInput::Count(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

impl From<f64> for LimitInput {
    fn from(f: f64) -> Self {
        LimitInput::Float(f)
    }
}

impl From<Option<u64>> for LimitInput {
    fn from(limit: Option<u64>) -> Self {
        limit.map_or(LimitInput::Unbounded, LimitInput::from)
    }
}

impl fmt::Display for LimitInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitInput::Unbounded => write!(f, "None"),
            LimitInput::Count(n) => write!(f, "{}", n),
            LimitInput::Float(x) => write!(f, "{}", x),
        }
    }
}
