//! Datapoints containers and result assembly.

use crate::error::Result;
use crate::time::ms_to_datetime;
use crate::types::{Aggregate, Identifier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::ops::Index;

/// The value of a raw datapoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DatapointValue {
    /// Value of a numeric series
    Numeric(f64),
    /// Value of a string series
    String(String),
}

impl DatapointValue {
    /// Numeric value, if this is one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DatapointValue::Numeric(v) => Some(*v),
            DatapointValue::String(_) => None,
        }
    }

    /// String value, if this is one
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DatapointValue::Numeric(_) => None,
            DatapointValue::String(s) => Some(s),
        }
    }
}

/// A single datapoint: either a raw value or one aggregate bucket
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Datapoint {
    /// Milliseconds since epoch
    pub timestamp: i64,
    /// Raw or synthetic value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<DatapointValue>,
    /// Time-weighted average
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average: Option<f64>,
    /// Maximum in the bucket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Minimum in the bucket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Number of points in the bucket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<f64>,
    /// Sum of the bucket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sum: Option<f64>,
    /// Interpolated value at the bucket start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpolation: Option<f64>,
    /// Step-interpolated value at the bucket start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_interpolation: Option<f64>,
    /// Total variation over the bucket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_variation: Option<f64>,
    /// Continuous variance over the bucket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuous_variance: Option<f64>,
    /// Discrete variance over the bucket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discrete_variance: Option<f64>,
    /// Evaluation error of a synthetic expression at this timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Datapoint {
    /// Create a raw numeric datapoint
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self {
            timestamp,
            value: Some(DatapointValue::Numeric(value)),
            ..Default::default()
        }
    }

    /// Value of one aggregate column
    pub fn aggregate(&self, aggregate: Aggregate) -> Option<f64> {
        match aggregate {
            Aggregate::Average => self.average,
            Aggregate::Max => self.max,
            Aggregate::Min => self.min,
            Aggregate::Count => self.count,
            Aggregate::Sum => self.sum,
            Aggregate::Interpolation => self.interpolation,
            Aggregate::StepInterpolation => self.step_interpolation,
            Aggregate::TotalVariation => self.total_variation,
            Aggregate::ContinuousVariance => self.continuous_variance,
            Aggregate::DiscreteVariance => self.discrete_variance,
        }
    }

    /// Timestamp as calendar time
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        ms_to_datetime(self.timestamp)
    }
}

/// Datapoints of one time series (or one synthetic expression).
///
/// Also serves as the accumulator a fetch grows page by page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Datapoints {
    /// Internal id of the series
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// External id of the series
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// Whether the series holds string values
    #[serde(default)]
    pub is_string: bool,
    /// Whether the series is a step function
    #[serde(default)]
    pub is_step: bool,
    /// Unit of the values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Synthetic expression these points were computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Points in timestamp order
    #[serde(default)]
    pub datapoints: Vec<Datapoint>,
}

impl Datapoints {
    /// Empty accumulator for a series
    pub fn new(identifier: &Identifier) -> Self {
        Self {
            id: identifier.as_id(),
            external_id: identifier.as_external_id().map(str::to_string),
            ..Default::default()
        }
    }

    /// Parse one `items[]` element of a datapoints response
    pub fn load(raw: Value) -> Result<Self> {
        Ok(serde_json::from_value(raw)?)
    }

    /// Append another page; metadata missing here is taken from `other`
    pub fn extend(&mut self, other: Datapoints) {
        if self.id.is_none() {
            self.id = other.id;
        }
        if self.external_id.is_none() {
            self.external_id = other.external_id;
        }
        if self.unit.is_none() {
            self.unit = other.unit;
        }
        self.is_string |= other.is_string;
        self.is_step |= other.is_step;
        self.datapoints.extend(other.datapoints);
    }

    /// Get the number of datapoints
    pub fn len(&self) -> usize {
        self.datapoints.len()
    }

    /// Check if there are no datapoints
    pub fn is_empty(&self) -> bool {
        self.datapoints.is_empty()
    }

    /// All timestamps
    pub fn timestamps(&self) -> Vec<i64> {
        self.datapoints.iter().map(|dp| dp.timestamp).collect()
    }

    /// Numeric values, `None` where a point has no numeric value
    pub fn values(&self) -> Vec<Option<f64>> {
        self.datapoints
            .iter()
            .map(|dp| dp.value.as_ref().and_then(DatapointValue::as_f64))
            .collect()
    }

    /// One aggregate column
    pub fn aggregate(&self, aggregate: Aggregate) -> Vec<Option<f64>> {
        self.datapoints.iter().map(|dp| dp.aggregate(aggregate)).collect()
    }

    /// Timestamp of the first point
    pub fn start_time(&self) -> Option<i64> {
        self.datapoints.first().map(|dp| dp.timestamp)
    }

    /// Timestamp of the last point
    pub fn end_time(&self) -> Option<i64> {
        self.datapoints.last().map(|dp| dp.timestamp)
    }
}

impl fmt::Display for Datapoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.id, &self.external_id, &self.expression) {
            (Some(id), _, _) => write!(f, "Datapoints(id={}, length={})", id, self.len()),
            (None, Some(xid), _) => write!(f, "Datapoints(external_id={}, length={})", xid, self.len()),
            (None, None, Some(expr)) => write!(f, "Datapoints(expression={}, length={})", expr, self.len()),
            (None, None, None) => write!(f, "Datapoints(length={})", self.len()),
        }
    }
}

/// Ordered datapoints of several series
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatapointsList(Vec<Datapoints>);

impl DatapointsList {
    /// Wrap already ordered results
    pub fn new(items: Vec<Datapoints>) -> Self {
        Self(items)
    }

    /// First series with the given internal id
    pub fn get_by_id(&self, id: i64) -> Option<&Datapoints> {
        self.0.iter().find(|dps| dps.id == Some(id))
    }

    /// First series with the given external id
    pub fn get_by_external_id(&self, external_id: &str) -> Option<&Datapoints> {
        self.0
            .iter()
            .find(|dps| dps.external_id.as_deref() == Some(external_id))
    }

    /// Number of series
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the list is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in request order
    pub fn iter(&self) -> std::slice::Iter<'_, Datapoints> {
        self.0.iter()
    }

    /// Unwrap into the underlying vector
    pub fn into_inner(self) -> Vec<Datapoints> {
        self.0
    }
}

impl Index<usize> for DatapointsList {
    type Output = Datapoints;

    fn index(&self, index: usize) -> &Datapoints {
        &self.0[index]
    }
}

impl IntoIterator for DatapointsList {
    type Item = Datapoints;
    type IntoIter = std::vec::IntoIter<Datapoints>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a DatapointsList {
    type Item = &'a Datapoints;
    type IntoIter = std::slice::Iter<'a, Datapoints>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// A retrieval result shaped like the request
#[derive(Debug, Clone, PartialEq)]
pub enum DatapointsResult {
    /// The request named one series without a list; `None` if it was missing
    Single(Option<Datapoints>),
    /// The request was list-shaped; missing series are left out
    List(DatapointsList),
}

impl DatapointsResult {
    /// The single result, `None` for list-shaped or missing results
    pub fn into_single(self) -> Option<Datapoints> {
        match self {
            DatapointsResult::Single(dps) => dps,
            DatapointsResult::List(_) => None,
        }
    }

    /// Every result as a list, whatever the shape
    pub fn into_list(self) -> DatapointsList {
        match self {
            DatapointsResult::Single(dps) => DatapointsList(dps.into_iter().collect()),
            DatapointsResult::List(list) => list,
        }
    }
}

/// Shape per-query results, given in request order, like the request was shaped.
///
/// `None` entries are series reported missing.
pub fn assemble(results: Vec<Option<Datapoints>>, single: bool) -> DatapointsResult {
    if single {
        DatapointsResult::Single(results.into_iter().next().flatten())
    } else {
        DatapointsResult::List(DatapointsList(results.into_iter().flatten().collect()))
    }
}
