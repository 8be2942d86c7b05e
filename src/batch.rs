//! Normalization of heterogeneous identifier input into a batch of queries.

use crate::error::{Error, ErrorKind, Result};
use crate::query::{both_spellings, QueryParams, QuerySpec};
use crate::time::json_type_name;
use crate::types::Identifier;
use serde_json::Value;
use std::sync::Arc;

/// A scalar that can identify a time series: `i64` ids or `String` external ids.
pub trait IdentifierValue: Sized {
    /// Argument name, also the required key of a per-series dict
    const ARGUMENT: &'static str;
    /// Alternate (camelCase) spelling of the required key
    const ALT_ARGUMENT: &'static str;
    /// Description of the accepted type for error messages
    const EXPECTED: &'static str;

    /// Wrap into an [`Identifier`]
    fn into_identifier(self) -> Identifier;

    /// Read the scalar from JSON, `None` on a type mismatch
    fn from_json(value: &Value) -> Option<Self>;
}

impl IdentifierValue for i64 {
    const ARGUMENT: &'static str = "id";
    const ALT_ARGUMENT: &'static str = "id";
    const EXPECTED: &'static str = "an integer";

    fn into_identifier(self) -> Identifier {
        Identifier::Id(self)
    }

    fn from_json(value: &Value) -> Option<Self> {
        value.as_i64()
    }
}

impl IdentifierValue for String {
    const ARGUMENT: &'static str = "external_id";
    const ALT_ARGUMENT: &'static str = "externalId";
    const EXPECTED: &'static str = "a string";

    fn into_identifier(self) -> Identifier {
        Identifier::ExternalId(self)
    }

    fn from_json(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

/// One requested time series, optionally with its own settings.
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesRef<T> {
    /// Identifier only; batch defaults apply
    Plain(T),
    /// Identifier plus overrides taking precedence over the batch defaults
    WithParams(T, QueryParams),
}

impl<T: IdentifierValue> SeriesRef<T> {
    /// Read a scalar or a per-series dict
    pub fn from_json(value: &Value) -> Result<Self> {
        if let Value::Object(map) = value {
            if T::ARGUMENT != T::ALT_ARGUMENT
                && map.contains_key(T::ARGUMENT)
                && map.contains_key(T::ALT_ARGUMENT)
            {
                return Err(both_spellings(T::ARGUMENT));
            }
            let raw_id = match map.get(T::ARGUMENT) {
                Some(raw_id) => raw_id,
                None => map.get(T::ALT_ARGUMENT).ok_or_else(|| {
                    Error::missing_identifier(format!(
                        "Missing required key `{}` in dict: {}",
                        T::ARGUMENT,
                        value
                    ))
                })?,
            };
            let id = T::from_json(raw_id).ok_or_else(|| {
                Error::wrong_type(T::ARGUMENT, T::EXPECTED, json_type_name(raw_id))
            })?;
            let id_key = if map.contains_key(T::ARGUMENT) {
                T::ARGUMENT
            } else {
                T::ALT_ARGUMENT
            };
            let params = QueryParams::from_json_map(map, T::ARGUMENT, &[id_key])?;
            return Ok(SeriesRef::WithParams(id, params));
        }
        T::from_json(value)
            .map(SeriesRef::Plain)
            .ok_or_else(|| wrong_identifier_type::<T>(value))
    }

    fn into_query(self, defaults: &QueryParams) -> Result<QuerySpec> {
        match self {
            SeriesRef::Plain(id) => QuerySpec::new(id.into_identifier(), defaults),
            SeriesRef::WithParams(id, overrides) => {
                QuerySpec::new(id.into_identifier(), &overrides.merged_onto(defaults))
            }
        }
    }
}

impl<T> From<T> for SeriesRef<T> {
    fn from(id: T) -> Self {
        SeriesRef::Plain(id)
    }
}

/// Every accepted input shape for one identifier kind.
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesInput<T> {
    /// A single series; the result is a single object
    Single(SeriesRef<T>),
    /// A list of series; the result is a list, even with one element
    List(Vec<SeriesRef<T>>),
}

impl<T: IdentifierValue> SeriesInput<T> {
    /// Read a scalar, a dict, or a list of scalars and dicts
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Array(items) => items
                .iter()
                .map(SeriesRef::from_json)
                .collect::<Result<Vec<_>>>()
                .map(SeriesInput::List),
            other => SeriesRef::from_json(other).map(SeriesInput::Single),
        }
    }

    fn is_single(&self) -> bool {
        matches!(self, SeriesInput::Single(_))
    }

    fn into_refs(self) -> Vec<SeriesRef<T>> {
        match self {
            SeriesInput::Single(item) => vec![item],
            SeriesInput::List(items) => items,
        }
    }
}

impl From<i64> for SeriesInput<i64> {
    fn from(id: i64) -> Self {
        SeriesInput::Single(SeriesRef::Plain(id))
    }
}

impl From<Vec<i64>> for SeriesInput<i64> {
    fn from(ids: Vec<i64>) -> Self {
        SeriesInput::List(ids.into_iter().map(SeriesRef::Plain).collect())
    }
}

impl From<&str> for SeriesInput<String> {
    fn from(xid: &str) -> Self {
        SeriesInput::Single(SeriesRef::Plain(xid.to_string()))
    }
}

impl From<String> for SeriesInput<String> {
    fn from(xid: String) -> Self {
        SeriesInput::Single(SeriesRef::Plain(xid))
    }
}

impl From<Vec<&str>> for SeriesInput<String> {
    fn from(xids: Vec<&str>) -> Self {
        SeriesInput::List(xids.into_iter().map(|x| SeriesRef::Plain(x.to_string())).collect())
    }
}

impl From<Vec<String>> for SeriesInput<String> {
    fn from(xids: Vec<String>) -> Self {
        SeriesInput::List(xids.into_iter().map(SeriesRef::Plain).collect())
    }
}

impl<T> From<SeriesRef<T>> for SeriesInput<T> {
    fn from(item: SeriesRef<T>) -> Self {
        SeriesInput::Single(item)
    }
}

impl<T> From<Vec<SeriesRef<T>>> for SeriesInput<T> {
    fn from(items: Vec<SeriesRef<T>>) -> Self {
        SeriesInput::List(items)
    }
}

fn wrong_identifier_type<T: IdentifierValue>(value: &Value) -> Error {
    Error::wrong_type(
        T::ARGUMENT,
        format!("{} or a dict, or a list of these", T::EXPECTED),
        json_type_name(value),
    )
}

/// An ordered batch of validated queries, split into raw and aggregate queues.
#[derive(Debug)]
pub struct QueryBatch {
    queries: Vec<Arc<QuerySpec>>,
    raw: Vec<Arc<QuerySpec>>,
    agg: Vec<Arc<QuerySpec>>,
    raw_positions: Vec<usize>,
    agg_positions: Vec<usize>,
    is_single: bool,
}

impl QueryBatch {
    /// Validate every requested series against the batch `defaults`.
    ///
    /// Ids come before external ids in the resulting order.
    pub fn new(
        ids: Option<SeriesInput<i64>>,
        external_ids: Option<SeriesInput<String>>,
        defaults: &QueryParams,
    ) -> Result<Self> {
        let is_single = match (&ids, &external_ids) {
            (Some(ids), None) => ids.is_single(),
            (None, Some(xids)) => xids.is_single(),
            _ => false,
        };

        let mut queries = Vec::new();
        if let Some(ids) = ids {
            for item in ids.into_refs() {
                queries.push(Arc::new(item.into_query(defaults)?));
            }
        }
        if let Some(xids) = external_ids {
            for item in xids.into_refs() {
                queries.push(Arc::new(item.into_query(defaults)?));
            }
        }
        if queries.is_empty() {
            return Err(ErrorKind::EmptyBatch.into());
        }

        let (agg_positions, raw_positions): (Vec<usize>, Vec<usize>) =
            (0..queries.len()).partition(|&i| queries[i].is_aggregate());
        let raw = raw_positions.iter().map(|&i| Arc::clone(&queries[i])).collect();
        let agg = agg_positions.iter().map(|&i| Arc::clone(&queries[i])).collect();

        log::debug!(
            "Validated {} datapoints queries ({} raw, {} aggregate)",
            queries.len(),
            raw_positions.len(),
            agg_positions.len()
        );

        Ok(Self {
            queries,
            raw,
            agg,
            raw_positions,
            agg_positions,
            is_single,
        })
    }

    /// Build a batch from JSON-shaped `id` / `external_id` arguments
    pub fn from_json(
        ids: Option<&Value>,
        external_ids: Option<&Value>,
        defaults: &QueryParams,
    ) -> Result<Self> {
        let ids = ids
            .filter(|v| !v.is_null())
            .map(SeriesInput::<i64>::from_json)
            .transpose()?;
        let external_ids = external_ids
            .filter(|v| !v.is_null())
            .map(SeriesInput::<String>::from_json)
            .transpose()?;
        Self::new(ids, external_ids, defaults)
    }

    /// All queries in request order
    pub fn queries(&self) -> &[Arc<QuerySpec>] {
        &self.queries
    }

    /// Queries without aggregates
    pub fn raw_queries(&self) -> &[Arc<QuerySpec>] {
        &self.raw
    }

    /// Queries with aggregates
    pub fn agg_queries(&self) -> &[Arc<QuerySpec>] {
        &self.agg
    }

    /// Request-order position of each raw query
    pub fn raw_positions(&self) -> &[usize] {
        &self.raw_positions
    }

    /// Request-order position of each aggregate query
    pub fn agg_positions(&self) -> &[usize] {
        &self.agg_positions
    }

    /// Whether the caller asked for exactly one series without a list
    pub fn is_single(&self) -> bool {
        self.is_single
    }

    /// Number of queries
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    /// Always false, an empty batch fails to construct
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}
