//! Validated single time series queries.
//!
//! A [`QuerySpec`] is built from an [`Identifier`] and a [`QueryParams`]
//! record, which is the batch defaults merged with any per-series overrides.
//! All validation happens in [`QuerySpec::new`], before any request is sent.

use crate::defaults::{DPS_LIMIT, DPS_LIMIT_AGG};
use crate::error::{Error, ErrorKind, Result};
use crate::time::{align_window, json_type_name, timestamp_to_ms, Granularity, Timestamp};
use crate::types::{Aggregate, Identifier, LimitInput, TimeWindow};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::OnceLock;

/// Optional query settings.
///
/// Used both for the defaults of a whole batch and for the overrides of a
/// single series. Unset fields fall back to the defaults when merged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    /// Inclusive start, defaults to epoch
    pub start: Option<Timestamp>,
    /// Exclusive end, defaults to `"now"`
    pub end: Option<Timestamp>,
    /// Aggregate names, camelCase or snake_case
    pub aggregates: Option<Vec<String>>,
    /// Bucket width such as `"1h"`
    pub granularity: Option<String>,
    /// Maximum number of datapoints
    pub limit: Option<LimitInput>,
    /// Also return the closest points outside the window
    pub include_outside_points: Option<bool>,
    /// Report unknown series as missing instead of failing
    pub ignore_unknown_ids: Option<bool>,
}

/// Keys a per-series dict may carry besides its identifier, snake_case first
pub(crate) const OPTIONAL_KEYS: [(&str, &str); 7] = [
    ("start", "start"),
    ("end", "end"),
    ("aggregates", "aggregates"),
    ("granularity", "granularity"),
    ("limit", "limit"),
    ("include_outside_points", "includeOutsidePoints"),
    ("ignore_unknown_ids", "ignoreUnknownIds"),
];

impl QueryParams {
    /// Empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the start
    pub fn with_start<T: Into<Timestamp>>(mut self, start: T) -> Self {
        self.start = Some(start.into());
        self
    }

    /// Set the end
    pub fn with_end<T: Into<Timestamp>>(mut self, end: T) -> Self {
        self.end = Some(end.into());
        self
    }

    /// Set the aggregates
    pub fn with_aggregates<I, S>(mut self, aggregates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aggregates = Some(aggregates.into_iter().map(Into::into).collect());
        self
    }

    /// Set the granularity
    pub fn with_granularity<S: Into<String>>(mut self, granularity: S) -> Self {
        self.granularity = Some(granularity.into());
        self
    }

    /// Set the limit
    pub fn with_limit<L: Into<LimitInput>>(mut self, limit: L) -> Self {
        self.limit = Some(limit.into());
        self
    }

    /// Set whether outside points are included
    pub fn with_include_outside_points(mut self, include: bool) -> Self {
        self.include_outside_points = Some(include);
        self
    }

    /// Set whether unknown ids are ignored
    pub fn with_ignore_unknown_ids(mut self, ignore: bool) -> Self {
        self.ignore_unknown_ids = Some(ignore);
        self
    }

    /// Fill every unset field from `defaults`; fields set here win
    pub fn merged_onto(&self, defaults: &QueryParams) -> QueryParams {
        QueryParams {
            start: self.start.clone().or_else(|| defaults.start.clone()),
            end: self.end.clone().or_else(|| defaults.end.clone()),
            aggregates: self.aggregates.clone().or_else(|| defaults.aggregates.clone()),
            granularity: self.granularity.clone().or_else(|| defaults.granularity.clone()),
            limit: self.limit.or(defaults.limit),
            include_outside_points: self.include_outside_points.or(defaults.include_outside_points),
            ignore_unknown_ids: self.ignore_unknown_ids.or(defaults.ignore_unknown_ids),
        }
    }

    /// Parse the optional keys of a user dict, collecting every key not understood.
    ///
    /// Keys listed in `skip` (the identifier keys) are ignored here. A `null`
    /// value leaves the field unset, except for `limit` where it means unbounded.
    pub(crate) fn from_json_map(map: &Map<String, Value>, argument: &str, skip: &[&str]) -> Result<Self> {
        let mut params = QueryParams::default();
        let mut bad_keys = Vec::new();
        let mut seen: Vec<&str> = Vec::new();

        for (key, value) in map {
            if skip.contains(&key.as_str()) {
                continue;
            }
            let Some(&(field, _)) = OPTIONAL_KEYS
                .iter()
                .find(|(snake, camel)| key == snake || key == camel)
            else {
                bad_keys.push(key.clone());
                continue;
            };
            if seen.contains(&field) {
                return Err(both_spellings(field));
            }
            seen.push(field);
            params.set_from_json(field, value)?;
        }

        if !bad_keys.is_empty() {
            bad_keys.sort();
            return Err(Error::unknown_key(argument, bad_keys, allowed_keys()));
        }
        Ok(params)
    }

    fn set_from_json(&mut self, field: &str, value: &Value) -> Result<()> {
        if value.is_null() && field != "limit" {
            return Ok(());
        }
        match field {
            "start" => self.start = Some(Timestamp::from_json(field, value)?),
            "end" => self.end = Some(Timestamp::from_json(field, value)?),
            "aggregates" => self.aggregates = Some(aggregates_from_json(value)?),
            "granularity" => {
                let granularity = value
                    .as_str()
                    .ok_or_else(|| Error::wrong_type(field, "a string", json_type_name(value)))?;
                self.granularity = Some(granularity.to_string());
            }
            "limit" => self.limit = Some(LimitInput::from_json(value)?),
            "include_outside_points" => self.include_outside_points = Some(bool_from_json(field, value)?),
            "ignore_unknown_ids" => self.ignore_unknown_ids = Some(bool_from_json(field, value)?),
            _ => return Err(Error::internal(format!("unhandled query key `{}`", field))),
        }
        Ok(())
    }
}

/// A dict carried the same field in snake_case and camelCase
pub(crate) fn both_spellings(field: &str) -> Error {
    Error::validation(
        format!("Key `{}` was given in both snake_case and camelCase", field),
        Some(field.to_string()),
        None,
    )
}

pub(crate) fn allowed_keys() -> Vec<String> {
    let mut keys: Vec<String> = OPTIONAL_KEYS
        .iter()
        .flat_map(|(snake, camel)| [snake.to_string(), camel.to_string()])
        .collect();
    keys.sort();
    keys.dedup();
    keys
}

fn aggregates_from_json(value: &Value) -> Result<Vec<String>> {
    match value {
        Value::String(single) => Ok(vec![single.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| Error::wrong_type("aggregates", "a list of strings", json_type_name(item)))
            })
            .collect(),
        other => Err(Error::wrong_type("aggregates", "a string or a list of strings", json_type_name(other))),
    }
}

fn bool_from_json(field: &str, value: &Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| Error::wrong_type(field, "a bool", json_type_name(value)))
}

/// One camelCase item of a datapoints request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestItem<'a> {
    #[serde(flatten)]
    identifier: &'a Identifier,
    start: i64,
    end: i64,
    limit: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    aggregates: Option<&'a [Aggregate]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    granularity: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    include_outside_points: bool,
}

/// A fully resolved, validated query for one time series.
#[derive(Debug)]
pub struct QuerySpec {
    identifier: Identifier,
    window: TimeWindow,
    aggregates: Option<Vec<Aggregate>>,
    granularity: Option<Granularity>,
    limit: Option<u64>,
    include_outside_points: bool,
    ignore_unknown_ids: bool,
    is_string: OnceLock<bool>,
    is_missing: OnceLock<bool>,
}

impl QuerySpec {
    /// Validate `params` for `identifier` and build the query
    pub fn new(identifier: Identifier, params: &QueryParams) -> Result<Self> {
        let start = timestamp_to_ms(params.start.as_ref().unwrap_or(&Timestamp::Millis(0)))?;
        let end = match &params.end {
            Some(end) => timestamp_to_ms(end)?,
            None => timestamp_to_ms(&Timestamp::from("now"))?,
        };
        let window = TimeWindow::new(start, end)?;

        let limit = params.limit.unwrap_or(LimitInput::Unbounded).normalize()?;
        let include_outside_points = params.include_outside_points.unwrap_or(false);
        let is_aggregate = params.aggregates.is_some();

        if include_outside_points && is_aggregate {
            return Err(Error::unsupported_combination(
                "'include_outside_points' is not supported for aggregates",
            ));
        }

        let (aggregates, granularity) = match (&params.aggregates, &params.granularity) {
            (None, None) => (None, None),
            (None, Some(_)) => return Err(ErrorKind::MissingAggregates.into()),
            (Some(_), None) => return Err(ErrorKind::MissingGranularity.into()),
            (Some(names), Some(granularity)) => {
                if names.is_empty() {
                    return Err(Error::validation(
                        "`aggregates` must be a non-empty list",
                        Some("aggregates".to_string()),
                        None,
                    ));
                }
                let mut aggregates = names
                    .iter()
                    .map(|name| name.parse::<Aggregate>())
                    .collect::<Result<Vec<_>>>()?;
                let mut seen = HashSet::new();
                aggregates.retain(|aggregate| seen.insert(*aggregate));
                (Some(aggregates), Some(Granularity::parse(granularity)?))
            }
        };

        if include_outside_points {
            if let Some(limit) = limit {
                log::warn!(
                    "{}: using include_outside_points with limit={} may leave a large gap between the \
                     last inside point and the outside point after; the up-to-two outside points come \
                     in addition to the limit, so up to {} points may be returned",
                    identifier,
                    limit,
                    limit + 2
                );
            }
        }

        let window = match &granularity {
            Some(granularity) => {
                let (start, end) = align_window(window.start, window.end, granularity)?;
                TimeWindow::new(start, end)?
            }
            None => window,
        };

        Ok(Self {
            identifier,
            window,
            aggregates,
            granularity,
            limit,
            include_outside_points,
            ignore_unknown_ids: params.ignore_unknown_ids.unwrap_or(false),
            is_string: OnceLock::new(),
            is_missing: OnceLock::new(),
        })
    }

    /// Build a query from a dict such as the one [`dump`](Self::dump) produces.
    ///
    /// Exactly one of `id` or `external_id` (`externalId`) must be present.
    pub fn from_json(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| Error::wrong_type("query", "a dict", json_type_name(value)))?;
        if map.contains_key("external_id") && map.contains_key("externalId") {
            return Err(both_spellings("external_id"));
        }
        let id = map.get("id");
        let xid = map.get("external_id").or_else(|| map.get("externalId"));
        let identifier = match (id, xid) {
            (Some(id), None) => Identifier::Id(
                id.as_i64()
                    .ok_or_else(|| Error::wrong_type("id", "an integer", json_type_name(id)))?,
            ),
            (None, Some(xid)) => Identifier::ExternalId(
                xid.as_str()
                    .ok_or_else(|| Error::wrong_type("external_id", "a string", json_type_name(xid)))?
                    .to_string(),
            ),
            (None, None) => {
                return Err(Error::missing_identifier(
                    "exactly one of `id` or `external_id` is required",
                ))
            }
            (Some(_), Some(_)) => {
                return Err(Error::missing_identifier(
                    "exactly one of `id` or `external_id` is allowed, got both",
                ))
            }
        };
        let argument = match identifier {
            Identifier::Id(_) => "id",
            Identifier::ExternalId(_) => "external_id",
        };
        let params = QueryParams::from_json_map(map, argument, &["id", "external_id", "externalId"])?;
        Self::new(identifier, &params)
    }

    /// The resolved query as a snake_case dict, accepted back by [`from_json`](Self::from_json)
    pub fn dump(&self) -> Value {
        let mut map = Map::new();
        match &self.identifier {
            Identifier::Id(id) => map.insert("id".into(), Value::from(*id)),
            Identifier::ExternalId(xid) => map.insert("external_id".into(), Value::from(xid.as_str())),
        };
        map.insert("start".into(), Value::from(self.window.start));
        map.insert("end".into(), Value::from(self.window.end));
        if let (Some(aggregates), Some(granularity)) = (&self.aggregates, &self.granularity) {
            map.insert(
                "aggregates".into(),
                aggregates.iter().map(|agg| Value::from(agg.as_str())).collect(),
            );
            map.insert("granularity".into(), Value::from(granularity.to_string()));
        }
        map.insert("limit".into(), self.limit.map_or(Value::Null, Value::from));
        map.insert("include_outside_points".into(), Value::from(self.include_outside_points));
        map.insert("ignore_unknown_ids".into(), Value::from(self.ignore_unknown_ids));
        Value::Object(map)
    }

    /// The camelCase wire item for one page starting at `start` asking for `limit` points
    pub fn to_payload(&self, start: i64, limit: u64) -> Value {
        let item = RequestItem {
            identifier: &self.identifier,
            start,
            end: self.window.end,
            limit,
            aggregates: self.aggregates.as_deref(),
            granularity: self.granularity.map(|g| g.to_string()),
            include_outside_points: self.include_outside_points,
        };
        serde_json::to_value(item).unwrap_or(Value::Null)
    }

    /// Which series this query reads
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// The validated (and for aggregates, aligned) window
    pub fn window(&self) -> TimeWindow {
        self.window
    }

    /// Requested aggregates, `None` for raw queries
    pub fn aggregates(&self) -> Option<&[Aggregate]> {
        self.aggregates.as_deref()
    }

    /// Requested granularity, `None` for raw queries
    pub fn granularity(&self) -> Option<&Granularity> {
        self.granularity.as_ref()
    }

    /// Caller limit, `None` when unbounded
    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Whether outside points were requested
    pub fn include_outside_points(&self) -> bool {
        self.include_outside_points
    }

    /// Whether an unknown series should be reported missing instead of failing
    pub fn ignore_unknown_ids(&self) -> bool {
        self.ignore_unknown_ids
    }

    /// Whether this is an aggregate query
    pub fn is_aggregate(&self) -> bool {
        self.aggregates.is_some()
    }

    /// Largest number of points a single request may ask for
    pub fn max_query_limit(&self) -> u64 {
        if self.is_aggregate() {
            DPS_LIMIT_AGG
        } else {
            DPS_LIMIT
        }
    }

    /// Upper bound on the returned point count when outside points loosen a bounded limit
    pub fn fuzzy_limit(&self) -> Option<u64> {
        match (self.include_outside_points, self.limit) {
            (true, Some(limit)) => Some(limit + 2),
            _ => None,
        }
    }

    /// Whether the series holds strings; known after the first response
    pub fn is_string(&self) -> Result<bool> {
        self.is_string.get().copied().ok_or_else(|| Error::not_yet_known("is_string"))
    }

    /// Whether the series was missing; known after the first response
    pub fn is_missing(&self) -> Result<bool> {
        self.is_missing.get().copied().ok_or_else(|| Error::not_yet_known("is_missing"))
    }

    /// Record whether the series holds strings. Later writes are ignored.
    pub fn set_is_string(&self, is_string: bool) {
        let _ = self.is_string.set(is_string);
    }

    /// Record whether the series was missing. Later writes are ignored.
    pub fn set_is_missing(&self, is_missing: bool) {
        let _ = self.is_missing.set(is_missing);
    }
}

impl PartialEq for QuerySpec {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier
            && self.window == other.window
            && self.aggregates == other.aggregates
            && self.granularity == other.granularity
            && self.limit == other.limit
            && self.include_outside_points == other.include_outside_points
            && self.ignore_unknown_ids == other.ignore_unknown_ids
    }
}
