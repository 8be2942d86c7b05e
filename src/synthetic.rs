//! Synthetic time series: server-side expressions over other series.
//!
//! An expression such as `"A + 2 * B"` is sent with its variables replaced by
//! series references (`ts{externalId:'A'}`) and paginated like a raw query.

use crate::datapoints::{Datapoints, DatapointsList};
use crate::dispatch::ConcurrentDispatcher;
use crate::error::{Error, ErrorKind, Result};
use crate::fetcher::{first_item, PageCursor, Transport};
use crate::time::{timestamp_to_ms, Granularity, Timestamp};
use crate::types::{Aggregate, Identifier, LimitInput, TimeWindow};
use regex::{NoExpand, Regex};
use serde_json::json;
use std::collections::BTreeMap;

/// Path of the synthetic query endpoint
pub const SYNTHETIC_QUERY_PATH: &str = "/timeseries/synthetic/query";

/// A synthetic expression to evaluate over a time window
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticQuery {
    expression: String,
    start: Timestamp,
    end: Timestamp,
    limit: LimitInput,
    variables: BTreeMap<String, Identifier>,
    aggregate: Option<String>,
    granularity: Option<String>,
}

impl SyntheticQuery {
    /// Query `expression` over `[start, end)` with no limit
    pub fn new<E, S, T>(expression: E, start: S, end: T) -> Self
    where
        E: Into<String>,
        S: Into<Timestamp>,
        T: Into<Timestamp>,
    {
        Self {
            expression: expression.into(),
            start: start.into(),
            end: end.into(),
            limit: LimitInput::Unbounded,
            variables: BTreeMap::new(),
            aggregate: None,
            granularity: None,
        }
    }

    /// Cap the number of returned points
    pub fn with_limit<L: Into<LimitInput>>(mut self, limit: L) -> Self {
        self.limit = limit.into();
        self
    }

    /// Bind a variable name in the expression to a series
    pub fn with_variable<S: Into<String>>(mut self, name: S, series: Identifier) -> Self {
        self.variables.insert(name.into(), series);
        self
    }

    /// Read every bound series through an aggregate
    pub fn with_aggregate<S: Into<String>>(mut self, aggregate: S) -> Self {
        self.aggregate = Some(aggregate.into());
        self
    }

    /// Granularity for the aggregate
    pub fn with_granularity<S: Into<String>>(mut self, granularity: S) -> Self {
        self.granularity = Some(granularity.into());
        self
    }

    /// Expression as given
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Validate the query and build the expression sent to the server
    pub fn resolve(&self) -> Result<ResolvedSynthetic> {
        let window = TimeWindow::new(timestamp_to_ms(&self.start)?, timestamp_to_ms(&self.end)?)?;
        let limit = self.limit.normalize()?;

        let suffix = match (&self.aggregate, &self.granularity) {
            (None, None) => String::new(),
            (Some(_), None) => return Err(ErrorKind::MissingGranularity.into()),
            (None, Some(_)) => return Err(ErrorKind::MissingAggregates.into()),
            (Some(aggregate), Some(granularity)) => {
                let aggregate: Aggregate = aggregate.parse()?;
                let granularity = Granularity::parse(granularity)?;
                format!(",aggregate:'{}',granularity:'{}'", aggregate, granularity)
            }
        };

        let mut expression = self.expression.clone();
        for (name, series) in &self.variables {
            let reference = match series {
                Identifier::Id(id) => format!("ts{{id:{}{}}}", id, suffix),
                Identifier::ExternalId(xid) => format!("ts{{externalId:'{}'{}}}", xid, suffix),
            };
            let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(name))).map_err(|e| {
                Error::validation(e.to_string(), Some("variables".to_string()), Some(name.clone()))
            })?;
            expression = pattern.replace_all(&expression, NoExpand(&reference)).into_owned();
        }

        Ok(ResolvedSynthetic {
            expression,
            window,
            limit,
        })
    }
}

/// A synthetic query ready to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSynthetic {
    /// Expression with variables replaced by series references
    pub expression: String,
    /// Query window
    pub window: TimeWindow,
    /// Point cap, `None` when unbounded
    pub limit: Option<u64>,
}

impl ResolvedSynthetic {
    /// Fetch every page of this expression
    pub async fn fetch(&self, transport: &dyn Transport) -> Result<Datapoints> {
        let mut cursor = PageCursor::new(
            self.window.start,
            self.window.end,
            self.limit,
            crate::defaults::SYNTHETIC_LIMIT,
            1,
        );
        let mut accumulator = Datapoints {
            expression: Some(self.expression.clone()),
            ..Default::default()
        };

        while let Some(request) = cursor.next_request() {
            let body = json!({
                "items": [{
                    "expression": self.expression,
                    "start": request.start,
                    "end": self.window.end,
                    "limit": request.limit,
                }]
            });
            log::debug!("Querying `{}` from {} (limit {})", self.expression, request.start, request.limit);
            let response = transport.post(SYNTHETIC_QUERY_PATH, &body).await?;
            let item = first_item(response)?
                .ok_or_else(|| Error::serialization("synthetic query response contained no items"))?;

            let mut page = Datapoints::load(item)?;
            page.datapoints.truncate(request.limit as usize);
            cursor.record_page(page.len() as u64, page.end_time());
            accumulator.extend(page);
        }
        Ok(accumulator)
    }
}

/// Synthetic query operations bound to a transport
pub struct SyntheticApi<'a> {
    transport: &'a dyn Transport,
    dispatcher: ConcurrentDispatcher,
}

impl<'a> SyntheticApi<'a> {
    /// Bind to a transport and a dispatcher
    pub fn new(transport: &'a dyn Transport, dispatcher: ConcurrentDispatcher) -> Self {
        Self { transport, dispatcher }
    }

    /// Evaluate several expressions concurrently, results in input order
    pub async fn query(&self, queries: &[SyntheticQuery]) -> Result<DatapointsList> {
        let resolved = queries
            .iter()
            .map(SyntheticQuery::resolve)
            .collect::<Result<Vec<_>>>()?;
        log::info!("Running {} synthetic queries", resolved.len());

        let transport = self.transport;
        let results = self
            .dispatcher
            .run(resolved.iter().map(|query| query.fetch(transport)))
            .await?;
        Ok(DatapointsList::new(results))
    }

    /// Evaluate one expression
    pub async fn query_single(&self, query: &SyntheticQuery) -> Result<Datapoints> {
        query.resolve()?.fetch(self.transport).await
    }
}
