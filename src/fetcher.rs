//! Cursor-by-timestamp pagination of datapoints queries.
//!
//! The API caps how many points one request may return (10 000 for
//! aggregates, 100 000 for raw points). A [`PageCursor`] tracks the remaining
//! caller limit and moves the window start past the last point received;
//! [`PaginatingFetcher`] drives it against a [`Transport`] for one
//! [`QuerySpec`].

use crate::datapoints::{Datapoint, Datapoints};
use crate::error::{Error, Result};
use crate::query::QuerySpec;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Path of the datapoints retrieval endpoint
pub const DATAPOINTS_LIST_PATH: &str = "/timeseries/data/list";

/// The HTTP layer the query engine talks to.
///
/// Retries, authentication and timeouts belong to implementations; errors are
/// propagated unchanged through pagination and dispatch.
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST a JSON body to a path relative to the project and return the JSON response
    async fn post(&self, path: &str, body: &Value) -> Result<Value>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        (**self).post(path, body).await
    }
}

/// Where a paginated fetch currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    /// Nothing requested yet
    Start,
    /// A request is outstanding
    Fetching,
    /// The last page was full and more points may follow
    Continuing,
    /// No more requests will be made
    Done,
}

/// One page request produced by a [`PageCursor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Window start for this page
    pub start: i64,
    /// Number of points to ask for
    pub limit: u64,
}

/// Pagination bookkeeping for one query, independent of any transport.
#[derive(Debug, Clone)]
pub struct PageCursor {
    next_start: i64,
    end: i64,
    remaining: Option<u64>,
    per_request_cap: u64,
    step: i64,
    state: FetchState,
    requested: u64,
}

impl PageCursor {
    /// Cursor over `[start, end)` returning at most `limit` points in pages of at most `per_request_cap`.
    ///
    /// After a full page the next start is the last timestamp plus `step`.
    pub fn new(start: i64, end: i64, limit: Option<u64>, per_request_cap: u64, step: i64) -> Self {
        Self {
            next_start: start,
            end,
            remaining: limit,
            per_request_cap,
            step: step.max(1),
            state: FetchState::Start,
            requested: 0,
        }
    }

    /// Cursor for a datapoints query
    pub fn for_query(query: &QuerySpec) -> Self {
        let window = query.window();
        let step = query.granularity().map_or(1, |g| g.total_ms());
        Self::new(window.start, window.end, query.limit(), query.max_query_limit(), step)
    }

    /// Current state
    pub fn state(&self) -> FetchState {
        self.state
    }

    /// Points still allowed, `None` when unbounded
    pub fn remaining(&self) -> Option<u64> {
        self.remaining
    }

    /// The next request to issue, or `None` once done
    pub fn next_request(&mut self) -> Option<PageRequest> {
        match self.state {
            FetchState::Done | FetchState::Fetching => None,
            FetchState::Start | FetchState::Continuing => {
                let limit = self
                    .remaining
                    .map_or(self.per_request_cap, |r| r.min(self.per_request_cap));
                self.requested = limit;
                self.state = FetchState::Fetching;
                Some(PageRequest {
                    start: self.next_start,
                    limit,
                })
            }
        }
    }

    /// Record a page of `received` in-window points whose last timestamp is `last_timestamp`
    pub fn record_page(&mut self, received: u64, last_timestamp: Option<i64>) {
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(received);
        }
        let more_allowed = self.remaining.map_or(true, |r| r > 0);
        let page_full = received == self.requested;

        self.state = match last_timestamp {
            Some(last) if page_full && more_allowed && last.saturating_add(self.step) < self.end => {
                self.next_start = last + self.step;
                FetchState::Continuing
            }
            _ => FetchState::Done,
        };
    }
}

/// Fetches all pages of one query into a single accumulator.
pub struct PaginatingFetcher<'a> {
    transport: &'a dyn Transport,
    query: Arc<QuerySpec>,
}

impl<'a> PaginatingFetcher<'a> {
    /// Fetcher for `query` over `transport`
    pub fn new(transport: &'a dyn Transport, query: Arc<QuerySpec>) -> Self {
        Self { transport, query }
    }

    /// Run the query to completion.
    ///
    /// Returns `None` when the series does not exist and unknown ids are
    /// ignored. Any transport error aborts the whole query.
    pub async fn fetch(self) -> Result<Option<Datapoints>> {
        let query = self.query;
        let window = query.window();
        let mut cursor = PageCursor::for_query(&query);
        let mut accumulator = Datapoints::new(query.identifier());
        let mut before: Option<Datapoint> = None;
        let mut after: Option<Datapoint> = None;
        let mut pages = 0usize;

        while let Some(request) = cursor.next_request() {
            let body = json!({
                "items": [query.to_payload(request.start, request.limit)],
                "ignoreUnknownIds": query.ignore_unknown_ids(),
            });
            log::debug!(
                "Fetching page {} for {} from {} (limit {})",
                pages + 1,
                query.identifier(),
                request.start,
                request.limit
            );
            let response = self.transport.post(DATAPOINTS_LIST_PATH, &body).await?;

            let Some(item) = first_item(response)? else {
                if query.ignore_unknown_ids() {
                    log::debug!("{} does not exist, skipping", query.identifier());
                    query.set_is_missing(true);
                    return Ok(None);
                }
                return Err(Error::serialization(format!(
                    "response for {} contained no items",
                    query.identifier()
                )));
            };

            let mut page = Datapoints::load(item)?;
            if pages == 0 {
                query.set_is_missing(false);
                query.set_is_string(page.is_string);
            }
            pages += 1;

            let points = std::mem::take(&mut page.datapoints);
            let mut inside = Vec::with_capacity(points.len());
            for point in points {
                if point.timestamp < request.start {
                    // Only the first page's point before the window is new.
                    if pages == 1 && query.include_outside_points() {
                        before = Some(point);
                    }
                } else if point.timestamp >= window.end {
                    if query.include_outside_points() {
                        after = Some(point);
                    }
                } else {
                    inside.push(point);
                }
            }
            if inside.len() as u64 > request.limit {
                log::warn!(
                    "{} returned {} points for a limit of {}, truncating",
                    query.identifier(),
                    inside.len(),
                    request.limit
                );
                inside.truncate(request.limit as usize);
            }

            cursor.record_page(inside.len() as u64, inside.last().map(|dp| dp.timestamp));
            page.datapoints = inside;
            accumulator.extend(page);
        }

        if let Some(point) = before {
            accumulator.datapoints.insert(0, point);
        }
        if let Some(point) = after {
            accumulator.datapoints.push(point);
        }
        log::debug!(
            "Fetched {} points for {} in {} page(s)",
            accumulator.len(),
            query.identifier(),
            pages
        );
        Ok(Some(accumulator))
    }
}

/// Take `items[0]` out of a response, `None` if `items` is empty
pub(crate) fn first_item(response: Value) -> Result<Option<Value>> {
    match response {
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(items)) => Ok(items.into_iter().next()),
            _ => Err(Error::serialization("response is missing the `items` array")),
        },
        _ => Err(Error::serialization("response is not a JSON object")),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::query::QueryParams;
    use crate::types::Identifier;
    use assert_matches::assert_matches;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Serves datapoints of fixed series from memory, recording every request.
    pub(crate) struct ScriptedTransport {
        /// Timestamps available per series key (`id` or `externalId` string)
        series: Vec<(Value, Vec<i64>)>,
        /// The server never returns more than this many points per page
        page_size: usize,
        pub(crate) requests: Mutex<Vec<Value>>,
        failing: HashSet<String>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(page_size: usize) -> Self {
            Self {
                series: Vec::new(),
                page_size,
                requests: Mutex::new(Vec::new()),
                failing: HashSet::new(),
            }
        }

        pub(crate) fn with_series(mut self, identifier: Identifier, timestamps: Vec<i64>) -> Self {
            let key = serde_json::to_value(identifier).unwrap();
            self.series.push((key, timestamps));
            self
        }

        pub(crate) fn failing_for(mut self, identifier: Identifier) -> Self {
            self.failing.insert(identifier.to_string());
            self
        }

        pub(crate) fn request_items(&self) -> Vec<Value> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|body| body["items"][0].clone())
                .collect()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn post(&self, _path: &str, body: &Value) -> Result<Value> {
            self.requests.lock().unwrap().push(body.clone());
            let item = &body["items"][0];
            let found = self.series.iter().find(|(key, _)| {
                key.as_object()
                    .unwrap()
                    .iter()
                    .all(|(k, v)| item.get(k) == Some(v))
            });
            let Some((key, timestamps)) = found else {
                return Ok(json!({"items": []}));
            };
            let identifier: Identifier = serde_json::from_value(key.clone()).unwrap();
            if self.failing.contains(&identifier.to_string()) {
                return Err(Error::network(Some(500), Some("boom".into())));
            }

            let start = item["start"].as_i64().unwrap();
            let end = item["end"].as_i64().unwrap();
            let limit = item["limit"].as_u64().unwrap() as usize;
            let outside = item["includeOutsidePoints"].as_bool().unwrap_or(false);

            let mut points: Vec<Value> = timestamps
                .iter()
                .filter(|&&t| t >= start && t < end)
                .take(limit.min(self.page_size))
                .map(|&t| json!({"timestamp": t, "value": t as f64}))
                .collect();
            if outside {
                if let Some(&t) = timestamps.iter().rev().find(|&&t| t < start) {
                    points.insert(0, json!({"timestamp": t, "value": t as f64}));
                }
                if let Some(&t) = timestamps.iter().find(|&&t| t >= end) {
                    points.push(json!({"timestamp": t, "value": t as f64}));
                }
            }

            let mut response_item = key.as_object().unwrap().clone();
            response_item.insert("isString".into(), json!(false));
            response_item.insert("isStep".into(), json!(false));
            response_item.insert("datapoints".into(), Value::Array(points));
            Ok(json!({"items": [response_item]}))
        }
    }

    fn build_query(identifier: Identifier, params: QueryParams) -> Arc<QuerySpec> {
        Arc::new(QuerySpec::new(identifier, &params).unwrap())
    }

    #[test]
    fn test_cursor_single_page_when_limit_below_cap() {
        let mut cursor = PageCursor::new(0, 1_000, Some(50), 100, 1);
        assert_eq!(cursor.state(), FetchState::Start);
        assert_eq!(cursor.next_request(), Some(PageRequest { start: 0, limit: 50 }));
        assert_eq!(cursor.state(), FetchState::Fetching);
        assert_eq!(cursor.next_request(), None);
        cursor.record_page(50, Some(49));
        assert_eq!(cursor.state(), FetchState::Done);
        assert_eq!(cursor.remaining(), Some(0));
        assert_eq!(cursor.next_request(), None);
    }

    #[test]
    fn test_cursor_continues_after_full_page() {
        let mut cursor = PageCursor::new(0, 1_000, Some(250), 100, 1);
        assert_eq!(cursor.next_request(), Some(PageRequest { start: 0, limit: 100 }));
        cursor.record_page(100, Some(99));
        assert_eq!(cursor.state(), FetchState::Continuing);
        assert_eq!(cursor.next_request(), Some(PageRequest { start: 100, limit: 100 }));
        cursor.record_page(100, Some(199));
        assert_eq!(cursor.next_request(), Some(PageRequest { start: 200, limit: 50 }));
        cursor.record_page(50, Some(249));
        assert_eq!(cursor.state(), FetchState::Done);
    }

    #[test]
    fn test_cursor_stops_on_short_page_and_at_window_end() {
        let mut cursor = PageCursor::new(0, 1_000, None, 100, 1);
        cursor.next_request();
        cursor.record_page(99, Some(500));
        assert_eq!(cursor.state(), FetchState::Done);

        let mut cursor = PageCursor::new(0, 100, None, 100, 1);
        cursor.next_request();
        cursor.record_page(100, Some(99));
        assert_eq!(cursor.state(), FetchState::Done);
    }

    #[test]
    fn test_cursor_zero_limit_issues_one_request() {
        let mut cursor = PageCursor::new(0, 100, Some(0), 100, 1);
        assert_eq!(cursor.next_request(), Some(PageRequest { start: 0, limit: 0 }));
        cursor.record_page(0, None);
        assert_eq!(cursor.state(), FetchState::Done);
    }

    #[test]
    fn test_cursor_aggregate_step() {
        let mut cursor = PageCursor::new(0, 10_000_000, None, 2, 3_600_000);
        cursor.next_request();
        cursor.record_page(2, Some(3_600_000));
        assert_eq!(
            cursor.next_request(),
            Some(PageRequest { start: 7_200_000, limit: 2 })
        );
    }

    #[tokio::test]
    async fn test_raw_fetch_with_limit_below_page_size() {
        let transport = ScriptedTransport::new(100)
            .with_series(Identifier::Id(1), (0..500).map(|t| t * 1_000).collect());
        let query = build_query(
            Identifier::Id(1),
            QueryParams::new().with_start(0).with_end(1_000_000).with_limit(50),
        );

        let dps = PaginatingFetcher::new(&transport, query.clone())
            .fetch()
            .await
            .unwrap()
            .unwrap();

        assert_eq!(dps.len(), 50);
        assert_eq!(transport.requests.lock().unwrap().len(), 1);
        assert!(!query.is_missing().unwrap());
        assert!(!query.is_string().unwrap());
    }

    #[tokio::test]
    async fn test_pagination_returns_exactly_limit_without_overlap() {
        let timestamps: Vec<i64> = (0..500).map(|t| t * 10).collect();
        for limit in [1u64, 99, 100, 101, 250, 500] {
            let transport = ScriptedTransport::new(100).with_series(Identifier::Id(1), timestamps.clone());
            let query = Arc::new(QuerySpec::new(
                Identifier::Id(1),
                &QueryParams::new().with_start(0).with_end(1_000_000).with_limit(limit),
            ).unwrap());
            // Shrink the per-request cap to the server page size.
            let mut cursor = PageCursor::new(0, 1_000_000, Some(limit), 100, 1);
            let mut received = Vec::new();
            while let Some(request) = cursor.next_request() {
                let body = json!({"items": [query.to_payload(request.start, request.limit)]});
                let response = transport.post(DATAPOINTS_LIST_PATH, &body).await.unwrap();
                let page = Datapoints::load(first_item(response).unwrap().unwrap()).unwrap();
                cursor.record_page(page.len() as u64, page.end_time());
                received.extend(page.timestamps());
            }

            assert_eq!(received.len() as u64, limit);
            let unique: HashSet<_> = received.iter().collect();
            assert_eq!(unique.len(), received.len());

            // Timestamps are multiples of 10, so `start - 1` can only be the previous page's last point.
            for item in transport.request_items().iter().skip(1) {
                let start = item["start"].as_i64().unwrap();
                assert!(received.contains(&(start - 1)), "start {} does not follow a received point", start);
            }
        }
    }

    #[tokio::test]
    async fn test_unbounded_fetch_pages_through_full_series() {
        let timestamps: Vec<i64> = (0..250_000).collect();
        let transport = ScriptedTransport::new(100_000).with_series(Identifier::Id(2), timestamps);
        let query = build_query(Identifier::Id(2), QueryParams::new().with_start(0).with_end(1_000_000));

        let dps = PaginatingFetcher::new(&transport, query).fetch().await.unwrap().unwrap();

        assert_eq!(dps.len(), 250_000);
        let starts: Vec<i64> = transport
            .request_items()
            .iter()
            .map(|item| item["start"].as_i64().unwrap())
            .collect();
        assert_eq!(starts, vec![0, 100_000, 200_000]);
    }

    #[tokio::test]
    async fn test_bounded_raw_fetch_spans_several_pages() {
        let timestamps: Vec<i64> = (0..250_000).collect();
        let transport = ScriptedTransport::new(100_000).with_series(Identifier::Id(4), timestamps);
        let query = build_query(
            Identifier::Id(4),
            QueryParams::new().with_start(0).with_end(1_000_000).with_limit(230_000),
        );

        let dps = PaginatingFetcher::new(&transport, query).fetch().await.unwrap().unwrap();

        assert_eq!(dps.len(), 230_000);
        assert_eq!(dps.end_time(), Some(229_999));
        let unique: HashSet<i64> = dps.timestamps().into_iter().collect();
        assert_eq!(unique.len(), dps.len());

        let pages: Vec<(i64, u64)> = transport
            .request_items()
            .iter()
            .map(|item| (item["start"].as_i64().unwrap(), item["limit"].as_u64().unwrap()))
            .collect();
        assert_eq!(pages, vec![(0, 100_000), (100_000, 100_000), (200_000, 30_000)]);
    }

    #[tokio::test]
    async fn test_aggregate_fetch_steps_one_bucket_past_the_last() {
        const HOUR: i64 = 3_600_000;
        let buckets: Vec<i64> = (0..25_000).map(|i| i * HOUR).collect();
        let transport = ScriptedTransport::new(100_000).with_series(Identifier::Id(6), buckets);
        let query = build_query(
            Identifier::Id(6),
            QueryParams::new()
                .with_start(0)
                .with_end(25_000 * HOUR)
                .with_aggregates(["average"])
                .with_granularity("1h"),
        );

        let dps = PaginatingFetcher::new(&transport, query).fetch().await.unwrap().unwrap();

        assert_eq!(dps.len(), 25_000);
        let timestamps = dps.timestamps();
        let unique: HashSet<i64> = timestamps.iter().copied().collect();
        assert_eq!(unique.len(), timestamps.len());

        let items = transport.request_items();
        let starts: Vec<i64> = items.iter().map(|item| item["start"].as_i64().unwrap()).collect();
        assert_eq!(starts, vec![0, 10_000 * HOUR, 20_000 * HOUR]);
        // Each page resumes one granularity after the last bucket of the page before.
        assert_eq!(starts[1], timestamps[crate::defaults::DPS_LIMIT_AGG as usize - 1] + HOUR);
        for item in &items {
            assert_eq!(item["limit"], json!(crate::defaults::DPS_LIMIT_AGG));
            assert_eq!(item["granularity"], json!("1h"));
            assert_eq!(item["aggregates"], json!(["average"]));
        }
    }

    #[tokio::test]
    async fn test_missing_series_with_ignore_unknown_ids() {
        let transport = ScriptedTransport::new(10);
        let query = build_query(
            Identifier::ExternalId("ghost".into()),
            QueryParams::new().with_ignore_unknown_ids(true),
        );
        let result = PaginatingFetcher::new(&transport, query.clone()).fetch().await.unwrap();
        assert!(result.is_none());
        assert!(query.is_missing().unwrap());
        assert_eq!(transport.requests.lock().unwrap()[0]["ignoreUnknownIds"], json!(true));

        let query = build_query(Identifier::ExternalId("ghost".into()), QueryParams::new());
        let err = PaginatingFetcher::new(&transport, query).fetch().await.unwrap_err();
        assert_matches!(err.kind, ErrorKind::Serialization { .. });
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let transport = ScriptedTransport::new(10)
            .with_series(Identifier::Id(5), vec![1, 2, 3])
            .failing_for(Identifier::Id(5));
        let query = build_query(Identifier::Id(5), QueryParams::new());
        let err = PaginatingFetcher::new(&transport, query).fetch().await.unwrap_err();
        assert_matches!(err.kind, ErrorKind::Network { status_code: Some(500), .. });
    }

    #[tokio::test]
    async fn test_outside_points_kept_once() {
        // 0..=99 and the window [10, 90) with small pages
        let transport = ScriptedTransport::new(100).with_series(Identifier::Id(3), (0..100).collect());
        let query = build_query(
            Identifier::Id(3),
            QueryParams::new()
                .with_start(10)
                .with_end(90)
                .with_limit(5)
                .with_include_outside_points(true),
        );
        let dps = PaginatingFetcher::new(&transport, query.clone()).fetch().await.unwrap().unwrap();
        assert_eq!(dps.timestamps(), vec![9, 10, 11, 12, 13, 14, 90]);
        assert!(dps.len() as u64 <= query.fuzzy_limit().unwrap());
    }
}
