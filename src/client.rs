//! HTTP client for the datapoints API
//!
//! [`Client`] owns the `reqwest` connection pool and implements [`Transport`]
//! with authentication, retry with exponential backoff and status code
//! mapping. The query layer is reached through [`Client::datapoints`] and
//! [`Client::synthetic`].

use crate::batch::{QueryBatch, SeriesInput};
use crate::datapoints::{assemble, Datapoints, DatapointsResult};
use crate::defaults;
use crate::dispatch::ConcurrentDispatcher;
use crate::error::{Error, Result};
use crate::fetcher::{PaginatingFetcher, Transport};
use crate::query::{QueryParams, QuerySpec};
use crate::synthetic::SyntheticApi;
use async_trait::async_trait;
use reqwest::{Client as HttpClient, RequestBuilder, Response};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use url::Url;
use uuid::Uuid;

/// Configuration for the datapoints client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the API cluster
    pub base_url: Url,
    /// Project every request is scoped to
    pub project: String,
    /// API key for authentication
    pub api_key: Option<String>,
    /// Bearer token for authentication
    pub token: Option<String>,
    /// Request timeout duration
    pub timeout: Duration,
    /// Connect timeout duration
    pub connect_timeout: Duration,
    /// Number of retry attempts
    pub max_retries: usize,
    /// First retry delay, doubled on every further attempt
    pub base_delay: Duration,
    /// Upper bound for the retry delay
    pub max_delay: Duration,
    /// Most fetches in flight at once
    pub max_workers: usize,
    /// Whether to verify SSL certificates
    pub verify_ssl: bool,
    /// Custom user agent string
    pub user_agent: String,
}

impl ClientConfig {
    /// Create a configuration for `project` on the cluster at `base_url`
    pub fn new<S: AsRef<str>, P: Into<String>>(base_url: S, project: P) -> Result<Self> {
        let base_url = Url::parse(base_url.as_ref())?;
        let project = project.into();
        if project.is_empty() {
            return Err(Error::configuration("project must not be empty"));
        }
        Ok(Self {
            base_url,
            project,
            api_key: None,
            token: None,
            timeout: defaults::TIMEOUT,
            connect_timeout: defaults::CONNECT_TIMEOUT,
            max_retries: defaults::RETRIES,
            base_delay: defaults::BASE_DELAY,
            max_delay: defaults::MAX_DELAY,
            max_workers: defaults::MAX_WORKERS,
            verify_ssl: true,
            user_agent: format!("{}/{}", crate::NAME, crate::VERSION),
        })
    }

    /// Set the API key for authentication
    pub fn with_api_key<S: Into<String>>(mut self, api_key: S) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set a bearer token for authentication
    pub fn with_token<S: Into<String>>(mut self, token: S) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the number of retry attempts
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the backoff delays
    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Set how many fetches may run concurrently
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Set SSL verification
    pub fn with_ssl_verification(mut self, verify_ssl: bool) -> Self {
        self.verify_ssl = verify_ssl;
        self
    }

    /// Set custom user agent
    pub fn with_user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Main datapoints client
#[derive(Debug)]
pub struct Client {
    config: ClientConfig,
    http_client: HttpClient,
    dispatcher: ConcurrentDispatcher,
}

impl Client {
    /// Create a new client with the given configuration
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.max_workers == 0 {
            return Err(Error::configuration("max_workers must be at least 1"));
        }

        let mut builder = HttpClient::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent);

        if !config.verify_ssl {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http_client = builder.build()?;
        let dispatcher = ConcurrentDispatcher::new(config.max_workers);

        log::info!(
            "Initialized datapoints client for project {} at {}",
            config.project,
            config.base_url
        );
        Ok(Self {
            config,
            http_client,
            dispatcher,
        })
    }

    /// Create a client authenticated with an API key
    pub fn with_api_key<U, P, K>(url: U, project: P, api_key: K) -> Result<Self>
    where
        U: AsRef<str>,
        P: Into<String>,
        K: Into<String>,
    {
        Self::new(ClientConfig::new(url, project)?.with_api_key(api_key))
    }

    /// Create a client authenticated with a bearer token
    pub fn with_token<U, P, T>(url: U, project: P, token: T) -> Result<Self>
    where
        U: AsRef<str>,
        P: Into<String>,
        T: Into<String>,
    {
        Self::new(ClientConfig::new(url, project)?.with_token(token))
    }

    /// The configuration this client was built with
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Datapoints retrieval
    pub fn datapoints(&self) -> DatapointsApi<'_> {
        DatapointsApi::new(self, self.dispatcher.clone())
    }

    /// Synthetic time series queries
    pub fn synthetic(&self) -> SyntheticApi<'_> {
        SyntheticApi::new(self, self.dispatcher.clone())
    }

    /// Make an HTTP request with retry logic
    async fn make_request(&self, mut request_builder: RequestBuilder) -> Result<Response> {
        if let Some(ref api_key) = self.config.api_key {
            request_builder = request_builder.header("api-key", api_key);
        } else if let Some(ref token) = self.config.token {
            request_builder = request_builder.header("Authorization", format!("Bearer {}", token));
        }

        let request_id = Uuid::new_v4().to_string();
        request_builder = request_builder
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("x-request-id", &request_id);

        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            let request = request_builder
                .try_clone()
                .ok_or_else(|| Error::internal("Failed to clone request"))?
                .build()?;

            match self.http_client.execute(request).await {
                Ok(response) => {
                    if self.is_retryable_status(response.status().as_u16()) && attempt < self.config.max_retries {
                        let delay = self.calculate_retry_delay(attempt);
                        log::warn!(
                            "Request {} failed with status {}, retrying in {:?}",
                            request_id,
                            response.status(),
                            delay
                        );
                        sleep(delay).await;
                        continue;
                    }
                    return self.handle_response(response).await;
                }
                Err(err) => {
                    let err = Error::from(err);
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    if attempt < self.config.max_retries {
                        let delay = self.calculate_retry_delay(attempt);
                        log::warn!("Request {} failed: {}, retrying in {:?}", request_id, err, delay);
                        sleep(delay).await;
                    }
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::internal("Max retries exceeded")))
    }

    /// Handle HTTP response and convert to appropriate result
    async fn handle_response(&self, response: Response) -> Result<Response> {
        let status = response.status().as_u16();

        match status {
            200..=299 => Ok(response),
            400 | 422 => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::validation(body, None, None))
            }
            401 => Err(Error::authentication("Authentication failed")),
            403 => Err(Error::authentication("Access forbidden")),
            404 => Err(Error::network(Some(404), Some("Endpoint not found".to_string()))),
            429 => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|h| h.to_str().ok())
                    .and_then(|s| s.parse().ok());
                Err(Error::rate_limit(retry_after))
            }
            500..=599 => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::network(Some(status), Some(body)))
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::network(Some(status), Some(format!("Unexpected status: {}", body))))
            }
        }
    }

    /// Check if HTTP status code is retryable
    fn is_retryable_status(&self, status: u16) -> bool {
        matches!(status, 429 | 500..=599)
    }

    /// Calculate retry delay with exponential backoff
    fn calculate_retry_delay(&self, attempt: usize) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.min(31) as u32);
        let delay = self.config.base_delay.saturating_mul(factor);
        std::cmp::min(delay, self.config.max_delay)
    }

    /// Build the project-scoped URL for an API path
    fn build_url(&self, path: &str) -> Result<Url> {
        let base = self.config.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{}/api/v1/projects/{}{}", base, self.config.project, path))
            .map_err(|e| Error::configuration(format!("Invalid endpoint {}: {}", path, e)))
    }
}

#[async_trait]
impl Transport for Client {
    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = self.build_url(path)?;
        log::debug!("POST {}", url);
        let request_builder = self.http_client.post(url).json(body);
        let response = self.make_request(request_builder).await?;
        let json = response.json().await?;
        Ok(json)
    }
}

/// Datapoints retrieval bound to a transport
pub struct DatapointsApi<'a> {
    transport: &'a dyn Transport,
    dispatcher: ConcurrentDispatcher,
}

impl<'a> DatapointsApi<'a> {
    /// Bind to a transport and a dispatcher
    pub fn new(transport: &'a dyn Transport, dispatcher: ConcurrentDispatcher) -> Self {
        Self { transport, dispatcher }
    }

    /// Retrieve datapoints for ids and/or external ids.
    ///
    /// A single id or external id given on its own yields
    /// [`DatapointsResult::Single`]; anything else yields a list in request
    /// order, ids first.
    pub async fn retrieve(
        &self,
        ids: Option<SeriesInput<i64>>,
        external_ids: Option<SeriesInput<String>>,
        defaults: &QueryParams,
    ) -> Result<DatapointsResult> {
        let batch = QueryBatch::new(ids, external_ids, defaults)?;
        self.retrieve_batch(&batch).await
    }

    /// Retrieve datapoints from JSON-shaped `id` / `external_id` arguments
    pub async fn retrieve_json(
        &self,
        ids: Option<&Value>,
        external_ids: Option<&Value>,
        defaults: &QueryParams,
    ) -> Result<DatapointsResult> {
        let batch = QueryBatch::from_json(ids, external_ids, defaults)?;
        self.retrieve_batch(&batch).await
    }

    /// Retrieve datapoints for one series by id
    pub async fn retrieve_id(&self, id: i64, defaults: &QueryParams) -> Result<Option<Datapoints>> {
        let batch = QueryBatch::new(Some(id.into()), None, defaults)?;
        Ok(self.retrieve_batch(&batch).await?.into_single())
    }

    /// Retrieve datapoints for one series by external id
    pub async fn retrieve_external_id<S: Into<String>>(
        &self,
        external_id: S,
        defaults: &QueryParams,
    ) -> Result<Option<Datapoints>> {
        let batch = QueryBatch::new(None, Some(external_id.into().into()), defaults)?;
        Ok(self.retrieve_batch(&batch).await?.into_single())
    }

    /// Run a validated batch.
    ///
    /// Raw and aggregate queries are fetched as two queues sharing one worker
    /// bound. All fetches settle before the first failure in request order is
    /// returned.
    pub async fn retrieve_batch(&self, batch: &QueryBatch) -> Result<DatapointsResult> {
        log::info!(
            "Retrieving datapoints for {} series ({} raw, {} aggregate)",
            batch.len(),
            batch.raw_queries().len(),
            batch.agg_queries().len()
        );

        let transport = self.transport;
        let fetch = |query: &Arc<QuerySpec>| PaginatingFetcher::new(transport, Arc::clone(query)).fetch();
        let (raw, agg) = futures::join!(
            self.dispatcher.run_settled(batch.raw_queries().iter().map(fetch)),
            self.dispatcher.run_settled(batch.agg_queries().iter().map(fetch)),
        );

        let mut slots: Vec<Option<Result<Option<Datapoints>>>> = (0..batch.len()).map(|_| None).collect();
        let positioned = batch
            .raw_positions()
            .iter()
            .zip(raw)
            .chain(batch.agg_positions().iter().zip(agg));
        for (&position, outcome) in positioned {
            slots[position] = Some(outcome);
        }

        let results = slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Err(Error::internal("query finished without a result"))))
            .collect::<Result<Vec<_>>>()?;
        Ok(assemble(results, batch.is_single()))
    }
}
