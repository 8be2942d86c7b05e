//! # Datapoints Rust SDK
//!
//! A Rust client for retrieving time series datapoints from a cloud data
//! platform. Any number of series, each with its own window, aggregates and
//! limit, is validated up front, paginated by timestamp against the API's
//! per-request caps, fetched concurrently and returned in request order.
//!
//! ## Features
//!
//! - **Flexible queries**: ids and external ids, alone or in lists, with per-series overrides
//! - **Time parsing**: ms timestamps, `chrono` datetimes and relative `"2d-ago"` tokens
//! - **Aggregates** aligned to their granularity
//! - **Transparent pagination** that returns exactly the requested number of points
//! - **Bounded concurrency** across all series of a request
//! - **Synthetic time series** expressions
//! - **Retry logic and timeout handling**
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use datapoints_sdk::{Client, ClientConfig, QueryParams, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = ClientConfig::new("https://api.example.com", "my-project")?
//!         .with_api_key("your-api-key");
//!     let client = Client::new(config)?;
//!
//!     let defaults = QueryParams::new()
//!         .with_start("2w-ago")
//!         .with_end("now")
//!         .with_aggregates(["average", "max"])
//!         .with_granularity("1h");
//!
//!     let dps = client.datapoints().retrieve_external_id("temperature", &defaults).await?;
//!     if let Some(dps) = dps {
//!         println!("Fetched {} hourly buckets", dps.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! All SDK operations return a `Result<T, Error>`. Input problems are reported
//! before any request is sent:
//!
//! ```rust
//! use datapoints_sdk::{ErrorKind, QueryParams, QuerySpec, Identifier};
//!
//! let params = QueryParams::new().with_aggregates(["average"]);
//! let err = QuerySpec::new(Identifier::Id(1), &params).unwrap_err();
//! assert!(matches!(err.kind, ErrorKind::MissingGranularity));
//! assert!(err.is_validation());
//! ```

pub mod batch;
pub mod client;
pub mod datapoints;
pub mod dispatch;
pub mod error;
pub mod fetcher;
pub mod query;
pub mod synthetic;
pub mod time;
pub mod types;

// Re-export commonly used types
pub use batch::{QueryBatch, SeriesInput, SeriesRef};
pub use client::{Client, ClientConfig, DatapointsApi};
pub use datapoints::{Datapoint, DatapointValue, Datapoints, DatapointsList, DatapointsResult};
pub use dispatch::ConcurrentDispatcher;
pub use error::{Error, ErrorKind, Result};
pub use fetcher::{PaginatingFetcher, Transport};
pub use query::{QueryParams, QuerySpec};
pub use synthetic::{SyntheticApi, SyntheticQuery};
pub use time::{Granularity, Timestamp};
pub use types::{Aggregate, Identifier, LimitInput, TimeWindow};

/// SDK version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// SDK name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// Default request timeout
    pub const TIMEOUT: Duration = Duration::from_secs(30);

    /// Default connect timeout
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Default number of retries
    pub const RETRIES: usize = 3;

    /// Default base delay for exponential backoff
    pub const BASE_DELAY: Duration = Duration::from_millis(1000);

    /// Default maximum delay for exponential backoff
    pub const MAX_DELAY: Duration = Duration::from_secs(30);

    /// Default number of concurrent fetches
    pub const MAX_WORKERS: usize = 10;

    /// Most raw datapoints one request may return
    pub const DPS_LIMIT: u64 = 100_000;

    /// Most aggregate datapoints one request may return
    pub const DPS_LIMIT_AGG: u64 = 10_000;

    /// Most synthetic datapoints one request may return
    pub const SYNTHETIC_LIMIT: u64 = 10_000;
}

/// Initialize the SDK with logging
///
/// This function sets up environment-based logging for the SDK.
/// Call this once at the start of your application.
///
/// # Example
///
/// ```rust
/// datapoints_sdk::init_logging();
/// ```
pub fn init_logging() {
    // A second call would panic in `env_logger::init`.
    let _ = env_logger::try_init();
}

/// Get the SDK version
pub fn version() -> &'static str {
    VERSION
}

/// Get the SDK name
pub fn name() -> &'static str {
    NAME
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_name() {
        assert_eq!(name(), "datapoints-sdk");
    }

    #[test]
    fn test_request_caps() {
        assert!(defaults::DPS_LIMIT_AGG < defaults::DPS_LIMIT);
        assert_eq!(defaults::SYNTHETIC_LIMIT, defaults::DPS_LIMIT_AGG);
        init_logging();
        init_logging();
    }
}
