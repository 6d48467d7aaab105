use crate::compression::CompressionConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Default User-Agent string for pipeline requests
pub const DEFAULT_USER_AGENT: &str = concat!("http-pipeline/", env!("CARGO_PKG_VERSION"));

/// Batch executor settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    /// Maximum number of batch items in flight at once (default: unbounded)
    ///
    /// A limit of `0` is treated as `1`.
    pub concurrency_limit: Option<usize>,
}

/// Client configuration, usually deserialized from the host application's
/// config file and handed to [`ClientBuilder::with_config`].
///
/// [`ClientBuilder::with_config`]: crate::ClientBuilder::with_config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Timeout for each provider call in milliseconds (default: 30000)
    ///
    /// Applies per attempt when a retry middleware is installed.
    pub request_timeout_ms: u64,

    /// User-Agent header value, sent unless the request sets its own
    pub user_agent: String,

    /// Headers added to every request that does not already carry them
    pub headers: BTreeMap<String, String>,

    pub compression: CompressionConfig,

    pub batch: BatchConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: BTreeMap::new(),
            compression: CompressionConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Configuration for tests: short timeout, compression off
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            request_timeout_ms: 5_000,
            compression: CompressionConfig::disabled(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
