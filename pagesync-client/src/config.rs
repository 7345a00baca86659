//! Session configuration.
//!
//! Defaults suit an interactive editor. Every knob can be overridden from the
//! environment:
//!
//! | Variable | Default |
//! |----------|---------|
//! | `PAGESYNC_URL` | `ws://127.0.0.1:8080` |
//! | `PAGESYNC_PROJECT_ID` | *(required)* |
//! | `PAGESYNC_PAGE_ID` | *(required)* |
//! | `PAGESYNC_USER_ID` | random UUID |
//! | `PAGESYNC_USER_NAME` | `Anonymous` |
//! | `PAGESYNC_REQUEST_TIMEOUT_MS` | `10000` |
//! | `PAGESYNC_QUEUE_CAPACITY` | `100` |
//! | `PAGESYNC_RECONNECT_BASE_MS` | `1000` |
//! | `PAGESYNC_RECONNECT_MAX_MS` | `30000` |
//! | `PAGESYNC_RATE_LIMIT_BURST` | *(disabled)* |
//! | `PAGESYNC_RATE_LIMIT_SUSTAINED` | `10` |

use std::time::Duration;

use pagesync_core::{SessionScope, DEFAULT_QUEUE_CAPACITY};
use url::Url;

pub use crate::backoff::BackoffConfig;
use crate::error::{SessionError, SessionResult};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Default burst capacity for rate limiting (requests).
const DEFAULT_RATE_LIMIT_BURST: u32 = 20;
/// Default sustained rate for rate limiting (requests per second).
const DEFAULT_RATE_LIMIT_SUSTAINED: f64 = 10.0;

/// Token bucket settings for outbound requests.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Maximum burst of requests.
    pub burst: u32,
    /// Sustained requests per second.
    pub per_second: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst: DEFAULT_RATE_LIMIT_BURST,
            per_second: DEFAULT_RATE_LIMIT_SUSTAINED,
        }
    }
}

/// Presence throttling and staleness settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceConfig {
    /// Minimum spacing between presence change events.
    pub throttle: Duration,
    /// Remote entries not refreshed for this long are pruned.
    pub stale_after: Duration,
    /// How often the session prunes stale entries.
    pub prune_interval: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            throttle: Duration::from_millis(100),
            stale_after: Duration::from_secs(60),
            prune_interval: Duration::from_secs(30),
        }
    }
}

/// Everything a session needs to connect and behave.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Server base URL, e.g. `wss://editor.example.com`.
    pub endpoint: String,
    /// Project being edited.
    pub project_id: String,
    /// Page being edited.
    pub page_id: String,
    /// Local user ID.
    pub user_id: String,
    /// Local display name.
    pub user_name: String,
    /// Reconnect backoff.
    pub backoff: BackoffConfig,
    /// Default deadline for request/response pairs.
    pub request_timeout: Duration,
    /// Capacity of the offline send queue.
    pub queue_capacity: usize,
    /// Optional outbound rate limiting.
    pub rate_limit: Option<RateLimitConfig>,
    /// Presence behaviour.
    pub presence: PresenceConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8080".to_string(),
            project_id: String::new(),
            page_id: String::new(),
            user_id: uuid::Uuid::new_v4().to_string(),
            user_name: "Anonymous".to_string(),
            backoff: BackoffConfig::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            rate_limit: None,
            presence: PresenceConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Create a configuration for one project page with defaults elsewhere.
    #[must_use]
    pub fn new(
        endpoint: impl Into<String>,
        project_id: impl Into<String>,
        page_id: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            project_id: project_id.into(),
            page_id: page_id.into(),
            ..Self::default()
        }
    }

    /// Set the local user.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>, user_name: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self.user_name = user_name.into();
        self
    }

    /// Load defaults overlaid with `PAGESYNC_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load defaults overlaid with values from `lookup`.
    ///
    /// Unparseable numeric values fall back to the default.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse_u64 = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let mut config = Self::default();

        if let Some(endpoint) = lookup("PAGESYNC_URL") {
            config.endpoint = endpoint;
        }
        if let Some(project_id) = lookup("PAGESYNC_PROJECT_ID") {
            config.project_id = project_id;
        }
        if let Some(page_id) = lookup("PAGESYNC_PAGE_ID") {
            config.page_id = page_id;
        }
        if let Some(user_id) = lookup("PAGESYNC_USER_ID") {
            config.user_id = user_id;
        }
        if let Some(user_name) = lookup("PAGESYNC_USER_NAME") {
            config.user_name = user_name;
        }
        if let Some(ms) = parse_u64("PAGESYNC_REQUEST_TIMEOUT_MS") {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(capacity) = parse_u64("PAGESYNC_QUEUE_CAPACITY") {
            config.queue_capacity = usize::try_from(capacity).unwrap_or(usize::MAX);
        }
        if let Some(ms) = parse_u64("PAGESYNC_RECONNECT_BASE_MS") {
            config.backoff.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_u64("PAGESYNC_RECONNECT_MAX_MS") {
            config.backoff.max_delay = Duration::from_millis(ms);
        }
        if let Some(burst) = parse_u64("PAGESYNC_RATE_LIMIT_BURST") {
            let per_second = lookup("PAGESYNC_RATE_LIMIT_SUSTAINED")
                .and_then(|v| v.trim().parse::<f64>().ok())
                .unwrap_or(DEFAULT_RATE_LIMIT_SUSTAINED);
            config.rate_limit = Some(RateLimitConfig {
                burst: u32::try_from(burst).unwrap_or(u32::MAX),
                per_second,
            });
        }
        config
    }

    /// Check that the configuration can be used to open a session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidUrl`] for a non-WebSocket endpoint and
    /// [`SessionError::Config`] for missing identifiers, zero timeouts or
    /// zero capacities.
    pub fn validate(&self) -> SessionResult<()> {
        let url = Url::parse(&self.endpoint)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(SessionError::InvalidUrl(format!(
                "expected ws:// or wss://, got {}://",
                url.scheme()
            )));
        }
        if self.project_id.trim().is_empty() {
            return Err(SessionError::Config("project_id is required".into()));
        }
        if self.page_id.trim().is_empty() {
            return Err(SessionError::Config("page_id is required".into()));
        }
        if self.user_id.trim().is_empty() {
            return Err(SessionError::Config("user_id is required".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(SessionError::Config("request_timeout must be positive".into()));
        }
        if self.presence.prune_interval.is_zero() {
            return Err(SessionError::Config("prune_interval must be positive".into()));
        }
        if self.queue_capacity == 0 {
            return Err(SessionError::Config("queue_capacity must be positive".into()));
        }
        if let Some(rate) = &self.rate_limit {
            if rate.burst == 0 {
                return Err(SessionError::Config("rate limit burst must be positive".into()));
            }
        }
        Ok(())
    }

    /// Identifiers stamped on every outbound envelope.
    #[must_use]
    pub fn scope(&self) -> SessionScope {
        SessionScope::new(&self.project_id, &self.page_id, &self.user_id)
    }
}
