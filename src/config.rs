//! Link configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Unset or unparsable numeric values fall
//! back to defaults; malformed endpoints and inconsistent backoff bounds are
//! rejected.

use std::time::Duration;

use url::Url;

use crate::error::LinkError;

/// Default snapshot stream endpoint.
pub const DEFAULT_LIVE_URL: &str = "ws://127.0.0.1:8000/ws/live";

/// Default command stream endpoint.
pub const DEFAULT_COMMAND_URL: &str = "ws://127.0.0.1:8000/ws/command";

/// Default query parameter carrying the command credential.
pub const DEFAULT_TOKEN_PARAM: &str = "token";

/// Exponential backoff bounds for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay before the first reconnect attempt, and after every successful open.
    pub initial: Duration,
    /// Ceiling the doubling delay never exceeds.
    pub max: Duration,
}

impl BackoffConfig {
    /// Creates a backoff configuration from explicit bounds.
    #[must_use]
    pub const fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Bounds used by the simpler single-channel client (2 s initial).
    #[must_use]
    pub const fn single_channel() -> Self {
        Self::new(Duration::from_millis(2_000), Duration::from_millis(30_000))
    }

    /// Checks that `initial` is non-zero and `max >= initial`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::InvalidConfig`] when either bound is invalid.
    pub fn validate(&self) -> Result<(), LinkError> {
        if self.initial.is_zero() {
            return Err(LinkError::InvalidConfig(
                "reconnect initial delay must be positive".to_string(),
            ));
        }
        if self.max < self.initial {
            return Err(LinkError::InvalidConfig(format!(
                "reconnect ceiling {} ms is below initial delay {} ms",
                self.max.as_millis(),
                self.initial.as_millis()
            )));
        }
        Ok(())
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::new(Duration::from_millis(1_000), Duration::from_millis(30_000))
    }
}

/// Top-level link configuration.
///
/// Loaded once at startup via [`LinkConfig::from_env`], or built directly
/// with [`LinkConfig::new`].
#[derive(Clone)]
pub struct LinkConfig {
    /// Snapshot stream endpoint (`ws://` or `wss://`).
    pub live_url: Url,

    /// Command stream endpoint (`ws://` or `wss://`), without credential.
    pub command_url: Url,

    /// Bearer-style credential attached to the command endpoint.
    pub command_token: Option<String>,

    /// Query parameter name carrying `command_token`.
    pub token_param: String,

    /// Backoff bounds for the snapshot channel.
    pub live_backoff: BackoffConfig,

    /// Backoff bounds for the command channel.
    pub command_backoff: BackoffConfig,

    /// Upper bound on a single connect attempt.
    pub connect_timeout: Duration,
}

impl std::fmt::Debug for LinkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkConfig")
            .field("live_url", &self.live_url.as_str())
            .field("command_url", &self.command_url.as_str())
            .field("command_token", &self.command_token.as_ref().map(|_| "<redacted>"))
            .field("token_param", &self.token_param)
            .field("live_backoff", &self.live_backoff)
            .field("command_backoff", &self.command_backoff)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl LinkConfig {
    /// Creates a configuration for the given endpoints with default
    /// backoff, timeout, and no credential.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::InvalidUrl`] if either URL fails to parse, or
    /// [`LinkError::InvalidConfig`] if a scheme is not `ws`/`wss`.
    pub fn new(live_url: &str, command_url: &str) -> Result<Self, LinkError> {
        Ok(Self {
            live_url: parse_ws_url(live_url)?,
            command_url: parse_ws_url(command_url)?,
            command_token: None,
            token_param: DEFAULT_TOKEN_PARAM.to_string(),
            live_backoff: BackoffConfig::default(),
            command_backoff: BackoffConfig::default(),
            connect_timeout: Duration::from_millis(10_000),
        })
    }

    /// Sets the command channel credential.
    #[must_use]
    pub fn with_command_token(mut self, token: impl Into<String>) -> Self {
        self.command_token = Some(token.into());
        self
    }

    /// Sets the same backoff bounds on both channels.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.live_backoff = backoff;
        self.command_backoff = backoff;
        self
    }

    /// Loads configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if an endpoint variable is set to an invalid URL,
    /// or if backoff bounds are inconsistent.
    pub fn from_env() -> Result<Self, LinkError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, LinkError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let live_url = lookup("WATCHTOWER_LIVE_URL").unwrap_or_else(|| DEFAULT_LIVE_URL.to_string());
        let command_url =
            lookup("WATCHTOWER_COMMAND_URL").unwrap_or_else(|| DEFAULT_COMMAND_URL.to_string());

        let mut config = Self::new(&live_url, &command_url)?;

        config.command_token = lookup("WATCHTOWER_COMMAND_TOKEN").filter(|t| !t.is_empty());
        if let Some(param) = lookup("WATCHTOWER_TOKEN_PARAM").filter(|p| !p.is_empty()) {
            config.token_param = param;
        }

        let defaults = BackoffConfig::default();
        config.live_backoff = BackoffConfig::new(
            parse_millis(&lookup, "WATCHTOWER_LIVE_RECONNECT_INITIAL_MS", defaults.initial),
            parse_millis(&lookup, "WATCHTOWER_LIVE_RECONNECT_MAX_MS", defaults.max),
        );
        config.command_backoff = BackoffConfig::new(
            parse_millis(&lookup, "WATCHTOWER_COMMAND_RECONNECT_INITIAL_MS", defaults.initial),
            parse_millis(&lookup, "WATCHTOWER_COMMAND_RECONNECT_MAX_MS", defaults.max),
        );
        config.connect_timeout =
            parse_millis(&lookup, "WATCHTOWER_CONNECT_TIMEOUT_MS", config.connect_timeout);

        config.validate()?;
        Ok(config)
    }

    /// Checks backoff bounds and the connect timeout.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<(), LinkError> {
        self.live_backoff.validate()?;
        self.command_backoff.validate()?;
        if self.connect_timeout.is_zero() {
            return Err(LinkError::InvalidConfig(
                "connect timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the command endpoint with the credential attached, if any.
    #[must_use]
    pub fn command_endpoint(&self) -> Url {
        let mut url = self.command_url.clone();
        if let Some(token) = &self.command_token {
            url.query_pairs_mut().append_pair(&self.token_param, token);
        }
        url
    }
}

/// Parses `raw` as a WebSocket URL.
fn parse_ws_url(raw: &str) -> Result<Url, LinkError> {
    let url = Url::parse(raw)?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(LinkError::InvalidConfig(format!(
            "endpoint {raw} must use ws or wss, not {other}"
        ))),
    }
}

/// Parses a millisecond duration, returning `default` on missing or
/// invalid values.
fn parse_millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
