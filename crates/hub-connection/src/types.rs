//! Public types for the connection manager.

use std::time::Duration;

use hubrelay_protocol::constants::{
    AUTHORIZATION_HEADER, DEFAULT_SCHEME, MAX_BACKOFF_EXPONENT, SUPPORTED_SCHEMES,
};

use crate::error::ConnectError;
use crate::transport::Headers;

/// Configuration for automatic reconnection with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Whether a lost or failed connection is retried at all.
    pub enabled: bool,
    /// Attempts before giving up. `0` retries forever.
    pub max_attempts: u32,
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (backoff cap).
    pub max_delay: Duration,
    /// Multiplier for each subsequent attempt.
    pub backoff_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 5,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            backoff_factor: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Calculates the delay before a given attempt number (1-based):
    /// `initial_delay * backoff_factor^(attempt - 1)`, capped at `max_delay`.
    ///
    /// Factors below 1 (or not finite) are treated as 1 so the delay never
    /// shrinks between attempts.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT) as i32;
        let factor = if self.backoff_factor.is_finite() && self.backoff_factor >= 1.0 {
            self.backoff_factor
        } else {
            1.0
        };
        let millis = self.initial_delay.as_millis() as f64 * factor.powi(exp);
        let cap = self.max_delay.as_millis() as f64;
        if !millis.is_finite() || millis > cap {
            self.max_delay
        } else {
            Duration::from_millis(millis.round() as u64)
        }
    }

    /// Returns `true` once `attempt` exceeds a positive `max_attempts`.
    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt > self.max_attempts
    }
}

/// Where an episode connects to. Reused unchanged by every retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub url: String,
    pub token: Option<String>,
}

impl ConnectTarget {
    /// Validates `url` and pairs it with an optional access token. An empty
    /// token is the same as none.
    pub fn new(url: &str, token: Option<&str>) -> Result<Self, ConnectError> {
        Ok(Self {
            url: normalize_url(url)?,
            token: token.filter(|t| !t.is_empty()).map(str::to_string),
        })
    }

    /// Handshake headers. The token is passed through unchanged.
    pub fn headers(&self) -> Headers {
        let mut headers = Headers::new();
        if let Some(token) = &self.token {
            headers.insert(AUTHORIZATION_HEADER.to_string(), token.clone());
        }
        headers
    }
}

/// Adds the default scheme to a bare host and rejects unsupported schemes.
pub fn normalize_url(raw: &str) -> Result<String, ConnectError> {
    let url = raw.trim();
    if url.is_empty() {
        return Err(ConnectError::InvalidUrl("empty URL".into()));
    }

    let Some(pos) = url.find("://") else {
        return Ok(format!("{DEFAULT_SCHEME}://{url}"));
    };

    let scheme = url[..pos].to_ascii_lowercase();
    if !SUPPORTED_SCHEMES.contains(&scheme.as_str()) {
        return Err(ConnectError::InvalidScheme(scheme));
    }

    let rest = &url[pos + 3..];
    if rest.is_empty() {
        return Err(ConnectError::InvalidUrl(raw.to_string()));
    }
    Ok(format!("{scheme}://{rest}"))
}
