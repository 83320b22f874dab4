//! Search Console transport.
//!
//! [`Transport`] is the seam the engine fetches through; [`GoogleClient`] is
//! the production implementation: OAuth2 refresh-token grant with a cached
//! access token, a client-side rate limit, and a retry policy keyed on the
//! error kind.
//!
//! | Condition | Backoff | Attempts |
//! |-----------|---------|----------|
//! | quota exceeded (403) | constant 900 s | 2 |
//! | request timeout | constant 10 s | 5 |
//! | 5xx, 429, connection failure | exponential `3 * 2^n` s | 7 |
//! | anything else | none | 1 |

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Deserialize;
use serde_json::{json, Value};
use std::num::NonZeroU32;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::{AuthConfig, Config};
use crate::error::{GoogleErrorKind, TapError};
use crate::streams::uri_encode;

pub const BASE_URL: &str = "https://www.googleapis.com/webmasters/v3";
pub const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const REQUESTS_PER_MINUTE: NonZeroU32 = match NonZeroU32::new(1200) {
    Some(n) => n,
    None => panic!("rate limit must be non-zero"),
};

/// JSON-over-HTTP access to the Search Console API. Implementations retry
/// internally; an error reaching the caller is final.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, path: &str) -> Result<Value, TapError>;

    async fn post(&self, path: &str, body: &Value) -> Result<Value, TapError>;
}

/// Retry schedule for one class of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Constant(Duration),
    /// `factor * 2^n` for the n-th retry, starting at n = 0.
    Exponential { factor_secs: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryRule {
    pub class: RetryClass,
    pub max_attempts: u32,
    pub backoff: Backoff,
}

/// Failure classes, each with its own attempt budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryClass {
    Quota,
    Timeout,
    Transient,
}

/// Retry rule for an API request failure, `None` when it is final.
pub fn retry_rule(err: &TapError) -> Option<RetryRule> {
    match err {
        TapError::Http { kind, .. } if *kind == GoogleErrorKind::QuotaExceeded => Some(RetryRule {
            class: RetryClass::Quota,
            max_attempts: 2,
            backoff: Backoff::Constant(Duration::from_secs(900)),
        }),
        TapError::Timeout(_) => Some(RetryRule {
            class: RetryClass::Timeout,
            max_attempts: 5,
            backoff: Backoff::Constant(Duration::from_secs(10)),
        }),
        TapError::Http { kind, .. }
            if kind.is_server_error() || *kind == GoogleErrorKind::RateLimitExceeded =>
        {
            Some(RetryRule {
                class: RetryClass::Transient,
                max_attempts: 7,
                backoff: Backoff::Exponential { factor_secs: 3 },
            })
        }
        TapError::Connection(_) => Some(RetryRule {
            class: RetryClass::Transient,
            max_attempts: 7,
            backoff: Backoff::Exponential { factor_secs: 3 },
        }),
        _ => None,
    }
}

/// Retry rule for the token endpoint: 5xx, connection and timeout failures
/// back off exponentially (`2 * 2^n` s) for up to 5 attempts.
pub fn token_retry_rule(err: &TapError) -> Option<RetryRule> {
    let transient = match err {
        TapError::Http { kind, .. } => kind.is_server_error(),
        TapError::Connection(_) | TapError::Timeout(_) => true,
        _ => false,
    };
    transient.then_some(RetryRule {
        class: RetryClass::Transient,
        max_attempts: 5,
        backoff: Backoff::Exponential { factor_secs: 2 },
    })
}

impl Backoff {
    /// Delay before retry number `retry` (0-based).
    pub fn delay(self, retry: u32) -> Duration {
        match self {
            Backoff::Constant(d) => d,
            Backoff::Exponential { factor_secs } => {
                Duration::from_secs(factor_secs.saturating_mul(1u64 << retry.min(20)))
            }
        }
    }
}

/// Failed attempts per retry class for one logical request.
#[derive(Debug, Default)]
struct Attempts {
    quota: u32,
    timeout: u32,
    transient: u32,
}

impl Attempts {
    /// Count a failure; returns the delay to wait, or `None` once the budget
    /// for its class is spent.
    fn next_delay(&mut self, rule: RetryRule) -> Option<Duration> {
        let used = match rule.class {
            RetryClass::Quota => &mut self.quota,
            RetryClass::Timeout => &mut self.timeout,
            RetryClass::Transient => &mut self.transient,
        };
        *used += 1;
        if *used >= rule.max_attempts {
            return None;
        }
        Some(rule.backoff.delay(*used - 1))
    }
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub user_agent: Option<String>,
}

impl Credentials {
    /// Credentials from `[auth]`, falling back to `GSC_*` environment variables.
    pub fn from_config(auth: &AuthConfig) -> Result<Self> {
        Ok(Self {
            client_id: AuthConfig::resolve(&auth.client_id, "GSC_CLIENT_ID")?,
            client_secret: AuthConfig::resolve(&auth.client_secret, "GSC_CLIENT_SECRET")?,
            refresh_token: AuthConfig::resolve(&auth.refresh_token, "GSC_REFRESH_TOKEN")?,
            user_agent: auth.user_agent.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

pub struct GoogleClient {
    http: reqwest::Client,
    credentials: Credentials,
    base_url: String,
    token_uri: String,
    timeout: Duration,
    token: Mutex<Option<AccessToken>>,
    limiter: DefaultDirectRateLimiter,
}

impl GoogleClient {
    pub fn new(credentials: Credentials, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            credentials,
            base_url: BASE_URL.to_string(),
            token_uri: TOKEN_URI.to_string(),
            timeout,
            token: Mutex::new(None),
            limiter: RateLimiter::direct(Quota::per_minute(REQUESTS_PER_MINUTE)),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let credentials = Credentials::from_config(&config.auth)?;
        Self::new(credentials, config.sync.request_timeout())
    }

    /// Point the client at different endpoints.
    pub fn with_endpoints(mut self, base_url: impl Into<String>, token_uri: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self.token_uri = token_uri.into();
        self
    }

    /// Query each site once; the first inaccessible site fails the check.
    pub async fn check_sites_access(&self, sites: &[String]) -> Result<(), TapError> {
        for site in sites {
            self.check_site_access(site).await?;
        }
        Ok(())
    }

    pub async fn check_site_access(&self, site: &str) -> Result<(), TapError> {
        let body = json!({"startDate": "2021-04-01", "endDate": "2021-05-01"});
        let path = format!("sites/{}/searchAnalytics/query", uri_encode(site));
        self.post(&path, &body).await.map(|_| ())
    }

    fn map_send_error(&self, err: reqwest::Error) -> TapError {
        if err.is_timeout() {
            TapError::Timeout(self.timeout.as_secs())
        } else {
            TapError::Connection(err.to_string())
        }
    }

    async fn access_token(&self) -> Result<String, TapError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if token.expires_at > Utc::now() {
                return Ok(token.value.clone());
            }
        }

        let mut attempts = Attempts::default();
        let token = loop {
            match self.refresh_token().await {
                Ok(token) => break token,
                Err(err) => match token_retry_rule(&err).and_then(|r| attempts.next_delay(r)) {
                    Some(delay) => {
                        tracing::warn!(error = %err, delay_secs = delay.as_secs(), "token refresh failed, backing off");
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(err),
                },
            }
        };

        tracing::info!(expires_at = %token.expires_at, "authorized");
        let value = token.value.clone();
        *guard = Some(token);
        Ok(value)
    }

    async fn refresh_token(&self) -> Result<AccessToken, TapError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", self.credentials.refresh_token.as_str()),
        ];
        let mut req = self.http.post(&self.token_uri).form(&form);
        if let Some(ua) = &self.credentials.user_agent {
            req = req.header(reqwest::header::USER_AGENT, ua);
        }

        let resp = req.send().await.map_err(|e| self.map_send_error(e))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| self.map_send_error(e))?;
        if !status.is_success() {
            return Err(TapError::from_response(status.as_u16(), &text));
        }

        let body: TokenResponse = serde_json::from_str(&text)
            .map_err(|e| TapError::UnexpectedResponse(format!("token response: {}", e)))?;
        Ok(AccessToken {
            value: body.access_token,
            expires_at: Utc::now() + ChronoDuration::seconds(body.expires_in),
        })
    }

    async fn send_once(&self, method: reqwest::Method, path: &str, body: Option<&Value>) -> Result<Value, TapError> {
        self.limiter.until_ready().await;
        let token = self.access_token().await?;

        let url = format!("{}/{}", self.base_url, path);
        let mut req = self.http.request(method, &url).bearer_auth(token);
        if let Some(ua) = &self.credentials.user_agent {
            req = req.header(reqwest::header::USER_AGENT, ua);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await.map_err(|e| self.map_send_error(e))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| self.map_send_error(e))?;
        if !status.is_success() {
            return Err(TapError::from_response(status.as_u16(), &text));
        }
        serde_json::from_str(&text)
            .map_err(|e| TapError::UnexpectedResponse(format!("{}: {}", path, e)))
    }

    async fn request(&self, method: reqwest::Method, path: &str, body: Option<&Value>) -> Result<Value, TapError> {
        let mut attempts = Attempts::default();
        loop {
            match self.send_once(method.clone(), path, body).await {
                Ok(value) => return Ok(value),
                Err(err) => match retry_rule(&err).and_then(|r| attempts.next_delay(r)) {
                    Some(delay) => {
                        tracing::warn!(
                            path,
                            error = %err,
                            delay_secs = delay.as_secs(),
                            "request failed, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(err),
                },
            }
        }
    }
}

#[async_trait]
impl Transport for GoogleClient {
    async fn get(&self, path: &str) -> Result<Value, TapError> {
        self.request(reqwest::Method::GET, path, None).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, TapError> {
        self.request(reqwest::Method::POST, path, Some(body)).await
    }
}
