//! Typed error taxonomy.
//!
//! Transport failures carry a [`GoogleErrorKind`] so the retry policy in
//! [`crate::client`] can decide whether to back off. Data-integrity failures
//! carry enough context (stream id, the key values that were present) to
//! diagnose the offending record.
//!
//! Engine functions return `anyhow::Result`; callers that need the typed
//! condition use `err.downcast_ref::<TapError>()`.

use serde_json::Value;

/// Classification of an HTTP failure returned by the Search Console API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoogleErrorKind {
    BadRequest,
    Unauthorized,
    PaymentRequired,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    Conflict,
    Gone,
    PreconditionFailed,
    RequestEntityTooLarge,
    RangeNotSatisfiable,
    ExpectationFailed,
    UnprocessableEntity,
    PreconditionRequired,
    RateLimitExceeded,
    InternalServiceError,
    NotImplemented,
    ServiceUnavailable,
    /// Any other 5xx.
    ServerError,
    /// 403 whose body mentions `quotaExceeded`.
    QuotaExceeded,
    /// 400 from the token endpoint with `invalid_grant`.
    InvalidGrant,
    Unknown,
}

impl GoogleErrorKind {
    /// Map a status code to its kind, ignoring body-dependent variants.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            402 => Self::PaymentRequired,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            405 => Self::MethodNotAllowed,
            409 => Self::Conflict,
            410 => Self::Gone,
            412 => Self::PreconditionFailed,
            413 => Self::RequestEntityTooLarge,
            416 => Self::RangeNotSatisfiable,
            417 => Self::ExpectationFailed,
            422 => Self::UnprocessableEntity,
            428 => Self::PreconditionRequired,
            429 => Self::RateLimitExceeded,
            500 => Self::InternalServiceError,
            501 => Self::NotImplemented,
            503 => Self::ServiceUnavailable,
            s if (500..600).contains(&s) => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    /// Human-readable fallback used when the response body has no message.
    pub fn default_message(self) -> &'static str {
        match self {
            Self::BadRequest => "The request is missing or has bad parameters.",
            Self::Unauthorized => "Invalid authorization credentials.",
            Self::PaymentRequired => {
                "The requested operation requires more resources than the quota allows. \
                 Payment is required to complete the operation."
            }
            Self::Forbidden => "Invalid authorization credentials or permissions.",
            Self::NotFound => "The requested resource does not exist.",
            Self::MethodNotAllowed => {
                "The HTTP method associated with the request is not supported."
            }
            Self::Conflict => {
                "The API request cannot be completed because the requested operation \
                 would conflict with an existing item."
            }
            Self::Gone => "The requested resource is permanently unavailable.",
            Self::PreconditionFailed => {
                "The condition set in the request's If-Match or If-None-Match HTTP \
                 request header was not met."
            }
            Self::RequestEntityTooLarge => "The request is too large.",
            Self::RangeNotSatisfiable => "The request specified a range that cannot be satisfied.",
            Self::ExpectationFailed => "A client expectation cannot be met by the server.",
            Self::UnprocessableEntity => "The request was not able to process right now.",
            Self::PreconditionRequired => {
                "The request requires a precondition If-Match or If-None-Match which is not provided."
            }
            Self::RateLimitExceeded => "Rate limit has been exceeded.",
            Self::InternalServiceError => "The request failed due to an internal error.",
            Self::NotImplemented => "Functionality does not exist.",
            Self::ServiceUnavailable => "The API service is currently unavailable.",
            Self::QuotaExceeded => "Quota exceeded.",
            Self::InvalidGrant => "invalid_grant",
            Self::ServerError | Self::Unknown => {
                "An Unknown Error occurred, please try after some time."
            }
        }
    }

    pub fn is_server_error(self) -> bool {
        matches!(
            self,
            Self::InternalServiceError
                | Self::NotImplemented
                | Self::ServiceUnavailable
                | Self::ServerError
        )
    }
}

/// Errors raised by the transport and the extraction engine.
#[derive(Debug, thiserror::Error)]
pub enum TapError {
    #[error("HTTP-error-code: {status}, Error: {message}")]
    Http {
        status: u16,
        kind: GoogleErrorKind,
        message: String,
    },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("stream '{stream}': record is missing primary key field(s) {missing:?} (present key values: {present})")]
    MissingPrimaryKey {
        stream: String,
        missing: Vec<String>,
        present: Value,
    },

    #[error("stream '{stream}': cannot parse replication key '{field}' value {value}")]
    InvalidReplicationValue {
        stream: String,
        field: String,
        value: String,
    },

    #[error("unexpected response shape: {0}")]
    UnexpectedResponse(String),
}

impl TapError {
    /// Kind of an HTTP failure, `None` for every other variant.
    pub fn http_kind(&self) -> Option<GoogleErrorKind> {
        match self {
            Self::Http { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Build an HTTP error from a status code and the (possibly empty) body.
    ///
    /// The message prefers `error_description`, then `error.message` (or a
    /// string `error`), then the kind's default text.
    pub fn from_response(status: u16, body: &str) -> Self {
        let json: Value = serde_json::from_str(body).unwrap_or(Value::Null);
        let error_node = json.get("error").cloned().unwrap_or(Value::Null);
        let error_text = match &error_node {
            Value::Null => String::new(),
            other => other.to_string(),
        };

        let mut kind = GoogleErrorKind::from_status(status);
        if status == 403 && error_text.contains("quotaExceeded") {
            kind = GoogleErrorKind::QuotaExceeded;
        } else if status == 400 && error_text.contains("invalid_grant") {
            kind = GoogleErrorKind::InvalidGrant;
        }

        let message = if kind == GoogleErrorKind::InvalidGrant {
            "invalid_grant".to_string()
        } else {
            json.get("error_description")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| match &error_node {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(obj) => obj
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    _ => None,
                })
                .unwrap_or_else(|| kind.default_message().to_string())
        };

        TapError::Http {
            status,
            kind,
            message,
        }
    }
}
