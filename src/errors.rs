//! Error types.
//!
//! [`NewsError`] covers everything the aggregation can fail with. Only the
//! input-validation variants ever reach the caller of
//! [`crate::aggregate::Aggregator::fetch`]; source- and article-level
//! failures are logged and absorbed where they happen.
//!
//! [`ModelError`] is the narrower contract of the extraction model seam,
//! where the retry decorator needs to tell rate limiting apart from
//! everything else.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NewsError {
    // Input validation
    #[error("Category '{category}' not found. Available: {}", available.join(", "))]
    UnknownCategory {
        category: String,
        available: Vec<String>,
    },

    #[error("Invalid date '{0}': expected YYYY-MM-DD")]
    InvalidDate(String),

    // Configuration
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid article pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Settings parsing failed: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // Fetching and rendering
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Render failed for {url}: {reason}")]
    Render { url: String, reason: String },

    #[error("The {0} renderer cannot drive interactive sessions")]
    SessionUnsupported(&'static str),

    #[error("{what} timed out after {secs}s")]
    Timeout { what: String, secs: u64 },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    // Output
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NewsError {
    pub fn render(url: &str, reason: impl ToString) -> Self {
        NewsError::Render {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_url(url: &str, reason: impl ToString) -> Self {
        NewsError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type NewsResult<T> = Result<T, NewsError>;

/// Failure of a single extraction model call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// The service asked us to slow down (HTTP 429 or a `rate_limit` error body).
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Anything else; never retried.
    #[error("Model call failed: {0}")]
    Fatal(String),
}

impl ModelError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ModelError::RateLimited(_))
    }
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        if err.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) {
            ModelError::RateLimited(err.to_string())
        } else {
            ModelError::Fatal(err.to_string())
        }
    }
}
