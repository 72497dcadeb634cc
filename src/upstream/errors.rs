//! Error types for the upstream metadata client.

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream credentials are not configured: missing {0}")]
    MissingCredentials(&'static str),
    #[error("invalid upstream URL")]
    InvalidUrl(#[from] url::ParseError),
    #[error("upstream authentication failed ({status}): {body}")]
    AuthFailed { status: u16, body: String },
    #[error("upstream returned {status} for '{endpoint}'")]
    Status { status: u16, endpoint: String },
    #[error("failed to parse upstream response for '{endpoint}'")]
    ParseFailed {
        endpoint: String,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    RequestFailed(#[from] reqwest::Error),
}

impl UpstreamError {
    /// Errors caused by deployment setup rather than the upstream's state.
    ///
    /// These are the only errors the request cache lets through to callers.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::MissingCredentials(_))
    }
}
