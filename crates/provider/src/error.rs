#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {status} - {body}")]
    HttpError {
        status: u16,
        body: String,
        retry_after_secs: Option<u64>,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("response did not contain any text content")]
    EmptyResponse,

    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl ProviderError {
    pub fn from_http(status: u16, body: String, retry_after: Option<&str>) -> Self {
        let retry_after_secs = retry_after.and_then(|v| v.trim().parse::<u64>().ok());
        ProviderError::HttpError {
            status,
            body,
            retry_after_secs,
        }
    }

    /// Map this error to the core retry driver's failure classification.
    pub fn as_retry_failure(&self) -> revrouter_core::retry::Failure {
        match self {
            ProviderError::HttpError {
                status,
                retry_after_secs,
                ..
            } => revrouter_core::retry::classify_status(*status, None)
                .map(|f| match f {
                    revrouter_core::retry::Failure::RateLimited { .. } => {
                        revrouter_core::retry::Failure::RateLimited {
                            retry_after_secs: *retry_after_secs,
                        }
                    }
                    other => other,
                })
                .unwrap_or(revrouter_core::retry::Failure::NonRetryable),
            ProviderError::Transport(_) => revrouter_core::retry::Failure::ServerOrTransport,
            ProviderError::EmptyResponse | ProviderError::Deserialization(_) => {
                revrouter_core::retry::Failure::NonRetryable
            }
        }
    }
}
