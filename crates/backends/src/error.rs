use thiserror::Error;

pub type Result<T> = std::result::Result<T, BackendError>;

/// Backend failures split along the retry boundary: transient errors are
/// retried with backoff, permanent errors bubble up as the subtask result.
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    /// Network error, 5xx, timeout, connection reset.
    #[error("transient backend error{}: {message}", status_suffix(.status))]
    Transient {
        status: Option<u16>,
        message: String,
    },

    /// Auth, invalid request, context-length exceeded, model-not-found,
    /// content filter.
    #[error("permanent backend error{}: {message}", status_suffix(.status))]
    Permanent {
        status: Option<u16>,
        message: String,
    },

    /// The response parsed but did not carry a usable completion.
    #[error("malformed backend response: {0}")]
    InvalidResponse(String),

    /// The job was cancelled while the call was in flight.
    #[error("backend call cancelled")]
    Cancelled,
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" ({code})"),
        None => String::new(),
    }
}

impl BackendError {
    pub fn transient(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Transient {
            status,
            message: message.into(),
        }
    }

    pub fn permanent(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Permanent {
            status,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Map an HTTP status to the retry class. 408 and 429 behave like
    /// server-side pressure; the remaining 4xx are caller errors.
    pub fn from_status(status: u16, body: String) -> Self {
        if status >= 500 || status == 408 || status == 429 {
            Self::transient(Some(status), body)
        } else {
            Self::permanent(Some(status), body)
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return Self::from_status(status.as_u16(), e.to_string());
        }
        // Connect failures, resets, and timeouts are all retry-worthy.
        Self::transient(None, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(BackendError::from_status(500, String::new()).is_retryable());
        assert!(BackendError::from_status(503, String::new()).is_retryable());
        assert!(BackendError::from_status(429, String::new()).is_retryable());
        assert!(BackendError::from_status(408, String::new()).is_retryable());
        assert!(!BackendError::from_status(401, String::new()).is_retryable());
        assert!(!BackendError::from_status(404, String::new()).is_retryable());
        assert!(!BackendError::from_status(400, String::new()).is_retryable());
    }
}
