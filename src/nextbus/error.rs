use chrono::{DateTime, Utc};

/// Why a single feed request produced no observations.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("error fetching next update URL: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("feed responded with status {0}")]
    Status(reqwest::StatusCode),

    #[error("error reading response body: {source}")]
    Body {
        #[source]
        source: reqwest::Error,
        received_at: DateTime<Utc>,
    },

    #[error("error decoding response body: {source}")]
    Decode {
        #[source]
        source: serde_json::Error,
        /// Captured when the response arrived, before decoding was attempted.
        received_at: DateTime<Utc>,
    },
}

impl FetchError {
    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if err.is_status() => FetchError::Status(status),
            _ => FetchError::Transport(err),
        }
    }

    /// Receive instant of the failed response, if one arrived at all.
    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        match self {
            FetchError::Body { received_at, .. } | FetchError::Decode { received_at, .. } => {
                Some(*received_at)
            }
            FetchError::Transport(_) | FetchError::Status(_) => None,
        }
    }
}
