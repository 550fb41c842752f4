use thiserror::Error;

/// Failures talking to the Listing Source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("listing source returned status {0}")]
    Status(u16),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl SourceError {
    /// Rate limiting, gateway errors and connection-level failures are retried.
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Status(code) => matches!(code, 429 | 500 | 502 | 503 | 504),
            SourceError::Transport(err) => !err.is_decode() && !err.is_builder(),
            SourceError::Decode(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_status_codes() {
        for code in [429, 500, 502, 503, 504] {
            assert!(SourceError::Status(code).is_transient(), "{code}");
        }
        for code in [400, 401, 403, 404, 501] {
            assert!(!SourceError::Status(code).is_transient(), "{code}");
        }
    }

    #[test]
    fn test_decode_is_not_transient() {
        assert!(!SourceError::Decode("bad json".into()).is_transient());
    }
}
