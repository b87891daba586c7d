use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy of the daemon.
///
/// What is reported to the host is the kind and message, never a stack.
/// Per-chunk `Io` errors are retried locally; `Tls` terminates the
/// connection; `Fatal` exits the process with code 1.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS failure with {peer}: {reason}")]
    Tls { peer: String, reason: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("rejected: {0}")]
    PolicyRejected(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl Error {
    pub fn tls(peer: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Tls {
            peer: peer.into(),
            reason: reason.into(),
        }
    }

    /// Transient errors are worth a per-chunk retry; everything else
    /// fails the session.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Timeout(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Protocol(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Io(std::io::Error::other("reset")).is_transient());
        assert!(Error::Timeout("upload".into()).is_transient());
        assert!(!Error::PolicyRejected("declined".into()).is_transient());
        assert!(!Error::tls("10.0.0.2:53317", "pin mismatch").is_transient());
    }
}
