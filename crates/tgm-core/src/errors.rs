use std::path::PathBuf;

/// Core error type for the monitor.
///
/// Adapter crates map their transport errors into this type so the delivery
/// pipeline can decide between retrying, skipping a message, and giving up.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    /// Network or server-side failure; the connection may recover.
    #[error("transient connectivity error: {0}")]
    Transient(String),

    /// Invalid, revoked or expired credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The forwarding target cannot be resolved or written to.
    #[error("destination unavailable: {0}")]
    Destination(String),

    #[error("another instance is already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("gave up after {attempts} connection attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("lock file error: {path}: {reason}")]
    Lock { path: PathBuf, reason: String },

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// Whether the reconnect state machine should try again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }

    /// Operator-facing next step for errors that terminate the process.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            Error::Auth(_) => Some("re-provision the bot credentials (TELEGRAM_BOT_TOKEN) and restart"),
            Error::Destination(_) => Some(
                "check TARGET_CHANNEL and make sure the bot is a member of the destination with permission to post",
            ),
            Error::AlreadyRunning { .. } => Some(
                "stop the running instance, or run `tgm unlock` if the lock file is stale",
            ),
            Error::Lock { .. } => Some("inspect the lock file with `tgm status` and check its directory permissions"),
            Error::RetriesExhausted { .. } => {
                Some("check network connectivity, then restart the monitor")
            }
            Error::Config(_) => Some("fix the configuration (.env or environment) and restart"),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(Error::Transient("reset by peer".into()).is_transient());
        assert!(!Error::Auth("bad token".into()).is_transient());
        assert!(!Error::Destination("chat not found".into()).is_transient());
        assert!(!Error::External("boom".into()).is_transient());
    }

    #[test]
    fn fatal_errors_name_a_remediation() {
        assert!(Error::Auth("x".into())
            .remediation()
            .unwrap()
            .contains("credentials"));
        assert!(Error::AlreadyRunning { pid: 1 }
            .remediation()
            .unwrap()
            .contains("unlock"));
        assert!(Error::Transient("x".into()).remediation().is_none());
    }
}
