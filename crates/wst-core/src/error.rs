use thiserror::Error;

/// Errors produced while relaying a tunnel session.
///
/// Every variant is local to one session: the session closes its channel
/// and ends, nothing escalates further.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("unsupported command: {0}")]
    UnsupportedCommand(u8),

    #[error("unauthorized identifier")]
    Unauthorized,

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("connect to {target} failed: {reason}")]
    ConnectFailed { target: String, reason: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{0} timeout")]
    Timeout(&'static str),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Whether the error was caused by what the client sent (as opposed to
    /// the network or the destination).
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            RelayError::MalformedHeader(_)
                | RelayError::UnsupportedCommand(_)
                | RelayError::Unauthorized
                | RelayError::PolicyDenied(_)
        )
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
