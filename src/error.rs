use std::io;
use std::time::Duration;

use thiserror::Error;

/// Failure reported by a [`MailboxBackend`](crate::backend::MailboxBackend) for a single query.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// The server did not answer in time. Callers treat this as "does not exist".
    #[error("probe timed out")]
    Timeout,

    /// DNS failure, refused connection, protocol violation...
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<io::Error> for ProbeError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => Self::Timeout,
            _ => Self::Transport(err.to_string()),
        }
    }
}

/// Errors surfaced by the validation engine and the CLI around it.
#[derive(Error, Debug)]
pub enum ValidatorError {
    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("IO Error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),

    /// A probe failed for a reason other than a timeout and the batch policy is to abort.
    #[error("Probe of {address} failed: {message}")]
    ProbeTransport { address: String, message: String },

    /// The operator interrupted the run. Workers were torn down before this was returned.
    #[error("Operation interrupted by user")]
    Interrupted,

    #[error("Batch did not complete within {deadline:?}")]
    DeadlineExceeded { deadline: Duration },

    #[error("Probe worker failed: {0}")]
    WorkerPanic(String),
}

impl ValidatorError {
    // Process exit code used by the binary for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Interrupted => 130,
            _ => 2,
        }
    }
}

pub type Result<T> = std::result::Result<T, ValidatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_timeout_maps_to_probe_timeout() {
        let err = io::Error::new(io::ErrorKind::TimedOut, "Timeout reading banner");
        assert_eq!(ProbeError::from(err), ProbeError::Timeout);
    }

    #[test]
    fn other_io_errors_map_to_transport() {
        let err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(ProbeError::from(err), ProbeError::Transport(msg) if msg.contains("refused")));
    }

    #[test]
    fn interrupt_uses_sigint_exit_code() {
        assert_eq!(ValidatorError::Interrupted.exit_code(), 130);
        assert_eq!(
            ValidatorError::DeadlineExceeded {
                deadline: Duration::from_secs(1)
            }
            .exit_code(),
            2
        );
    }
}
