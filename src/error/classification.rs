/// Error classification for retry decisions
///
/// The core never retries on its own. The driver consults the class of an
/// error to decide whether reconnecting or re-issuing an operation makes
/// sense at all.
use super::DeviceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// The device or network did not answer in time, or refused the
    /// connection; trying again later may succeed
    /// Examples: read timeout, connection refused while the daemon restarts
    Transient,

    /// The device answered and said no, or is not a device we can drive
    /// Examples: rejected status code, unrecognized device family
    Fatal,

    /// Operator asked us to stop
    UserInterrupted,
}

impl ErrorClass {
    pub fn description(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "Temporary error that may resolve on retry",
            ErrorClass::Fatal => "Unrecoverable error requiring abort",
            ErrorClass::UserInterrupted => "Operation cancelled by user",
        }
    }

    pub fn allows_retry(&self) -> bool {
        matches!(self, ErrorClass::Transient)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Transient => write!(f, "Transient"),
            ErrorClass::Fatal => write!(f, "Fatal"),
            ErrorClass::UserInterrupted => write!(f, "UserInterrupted"),
        }
    }
}

/// Maps [`DeviceError`] values onto an [`ErrorClass`]
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, error: &DeviceError) -> ErrorClass {
        match error.root() {
            DeviceError::Interrupted => ErrorClass::UserInterrupted,

            DeviceError::Connection { source, .. } => Self::classify_io_error(source.kind()),

            // A busy device may answer next time; a rejected switch or a
            // desynchronized batch will not fix itself
            DeviceError::Timeout { .. } | DeviceError::BankSwitchTimeout { .. } => {
                ErrorClass::Transient
            }

            // protocol and identification failures; `root()` never yields `Abort`
            _ => ErrorClass::Fatal,
        }
    }

    fn classify_io_error(kind: ErrorKind) -> ErrorClass {
        match kind {
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::TimedOut
            | ErrorKind::WouldBlock
            | ErrorKind::Interrupted => ErrorClass::Transient,
            _ => ErrorClass::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn connection_error(kind: ErrorKind) -> DeviceError {
        DeviceError::Connection {
            endpoint: "localhost:2620".to_string(),
            source: std::io::Error::new(kind, "test"),
        }
    }

    #[test_case(ErrorKind::ConnectionRefused, ErrorClass::Transient ; "refused")]
    #[test_case(ErrorKind::TimedOut, ErrorClass::Transient ; "timed out")]
    #[test_case(ErrorKind::PermissionDenied, ErrorClass::Fatal ; "permission denied")]
    #[test_case(ErrorKind::AddrNotAvailable, ErrorClass::Fatal ; "bad address")]
    fn test_connection_errors(kind: ErrorKind, expected: ErrorClass) {
        assert_eq!(ErrorClassifier::new().classify(&connection_error(kind)), expected);
    }

    #[test]
    fn test_rejected_status_is_fatal() {
        let err = DeviceError::rejected("reset=erase", "!reset= 6 : need protect=off ;", "6");
        let class = ErrorClassifier::new().classify(&err);
        assert_eq!(class, ErrorClass::Fatal);
        assert!(!class.allows_retry());
    }

    #[test]
    fn test_timeout_is_transient() {
        let err = DeviceError::Timeout {
            command: "dir_info?".to_string(),
        };
        assert!(ErrorClassifier::new().classify(&err).allows_retry());
    }

    #[test]
    fn test_failed_abort_of_rejected_command_is_fatal() {
        let err = DeviceError::Abort {
            source: Box::new(DeviceError::rejected("tstat=", "!tstat= 8 ;", "8")),
            abort_failure: Some(Box::new(DeviceError::Timeout {
                command: "reset=abort".to_string(),
            })),
        };
        assert_eq!(ErrorClassifier::new().classify(&err), ErrorClass::Fatal);
    }

    #[test]
    fn test_abort_classified_by_cause() {
        let err = DeviceError::Abort {
            source: Box::new(DeviceError::Interrupted),
            abort_failure: None,
        };
        assert_eq!(
            ErrorClassifier::new().classify(&err),
            ErrorClass::UserInterrupted
        );
    }
}
