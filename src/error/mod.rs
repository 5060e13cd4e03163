/// Error types for the device control client
///
/// Every fallible operation in the crate returns [`DeviceResult`]. The
/// variants distinguish "the device said no" ([`DeviceError::Protocol`]) from
/// "the device did not answer" ([`DeviceError::Timeout`]) so callers can pick a
/// policy per case.
///
/// Submodules:
/// - `classification` maps errors onto retry classes
/// - `retry` provides the backoff used by the driver when connecting
pub mod classification;
pub mod retry;

pub use classification::{ErrorClass, ErrorClassifier};
pub use retry::{retry, ExponentialBackoff, NoRetry, RetryStrategy};

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Connection to {endpoint} failed: {source}")]
    Connection {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No reply to '{command}' within the configured timeout")]
    Timeout { command: String },

    #[error("Bank switch to {target} did not complete within {}", format_elapsed(.elapsed))]
    BankSwitchTimeout { target: String, elapsed: Duration },

    #[error("Command '{command}' failed ({reason}), reply: '{reply}'")]
    Protocol {
        command: String,
        reply: String,
        reason: String,
    },

    #[error("Device did not switch to bank {target} (active: {active}): {detail}")]
    BankSwitchRejected {
        target: String,
        active: String,
        detail: String,
    },

    #[error("Failed to recognize device type '{0}'")]
    UnrecognizedDevice(String),

    #[error("Operation interrupted by user")]
    Interrupted,

    /// Conditioning failed, and so did the `reset=abort` sent afterwards.
    /// A failure whose abort succeeded is returned unwrapped.
    #[error("Conditioning failed: {source}{}", abort_suffix(.abort_failure))]
    Abort {
        #[source]
        source: Box<DeviceError>,
        abort_failure: Option<Box<DeviceError>>,
    },
}

impl DeviceError {
    /// Build a protocol error for a reply whose status was not accepted
    pub fn rejected(command: &str, reply: &str, status: &str) -> Self {
        DeviceError::Protocol {
            command: command.to_string(),
            reply: reply.to_string(),
            reason: format!("status {} not accepted", status),
        }
    }

    /// Build a protocol error for a reply that could not be interpreted
    pub fn malformed(command: &str, reply: &str, reason: impl Into<String>) -> Self {
        DeviceError::Protocol {
            command: command.to_string(),
            reply: reply.to_string(),
            reason: reason.into(),
        }
    }

    /// The error that caused the failure, looking through an `Abort` wrapper
    pub fn root(&self) -> &DeviceError {
        match self {
            DeviceError::Abort { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self.root(),
            DeviceError::Timeout { .. } | DeviceError::BankSwitchTimeout { .. }
        )
    }

    pub fn is_protocol(&self) -> bool {
        matches!(
            self.root(),
            DeviceError::Protocol { .. } | DeviceError::BankSwitchRejected { .. }
        )
    }
}

pub type DeviceResult<T> = Result<T, DeviceError>;

fn format_elapsed(elapsed: &Duration) -> String {
    humantime::format_duration(*elapsed).to_string()
}

fn abort_suffix(abort_failure: &Option<Box<DeviceError>>) -> String {
    match abort_failure {
        Some(e) => format!(" (abort also failed: {})", e),
        None => String::new(),
    }
}
