//! Status codes and the per-call sets of codes treated as success
//!
//! Each call site names the set it uses so the policy can be inspected and
//! tested apart from the call itself.

use std::fmt;

/// Status codes returned in field 1 of a reply
pub mod status {
    /// Action completed
    pub const OK: &str = "0";
    /// Action initiated, not yet complete
    pub const INITIATED: &str = "1";
    /// Command not implemented or not relevant on this device
    pub const NOT_IMPLEMENTED: &str = "2";
    /// Error while executing
    pub const EXECUTION_ERROR: &str = "4";
    /// Too busy to service the request
    pub const BUSY: &str = "5";
    /// Not applicable in the current mode or state
    pub const NOT_APPLICABLE: &str = "6";
    /// No such keyword
    pub const UNKNOWN_KEYWORD: &str = "7";
    /// Parameter error
    pub const PARAMETER_ERROR: &str = "8";
}

/// Set of status codes considered non-error for one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptanceSet(&'static [&'static str]);

impl AcceptanceSet {
    pub const fn new(codes: &'static [&'static str]) -> Self {
        Self(codes)
    }

    pub fn accepts(&self, code: &str) -> bool {
        self.0.contains(&code)
    }

    pub fn codes(&self) -> &'static [&'static str] {
        self.0
    }
}

impl Default for AcceptanceSet {
    fn default() -> Self {
        DEFAULT
    }
}

impl fmt::Display for AcceptanceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.0.join(","))
    }
}

use status::*;

/// Completed or initiated
pub const DEFAULT: AcceptanceSet = AcceptanceSet::new(&[OK, INITIATED]);

pub const ONLY_OK: AcceptanceSet = AcceptanceSet::new(&[OK]);

/// `version?` and `echo=` on firmware that predates them answer "not
/// implemented" or "no such keyword"
pub const VERSION_PROBE: AcceptanceSet =
    AcceptanceSet::new(&[OK, INITIATED, NOT_IMPLEMENTED, UNKNOWN_KEYWORD]);

/// `bank_set?` while a switch is running answers busy or not-applicable,
/// depending on firmware
pub const BANK_POLL: AcceptanceSet = AcceptanceSet::new(&[OK, INITIATED, BUSY, NOT_APPLICABLE]);

/// `bank_set?` on a device that may not be in bank mode
pub const BANK_QUERY: AcceptanceSet = AcceptanceSet::new(&[OK, EXECUTION_ERROR, NOT_APPLICABLE]);

/// `dir_info?` answers not-applicable outside bank mode
pub const DIR_INFO: AcceptanceSet = AcceptanceSet::new(&[OK, NOT_APPLICABLE]);

/// `protect=off` on a pack already flagged as degraded
pub const PROTECT_OFF: AcceptanceSet = AcceptanceSet::new(&[OK, EXECUTION_ERROR]);

/// `reset=abort` when the transfer already finished on its own
pub const ABORT: AcceptanceSet = AcceptanceSet::new(&[OK, NOT_APPLICABLE]);
