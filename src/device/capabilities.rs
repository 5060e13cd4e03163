//! Device family, firmware version and the features derived from them
//!
//! Probed once per session. Every firmware-dependent branch elsewhere in the
//! crate asks [`DeviceCapabilities`] instead of looking at the device again.

use super::bank::{self, NoBankRecognizer};
use crate::error::{DeviceError, DeviceResult};
use crate::protocol::acceptance::{self, status};
use crate::protocol::{Client, Transport};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceFamily {
    /// Legacy recorder
    Mark5A,
    Mark5B,
    /// Streaming-controller variant
    Mark5C,
}

impl DeviceFamily {
    /// Match the system type reported by `dts_id?`. The spelling differs per
    /// family and is matched exactly.
    pub fn from_dts_id(id: &str) -> Option<Self> {
        match id {
            "mark5A" => Some(DeviceFamily::Mark5A),
            "mark5b" => Some(DeviceFamily::Mark5B),
            "Mark5C" => Some(DeviceFamily::Mark5C),
            _ => None,
        }
    }

    pub fn dts_id(&self) -> &'static str {
        match self {
            DeviceFamily::Mark5A => "mark5A",
            DeviceFamily::Mark5B => "mark5b",
            DeviceFamily::Mark5C => "Mark5C",
        }
    }

    /// Query whose field 2 carries the record pointer
    pub fn position_query(&self) -> &'static str {
        match self {
            DeviceFamily::Mark5A => "position?",
            DeviceFamily::Mark5B | DeviceFamily::Mark5C => "pointers?",
        }
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dts_id())
    }
}

/// Firmware version packed into one comparable integer.
///
/// Each dotted component occupies three decimal digits, most significant
/// first, so `2.6.0` and `2.6` compare equal and `2.10.0` sorts after
/// `2.9.3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FirmwareVersion(u64);

const MAX_COMPONENTS: usize = 6;
const MAX_COMPONENT: u64 = 999;
const COMPONENT_WEIGHT: u64 = 1000;

impl FirmwareVersion {
    pub const fn release(major: u64, minor: u64, patch: u64) -> Self {
        let top = COMPONENT_WEIGHT * COMPONENT_WEIGHT * COMPONENT_WEIGHT;
        Self(((major * COMPONENT_WEIGHT + minor) * COMPONENT_WEIGHT + patch) * top)
    }

    pub fn from_components(components: &[u64]) -> Self {
        let mut packed = 0u64;
        for slot in 0..MAX_COMPONENTS {
            let value = components.get(slot).copied().unwrap_or(0).min(MAX_COMPONENT);
            packed = packed * COMPONENT_WEIGHT + value;
        }
        Self(packed)
    }

    /// Extract every run of digits from `text`. Returns `None` when there is
    /// none. Components past the sixth are ignored.
    pub fn parse(text: &str) -> Option<Self> {
        let digits = Regex::new(r"\d+").ok()?;

        let components: Vec<u64> = digits
            .find_iter(text)
            .take(MAX_COMPONENTS)
            .map(|m| m.as_str().parse::<u64>().unwrap_or(MAX_COMPONENT))
            .collect();

        if components.is_empty() {
            None
        } else {
            Some(Self::from_components(&components))
        }
    }

    pub fn components(&self) -> [u64; MAX_COMPONENTS] {
        let mut out = [0u64; MAX_COMPONENTS];
        let mut rest = self.0;
        for slot in out.iter_mut().rev() {
            *slot = rest % COMPONENT_WEIGHT;
            rest /= COMPONENT_WEIGHT;
        }
        out
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let components = self.components();
        let shown = components
            .iter()
            .rposition(|c| *c != 0)
            .map_or(3, |last| (last + 1).max(3));
        let text: Vec<String> = components[..shown].iter().map(u64::to_string).collect();
        f.write_str(&text.join("."))
    }
}

/// Several requests per line
pub const BATCH_QUERIES_SINCE: FirmwareVersion = FirmwareVersion::release(2, 6, 0);

/// `echo=off`
pub const ECHO_SUPPRESSION_SINCE: FirmwareVersion = FirmwareVersion::release(2, 7, 0);

/// What the connected device is and can do
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub family: DeviceFamily,
    /// `None` on firmware without a `version?` query
    pub firmware: Option<FirmwareVersion>,
    pub bank_mode: bool,
    pub echo_suppression: bool,
    pub batch_queries: bool,
}

impl DeviceCapabilities {
    /// Derive feature flags from the firmware version
    pub fn new(family: DeviceFamily, firmware: Option<FirmwareVersion>, bank_mode: bool) -> Self {
        let at_least = |threshold: FirmwareVersion| firmware.map_or(false, |v| v >= threshold);
        Self {
            family,
            firmware,
            bank_mode,
            echo_suppression: at_least(ECHO_SUPPRESSION_SINCE),
            batch_queries: at_least(BATCH_QUERIES_SINCE),
        }
    }

    /// Firmware that answers `version?` with "not implemented": no extras
    pub fn legacy(family: DeviceFamily, bank_mode: bool) -> Self {
        Self::new(family, None, bank_mode)
    }
}

/// Identify the device and freeze its capabilities, using the default
/// no-bank recognizer table
pub fn probe<T: Transport>(client: &mut Client<T>) -> DeviceResult<DeviceCapabilities> {
    probe_with(client, &NoBankRecognizer::default())
}

pub fn probe_with<T: Transport>(
    client: &mut Client<T>,
    recognizer: &NoBankRecognizer,
) -> DeviceResult<DeviceCapabilities> {
    let dts_id = client.query("dts_id?")?;
    let system_type = dts_id.field(2).unwrap_or_default();
    let family = DeviceFamily::from_dts_id(system_type)
        .ok_or_else(|| DeviceError::UnrecognizedDevice(system_type.to_string()))?;

    let version = client.query_with("version?", acceptance::VERSION_PROBE)?;
    let firmware = match version.status() {
        Some(status::NOT_IMPLEMENTED) | Some(status::UNKNOWN_KEYWORD) => None,
        _ => version.field(3).and_then(FirmwareVersion::parse),
    };

    let bank_mode = bank::detect_bank_mode(client, recognizer)?;
    let capabilities = DeviceCapabilities::new(family, firmware, bank_mode);

    if capabilities.echo_suppression {
        client.query_with("echo=off", acceptance::VERSION_PROBE)?;
    }

    tracing::info!(
        family = %family,
        firmware = %firmware.map_or_else(|| "unknown".to_string(), |v| v.to_string()),
        bank_mode,
        batch_queries = capabilities.batch_queries,
        "Probed device"
    );
    Ok(capabilities)
}
