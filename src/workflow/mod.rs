/// Erase and conditioning workflow
///
/// A run moves through the phases in [`Phase`] strictly in order. The
/// destructive part is behind the [`EraseStrategy`] trait so a dry run can
/// substitute [`SimulatedEraser`] without touching the device.
///
/// Submodules:
/// - `condition` samples throughput while the device conditions a pack
/// - `erase` drives the phases against a real device
/// - `stats` holds the latency ladder and reads per-drive statistics
pub mod condition;
pub mod erase;
pub mod stats;

pub use condition::{Pass, ThroughputTracker};
pub use erase::DeviceEraser;
pub use stats::{stat_thresholds, DriveStats};

use crate::device::{BankId, DeviceCapabilities};
use crate::error::DeviceResult;
use crate::protocol::{Client, Transport};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Sampling cadence when none is configured
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(60);

/// The position query is never sent more often than this
pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    BankSelect,
    QuickErase,
    StatsSetup,
    Conditioning,
    StatsCollection,
    IntegrityCheck,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::BankSelect => "bank select",
            Phase::QuickErase => "quick erase",
            Phase::StatsSetup => "statistics setup",
            Phase::Conditioning => "conditioning",
            Phase::StatsCollection => "statistics collection",
            Phase::IntegrityCheck => "integrity check",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EraseMode {
    /// Quick erase only: the directory is cleared, sectors are not touched
    Quick,
    /// Quick erase followed by a full read and write pass
    Condition,
    /// Conditioning run as a read/write throughput benchmark. The device
    /// command is the same as for `Condition`; the volume label is checked
    /// afterwards and restored if the run changed it.
    ReadWriteBenchmark,
}

impl EraseMode {
    pub fn conditions(&self) -> bool {
        !matches!(self, EraseMode::Quick)
    }

    /// Reset argument that starts the long pass
    pub fn reset_argument(&self) -> &'static str {
        match self {
            EraseMode::Quick => "erase",
            EraseMode::Condition | EraseMode::ReadWriteBenchmark => "condition",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EraseOptions {
    /// Bank to erase; `None` erases whatever is active
    pub bank: Option<BankId>,
    pub mode: EraseMode,
    pub sample_interval: Duration,
}

impl Default for EraseOptions {
    fn default() -> Self {
        Self {
            bank: None,
            mode: EraseMode::Quick,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
        }
    }
}

impl EraseOptions {
    /// Configured cadence, raised to [`MIN_SAMPLE_INTERVAL`] when shorter
    pub fn effective_sample_interval(&self) -> Duration {
        self.sample_interval.max(MIN_SAMPLE_INTERVAL)
    }
}

/// One conditioning progress report
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSample {
    pub previous_offset: u64,
    pub current_offset: u64,
    /// Seconds between the two offsets
    pub elapsed: f64,
    pub pass: Pass,
    /// Bytes per second, absent on a pass transition or the first sample
    pub data_rate: Option<f64>,
}

/// Outcome of a completed run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EraseResult {
    pub duration: Duration,
    /// One entry per drive, ordered by drive index
    pub drive_stats: Vec<DriveStats>,
    /// Bytes per second; `None` when never sampled
    pub min_data_rate: Option<f64>,
    pub max_data_rate: Option<f64>,
    /// Latency bucket thresholds in seconds, only when conditioning ran
    pub stat_thresholds: Option<Vec<f64>>,
}

impl EraseResult {
    pub fn stats_for(&self, drive: u32) -> Option<&DriveStats> {
        self.drive_stats.iter().find(|stats| stats.drive == drive)
    }
}

/// The destructive part of a run
pub trait EraseStrategy<T: Transport> {
    fn erase(
        &mut self,
        client: &mut Client<T>,
        capabilities: &DeviceCapabilities,
        options: &EraseOptions,
        progress: &mut dyn FnMut(&ProgressSample),
    ) -> DeviceResult<EraseResult>;
}

/// Returns a fixed result without sending anything to the device
#[derive(Debug, Clone)]
pub struct SimulatedEraser {
    result: EraseResult,
}

impl SimulatedEraser {
    pub fn new(result: EraseResult) -> Self {
        Self { result }
    }
}

impl Default for SimulatedEraser {
    /// Two hours of conditioning on an eight-drive pack
    fn default() -> Self {
        let drive_stats = (0..8u32)
            .map(|drive| DriveStats {
                drive,
                serial: format!("disk{}", drive),
                bins: (0..8).collect(),
                replaced_blocks: Some(0),
            })
            .collect();

        Self::new(EraseResult {
            duration: Duration::from_secs(2 * 60 * 60),
            drive_stats,
            min_data_rate: Some(255e6),
            max_data_rate: Some(257e6),
            stat_thresholds: Some(stat_thresholds()),
        })
    }
}

impl<T: Transport> EraseStrategy<T> for SimulatedEraser {
    fn erase(
        &mut self,
        _client: &mut Client<T>,
        _capabilities: &DeviceCapabilities,
        options: &EraseOptions,
        _progress: &mut dyn FnMut(&ProgressSample),
    ) -> DeviceResult<EraseResult> {
        tracing::warn!(mode = ?options.mode, "Dry run, device left untouched");
        let mut result = self.result.clone();
        if !options.mode.conditions() {
            result.min_data_rate = None;
            result.max_data_rate = None;
            result.stat_thresholds = None;
        }
        Ok(result)
    }
}
