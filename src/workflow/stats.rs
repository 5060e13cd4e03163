//! Per-drive latency statistics
//!
//! `start_stats=` sets the bucket thresholds before conditioning.
//! `get_stats?` returns one drive per call and moves the device's cursor to
//! the next drive, so reading the whole pack means walking the ring.

use crate::device::directory::number;
use crate::error::{DeviceError, DeviceResult};
use crate::protocol::reply;
use crate::protocol::{Client, Transport};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// First bucket threshold, in seconds
pub const STAT_THRESHOLD_BASE: f64 = 0.001125;

/// Number of thresholds; each doubles the previous one
pub const STAT_THRESHOLD_COUNT: u32 = 7;

/// Histogram buckets per drive, one more than there are thresholds
const STAT_BINS: usize = STAT_THRESHOLD_COUNT as usize + 1;

/// Statistics read from one drive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveStats {
    pub drive: u32,
    pub serial: String,
    /// Block counts per latency bucket
    pub bins: Vec<u64>,
    pub replaced_blocks: Option<u64>,
}

pub fn stat_thresholds() -> Vec<f64> {
    (0..STAT_THRESHOLD_COUNT)
        .map(|i| STAT_THRESHOLD_BASE * f64::from(2u32.pow(i)))
        .collect()
}

/// `start_stats=0.001125s:0.002250s:...`
pub fn start_stats_command(thresholds: &[f64]) -> String {
    let args: Vec<String> = thresholds.iter().map(|t| format!("{:.6}s", t)).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    reply::command("start_stats", &args)
}

/// Walk the `get_stats?` ring once.
///
/// Every drive that reports a serial is visited exactly once, so a pack of D
/// drives costs D queries wherever the cursor starts. A repeat of the first
/// index also ends the walk, for devices whose serial list over-reports.
pub fn collect_stats<T: Transport>(client: &mut Client<T>) -> DeviceResult<Vec<DriveStats>> {
    let serials_reply = client.query("disk_serial?")?;
    let serials: BTreeMap<u32, String> = serials_reply
        .payload()
        .iter()
        .enumerate()
        .filter(|(_, serial)| !serial.is_empty())
        .map(|(drive, serial)| (drive as u32, serial.clone()))
        .collect();

    let mut collected: BTreeMap<u32, DriveStats> = BTreeMap::new();
    let mut first = None;
    // a ring that fails to close within this many queries is not a ring
    let limit = serials_reply.payload().len() + 1;

    for _ in 0..limit {
        if serials.keys().all(|drive| collected.contains_key(drive)) {
            break;
        }

        let reply = client.query("get_stats?")?;
        let drive = number(&reply, 2, "get_stats?")? as u32;

        match first {
            None => first = Some(drive),
            Some(start) if start == drive => break,
            Some(_) => {}
        }

        let values = reply
            .fields()
            .iter()
            .skip(3)
            .map(|v| v.as_str())
            .collect::<Vec<&str>>();
        let bins = values
            .iter()
            .take(STAT_BINS)
            .map(|v| {
                v.parse::<u64>().map_err(|e| {
                    DeviceError::malformed("get_stats?", reply.raw(), format!("bin '{}': {}", v, e))
                })
            })
            .collect::<DeviceResult<Vec<u64>>>()?;
        let replaced_blocks = values.get(STAT_BINS).and_then(|v| v.parse::<u64>().ok());

        tracing::debug!(drive, ?bins, "Drive statistics");
        collected.insert(
            drive,
            DriveStats {
                drive,
                serial: serials.get(&drive).cloned().unwrap_or_default(),
                bins,
                replaced_blocks,
            },
        );
    }

    if !serials.keys().all(|drive| collected.contains_key(drive)) {
        let missing: Vec<String> = serials
            .keys()
            .filter(|drive| !collected.contains_key(drive))
            .map(u32::to_string)
            .collect();
        return Err(DeviceError::malformed(
            "get_stats?",
            serials_reply.raw(),
            format!("drives {} never reported statistics", missing.join(", ")),
        ));
    }

    Ok(collected.into_values().collect())
}
