//! Scan directory of the active pack
//!
//! `dir_info?` answers in one reply on bank-mode firmware. Elsewhere it is
//! "not applicable" and the same three numbers are assembled from
//! `scandir?`, the family's position query and `disk_size?`.

use super::capabilities::{DeviceCapabilities, DeviceFamily};
use crate::error::{DeviceError, DeviceResult};
use crate::protocol::acceptance::{self, status};
use crate::protocol::reply::{self, Reply};
use crate::protocol::{Client, Transport};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScanDirectory {
    pub scan_count: u64,
    /// End of recorded data, in bytes
    pub record_pointer: u64,
    /// Usable pack size, in bytes
    pub capacity: u64,
}

impl ScanDirectory {
    pub fn free(&self) -> u64 {
        self.capacity.saturating_sub(self.record_pointer)
    }
}

/// One recorded scan with its byte range on the pack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEntry {
    pub index: u64,
    pub name: String,
    pub start: u64,
    pub end: u64,
}

impl ScanEntry {
    pub fn length(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
}

pub fn dir_info<T: Transport>(
    client: &mut Client<T>,
    capabilities: &DeviceCapabilities,
) -> DeviceResult<ScanDirectory> {
    let reply = client.query_with("dir_info?", acceptance::DIR_INFO)?;

    let directory = if reply.status() == Some(status::NOT_APPLICABLE) {
        tracing::debug!("dir_info? not applicable, assembling directory from separate queries");
        ScanDirectory {
            scan_count: number(&client.query("scandir?")?, 2, "scandir?")?,
            record_pointer: record_pointer(client, capabilities.family)?,
            capacity: disk_capacity(client)?,
        }
    } else {
        ScanDirectory {
            scan_count: number(&reply, 2, "dir_info?")?,
            record_pointer: number(&reply, 3, "dir_info?")?,
            capacity: number(&reply, 4, "dir_info?")?,
        }
    };

    // a capacity of 0 means no drive reported a size
    if directory.capacity > 0 && directory.record_pointer > directory.capacity {
        return Err(DeviceError::malformed(
            "dir_info?",
            reply.raw(),
            format!(
                "record pointer {} beyond pack capacity {}",
                directory.record_pointer, directory.capacity
            ),
        ));
    }
    Ok(directory)
}

/// Current record pointer from `position?` or `pointers?`, depending on the
/// family
pub fn record_pointer<T: Transport>(
    client: &mut Client<T>,
    family: DeviceFamily,
) -> DeviceResult<u64> {
    let query = family.position_query();
    number(&client.query(query)?, 2, query)
}

/// Pack capacity: the smallest drive times the number of drives present.
/// The controller stripes across all drives and truncates each to the
/// smallest.
pub fn disk_capacity<T: Transport>(client: &mut Client<T>) -> DeviceResult<u64> {
    let reply = client.query("disk_size?")?;

    let sizes = reply
        .payload()
        .iter()
        .filter(|size| !size.is_empty())
        .map(|size| {
            size.parse::<u64>().map_err(|e| {
                DeviceError::malformed("disk_size?", reply.raw(), format!("drive size: {}", e))
            })
        })
        .collect::<DeviceResult<Vec<u64>>>()?;

    Ok(sizes
        .iter()
        .min()
        .map_or(0, |smallest| smallest.saturating_mul(sizes.len() as u64)))
}

/// Scans `1..=count`, selected one at a time with `scan_set=`
pub fn list_scans<T: Transport>(client: &mut Client<T>, count: u64) -> DeviceResult<Vec<ScanEntry>> {
    let mut scans = Vec::new();

    for index in 1..=count {
        let select = reply::command("scan_set", &[index.to_string().as_str()]);
        client.query(&select)?;
        let reply = client.query("scan_set?")?;

        let reported = number(&reply, 2, "scan_set?")?;
        if reported != index {
            return Err(DeviceError::malformed(
                "scan_set?",
                reply.raw(),
                format!("selected scan {} but device reports {}", index, reported),
            ));
        }

        scans.push(ScanEntry {
            index,
            name: reply.field(3).unwrap_or_default().to_string(),
            start: number(&reply, 4, "scan_set?")?,
            end: number(&reply, 5, "scan_set?")?,
        });
    }

    Ok(scans)
}

/// Volume serial number of the active pack, empty when none is set
pub fn volume_label<T: Transport>(client: &mut Client<T>) -> DeviceResult<String> {
    Ok(client.query("vsn?")?.field(2).unwrap_or_default().to_string())
}

pub(crate) fn number(reply: &Reply, index: usize, command: &str) -> DeviceResult<u64> {
    let field = reply.field(index).ok_or_else(|| {
        DeviceError::malformed(command, reply.raw(), format!("missing field {}", index))
    })?;
    field.parse::<u64>().map_err(|e| {
        DeviceError::malformed(
            command,
            reply.raw(),
            format!("field {} '{}': {}", index, field, e),
        )
    })
}
