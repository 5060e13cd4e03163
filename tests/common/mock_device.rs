#![allow(dead_code)]

/// Simulated recorder for integration tests
///
/// Answers the control protocol from in-memory state instead of a socket:
/// two banks holding packs, a scan directory per pack, a bank switch that
/// stays busy for a configurable number of polls, a conditioning transfer
/// driven by a list of record pointers, and the `get_stats?` drive ring.
use mk5ctl::error::{DeviceError, DeviceResult};
use mk5ctl::Transport;
use std::collections::VecDeque;

/// Bytes per drive in the default pack; eight of them make 10^11
pub const DEFAULT_DISK_SIZE: u64 = 12_500_000_000;

#[derive(Debug, Clone, PartialEq)]
pub struct MockScan {
    pub name: String,
    pub start: u64,
    pub end: u64,
}

/// One disk pack: its label, drives and recorded scans
#[derive(Debug, Clone, PartialEq)]
pub struct MockPack {
    pub vsn: String,
    pub disk_sizes: Vec<u64>,
    /// Empty for a slot without a drive
    pub serials: Vec<String>,
    pub scans: Vec<MockScan>,
    pub record_pointer: u64,
}

impl MockPack {
    pub fn new(vsn: &str, drives: usize, disk_size: u64) -> Self {
        Self {
            vsn: vsn.to_string(),
            disk_sizes: vec![disk_size; drives],
            serials: (0..drives).map(|drive| format!("{}-D{}", vsn, drive)).collect(),
            scans: Vec::new(),
            record_pointer: 0,
        }
    }

    /// Append a scan of `length` bytes at the record pointer
    pub fn with_scan(mut self, name: &str, length: u64) -> Self {
        let start = self.record_pointer;
        self.scans.push(MockScan {
            name: name.to_string(),
            start,
            end: start + length,
        });
        self.record_pointer = start + length;
        self
    }

    /// Leave drive slot `drive` empty
    pub fn without_drive(mut self, drive: usize) -> Self {
        self.serials[drive].clear();
        self
    }

    pub fn capacity(&self) -> u64 {
        self.disk_sizes
            .iter()
            .min()
            .map_or(0, |smallest| smallest * self.disk_sizes.len() as u64)
    }
}

pub struct SimulatedDevice {
    dts_id: String,
    version: Option<String>,
    bank_mode: bool,
    banks: [Option<MockPack>; 2],
    active: usize,
    dir_info_supported: bool,
    switch_polls: u32,
    reject_switch: bool,
    stats_cursor: usize,
    condition_offsets: Vec<u64>,
    conditioning_clears_vsn: bool,
    label_write_fails: bool,

    pending_switch: Option<(usize, u32)>,
    transfer: Option<VecDeque<u64>>,
    unprotected: bool,
    selected_scan: u64,
    last_error: Option<(u32, String)>,
    pending_reply: Option<String>,
    lines: Vec<String>,
    log: Vec<String>,
}

impl SimulatedDevice {
    /// Mark5B on jive5ab 2.8.1 in bank mode. Bank A is active with an empty
    /// 10^11 byte pack, bank B holds a second pack.
    pub fn new() -> Self {
        Self {
            dts_id: "mark5b".to_string(),
            version: Some("2.8.1".to_string()),
            bank_mode: true,
            banks: [
                Some(MockPack::new("EVN+0012", 8, DEFAULT_DISK_SIZE)),
                Some(MockPack::new("JIV-0007", 8, DEFAULT_DISK_SIZE)),
            ],
            active: 0,
            dir_info_supported: true,
            switch_polls: 0,
            reject_switch: false,
            stats_cursor: 0,
            condition_offsets: Vec::new(),
            conditioning_clears_vsn: false,
            label_write_fails: false,
            pending_switch: None,
            transfer: None,
            unprotected: false,
            selected_scan: 0,
            last_error: None,
            pending_reply: None,
            lines: Vec::new(),
            log: Vec::new(),
        }
    }

    pub fn with_dts_id(mut self, dts_id: &str) -> Self {
        self.dts_id = dts_id.to_string();
        self
    }

    /// `None` makes `version?` an unknown keyword
    pub fn with_version(mut self, version: Option<&str>) -> Self {
        self.version = version.map(str::to_string);
        self
    }

    /// Non-bank recording: one pack, `bank_set?` answers `nb`
    pub fn non_bank(mut self) -> Self {
        self.bank_mode = false;
        self
    }

    pub fn with_pack(mut self, bank: usize, pack: Option<MockPack>) -> Self {
        self.banks[bank] = pack;
        self
    }

    pub fn with_active(mut self, bank: usize) -> Self {
        self.active = bank;
        self
    }

    /// `dir_info?` answers "not applicable", as older firmware does
    pub fn without_dir_info(mut self) -> Self {
        self.dir_info_supported = false;
        self
    }

    /// Busy replies to `bank_set?` before a switch completes
    pub fn with_switch_polls(mut self, polls: u32) -> Self {
        self.switch_polls = polls;
        self
    }

    /// Switches complete but leave the active bank unchanged
    pub fn rejecting_switch(mut self) -> Self {
        self.reject_switch = true;
        self
    }

    /// Drive slot the `get_stats?` cursor starts at
    pub fn with_stats_start(mut self, drive: usize) -> Self {
        self.stats_cursor = drive;
        self
    }

    /// Record pointers reported while conditioning, one per sample. The
    /// transfer ends once they are used up.
    pub fn with_condition_offsets(mut self, offsets: &[u64]) -> Self {
        self.condition_offsets = offsets.to_vec();
        self
    }

    /// The conditioning pass wipes the volume label
    pub fn conditioning_clears_vsn(mut self) -> Self {
        self.conditioning_clears_vsn = true;
        self
    }

    /// `vsn=` fails even with the protect override in place
    pub fn failing_label_write(mut self) -> Self {
        self.label_write_fails = true;
        self
    }

    /// Request lines as written by the client, batches intact
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Every command received, batches split into their parts
    pub fn log(&self) -> &[String] {
        &self.log
    }

    pub fn count(&self, command: &str) -> usize {
        self.log.iter().filter(|sent| sent.as_str() == command).count()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.log.iter().filter(|sent| sent.starts_with(prefix)).count()
    }

    pub fn active_bank(&self) -> usize {
        self.active
    }

    pub fn pack(&self, bank: usize) -> Option<&MockPack> {
        self.banks[bank].as_ref()
    }

    pub fn is_transferring(&self) -> bool {
        self.transfer.is_some()
    }

    fn active_pack(&self) -> Option<&MockPack> {
        self.banks[self.active].as_ref()
    }

    fn active_pack_mut(&mut self) -> Option<&mut MockPack> {
        self.banks[self.active].as_mut()
    }

    fn handle(&mut self, command: &str) -> String {
        self.log.push(command.to_string());

        let (keyword, separator, arguments) = match command.find(['?', '=']) {
            Some(at) => (&command[..at], &command[at..at + 1], &command[at + 1..]),
            None => (command, "", ""),
        };
        let arguments: Vec<String> = if arguments.is_empty() {
            Vec::new()
        } else {
            arguments.split(':').map(|a| a.trim().to_string()).collect()
        };

        // the protect override covers only the command right after it
        let protected = !std::mem::take(&mut self.unprotected);
        let (status, fields) = self.respond(keyword, separator, &arguments, protected);

        let mut reply = format!("!{}{} {}", keyword, separator, status);
        for field in fields {
            reply.push_str(" : ");
            reply.push_str(&field);
        }
        reply.push_str(" ;");
        reply
    }

    fn respond(
        &mut self,
        keyword: &str,
        separator: &str,
        arguments: &[String],
        protected: bool,
    ) -> (u32, Vec<String>) {
        let argument = arguments.first().map(String::as_str).unwrap_or("");
        let mark5a = self.dts_id == "mark5A";

        match (keyword, separator) {
            ("dts_id", "?") => (0, vec![self.dts_id.clone()]),
            ("version", "?") => match &self.version {
                Some(version) => (0, vec!["jive5ab".to_string(), version.clone()]),
                None => (7, vec!["no such keyword".to_string()]),
            },
            ("echo", "=") => (0, Vec::new()),
            ("bank_set", "?") => self.bank_query(),
            ("bank_set", "=") => self.request_switch(argument),
            ("error", "?") => match self.last_error.take() {
                Some((number, message)) => (0, vec![number.to_string(), message]),
                None => (0, vec!["0".to_string(), "no error".to_string()]),
            },
            ("dir_info", "?") if !self.dir_info_supported => {
                (6, vec!["not applicable".to_string()])
            }
            ("dir_info", "?") => match self.active_pack() {
                Some(pack) => (
                    0,
                    vec![
                        pack.scans.len().to_string(),
                        pack.record_pointer.to_string(),
                        pack.capacity().to_string(),
                    ],
                ),
                None => (6, vec!["no pack".to_string()]),
            },
            ("scandir", "?") => (0, vec![self.scans().len().to_string()]),
            ("position", "?") if mark5a => self.record_pointer(),
            ("pointers", "?") if !mark5a => self.record_pointer(),
            ("disk_size", "?") => (
                0,
                self.active_pack()
                    .map(|pack| pack.disk_sizes.iter().map(u64::to_string).collect())
                    .unwrap_or_default(),
            ),
            ("scan_set", "=") => match argument.parse::<u64>() {
                Ok(index) if index >= 1 && index as usize <= self.scans().len() => {
                    self.selected_scan = index;
                    (0, Vec::new())
                }
                _ => (8, vec!["no such scan".to_string()]),
            },
            ("scan_set", "?") => {
                let index = self.selected_scan;
                match self.scans().get(index.saturating_sub(1) as usize) {
                    Some(scan) if index > 0 => (
                        0,
                        vec![
                            index.to_string(),
                            scan.name.clone(),
                            scan.start.to_string(),
                            scan.end.to_string(),
                        ],
                    ),
                    _ => (6, vec!["no scan selected".to_string()]),
                }
            }
            ("disk_serial", "?") => (
                0,
                self.active_pack()
                    .map(|pack| pack.serials.clone())
                    .unwrap_or_default(),
            ),
            ("get_stats", "?") => self.next_stats(),
            ("start_stats", "=") => (0, Vec::new()),
            ("protect", "=") if argument == "off" => {
                self.unprotected = true;
                (0, Vec::new())
            }
            ("reset", "=") => self.reset(argument, protected),
            ("tstat", "=") | ("tstat", "?") => match &self.transfer {
                Some(remaining) if !remaining.is_empty() => (
                    0,
                    vec!["1.0".to_string(), "condition".to_string(), "1".to_string()],
                ),
                _ => {
                    self.transfer = None;
                    (0, vec!["0.0".to_string(), "no_transfer".to_string()])
                }
            },
            ("vsn", "?") => (
                0,
                vec![self.active_pack().map(|p| p.vsn.clone()).unwrap_or_default()],
            ),
            ("vsn", "=") if protected => (4, vec!["protected".to_string()]),
            ("vsn", "=") if self.label_write_fails => (4, vec!["write failed".to_string()]),
            ("vsn", "=") => match self.active_pack_mut() {
                Some(pack) => {
                    pack.vsn = argument.to_string();
                    (0, Vec::new())
                }
                None => (6, vec!["no pack".to_string()]),
            },
            _ => (7, vec!["no such keyword".to_string()]),
        }
    }

    fn scans(&self) -> &[MockScan] {
        self.active_pack().map(|pack| pack.scans.as_slice()).unwrap_or(&[])
    }

    fn slot(&self, bank: usize) -> [String; 2] {
        let letter = if bank == 0 { "A" } else { "B" };
        match &self.banks[bank] {
            Some(pack) => [letter.to_string(), pack.vsn.clone()],
            None => ["-".to_string(), String::new()],
        }
    }

    fn bank_query(&mut self) -> (u32, Vec<String>) {
        if !self.bank_mode {
            let vsn = self.active_pack().map(|p| p.vsn.clone()).unwrap_or_default();
            return (
                0,
                vec!["nb".to_string(), vsn, "nb".to_string(), String::new()],
            );
        }

        if let Some((target, remaining)) = self.pending_switch {
            if remaining > 0 {
                self.pending_switch = Some((target, remaining - 1));
                return (5, vec!["switching".to_string()]);
            }
            self.pending_switch = None;
            if self.reject_switch {
                self.last_error = Some((1006, "Bank switch failed".to_string()));
            } else {
                self.active = target;
            }
        }

        let mut fields = Vec::with_capacity(4);
        fields.extend(self.slot(self.active));
        fields.extend(self.slot(1 - self.active));
        (0, fields)
    }

    fn request_switch(&mut self, argument: &str) -> (u32, Vec<String>) {
        if !self.bank_mode {
            return (6, vec!["not in bank mode".to_string()]);
        }
        let target = match argument {
            "A" => 0,
            "B" => 1,
            _ => return (8, vec!["bank must be A or B".to_string()]),
        };
        if self.banks[target].is_none() {
            return (6, vec!["nothing mounted".to_string()]);
        }
        self.pending_switch = Some((target, self.switch_polls));
        (1, Vec::new())
    }

    fn record_pointer(&mut self) -> (u32, Vec<String>) {
        let pointer = match self.transfer.as_mut() {
            Some(remaining) => remaining.pop_front().unwrap_or(0),
            None => self.active_pack().map_or(0, |pack| pack.record_pointer),
        };
        (0, vec![pointer.to_string(), "0".to_string(), "0".to_string()])
    }

    fn reset(&mut self, argument: &str, protected: bool) -> (u32, Vec<String>) {
        match argument {
            "abort" => match self.transfer.take() {
                Some(_) => (0, Vec::new()),
                None => (6, vec!["no transfer".to_string()]),
            },
            _ if protected => (4, vec!["protected".to_string()]),
            "erase" => match self.active_pack_mut() {
                Some(pack) => {
                    pack.scans.clear();
                    pack.record_pointer = 0;
                    (0, Vec::new())
                }
                None => (6, vec!["no pack".to_string()]),
            },
            "condition" => {
                if self.conditioning_clears_vsn {
                    if let Some(pack) = self.active_pack_mut() {
                        pack.vsn.clear();
                    }
                }
                self.transfer = Some(self.condition_offsets.iter().copied().collect());
                (1, Vec::new())
            }
            _ => (2, vec!["unrecognized control argument".to_string()]),
        }
    }

    fn next_stats(&mut self) -> (u32, Vec<String>) {
        let serials = self
            .active_pack()
            .map(|pack| pack.serials.clone())
            .unwrap_or_default();
        let drives = serials.len();
        let drive = (0..drives)
            .map(|step| (self.stats_cursor + step) % drives)
            .find(|drive| !serials[*drive].is_empty());

        match drive {
            None => (6, vec!["no drives".to_string()]),
            Some(drive) => {
                self.stats_cursor = (drive + 1) % drives;
                let mut fields = vec![drive.to_string()];
                fields.push((100 + drive).to_string());
                fields.push(drive.to_string());
                fields.extend(std::iter::repeat("0".to_string()).take(6));
                fields.push(drive.to_string());
                (0, fields)
            }
        }
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimulatedDevice {
    fn send_line(&mut self, line: &str) -> DeviceResult<()> {
        self.lines.push(line.to_string());
        let reply: String = line
            .split(';')
            .map(str::trim)
            .filter(|command| !command.is_empty())
            .map(|command| self.handle(command))
            .collect();
        self.pending_reply = Some(reply);
        Ok(())
    }

    fn receive_line(&mut self, context: &str) -> DeviceResult<String> {
        self.pending_reply.take().ok_or_else(|| DeviceError::Timeout {
            command: context.to_string(),
        })
    }
}
