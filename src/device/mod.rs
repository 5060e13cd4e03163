// Device-level operations built on the protocol client
//
// Capabilities are probed once; the bank manager and directory inspector
// consult them rather than the device.

pub mod bank;
pub mod capabilities;
pub mod directory;

pub use bank::{Bank, BankId, BankManager, BankStatus, NoBankRecognizer, NoBankRule, SwitchPolicy};
pub use capabilities::{probe, DeviceCapabilities, DeviceFamily, FirmwareVersion};
pub use directory::{dir_info, list_scans, ScanDirectory, ScanEntry};
