pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod protocol;
pub mod ui;
pub mod workflow;

// Re-export the main entry points for convenience
pub use clock::{Clock, SystemClock};
pub use crate::config::Settings;
pub use device::{
    dir_info, list_scans, probe, Bank, BankId, BankManager, BankStatus, DeviceCapabilities,
    DeviceFamily, ScanDirectory, ScanEntry,
};
pub use error::{DeviceError, DeviceResult};
pub use protocol::{Client, Reply, TcpTransport, Transport};
pub use workflow::{
    DeviceEraser, EraseMode, EraseOptions, EraseResult, EraseStrategy, ProgressSample,
    SimulatedEraser,
};
