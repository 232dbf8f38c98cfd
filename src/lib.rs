pub mod accumulator;
pub mod activity;
pub mod can;
pub mod config;
pub mod device;
pub mod error;
pub mod format;
pub mod frame_log;
pub mod monitor;
pub mod timer;
pub mod virtual_can;

use std::fmt;

use can::CanFrame;
use config::ConnectSettings;
use error::{CanBusError, Result};

pub use device::{AnyDevice, DeviceHandle, available_plugins};
pub use frame_log::{FrameLog, LogChange};
pub use monitor::{Command, Label, Monitor, Presenter};

/// Health of the bus as reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusStatus {
    Good,
    Warning,
    Error,
    BusOff,
    Unknown,
}

impl fmt::Display for BusStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Good => "Good",
            Self::Warning => "Warning",
            Self::Error => "Error",
            Self::BusOff => "Bus Off",
            Self::Unknown => "Unknown",
        })
    }
}

pub trait CanBusDevice: Sized + Send {
    /// Creates the device described by `settings` and connects it.
    fn open(settings: &ConnectSettings) -> Result<Self>;

    /// Read a single CAN frame from the device
    fn read_frame(&mut self) -> impl std::future::Future<Output = Result<CanFrame>> + Send;

    /// Write a single CAN frame to the device
    fn write_frame(
        &mut self,
        frame: CanFrame,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Disconnects from the bus. Reads and writes fail afterwards.
    fn disconnect(&mut self) {}

    fn reset_controller(&mut self) -> Result<()> {
        Err(CanBusError::Configuration(
            "controller reset is not supported by this device".into(),
        ))
    }

    /// Current bus health, or `None` if the device cannot report it.
    fn bus_status(&self) -> Option<BusStatus> {
        None
    }

    /// Human readable description of an error frame.
    fn interpret_error_frame(&self, frame: &CanFrame) -> String {
        can::interpret_error_frame(frame)
    }
}

#[cfg(target_os = "linux")]
pub mod lin_can;

#[cfg(target_os = "windows")]
pub mod win_can;

/// Microseconds since the Unix epoch, used to stamp frames on arrival.
pub(crate) fn now_us() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
