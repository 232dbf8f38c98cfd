///
/// device.rs
///
/// Device ownership and plugin dispatch.
///
use tracing::debug;

use crate::can::CanFrame;
use crate::config::ConnectSettings;
use crate::error::{CanBusError, Result};
use crate::virtual_can::{self, VirtualCan};
use crate::{BusStatus, CanBusDevice};

#[cfg(target_os = "linux")]
use crate::lin_can::{self, SocketCan};
#[cfg(target_os = "windows")]
use crate::win_can::{self, WindowsCan};

/// Plugin names accepted by [`AnyDevice::open`] on this platform.
pub fn available_plugins() -> Vec<&'static str> {
    let mut plugins = Vec::new();
    #[cfg(target_os = "linux")]
    plugins.push(lin_can::PLUGIN_NAME);
    #[cfg(target_os = "windows")]
    plugins.push(win_can::PLUGIN_NAME);
    plugins.push(virtual_can::PLUGIN_NAME);
    plugins
}

/// A device of any plugin available on this platform.
pub enum AnyDevice {
    Virtual(VirtualCan),
    #[cfg(target_os = "linux")]
    SocketCan(SocketCan),
    #[cfg(target_os = "windows")]
    Pipe(WindowsCan),
}

impl CanBusDevice for AnyDevice {
    fn open(settings: &ConnectSettings) -> Result<Self> {
        match settings.plugin.as_str() {
            virtual_can::PLUGIN_NAME => Ok(Self::Virtual(VirtualCan::open(settings)?)),
            #[cfg(target_os = "linux")]
            lin_can::PLUGIN_NAME => Ok(Self::SocketCan(SocketCan::open(settings)?)),
            #[cfg(target_os = "windows")]
            win_can::PLUGIN_NAME => Ok(Self::Pipe(WindowsCan::open(settings)?)),
            other => Err(CanBusError::UnknownPlugin {
                plugin: other.to_string(),
                available: available_plugins().join(", "),
            }),
        }
    }

    async fn read_frame(&mut self) -> Result<CanFrame> {
        match self {
            Self::Virtual(dev) => dev.read_frame().await,
            #[cfg(target_os = "linux")]
            Self::SocketCan(dev) => dev.read_frame().await,
            #[cfg(target_os = "windows")]
            Self::Pipe(dev) => dev.read_frame().await,
        }
    }

    async fn write_frame(&mut self, frame: CanFrame) -> Result<()> {
        match self {
            Self::Virtual(dev) => dev.write_frame(frame).await,
            #[cfg(target_os = "linux")]
            Self::SocketCan(dev) => dev.write_frame(frame).await,
            #[cfg(target_os = "windows")]
            Self::Pipe(dev) => dev.write_frame(frame).await,
        }
    }

    fn disconnect(&mut self) {
        match self {
            Self::Virtual(dev) => dev.disconnect(),
            #[cfg(target_os = "linux")]
            Self::SocketCan(dev) => dev.disconnect(),
            #[cfg(target_os = "windows")]
            Self::Pipe(dev) => dev.disconnect(),
        }
    }

    fn reset_controller(&mut self) -> Result<()> {
        match self {
            Self::Virtual(dev) => dev.reset_controller(),
            #[cfg(target_os = "linux")]
            Self::SocketCan(dev) => dev.reset_controller(),
            #[cfg(target_os = "windows")]
            Self::Pipe(dev) => dev.reset_controller(),
        }
    }

    fn bus_status(&self) -> Option<BusStatus> {
        match self {
            Self::Virtual(dev) => dev.bus_status(),
            #[cfg(target_os = "linux")]
            Self::SocketCan(dev) => dev.bus_status(),
            #[cfg(target_os = "windows")]
            Self::Pipe(dev) => dev.bus_status(),
        }
    }

    fn interpret_error_frame(&self, frame: &CanFrame) -> String {
        match self {
            Self::Virtual(dev) => dev.interpret_error_frame(frame),
            #[cfg(target_os = "linux")]
            Self::SocketCan(dev) => dev.interpret_error_frame(frame),
            #[cfg(target_os = "windows")]
            Self::Pipe(dev) => dev.interpret_error_frame(frame),
        }
    }
}

/// Single owner slot for the connected device.
///
/// At most one device is held. Replacing or releasing it hands ownership
/// over explicitly; a replaced device is disconnected before it is dropped.
pub struct DeviceHandle<D> {
    device: Option<D>,
}

impl<D> Default for DeviceHandle<D> {
    fn default() -> Self {
        Self { device: None }
    }
}

impl<D: CanBusDevice> DeviceHandle<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `device`, disconnecting and dropping the previous one.
    pub fn reset(&mut self, device: Option<D>) {
        if let Some(mut old) = std::mem::replace(&mut self.device, device) {
            debug!("replacing connected device");
            old.disconnect();
        }
    }

    /// Gives up ownership of the held device without disconnecting it.
    pub fn release(&mut self) -> Option<D> {
        self.device.take()
    }

    pub fn get(&self) -> Option<&D> {
        self.device.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut D> {
        self.device.as_mut()
    }

    pub fn is_connected(&self) -> bool {
        self.device.is_some()
    }
}
