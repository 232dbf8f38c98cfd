///
/// lin_can.rs
///
/// SocketCAN transport. Uses an FD capable raw socket in non-blocking mode,
/// driven by tokio through `AsyncFd`.
///
use std::io;

use socketcan::{CanAnyFrame, CanFdSocket, Socket, SocketOptions};
use tokio::io::unix::AsyncFd;
use tracing::{debug, warn};

use crate::can::CanFrame;
use crate::config::ConnectSettings;
use crate::error::{CanBusError, Result};
use crate::{CanBusDevice, now_us};

pub const PLUGIN_NAME: &str = "socketcan";

pub struct SocketCan {
    socket: Option<AsyncFd<CanFdSocket>>,
    interface: String,
}

impl SocketCan {
    fn socket(&self) -> Result<&AsyncFd<CanFdSocket>> {
        self.socket.as_ref().ok_or(CanBusError::NotConnected)
    }
}

impl CanBusDevice for SocketCan {
    fn open(settings: &ConnectSettings) -> Result<Self> {
        if settings.plugin != PLUGIN_NAME {
            return Err(CanBusError::UnknownPlugin {
                plugin: settings.plugin.clone(),
                available: PLUGIN_NAME.into(),
            });
        }

        let sock = CanFdSocket::open(&settings.interface)
            .map_err(|e| CanBusError::Connection(format!("{}: {}", settings.interface, e)))?;
        sock.set_nonblocking(true)?;
        sock.set_error_filter_accept_all()?;

        if let Some(config) = settings.effective_configuration() {
            sock.set_loopback(config.loopback)
                .map_err(|e| CanBusError::Configuration(format!("loopback: {}", e)))?;
            sock.set_recv_own_msgs(config.receive_own)
                .map_err(|e| CanBusError::Configuration(format!("receive own: {}", e)))?;
            if config.bitrate.is_some() || config.data_bitrate.is_some() {
                // Bit timing belongs to the netdev, not to the socket.
                warn!(
                    interface = %settings.interface,
                    "bitrates are set on the interface (ip link), ignoring configured values"
                );
            }
        }

        debug!(interface = %settings.interface, "SocketCAN socket opened");
        Ok(Self {
            socket: Some(AsyncFd::new(sock)?),
            interface: settings.interface.clone(),
        })
    }

    async fn read_frame(&mut self) -> Result<CanFrame> {
        let socket = self.socket()?;
        loop {
            let mut guard = socket.readable().await.map_err(CanBusError::Read)?;
            match guard.try_io(|inner| inner.get_ref().read_frame()) {
                Ok(result) => {
                    let mut frame = CanFrame::from(result.map_err(CanBusError::Read)?);
                    frame.set_timestamp(Some(now_us()));
                    return Ok(frame);
                }
                Err(_would_block) => continue,
            }
        }
    }

    async fn write_frame(&mut self, frame: CanFrame) -> Result<()> {
        let sc_frame = CanAnyFrame::try_from(&frame)?;
        let socket = self.socket()?;
        loop {
            let mut guard = socket.writable().await.map_err(CanBusError::Write)?;
            match guard.try_io(|inner| write_any(inner.get_ref(), &sc_frame)) {
                Ok(result) => return result.map_err(CanBusError::Write),
                Err(_would_block) => continue,
            }
        }
    }

    fn disconnect(&mut self) {
        if self.socket.take().is_some() {
            debug!(interface = %self.interface, "SocketCAN socket closed");
        }
    }
}

fn write_any(sock: &CanFdSocket, frame: &CanAnyFrame) -> io::Result<()> {
    match *frame {
        CanAnyFrame::Fd(fd) => sock.write_frame(&fd),
        CanAnyFrame::Normal(data) => sock.write_frame(&socketcan::CanFrame::Data(data)),
        CanAnyFrame::Remote(remote) => sock.write_frame(&socketcan::CanFrame::Remote(remote)),
        CanAnyFrame::Error(error) => sock.write_frame(&socketcan::CanFrame::Error(error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_fd_frame_both_ways() {
        let mut frame = CanFrame::new_fd(0x1AB_CDEF, &[0xAA; 12], true).unwrap();
        frame.set_bitrate_switch(true);
        let sc = CanAnyFrame::try_from(&frame).unwrap();
        assert!(matches!(sc, CanAnyFrame::Fd(fd) if fd.is_brs() && !fd.is_esi()));

        let back = CanFrame::from(sc);
        assert!(back.is_fd());
        assert!(back.is_extended());
        assert!(back.has_bitrate_switch());
        assert_eq!(back.id(), 0x1AB_CDEF);
        assert_eq!(back.data(), &[0xAA; 12]);
    }

    #[test]
    fn converts_classic_and_remote_frames() {
        let frame = CanFrame::new(0x123, &[1, 2]).unwrap();
        let back = CanFrame::from(CanAnyFrame::try_from(&frame).unwrap());
        assert_eq!(back, frame);

        let remote = CanFrame::new_remote(0x7FF, 3, false).unwrap();
        let back = CanFrame::from(CanAnyFrame::try_from(&remote).unwrap());
        assert!(back.is_rtr());
        assert_eq!(back.dlc(), 3);
    }

    #[test]
    fn error_frames_are_not_transmittable() {
        let frame = CanFrame::new_error(0x40, &[]).unwrap();
        assert!(CanAnyFrame::try_from(&frame).is_err());
    }

    #[test]
    fn wrong_plugin_is_a_creation_error() {
        let err = SocketCan::open(&ConnectSettings::new("virtualcan", "can0"))
            .err()
            .unwrap();
        assert!(err.is_device_creation());
    }
}
