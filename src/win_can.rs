///
/// win_can.rs
///
/// Named-pipe transport for Windows. A pipe server bridging the CAN adapter
/// must already serve `can_<iface>_out` (frames to us) and `can_<iface>_in`.
///
use std::io::{Error as IoError, ErrorKind};

use bincode;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeClient};
use tracing::debug;

use crate::can::CanFrame;
use crate::config::ConnectSettings;
use crate::error::{CanBusError, Result};
use crate::{CanBusDevice, now_us};

pub const PLUGIN_NAME: &str = "pipe";

pub struct WindowsCan {
    reader: Option<BufReader<NamedPipeClient>>,
    writer: Option<NamedPipeClient>,
}

fn pipe_name(channel: &str, direction: &str) -> String {
    let sanitized = channel
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>();
    format!(r"\\.\pipe\can_{}_{}", sanitized, direction)
}

impl CanBusDevice for WindowsCan {
    /// Opens the read and write pipes for `settings.interface`, usually a COM
    /// port name such as COM5.
    fn open(settings: &ConnectSettings) -> Result<Self> {
        if settings.plugin != PLUGIN_NAME {
            return Err(CanBusError::UnknownPlugin {
                plugin: settings.plugin.clone(),
                available: PLUGIN_NAME.into(),
            });
        }

        let connect = |direction: &str| {
            let name = pipe_name(&settings.interface, direction);
            ClientOptions::new()
                .open(&name)
                .map_err(|e| CanBusError::Connection(format!("{}: {}", name, e)))
        };
        let out_pipe = connect("out")?;
        let in_pipe = connect("in")?;
        debug!(interface = %settings.interface, "named pipes opened");

        Ok(Self {
            reader: Some(BufReader::new(out_pipe)),
            writer: Some(in_pipe),
        })
    }

    async fn read_frame(&mut self) -> Result<CanFrame> {
        let reader = self.reader.as_mut().ok_or(CanBusError::NotConnected)?;

        let mut buf = Vec::with_capacity(1000);
        let num_bytes = reader.read_buf(&mut buf).await.map_err(CanBusError::Read)?;
        if num_bytes == 0 {
            return Err(CanBusError::Read(IoError::new(
                ErrorKind::UnexpectedEof,
                "Pipe closed. EOF was reached (closed connection) or buffer was full",
            )));
        }

        match bincode::serde::decode_from_slice::<CanFrame, _>(&buf, bincode::config::standard()) {
            Ok((mut frame, _)) => {
                if frame.timestamp().is_none() {
                    frame.set_timestamp(Some(now_us()));
                }
                Ok(frame)
            }
            Err(e) => Err(CanBusError::Read(IoError::new(ErrorKind::InvalidData, e))),
        }
    }

    async fn write_frame(&mut self, frame: CanFrame) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(CanBusError::NotConnected)?;

        let data = bincode::serde::encode_to_vec(frame, bincode::config::standard())
            .map_err(|e| CanBusError::Write(IoError::new(ErrorKind::InvalidData, e)))?;
        writer.write_all(&data).await.map_err(CanBusError::Write)?;
        writer.write_all(b"\n").await.map_err(CanBusError::Write)?;
        writer.flush().await.map_err(CanBusError::Write)?;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.reader = None;
        self.writer = None;
    }
}
