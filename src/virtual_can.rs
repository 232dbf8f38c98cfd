///
/// virtual_can.rs
///
/// In-process CAN bus. Every device opened on the same interface name shares
/// one broadcast bus, which makes it usable without hardware and in tests.
///
use std::collections::HashMap;
use std::io::{Error as IoError, ErrorKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::can::CanFrame;
use crate::config::ConnectSettings;
use crate::error::{CanBusError, Result};
use crate::{BusStatus, CanBusDevice, now_us};

pub const PLUGIN_NAME: &str = "virtualcan";

const BUS_DEPTH: usize = 4096;

#[derive(Clone, Debug)]
struct Envelope {
    sender: u64,
    frame: CanFrame,
}

fn bus(interface: &str) -> broadcast::Sender<Envelope> {
    static BUSES: OnceLock<Mutex<HashMap<String, broadcast::Sender<Envelope>>>> = OnceLock::new();
    let buses = BUSES.get_or_init(Default::default);
    let mut buses = buses.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    buses
        .entry(interface.to_string())
        .or_insert_with(|| broadcast::channel(BUS_DEPTH).0)
        .clone()
}

pub struct VirtualCan {
    node: u64,
    interface: String,
    tx: broadcast::Sender<Envelope>,
    rx: broadcast::Receiver<Envelope>,
    receive_own: bool,
    fd_enabled: bool,
    status: BusStatus,
    connected: bool,
}

impl VirtualCan {
    /// Overrides the status reported by [`CanBusDevice::bus_status`].
    pub fn set_bus_status(&mut self, status: BusStatus) {
        self.status = status;
    }
}

impl CanBusDevice for VirtualCan {
    fn open(settings: &ConnectSettings) -> Result<Self> {
        if settings.plugin != PLUGIN_NAME {
            return Err(CanBusError::UnknownPlugin {
                plugin: settings.plugin.clone(),
                available: PLUGIN_NAME.into(),
            });
        }
        if settings.interface.is_empty() {
            return Err(CanBusError::Connection("interface name is empty".into()));
        }

        static NEXT_NODE: AtomicU64 = AtomicU64::new(1);

        let config = settings.effective_configuration();
        let tx = bus(&settings.interface);
        let rx = tx.subscribe();
        debug!(interface = %settings.interface, "virtual CAN device connected");

        Ok(Self {
            node: NEXT_NODE.fetch_add(1, Ordering::Relaxed),
            interface: settings.interface.clone(),
            tx,
            rx,
            receive_own: config.is_some_and(|c| c.receive_own),
            fd_enabled: config.is_none_or(|c| c.can_fd),
            status: BusStatus::Good,
            connected: true,
        })
    }

    async fn read_frame(&mut self) -> Result<CanFrame> {
        loop {
            if !self.connected {
                return Err(CanBusError::NotConnected);
            }
            match self.rx.recv().await {
                Ok(Envelope { sender, mut frame }) => {
                    if sender == self.node {
                        if !self.receive_own {
                            continue;
                        }
                        frame.set_local_echo(true);
                    }
                    return Ok(frame);
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(interface = %self.interface, missed, "virtual bus reader lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(CanBusError::Read(IoError::new(
                        ErrorKind::BrokenPipe,
                        "virtual bus closed",
                    )));
                }
            }
        }
    }

    async fn write_frame(&mut self, mut frame: CanFrame) -> Result<()> {
        if !self.connected {
            return Err(CanBusError::NotConnected);
        }
        if frame.is_fd() && !self.fd_enabled {
            return Err(CanBusError::Write(IoError::new(
                ErrorKind::InvalidInput,
                "CAN FD is not enabled on this device",
            )));
        }
        if frame.timestamp().is_none() {
            frame.set_timestamp(Some(now_us()));
        }
        self.tx
            .send(Envelope {
                sender: self.node,
                frame,
            })
            .map(|_| ())
            .map_err(|_| CanBusError::Write(IoError::new(ErrorKind::BrokenPipe, "virtual bus closed")))
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn reset_controller(&mut self) -> Result<()> {
        self.status = BusStatus::Good;
        Ok(())
    }

    fn bus_status(&self) -> Option<BusStatus> {
        Some(self.status)
    }
}
