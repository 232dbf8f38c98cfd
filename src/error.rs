///
/// error.rs
///
/// Error taxonomy shared by the transports, the frame log and the monitor.
///
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CanBusError {
    /// The requested plugin does not exist on this platform.
    #[error("unknown CAN bus plugin '{plugin}' (available: {available})")]
    UnknownPlugin { plugin: String, available: String },

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("read error: {0}")]
    Read(#[source] std::io::Error),

    #[error("write error: {0}")]
    Write(#[source] std::io::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("device is not connected")]
    NotConnected,

    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),

    #[error("row {row} out of range (row count {len})")]
    RowOutOfRange { row: usize, len: usize },

    #[error("column {column} out of range (column count {count})")]
    ColumnOutOfRange { column: usize, count: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file error: {0}")]
    Config(#[from] serde_json::Error),
}

impl CanBusError {
    /// True for failures to instantiate a device, as opposed to failures
    /// while connecting an instantiated one.
    pub fn is_device_creation(&self) -> bool {
        matches!(self, Self::UnknownPlugin { .. })
    }
}

pub type Result<T> = std::result::Result<T, CanBusError>;
