///
/// can.rs
///
/// Provides an abstracted CanFrame data struct for use across operating systems,
/// covering classic, remote, error and flexible data rate (FD) frames.
///
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CanBusError, Result};

/// Bytes a classic frame occupies on the wire, as counted for bitrate estimates.
pub const CAN_MTU: usize = 16;
/// Bytes an FD frame occupies on the wire, as counted for bitrate estimates.
pub const CANFD_MTU: usize = 72;

pub const CAN_MAX_DLEN: usize = 8;
pub const CANFD_MAX_DLEN: usize = 64;

const CAN_SFF_MASK: u32 = 0x7FF;
const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;

/// Payload lengths an FD frame can carry.
const CANFD_LENGTHS: [usize; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanFrame {
    id: u32,
    data: Vec<u8>,
    dlc: usize,
    is_extended: bool,
    is_rtr: bool,
    is_error: bool,
    is_fd: bool,
    bitrate_switch: bool,
    error_state_indicator: bool,
    local_echo: bool,
    timestamp: Option<u64>,
}

impl CanFrame {
    pub fn new(id: u32, data: &[u8]) -> Result<Self> {
        Self::validate_id(id, false)?;
        Self::validate_data(data, false)?;
        Ok(Self::data_frame(id, data, false, false))
    }

    pub fn new_eff(id: u32, data: &[u8]) -> Result<Self> {
        Self::validate_id(id, true)?;
        Self::validate_data(data, false)?;
        Ok(Self::data_frame(id, data, true, false))
    }

    /// Creates a flexible data rate frame. The identifier format is picked
    /// by `is_extended`.
    pub fn new_fd(id: u32, data: &[u8], is_extended: bool) -> Result<Self> {
        Self::validate_id(id, is_extended)?;
        Self::validate_data(data, true)?;
        Ok(Self::data_frame(id, data, is_extended, true))
    }

    pub fn new_remote(id: u32, dlc: usize, is_extended: bool) -> Result<Self> {
        if dlc > CAN_MAX_DLEN {
            return Err(CanBusError::InvalidFrame("RTR frame DLC must be <= 8"));
        }
        Self::validate_id(id, is_extended)?;
        Ok(Self {
            dlc,
            is_rtr: true,
            ..Self::data_frame(id, &[], is_extended, false)
        })
    }

    /// Creates an error frame. `error_class` holds the error class bits
    /// (see [`interpret_error_frame`]), `data` the class specific details.
    pub fn new_error(error_class: u32, data: &[u8]) -> Result<Self> {
        if error_class > CAN_EFF_MASK {
            return Err(CanBusError::InvalidFrame(
                "CAN error frame ID must be <= 29 bits",
            ));
        }
        Self::validate_data(data, false)?;
        Ok(Self {
            is_error: true,
            ..Self::data_frame(error_class, data, false, false)
        })
    }

    fn data_frame(id: u32, data: &[u8], is_extended: bool, is_fd: bool) -> Self {
        Self {
            id,
            data: data.to_vec(),
            dlc: data.len(),
            is_extended,
            is_rtr: false,
            is_error: false,
            is_fd,
            bitrate_switch: false,
            error_state_indicator: false,
            local_echo: false,
            timestamp: None,
        }
    }

    /// Sets the bitrate switch flag. Only meaningful on FD frames.
    pub fn set_bitrate_switch(&mut self, on: bool) {
        self.bitrate_switch = on && self.is_fd;
    }

    /// Sets the error state indicator flag. Only meaningful on FD frames.
    pub fn set_error_state_indicator(&mut self, on: bool) {
        self.error_state_indicator = on && self.is_fd;
    }

    /// Marks the frame as an echo of one this node transmitted.
    pub fn set_local_echo(&mut self, on: bool) {
        self.local_echo = on;
    }

    /// Timestamp in microseconds since the Unix epoch.
    pub fn set_timestamp(&mut self, ts: Option<u64>) {
        self.timestamp = ts;
    }

    pub fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }

    fn validate_id(id: u32, extended: bool) -> Result<()> {
        if extended {
            if id > CAN_EFF_MASK {
                return Err(CanBusError::InvalidFrame(
                    "Extended ID must be <= 29 bits (0x1FFFFFFF)",
                ));
            }
        } else if id > CAN_SFF_MASK {
            return Err(CanBusError::InvalidFrame(
                "Standard ID must be <= 11 bits (0x7FF)",
            ));
        }
        Ok(())
    }

    fn validate_data(data: &[u8], fd: bool) -> Result<()> {
        if fd {
            if !CANFD_LENGTHS.contains(&data.len()) {
                return Err(CanBusError::InvalidFrame(
                    "CAN FD data length must be 0-8, 12, 16, 20, 24, 32, 48 or 64 bytes",
                ));
            }
        } else if data.len() > CAN_MAX_DLEN {
            return Err(CanBusError::InvalidFrame("CAN data must be <= 8 bytes"));
        }
        Ok(())
    }

    pub fn id(&self) -> u32 {
        self.id
    }
    pub fn data(&self) -> &[u8] {
        &self.data
    }
    /// Payload length, or the requested length for remote frames.
    pub fn dlc(&self) -> usize {
        self.dlc
    }
    pub fn is_extended(&self) -> bool {
        self.is_extended
    }
    pub fn is_rtr(&self) -> bool {
        self.is_rtr
    }
    pub fn is_error(&self) -> bool {
        self.is_error
    }
    pub fn is_fd(&self) -> bool {
        self.is_fd
    }
    pub fn has_bitrate_switch(&self) -> bool {
        self.bitrate_switch
    }
    pub fn has_error_state_indicator(&self) -> bool {
        self.error_state_indicator
    }
    pub fn has_local_echo(&self) -> bool {
        self.local_echo
    }

    /// Size of the frame on the wire, used for bus load estimates.
    pub fn wire_size(&self) -> usize {
        if self.is_fd { CANFD_MTU } else { CAN_MTU }
    }
}

impl fmt::Display for CanFrame {
    /// Renders the frame in the `candump`/`cansend` compact syntax.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_extended {
            write!(f, "{:08X}", self.id)?;
        } else {
            write!(f, "{:03X}", self.id)?;
        }
        if self.is_rtr {
            return write!(f, "#R{}", self.dlc);
        }
        if self.is_fd {
            let flags = u8::from(self.bitrate_switch) | (u8::from(self.error_state_indicator) << 1);
            write!(f, "##{:X}", flags)?;
        } else {
            f.write_str("#")?;
        }
        for byte in &self.data {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for CanFrame {
    type Err = CanBusError;

    /// Parses `ID#DATA`, `ID#R[len]` and `ID##<flags>DATA`.
    ///
    /// Identifiers of up to 3 hex digits are standard, 8 digits are extended.
    fn from_str(s: &str) -> Result<Self> {
        let (id_str, rest) = s
            .trim()
            .split_once('#')
            .ok_or(CanBusError::InvalidFrame("frame must be written as ID#DATA"))?;

        let is_extended = match id_str.len() {
            1..=3 => false,
            8 => true,
            _ => {
                return Err(CanBusError::InvalidFrame(
                    "frame ID must have 3 (standard) or 8 (extended) hex digits",
                ));
            }
        };
        let id = u32::from_str_radix(id_str, 16)
            .map_err(|_| CanBusError::InvalidFrame("frame ID is not hexadecimal"))?;

        if let Some(fd_rest) = rest.strip_prefix('#') {
            let mut chars = fd_rest.chars();
            let flags = chars
                .next()
                .and_then(|c| c.to_digit(16))
                .ok_or(CanBusError::InvalidFrame("FD frame needs a flags nibble after ##"))?;
            let data = parse_hex_payload(chars.as_str())?;
            let mut frame = CanFrame::new_fd(id, &data, is_extended)?;
            frame.set_bitrate_switch(flags & 0x1 != 0);
            frame.set_error_state_indicator(flags & 0x2 != 0);
            return Ok(frame);
        }

        if let Some(len) = rest.strip_prefix('R').or_else(|| rest.strip_prefix('r')) {
            let dlc = if len.is_empty() {
                0
            } else {
                len.parse::<usize>()
                    .map_err(|_| CanBusError::InvalidFrame("remote frame length is not a number"))?
            };
            return CanFrame::new_remote(id, dlc, is_extended);
        }

        let data = parse_hex_payload(rest)?;
        if is_extended {
            CanFrame::new_eff(id, &data)
        } else {
            CanFrame::new(id, &data)
        }
    }
}

fn parse_hex_payload(s: &str) -> Result<Vec<u8>> {
    let digits: Vec<char> = s.chars().filter(|c| *c != '.').collect();
    if digits.len() % 2 != 0 {
        return Err(CanBusError::InvalidFrame("payload must have an even number of hex digits"));
    }
    digits
        .chunks(2)
        .map(|pair| {
            let hi = pair[0].to_digit(16);
            let lo = pair[1].to_digit(16);
            match (hi, lo) {
                (Some(hi), Some(lo)) => Ok((hi << 4 | lo) as u8),
                _ => Err(CanBusError::InvalidFrame("payload is not hexadecimal")),
            }
        })
        .collect()
}

// Error class bits carried in the identifier of an error frame.
const ERR_TX_TIMEOUT: u32 = 0x001;
const ERR_LOSTARB: u32 = 0x002;
const ERR_CRTL: u32 = 0x004;
const ERR_PROT: u32 = 0x008;
const ERR_TRX: u32 = 0x010;
const ERR_ACK: u32 = 0x020;
const ERR_BUSOFF: u32 = 0x040;
const ERR_BUSERROR: u32 = 0x080;
const ERR_RESTARTED: u32 = 0x100;

/// Renders the error classes of an error frame as readable text.
///
/// Non-error frames yield an empty string.
pub fn interpret_error_frame(frame: &CanFrame) -> String {
    if !frame.is_error() {
        return String::new();
    }

    let class = frame.id();
    let data = frame.data();
    let byte = |i: usize| data.get(i).copied().unwrap_or(0);
    let mut parts: Vec<String> = Vec::new();

    if class & ERR_TX_TIMEOUT != 0 {
        parts.push("TX timeout".into());
    }
    if class & ERR_LOSTARB != 0 {
        parts.push(format!("Lost arbitration at bit {}", byte(0)));
    }
    if class & ERR_CRTL != 0 {
        let status = byte(1);
        let mut details = Vec::new();
        for (bit, text) in [
            (0x01, "RX buffer overflow"),
            (0x02, "TX buffer overflow"),
            (0x04, "RX error warning"),
            (0x08, "TX error warning"),
            (0x10, "RX error passive"),
            (0x20, "TX error passive"),
            (0x40, "back to error active"),
        ] {
            if status & bit != 0 {
                details.push(text);
            }
        }
        if details.is_empty() {
            parts.push("Controller problem".into());
        } else {
            parts.push(format!("Controller problem: {}", details.join(", ")));
        }
    }
    if class & ERR_PROT != 0 {
        parts.push(format!(
            "Protocol violation (type 0x{:02X}, location 0x{:02X})",
            byte(2),
            byte(3)
        ));
    }
    if class & ERR_TRX != 0 {
        parts.push(format!("Transceiver status 0x{:02X}", byte(4)));
    }
    if class & ERR_ACK != 0 {
        parts.push("No acknowledgement".into());
    }
    if class & ERR_BUSOFF != 0 {
        parts.push("Bus off".into());
    }
    if class & ERR_BUSERROR != 0 {
        parts.push("Bus error".into());
    }
    if class & ERR_RESTARTED != 0 {
        parts.push("Controller restarted".into());
    }

    if parts.is_empty() {
        "Unknown error".into()
    } else {
        parts.join("; ")
    }
}

#[cfg(target_os = "linux")]
impl From<socketcan::CanAnyFrame> for CanFrame {
    fn from(sc: socketcan::CanAnyFrame) -> Self {
        use socketcan::EmbeddedFrame;

        fn raw_id(id: socketcan::Id) -> u32 {
            match id {
                socketcan::Id::Standard(standard_id) => standard_id.as_raw() as u32,
                socketcan::Id::Extended(extended_id) => extended_id.as_raw(),
            }
        }

        // Frames coming from the kernel already satisfy the length and ID limits,
        // so the struct is built directly instead of through the validating constructors.
        match sc {
            socketcan::CanAnyFrame::Normal(frame) => {
                CanFrame::data_frame(raw_id(frame.id()), frame.data(), frame.is_extended(), false)
            }
            socketcan::CanAnyFrame::Remote(frame) => CanFrame {
                dlc: frame.dlc(),
                is_rtr: true,
                ..CanFrame::data_frame(raw_id(frame.id()), &[], frame.is_extended(), false)
            },
            socketcan::CanAnyFrame::Error(frame) => CanFrame {
                is_error: true,
                ..CanFrame::data_frame(frame.error_bits(), frame.data(), false, false)
            },
            socketcan::CanAnyFrame::Fd(frame) => CanFrame {
                bitrate_switch: frame.is_brs(),
                error_state_indicator: frame.is_esi(),
                ..CanFrame::data_frame(raw_id(frame.id()), frame.data(), frame.is_extended(), true)
            },
        }
    }
}

#[cfg(target_os = "linux")]
impl TryFrom<&CanFrame> for socketcan::CanAnyFrame {
    type Error = CanBusError;

    fn try_from(frame: &CanFrame) -> Result<Self> {
        use socketcan::EmbeddedFrame;

        let sc_id = if frame.is_extended() {
            socketcan::ExtendedId::new(frame.id()).map(socketcan::Id::Extended)
        } else {
            socketcan::StandardId::new(frame.id() as u16).map(socketcan::Id::Standard)
        }
        .ok_or(CanBusError::InvalidFrame("CAN ID out of range for its format"))?;

        if frame.is_error() {
            return Err(CanBusError::InvalidFrame("error frames cannot be transmitted"));
        }
        if frame.is_fd() {
            let mut fd = socketcan::CanFdFrame::new(sc_id, frame.data())
                .ok_or(CanBusError::InvalidFrame("invalid CAN FD payload"))?;
            fd.set_brs(frame.has_bitrate_switch());
            fd.set_esi(frame.has_error_state_indicator());
            return Ok(socketcan::CanAnyFrame::Fd(fd));
        }
        if frame.is_rtr() {
            let remote = socketcan::CanRemoteFrame::new_remote(sc_id, frame.dlc())
                .ok_or(CanBusError::InvalidFrame("invalid remote frame length"))?;
            return Ok(socketcan::CanAnyFrame::Remote(remote));
        }
        let data = socketcan::CanDataFrame::new(sc_id, frame.data())
            .ok_or(CanBusError::InvalidFrame("invalid CAN payload"))?;
        Ok(socketcan::CanAnyFrame::Normal(data))
    }
}
