///
/// format.rs
///
/// Turns received frames into display rows.
///
use crate::can::CanFrame;

/// One formatted line of the frame log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayRow {
    pub number: String,
    pub time: String,
    pub flags: String,
    pub id: String,
    pub dlc: String,
    pub data: String,
}

impl DisplayRow {
    pub const COLUMN_COUNT: usize = 6;

    /// Text of the field at `column`, in header order.
    pub fn field(&self, column: usize) -> Option<&str> {
        let text = match column {
            0 => &self.number,
            1 => &self.time,
            2 => &self.flags,
            3 => &self.id,
            4 => &self.dlc,
            5 => &self.data,
            _ => return None,
        };
        Some(text.as_str())
    }

    pub fn fields(&self) -> [&str; Self::COLUMN_COUNT] {
        [
            &self.number,
            &self.time,
            &self.flags,
            &self.id,
            &self.dlc,
            &self.data,
        ]
    }
}

/// Formats `frame` as row `number`.
///
/// `error_text` replaces the payload column for error frames.
pub fn format_frame(number: u64, frame: &CanFrame, error_text: Option<String>) -> DisplayRow {
    let data = match error_text {
        Some(text) if frame.is_error() => text,
        _ => format_payload(frame.data()),
    };

    DisplayRow {
        number: number.to_string(),
        time: format_timestamp(frame.timestamp()),
        flags: frame_flags(frame),
        id: format_id(frame),
        dlc: format_dlc(frame),
        data,
    }
}

/// `" --- "` with B, E and L filled in at positions 1, 2 and 3.
pub fn frame_flags(frame: &CanFrame) -> String {
    let mut flags = *b" --- ";
    if frame.has_bitrate_switch() {
        flags[1] = b'B';
    }
    if frame.has_error_state_indicator() {
        flags[2] = b'E';
    }
    if frame.has_local_echo() {
        flags[3] = b'L';
    }
    flags.iter().map(|&b| b as char).collect()
}

pub fn format_id(frame: &CanFrame) -> String {
    if frame.is_extended() {
        format!("{:08X}", frame.id())
    } else {
        format!("     {:03X}", frame.id())
    }
}

pub fn format_dlc(frame: &CanFrame) -> String {
    let len = frame.data().len();
    if frame.is_fd() {
        format!("{:02}", len)
    } else {
        len.to_string()
    }
}

/// Seconds right-aligned in 10 columns, then the fraction in 100 µs units.
pub fn format_timestamp(timestamp_us: Option<u64>) -> String {
    let us = timestamp_us.unwrap_or(0);
    format!("{:>10}.{:04}  ", us / 1_000_000, (us % 1_000_000) / 100)
}

pub fn format_payload(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
