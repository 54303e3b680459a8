//! Number formatting and bit-field helpers
//!
//! Everything here is a pure function of its inputs plus the
//! [`DisplayConfig`] passed in; there are no process-wide mode flags.

use crate::config::{DisplayConfig, TimestampMode};
use chrono::{DateTime, Utc};
use std::fmt::Write;

/// Parse a number written as `0x..`/`x..` (hex), `0b..`/`b..` (binary) or
/// plain decimal. Unparseable input yields 0.
pub fn parse_number(input: &str) -> u64 {
    let input = input.trim().to_ascii_uppercase();

    if let Some(hex) = input
        .strip_prefix("0X")
        .or_else(|| input.strip_prefix('X'))
    {
        return u64::from_str_radix(hex, 16).unwrap_or(0);
    }

    if let Some(bin) = input
        .strip_prefix("0B")
        .or_else(|| input.strip_prefix('B'))
    {
        return bin
            .bytes()
            .filter(|b| *b == b'0' || *b == b'1')
            .fold(0u64, |acc, b| (acc << 1) | u64::from(b == b'1'));
    }

    input.parse::<i64>().map(|v| v as u64).unwrap_or(0)
}

/// Uppercase hex with a `0x` prefix, promoted to 2, 4, 8 or 16 digits
pub fn format_hex_num(value: u64) -> String {
    if value < 0x100 {
        format!("0x{:02X}", value)
    } else if value < 0x1_0000 {
        format!("0x{:04X}", value)
    } else if value < 0x1_0000_0000 {
        format!("0x{:08X}", value)
    } else {
        format!("0x{:016X}", value)
    }
}

/// Decimal or promoted hex depending on the display mode
pub fn format_number(value: u64, display: &DisplayConfig) -> String {
    if display.decimal_mode() {
        value.to_string()
    } else {
        format_hex_num(value)
    }
}

/// Identifier as 3 hex digits (standard, masked to 11 bits), 8 hex digits
/// (extended) or decimal
pub fn format_can_id(id: u32, extended: bool, display: &DisplayConfig) -> String {
    if display.decimal_mode() {
        return id.to_string();
    }

    if extended {
        format!("0x{:08X}", id)
    } else {
        format!("0x{:03X}", id & crate::types::STANDARD_ID_MASK)
    }
}

pub fn format_byte_as_binary(value: u8) -> String {
    format!("{:08b}", value)
}

/// A timestamp after display-mode dispatch, before text rendering
#[derive(Debug, Clone, PartialEq)]
pub enum TimestampValue {
    Micros(u64),
    Seconds(f64),
    DateTime(DateTime<Utc>),
}

pub fn timestamp_value(timestamp_us: u64, display: &DisplayConfig) -> TimestampValue {
    match display.timestamp_mode {
        TimestampMode::Raw => TimestampValue::Micros(timestamp_us),
        TimestampMode::Seconds => TimestampValue::Seconds(timestamp_us as f64 / 1_000_000.0),
        TimestampMode::SystemTime => {
            let secs = (timestamp_us / 1_000_000) as i64;
            let nsecs = ((timestamp_us % 1_000_000) * 1_000) as u32;
            TimestampValue::DateTime(DateTime::from_timestamp(secs, nsecs).unwrap_or_default())
        }
    }
}

/// Render a log-mode timestamp: all digits for raw, five decimals (never
/// scientific) for seconds, `time_format` for wall-clock time
pub fn format_timestamp(timestamp_us: u64, display: &DisplayConfig) -> String {
    match timestamp_value(timestamp_us, display) {
        TimestampValue::Micros(us) => us.to_string(),
        TimestampValue::Seconds(secs) => format!("{:.5}", secs),
        TimestampValue::DateTime(dt) => {
            let mut out = String::new();
            if write!(out, "{}", dt.format(&display.time_format)).is_err() {
                log::warn!(
                    "Invalid time format {:?}, falling back to RFC 3339",
                    display.time_format
                );
                return dt.to_rfc3339();
            }
            out
        }
    }
}

/// Render a signed microsecond delta, as seconds with five decimals in
/// seconds mode
pub fn format_time_delta(delta_us: i64, display: &DisplayConfig) -> String {
    if display.seconds_mode() {
        format!("{:.5}", delta_us as f64 / 1_000_000.0)
    } else {
        delta_us.to_string()
    }
}

/// Walks the bit positions a signal occupies, in the order its bits are
/// accumulated (LSB first for Intel, MSB first for Motorola).
///
/// Motorola signals run from high to low bit within a byte and continue at
/// the top of the next byte: stepping off bit 0 of a byte jumps +15.
fn signal_bits(start_bit: usize, size: usize, little_endian: bool) -> impl Iterator<Item = usize> {
    let mut bit = start_bit;
    (0..size).map(move |_| {
        let current = bit;
        if little_endian {
            bit += 1;
        } else if bit % 8 == 0 {
            bit += 15;
        } else {
            bit -= 1;
        }
        current
    })
}

/// Extract an integer signal from a payload
///
/// Bit numbering within a byte is LSB = 0. `size` is capped at 64. When
/// `signed` is set and the top bit of the field is set, the result is
/// sign-extended to a negative 64-bit value. A payload too short for the
/// field yields 0.
pub fn process_integer_signal(
    data: &[u8],
    start_bit: usize,
    size: usize,
    little_endian: bool,
    signed: bool,
) -> i64 {
    let size = size.min(64);
    if size == 0 || data.len() < (start_bit + size) / 8 {
        return 0;
    }

    let mut result: u64 = 0;
    for (bitpos, bit) in signal_bits(start_bit, size, little_endian).enumerate() {
        let Some(byte) = data.get(bit / 8) else {
            return 0;
        };
        if byte & (1 << (bit % 8)) != 0 {
            let weight = if little_endian { bitpos } else { size - bitpos - 1 };
            result |= 1u64 << weight;
        }
    }

    if signed && size < 64 && result & (1u64 << (size - 1)) != 0 {
        result |= !((1u64 << size) - 1);
    }

    result as i64
}

/// Write the low `size` bits of `value` into `data` using the same bit
/// traversal as [`process_integer_signal`]. Returns false, leaving `data`
/// untouched, if the field does not fit.
pub fn encode_integer_signal(
    data: &mut [u8],
    start_bit: usize,
    size: usize,
    little_endian: bool,
    value: i64,
) -> bool {
    let size = size.min(64);
    if size == 0 {
        return true;
    }
    if signal_bits(start_bit, size, little_endian).any(|bit| bit / 8 >= data.len()) {
        return false;
    }

    let value = value as u64;
    for (bitpos, bit) in signal_bits(start_bit, size, little_endian).enumerate() {
        let weight = if little_endian { bitpos } else { size - bitpos - 1 };
        let mask = 1u8 << (bit % 8);
        if value & (1u64 << weight) != 0 {
            data[bit / 8] |= mask;
        } else {
            data[bit / 8] &= !mask;
        }
    }
    true
}
