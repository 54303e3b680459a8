//! Core types for the CAN frame engine
//!
//! This module defines the frame record that flows through ingest, storage and
//! projection, plus the error type shared by the fallible parts of the crate
//! (file I/O, DBC loading, configuration).

use chrono::{DateTime, Utc};
use std::fmt;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Mask applied to standard (11-bit) identifiers for display
pub const STANDARD_ID_MASK: u32 = 0x7FF;

/// Mask for extended (29-bit) identifiers
pub const EXTENDED_ID_MASK: u32 = 0x1FFF_FFFF;

/// Identifiers at or above this value are capture markers, not bus traffic
pub const MARKER_ID_BASE: u32 = 0x7FFF_FFF0;

/// Kind of frame as reported by the capture source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FrameType {
    #[default]
    Data,
    RemoteRequest,
    Error,
    Unknown,
}

/// Whether the frame was seen coming in from the bus or sent by us
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    #[default]
    Received,
    Transmitted,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Received => write!(f, "Rx"),
            Direction::Transmitted => write!(f, "Tx"),
        }
    }
}

/// Aggregation key: one row per identifier per bus in aggregate mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameKey {
    pub bus: u8,
    pub id: u32,
}

/// A CAN frame as held by the frame store
///
/// `frame_count` and `time_delta_us` are derived fields: the store resets them
/// on ingest and maintains them while aggregating.
#[derive(Debug, Clone, PartialEq)]
pub struct CanFrame {
    /// CAN identifier (11-bit or 29-bit)
    pub id: u32,
    /// True if this is an extended (29-bit) identifier
    pub extended: bool,
    /// Capture bus the frame arrived on
    pub bus: u8,
    /// Frame data bytes (0-8 for classic CAN, longer for CAN-FD)
    pub payload: Vec<u8>,
    pub frame_type: FrameType,
    pub direction: Direction,
    /// Timestamp in microseconds
    pub timestamp_us: u64,
    /// Number of occurrences folded into this record (aggregate mode)
    pub frame_count: u32,
    /// Microseconds since the previous occurrence of the same key
    pub time_delta_us: i64,
}

impl Default for CanFrame {
    fn default() -> Self {
        Self {
            id: 0,
            extended: false,
            bus: 0,
            payload: Vec::new(),
            frame_type: FrameType::Data,
            direction: Direction::Received,
            timestamp_us: 0,
            frame_count: 1,
            time_delta_us: 0,
        }
    }
}

impl CanFrame {
    /// Create a received data frame with a standard identifier
    pub fn new(id: u32, payload: &[u8]) -> Self {
        Self {
            id,
            payload: payload.to_vec(),
            ..Self::default()
        }
    }

    /// Create a received data frame with an extended identifier
    pub fn new_extended(id: u32, payload: &[u8]) -> Self {
        Self {
            id,
            extended: true,
            payload: payload.to_vec(),
            ..Self::default()
        }
    }

    /// Builder method: set the bus
    pub fn with_bus(mut self, bus: u8) -> Self {
        self.bus = bus;
        self
    }

    /// Builder method: set the timestamp in microseconds
    pub fn with_timestamp(mut self, timestamp_us: u64) -> Self {
        self.timestamp_us = timestamp_us;
        self
    }

    /// Builder method: set the frame type
    pub fn with_frame_type(mut self, frame_type: FrameType) -> Self {
        self.frame_type = frame_type;
        self
    }

    /// Builder method: set the direction
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Aggregation key of this frame
    pub fn key(&self) -> FrameKey {
        FrameKey {
            bus: self.bus,
            id: self.id,
        }
    }

    /// CANopen node-id (low 7 bits), also the filter key
    pub fn node_id(&self) -> u8 {
        (self.id & 0x7F) as u8
    }

    /// Get the data length code (DLC) - number of data bytes
    pub fn dlc(&self) -> usize {
        self.payload.len()
    }

    pub fn is_remote(&self) -> bool {
        self.frame_type == FrameType::RemoteRequest
    }

    pub fn is_received(&self) -> bool {
        self.direction == Direction::Received
    }

    /// True for capture marker frames (see [`MARKER_ID_BASE`])
    pub fn is_marker(&self) -> bool {
        self.id >= MARKER_ID_BASE
    }

    /// Convert the timestamp to a wall-clock time, treating it as
    /// microseconds since the Unix epoch
    pub fn timestamp(&self) -> DateTime<Utc> {
        let secs = (self.timestamp_us / 1_000_000) as i64;
        let nsecs = ((self.timestamp_us % 1_000_000) * 1_000) as u32;
        DateTime::from_timestamp(secs, nsecs).unwrap_or_default()
    }
}

/// Errors that can occur in the fallible parts of the engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Failed to parse DBC file: {0}")]
    DbcParse(String),

    #[error("Invalid filter line: {0}")]
    InvalidFilterLine(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_defaults() {
        let frame = CanFrame::new(0x181, &[1, 2, 3]);
        assert_eq!(frame.dlc(), 3);
        assert_eq!(frame.frame_count, 1);
        assert_eq!(frame.node_id(), 0x01);
        assert!(frame.is_received());
        assert!(!frame.is_remote());
        assert!(!frame.is_marker());
    }

    #[test]
    fn test_marker_and_key() {
        let frame = CanFrame::new_extended(0x7FFF_FFF3, &[]).with_bus(2);
        assert!(frame.is_marker());
        assert_eq!(frame.key(), FrameKey { bus: 2, id: 0x7FFF_FFF3 });
    }

    #[test]
    fn test_timestamp_conversion() {
        let frame = CanFrame::new(0x100, &[]).with_timestamp(1_500_000);
        let ts = frame.timestamp();
        assert_eq!(ts.timestamp(), 1);
        assert_eq!(ts.timestamp_subsec_micros(), 500_000);
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::Received.to_string(), "Rx");
        assert_eq!(Direction::Transmitted.to_string(), "Tx");
    }
}
