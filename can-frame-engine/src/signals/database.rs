//! Signal database and the lookup contract used by the view
//!
//! The view only needs [`DbcLookup::find_message`]; [`DbcDatabase`] is the
//! in-memory implementation built from DBC files. Neither knows about the
//! frame store.

use crate::types::{CanFrame, EXTENDED_ID_MASK};
use crate::utility::process_integer_signal;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Capability the view uses to interpret payloads
pub trait DbcLookup: Send + Sync {
    /// Message definition matching the frame's identifier, if any
    fn find_message(&self, frame: &CanFrame) -> Option<&DbcMessage>;
}

/// RGB color attached to a message for row rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0 };
    pub const WHITE: Color = Color {
        r: 255,
        g: 255,
        b: 255,
    };

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Byte order for signal extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian (Intel format)
    LittleEndian,
    /// Big-endian (Motorola format)
    BigEndian,
}

/// Value type for signal interpretation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Signed,
    Unsigned,
}

/// Where a field sits in the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalLayout {
    /// Start bit in the CAN frame (MSB for Motorola, LSB for Intel)
    pub start_bit: u16,
    /// Length in bits
    pub length: u16,
    pub byte_order: ByteOrder,
    pub value_type: ValueType,
}

impl SignalLayout {
    /// Raw integer value of this field in `data`
    pub fn extract(&self, data: &[u8]) -> i64 {
        process_integer_signal(
            data,
            self.start_bit as usize,
            self.length as usize,
            self.byte_order == ByteOrder::LittleEndian,
            self.value_type == ValueType::Signed,
        )
    }
}

/// Multiplexer information for multiplexed signals
#[derive(Debug, Clone)]
pub struct MultiplexerInfo {
    /// Name of the multiplexer signal that controls this signal
    pub multiplexer_signal: String,
    /// Layout of the multiplexer signal
    pub selector: SignalLayout,
    /// Multiplexer value(s) for which this signal is present
    pub multiplexer_values: Vec<u64>,
}

/// Decoded physical value of a signal
#[derive(Debug, Clone, PartialEq)]
pub enum SignalValue {
    Integer(i64),
    /// Value after scaling/offset
    Float(f64),
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Integer(v) => write!(f, "{}", v),
            SignalValue::Float(v) => write!(f, "{:.3}", v),
        }
    }
}

/// A signal definition, with the last value it decoded
#[derive(Debug)]
pub struct DbcSignal {
    pub name: String,
    pub layout: SignalLayout,
    /// Scale factor to convert raw value to physical value
    pub factor: f64,
    /// Offset to add after scaling
    pub offset: f64,
    pub min: f64,
    pub max: f64,
    /// Engineering unit (e.g., "km/h", "V")
    pub unit: Option<String>,
    /// raw value -> description
    pub value_table: Option<HashMap<i64, String>>,
    /// None if not multiplexed
    pub multiplexer_info: Option<MultiplexerInfo>,
    cached_raw: Mutex<Option<i64>>,
}

impl DbcSignal {
    /// Create an unscaled, non-multiplexed signal
    pub fn new(name: impl Into<String>, layout: SignalLayout) -> Self {
        Self {
            name: name.into(),
            layout,
            factor: 1.0,
            offset: 0.0,
            min: 0.0,
            max: 0.0,
            unit: None,
            value_table: None,
            multiplexer_info: None,
            cached_raw: Mutex::new(None),
        }
    }

    /// Builder method: scaling
    pub fn with_scaling(mut self, factor: f64, offset: f64) -> Self {
        self.factor = factor;
        self.offset = offset;
        self
    }

    /// Builder method: unit
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Builder method: multiplexing
    pub fn with_multiplexer(mut self, info: MultiplexerInfo) -> Self {
        self.multiplexer_info = Some(info);
        self
    }

    pub fn is_multiplexed(&self) -> bool {
        self.multiplexer_info.is_some()
    }

    /// Whether this signal is carried by the frame (always, unless
    /// multiplexed and the selector picks another value)
    pub fn is_present_in(&self, data: &[u8]) -> bool {
        match &self.multiplexer_info {
            Some(mux) => {
                let selector = mux.selector.extract(data) as u64;
                mux.multiplexer_values.contains(&selector)
            }
            None => true,
        }
    }

    /// Physical value for a raw value
    pub fn value(&self, raw: i64) -> SignalValue {
        if self.factor == 1.0 && self.offset == 0.0 {
            SignalValue::Integer(raw)
        } else {
            SignalValue::Float(self.offset + self.factor * raw as f64)
        }
    }

    /// `name: value unit`, or `name: description` when the value table
    /// knows the raw value
    pub fn make_pretty_output(&self, raw: i64) -> String {
        if let Some(desc) = self.value_table.as_ref().and_then(|t| t.get(&raw)) {
            return format!("{}: {}", self.name, desc);
        }
        match &self.unit {
            Some(unit) => format!("{}: {} {}", self.name, self.value(raw), unit),
            None => format!("{}: {}", self.name, self.value(raw)),
        }
    }

    /// Decode this signal from the frame and remember the raw value. Returns
    /// `None` when the signal is not present in this frame.
    pub fn process_as_text(&self, frame: &CanFrame) -> Option<String> {
        if !self.is_present_in(&frame.payload) {
            return None;
        }
        let raw = self.layout.extract(&frame.payload);
        *self.cached_raw.lock() = Some(raw);
        Some(self.make_pretty_output(raw))
    }

    /// Last raw value decoded by [`process_as_text`](Self::process_as_text)
    pub fn cached_value(&self) -> Option<i64> {
        *self.cached_raw.lock()
    }

    /// Rendering of the cached value, for multiplexed signals absent from
    /// the current frame
    pub fn cached_text(&self) -> Option<String> {
        self.cached_value().map(|raw| self.make_pretty_output(raw))
    }
}

/// A complete CAN message definition
#[derive(Debug)]
pub struct DbcMessage {
    /// CAN identifier without the DBC extended-frame flag
    pub id: u32,
    pub extended: bool,
    pub name: String,
    /// Message size in bytes
    pub size: usize,
    pub sender: Option<String>,
    pub comment: String,
    pub foreground_color: Color,
    pub background_color: Color,
    pub signals: Vec<DbcSignal>,
    /// Source file (DBC filename)
    pub source: String,
}

impl DbcMessage {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            extended: id > crate::types::STANDARD_ID_MASK,
            name: name.into(),
            size: 8,
            sender: None,
            comment: String::new(),
            foreground_color: Color::BLACK,
            background_color: Color::WHITE,
            signals: Vec::new(),
            source: String::new(),
        }
    }

    /// Builder method: comment
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Builder method: row colors
    pub fn with_colors(mut self, foreground: Color, background: Color) -> Self {
        self.foreground_color = foreground;
        self.background_color = background;
        self
    }

    /// Builder method: add a signal
    pub fn with_signal(mut self, signal: DbcSignal) -> Self {
        self.signals.push(signal);
        self
    }

    pub fn is_multiplexed(&self) -> bool {
        self.signals.iter().any(|s| s.is_multiplexed())
    }
}

/// In-memory collection of message definitions keyed by identifier
#[derive(Debug, Default)]
pub struct DbcDatabase {
    /// Key: CAN ID, Value: messages with that ID (can be several from different DBCs)
    messages: HashMap<u32, Vec<DbcMessage>>,
}

impl DbcDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message definition to the database
    pub fn add_message(&mut self, message: DbcMessage) {
        self.messages.entry(message.id).or_default().push(message);
    }

    /// Get a specific message definition (first one found for given CAN ID)
    pub fn get_message(&self, can_id: u32) -> Option<&DbcMessage> {
        self.messages.get(&can_id).and_then(|msgs| msgs.first())
    }

    /// Get database statistics
    pub fn stats(&self) -> DatabaseStats {
        let num_messages: usize = self.messages.values().map(|v| v.len()).sum();
        let num_signals: usize = self
            .messages
            .values()
            .flat_map(|msgs| msgs.iter())
            .map(|msg| msg.signals.len())
            .sum();

        DatabaseStats {
            num_messages,
            num_signals,
        }
    }
}

impl DbcLookup for DbcDatabase {
    fn find_message(&self, frame: &CanFrame) -> Option<&DbcMessage> {
        self.messages
            .get(&(frame.id & EXTENDED_ID_MASK))?
            .iter()
            .find(|msg| msg.extended == frame.extended)
    }
}

/// Database statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DatabaseStats {
    /// Total number of message definitions
    pub num_messages: usize,
    /// Total number of signal definitions
    pub num_signals: usize,
}
