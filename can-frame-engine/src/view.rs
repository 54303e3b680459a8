//! Tabular projection of the filtered frames
//!
//! Rows are indices into [`FrameModel::filtered`]; columns are the fixed
//! [`Column`] set. Cell text depends on the display flags, on the store
//! mode (aggregate rows show deltas and counts) and, for the data column,
//! on the DBC lookup.

use crate::canopen::{self, decode_sdo, SdoRole};
use crate::config::DisplayConfig;
use crate::signals::{Color, DbcLookup};
use crate::store::FrameModel;
use crate::types::CanFrame;
use crate::utility::{format_can_id, format_time_delta, format_timestamp};
use byteorder::{BigEndian, ByteOrder};
use std::fmt::Write;

/// Table columns, in display order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    TimeStamp,
    FrameId,
    Extended,
    Remote,
    Direction,
    Bus,
    Length,
    Ascii,
    Data,
    CanOpenFunction,
    CanOpenNode,
}

impl Column {
    pub const ALL: [Column; 11] = [
        Column::TimeStamp,
        Column::FrameId,
        Column::Extended,
        Column::Remote,
        Column::Direction,
        Column::Bus,
        Column::Length,
        Column::Ascii,
        Column::Data,
        Column::CanOpenFunction,
        Column::CanOpenNode,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn from_index(index: usize) -> Option<Column> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Header label; two columns change meaning in aggregate mode
    pub fn header(self, aggregate: bool) -> &'static str {
        match self {
            Column::TimeStamp if aggregate => "Time Delta",
            Column::TimeStamp => "Timestamp",
            Column::FrameId => "COB-ID",
            Column::Extended => "Ext",
            Column::Remote if aggregate => "Cnt",
            Column::Remote => "RTR",
            Column::Direction => "Dir",
            Column::Bus => "Bus",
            Column::Length => "Len",
            Column::Ascii => "ASCII",
            Column::Data => "Data",
            Column::CanOpenFunction => "Func",
            Column::CanOpenNode => "Node",
        }
    }
}

/// Numeric projection of a column used for sorting
pub fn sort_key(frame: &CanFrame, column: Column, aggregate: bool) -> u64 {
    match column {
        // A negative delta (out-of-order capture) wraps and sorts last
        Column::TimeStamp if aggregate => frame.time_delta_us as u64,
        Column::TimeStamp => frame.timestamp_us,
        Column::FrameId => frame.id as u64,
        Column::Extended => frame.extended as u64,
        Column::Remote if aggregate => frame.frame_count as u64,
        Column::Remote => frame.is_remote() as u64,
        Column::Direction => frame.is_received() as u64,
        Column::Bus => frame.bus as u64,
        Column::Length => frame.dlc() as u64,
        Column::Ascii | Column::Data => {
            let mut packed = [0u8; 8];
            let n = frame.payload.len().min(8);
            packed[..n].copy_from_slice(&frame.payload[..n]);
            BigEndian::read_u64(&packed)
        }
        Column::CanOpenFunction => (frame.id >> 7) as u64,
        Column::CanOpenNode => (frame.id & 0x7F) as u64,
    }
}

/// Everything besides the frame that cell text depends on
#[derive(Clone, Copy)]
pub struct CellContext<'a> {
    pub display: &'a DisplayConfig,
    pub aggregate: bool,
    pub dbc: Option<&'a dyn DbcLookup>,
}

/// Text of one cell
pub fn format_cell(frame: &CanFrame, column: Column, ctx: &CellContext<'_>) -> String {
    let display = ctx.display;
    match column {
        Column::TimeStamp if ctx.aggregate => format_time_delta(frame.time_delta_us, display),
        Column::TimeStamp => format_timestamp(frame.timestamp_us, display),
        Column::FrameId => format_can_id(frame.id, frame.extended, display),
        Column::Extended => u8::from(frame.extended).to_string(),
        Column::Remote if ctx.aggregate => frame.frame_count.to_string(),
        Column::Remote => u8::from(frame.is_remote()).to_string(),
        Column::Direction => frame.direction.to_string(),
        Column::Bus => frame.bus.to_string(),
        Column::Length => frame.dlc().to_string(),
        Column::Ascii => ascii_text(frame),
        Column::Data => data_text(frame, ctx),
        Column::CanOpenFunction => canopen::format_function(frame.id, frame.extended),
        Column::CanOpenNode => canopen::format_node(frame.id, frame.extended, display),
    }
}

/// Marker label, RTR note or SDO description
fn ascii_text(frame: &CanFrame) -> String {
    if frame.is_marker() {
        return format!("MARK {}", frame.id & 0x7);
    }
    if frame.is_remote() {
        return "Remote request frame".to_string();
    }
    SdoRole::of(frame.id, frame.extended)
        .and_then(|role| decode_sdo(role, &frame.payload))
        .map(|sdo| sdo.to_string())
        .unwrap_or_default()
}

/// Payload bytes, followed by the decoded message when interpretation is on
fn data_text(frame: &CanFrame, ctx: &CellContext<'_>) -> String {
    if frame.is_remote() {
        return String::new();
    }

    let bytes: Vec<String> = frame
        .payload
        .iter()
        .map(|b| {
            if ctx.display.hex_mode {
                format!("{:02X}", b)
            } else {
                b.to_string()
            }
        })
        .collect();
    let mut text = bytes.join(" ");

    if !ctx.display.interpret_frames {
        return text;
    }
    let Some(msg) = ctx.dbc.and_then(|db| db.find_message(frame)) else {
        return text;
    };

    let _ = writeln!(text, "   <{}>", msg.name);
    if msg.comment.len() > 1 {
        let _ = writeln!(text, "{}", msg.comment);
    }
    for signal in &msg.signals {
        match signal.process_as_text(frame) {
            Some(line) => {
                let _ = writeln!(text, "{}", line);
            }
            None if signal.is_multiplexed() && ctx.aggregate => {
                if let Some(line) = signal.cached_text() {
                    let _ = writeln!(text, "{}", line);
                }
            }
            None => {}
        }
    }
    text
}

/// Foreground and background color of a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowColors {
    pub foreground: Color,
    pub background: Color,
}

impl FrameModel {
    fn cell_context(&self) -> CellContext<'_> {
        CellContext {
            display: &self.display,
            aggregate: self.aggregate,
            dbc: self.dbc.as_deref(),
        }
    }

    /// Text of a cell; out of range rows and columns give an empty string
    pub fn data(&self, row: usize, column: usize) -> String {
        match (self.filtered.get(row), Column::from_index(column)) {
            (Some(frame), Some(column)) => format_cell(frame, column, &self.cell_context()),
            _ => String::new(),
        }
    }

    /// Header label for a column index; empty when out of range
    pub fn header(&self, column: usize) -> &'static str {
        Column::from_index(column)
            .map(|c| c.header(self.aggregate))
            .unwrap_or("")
    }

    pub fn column_count(&self) -> usize {
        Column::COUNT
    }

    /// Colors of the DBC message a row decodes as. `None` when the row is
    /// out of range, interpretation is off or the message is unknown.
    pub fn row_colors(&self, row: usize) -> Option<RowColors> {
        if !self.display.interpret_frames {
            return None;
        }
        let frame = self.filtered.get(row)?;
        let msg = self.dbc.as_deref()?.find_message(frame)?;
        Some(RowColors {
            foreground: msg.foreground_color,
            background: msg.background_color,
        })
    }
}
