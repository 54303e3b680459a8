//! CANopen classification
//!
//! An 11-bit CANopen COB-ID splits into a 4-bit function code (bits 7..10)
//! and a 7-bit node-id (bits 0..6). This module labels function codes,
//! decodes SDO command bytes and decides which function classes a
//! [`FilterSet`](crate::filters::FilterSet) may hide.

use crate::config::DisplayConfig;
use crate::types::STANDARD_ID_MASK;
use std::fmt;

/// Function code of a standard identifier (0..=15)
pub fn function_code(id: u32) -> u8 {
    ((id & STANDARD_ID_MASK) >> 7) as u8
}

/// CANopen node-id (low 7 bits)
pub fn node_id(id: u32) -> u8 {
    (id & 0x7F) as u8
}

/// Label for a function code; code 1 splits on node-id into SYNC/EMCY
pub fn function_label(id: u32) -> &'static str {
    match function_code(id) {
        0 => "NMT",
        1 if node_id(id) == 0 => "SYNC",
        1 => "EMCY",
        2 => "TIME",
        3 => "T PDO1",
        4 => "R PDO1",
        5 => "T PDO2",
        6 => "R PDO2",
        7 => "T PDO3",
        8 => "R PDO3",
        9 => "T PDO4",
        10 => "R PDO4",
        11 => "T SDO",
        12 => "R SDO",
        13 => "???",
        14 => "HBEAT",
        15 => "LSS",
        _ => "?????",
    }
}

/// Text for the CANopen function column. Extended identifiers are not
/// CANopen and show the raw id instead.
pub fn format_function(id: u32, extended: bool) -> String {
    if extended {
        format!("0x{:08X}", id)
    } else {
        function_label(id).to_string()
    }
}

/// Text for the CANopen node column
pub fn format_node(id: u32, extended: bool, display: &DisplayConfig) -> String {
    if display.decimal_mode() {
        return id.to_string();
    }
    if extended {
        format!("0x{:08X}", id)
    } else {
        format!("0x{:03X}", node_id(id))
    }
}

/// Function classes that the filter set can hide as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FunctionClass {
    Nmt,
    Sync,
    Emcy,
    Time,
    Heartbeat,
}

impl FunctionClass {
    pub const ALL: [FunctionClass; 5] = [
        FunctionClass::Nmt,
        FunctionClass::Sync,
        FunctionClass::Emcy,
        FunctionClass::Time,
        FunctionClass::Heartbeat,
    ];

    /// Class a frame belongs to, if it belongs to a filterable one
    pub fn of(id: u32) -> Option<FunctionClass> {
        match function_code(id) {
            0 => Some(FunctionClass::Nmt),
            1 if node_id(id) == 0 => Some(FunctionClass::Sync),
            1 => Some(FunctionClass::Emcy),
            2 => Some(FunctionClass::Time),
            14 => Some(FunctionClass::Heartbeat),
            _ => None,
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for FunctionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FunctionClass::Nmt => "NMT",
            FunctionClass::Sync => "SYNC",
            FunctionClass::Emcy => "EMCY",
            FunctionClass::Time => "TIME",
            FunctionClass::Heartbeat => "HBEAT",
        };
        write!(f, "{}", name)
    }
}

/// Which end of an SDO channel sent the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdoRole {
    /// T SDO (function code 11), server to client
    Server,
    /// R SDO (function code 12), client to server
    Client,
}

impl SdoRole {
    /// SDO role of a standard identifier, if it is an SDO channel
    pub fn of(id: u32, extended: bool) -> Option<SdoRole> {
        if extended {
            return None;
        }
        match function_code(id) {
            11 => Some(SdoRole::Server),
            12 => Some(SdoRole::Client),
            _ => None,
        }
    }
}

/// Transfer parameters of an initiate request/response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitiateTransfer {
    /// Data carried in the frame itself; `bytes` = 4 - n
    Expedited { bytes: u8 },
    /// Size indicated. Decoded from bytes 4 and 7, not 4..7 little-endian.
    Sized { size: u32 },
    Unspecified,
}

/// Decoded SDO command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdoCommand {
    Segment {
        download: bool,
        /// 8 - n, the count shown for the segment
        bytes: u8,
        more: bool,
        toggle: bool,
    },
    Initiate {
        download: bool,
        transfer: InitiateTransfer,
    },
    Abort,
    InitiateBlockDownload,
    /// Specifier with no description (5 and 7)
    Other(u8),
}

/// Structured description of an SDO frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdoDescription {
    pub role: SdoRole,
    /// Command specifier, `data[0] >> 5`
    pub ccs: u8,
    pub index: u16,
    pub subindex: u8,
    pub command: SdoCommand,
}

/// Decode an SDO payload. Needs all 8 bytes; shorter payloads yield `None`.
///
/// Server and client number their command specifiers differently: a
/// server's download segment is ccs 1 where a client's is 0, and the
/// initiate codes swap the same way.
pub fn decode_sdo(role: SdoRole, data: &[u8]) -> Option<SdoDescription> {
    if data.len() < 8 {
        return None;
    }

    let ccs = data[0] >> 5;
    let segment = |download| {
        let t = (data[0] >> 4) & 0x1;
        let n = (data[0] >> 1) & 0x7;
        let c = data[0] & 0x1;
        SdoCommand::Segment {
            download,
            bytes: 8 - n,
            more: c != 0,
            toggle: t != 0,
        }
    };
    let initiate = |download| {
        let n = (data[0] >> 2) & 0x3;
        let e = (data[0] >> 1) & 0x1;
        let s = data[0] & 0x1;
        let transfer = if e != 0 && s != 0 {
            InitiateTransfer::Expedited { bytes: 4 - n }
        } else if s != 0 {
            InitiateTransfer::Sized {
                size: u32::from(data[4]) + 256 * u32::from(data[7]),
            }
        } else {
            InitiateTransfer::Unspecified
        };
        SdoCommand::Initiate { download, transfer }
    };

    let command = match (role, ccs) {
        (SdoRole::Server, 1) | (SdoRole::Client, 0) => segment(true),
        (SdoRole::Server, 0) | (SdoRole::Client, 3) => segment(false),
        (SdoRole::Server, 3) | (SdoRole::Client, 1) => initiate(true),
        (SdoRole::Server, 2) | (SdoRole::Client, 2) => initiate(false),
        (_, 4) => SdoCommand::Abort,
        (_, 6) => SdoCommand::InitiateBlockDownload,
        (_, other) => SdoCommand::Other(other),
    };

    Some(SdoDescription {
        role,
        ccs,
        index: u16::from(data[2]) << 8 | u16::from(data[1]),
        subindex: data[3],
        command,
    })
}

impl fmt::Display for SdoDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self.role {
            SdoRole::Server => "Server",
            SdoRole::Client => "Client",
        };
        write!(
            f,
            "{} - I [0x{:x} ({})] SI [{}]",
            role, self.index, self.index, self.subindex
        )?;

        match self.command {
            SdoCommand::Segment {
                download,
                bytes,
                more,
                toggle,
            } => {
                let kind = if download { "Download" } else { "Upload" };
                write!(f, ", {} Domain Segment, n = {}", kind, bytes)?;
                if more {
                    write!(f, ", more to download")?;
                }
                write!(f, ", t = {}", u8::from(toggle))
            }
            SdoCommand::Initiate { download, transfer } => {
                let kind = if download { "Download" } else { "Upload" };
                write!(f, ", Initiate Domain {}", kind)?;
                match transfer {
                    InitiateTransfer::Expedited { bytes } => write!(f, ", expedited, n = {}", bytes),
                    InitiateTransfer::Sized { size } => write!(f, ", size = {}", size),
                    InitiateTransfer::Unspecified => Ok(()),
                }
            }
            SdoCommand::Abort => write!(f, ", Abort Domain Transfer"),
            SdoCommand::InitiateBlockDownload => write!(f, ", Initiate Block Download"),
            SdoCommand::Other(_) => Ok(()),
        }
    }
}
