//! DBC file parser
//!
//! Parses Vector DBC files with the `can-dbc` crate and converts them into
//! [`DbcMessage`] definitions for the lookup database.

use crate::signals::database::{
    ByteOrder, DbcDatabase, DbcMessage, DbcSignal, MultiplexerInfo, SignalLayout, ValueType,
};
use crate::types::{EngineError, Result, EXTENDED_ID_MASK};
use std::collections::HashMap;
use std::path::Path;

/// DBC files flag extended identifiers with bit 31
const DBC_EXTENDED_FLAG: u32 = 0x8000_0000;

/// Parse a DBC file and return message definitions
pub fn parse_dbc_file(path: &Path) -> Result<Vec<DbcMessage>> {
    log::info!("Parsing DBC file: {:?}", path);

    let bytes = std::fs::read(path).map_err(|e| {
        EngineError::DbcParse(format!("Failed to read file {:?}: {}", path, e))
    })?;

    // DBC files from Windows tools are often Latin-1
    let dbc_content = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            log::warn!("DBC file is not UTF-8, trying Latin-1 encoding");
            e.into_bytes().iter().map(|&b| b as char).collect()
        }
    };

    let source_filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown.dbc")
        .to_string();

    let messages = parse_dbc_str(&dbc_content, &source_filename)?;

    log::info!("Parsed {} messages from {:?}", messages.len(), path);
    Ok(messages)
}

/// Parse DBC text; `source` is recorded on every message
pub fn parse_dbc_str(content: &str, source: &str) -> Result<Vec<DbcMessage>> {
    let dbc = can_dbc::DBC::from_slice(content.as_bytes()).map_err(|e| {
        EngineError::DbcParse(format!("Failed to parse DBC {}: {:?}", source, e))
    })?;

    dbc.messages()
        .iter()
        .map(|msg| convert_message(&dbc, msg, source))
        .collect()
}

impl DbcDatabase {
    /// Build a lookup database from one DBC file
    pub fn from_dbc_file(path: &Path) -> Result<Self> {
        let mut db = DbcDatabase::new();
        db.add_dbc(path)?;
        Ok(db)
    }

    /// Load a DBC file and add its definitions
    pub fn add_dbc(&mut self, path: &Path) -> Result<()> {
        for message in parse_dbc_file(path)? {
            self.add_message(message);
        }
        Ok(())
    }
}

fn convert_layout(dbc_sig: &can_dbc::Signal) -> SignalLayout {
    SignalLayout {
        start_bit: *dbc_sig.start_bit() as u16,
        length: *dbc_sig.signal_size() as u16,
        byte_order: match *dbc_sig.byte_order() {
            can_dbc::ByteOrder::LittleEndian => ByteOrder::LittleEndian,
            can_dbc::ByteOrder::BigEndian => ByteOrder::BigEndian,
        },
        value_type: match *dbc_sig.value_type() {
            can_dbc::ValueType::Signed => ValueType::Signed,
            can_dbc::ValueType::Unsigned => ValueType::Unsigned,
        },
    }
}

/// Convert a can-dbc message to our DbcMessage
fn convert_message(dbc: &can_dbc::DBC, dbc_msg: &can_dbc::Message, source: &str) -> Result<DbcMessage> {
    let raw_id = dbc_msg.message_id().0;

    let multiplexor = dbc_msg.signals().iter().find(|sig| {
        matches!(
            sig.multiplexer_indicator(),
            can_dbc::MultiplexIndicator::Multiplexor
                | can_dbc::MultiplexIndicator::MultiplexorAndMultiplexedSignal(_)
        )
    });

    let signals = dbc_msg
        .signals()
        .iter()
        .map(|dbc_sig| convert_signal(dbc, raw_id, dbc_sig, multiplexor))
        .collect::<Result<Vec<_>>>()?;

    let comment = dbc
        .message_comment(can_dbc::MessageId(raw_id))
        .unwrap_or_default()
        .to_string();

    let mut message = DbcMessage::new(raw_id & EXTENDED_ID_MASK, dbc_msg.message_name().as_str())
        .with_comment(comment);
    message.extended = raw_id & DBC_EXTENDED_FLAG != 0;
    message.size = *dbc_msg.message_size() as usize;
    message.sender = match dbc_msg.transmitter() {
        can_dbc::Transmitter::NodeName(name) => Some(name.to_string()),
        _ => None,
    };
    message.signals = signals;
    message.source = source.to_string();
    Ok(message)
}

/// Convert a can-dbc signal to our DbcSignal
fn convert_signal(
    dbc: &can_dbc::DBC,
    raw_id: u32,
    dbc_sig: &can_dbc::Signal,
    multiplexor: Option<&can_dbc::Signal>,
) -> Result<DbcSignal> {
    let switch_value = match *dbc_sig.multiplexer_indicator() {
        can_dbc::MultiplexIndicator::MultiplexedSignal(value)
        | can_dbc::MultiplexIndicator::MultiplexorAndMultiplexedSignal(value) => Some(value),
        _ => None,
    };

    let multiplexer_info = match switch_value {
        Some(value) => {
            let mux = multiplexor.ok_or_else(|| {
                EngineError::DbcParse(format!(
                    "Multiplexed signal '{}' but no multiplexer found",
                    dbc_sig.name()
                ))
            })?;
            Some(MultiplexerInfo {
                multiplexer_signal: mux.name().to_string(),
                selector: convert_layout(mux),
                multiplexer_values: vec![value],
            })
        }
        None => None,
    };

    let value_table = dbc
        .value_descriptions_for_signal(can_dbc::MessageId(raw_id), dbc_sig.name())
        .map(|descriptions| {
            descriptions
                .iter()
                .map(|d| (*d.a() as i64, d.b().to_string()))
                .collect::<HashMap<_, _>>()
        });

    let mut signal = DbcSignal::new(dbc_sig.name().as_str(), convert_layout(dbc_sig))
        .with_scaling(*dbc_sig.factor(), *dbc_sig.offset());
    signal.min = *dbc_sig.min();
    signal.max = *dbc_sig.max();
    if !dbc_sig.unit().is_empty() {
        signal.unit = Some(dbc_sig.unit().to_string());
    }
    signal.value_table = value_table;
    signal.multiplexer_info = multiplexer_info;
    Ok(signal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::database::DbcLookup;
    use crate::types::CanFrame;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const DBC_HEADER: &str = r#"
VERSION ""

NS_ :
    NS_DESC_
    CM_
    BA_DEF_
    BA_
    VAL_
    CAT_DEF_
    CAT_
    FILTER
    BA_DEF_DEF_
    EV_DATA_
    ENVVAR_DATA_
    SGTYPE_
    SGTYPE_VAL_
    BA_DEF_SGTYPE_
    BA_SGTYPE_
    SIG_TYPE_REF_
    VAL_TABLE_
    SIG_GROUP_
    SIG_VALTYPE_
    SIGTYPE_VALTYPE_
    BO_TX_BU_
    BA_DEF_REL_
    BA_REL_
    BA_SGTYPE_REL_
    SG_MUL_VAL_

BS_:

BU_: ECU1 ECU2
"#;

    #[test]
    fn test_parse_simple_dbc() {
        let dbc_content = format!(
            "{}{}",
            DBC_HEADER,
            r#"
BO_ 291 EngineData: 8 ECU1
 SG_ EngineSpeed : 0|16@1+ (1,0) [0|8000] "rpm" ECU2
 SG_ EngineTemp : 16|8@1+ (1,-40) [-40|215] "C" ECU2

BO_ 512 BatteryStatus: 8 ECU1
 SG_ BatteryVoltage : 0|16@1+ (0.01,0) [0|16] "V" ECU2
"#
        );

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(dbc_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let messages = parse_dbc_file(temp_file.path()).unwrap();
        assert_eq!(messages.len(), 2);

        let msg1 = &messages[0];
        assert_eq!(msg1.id, 291);
        assert!(!msg1.extended);
        assert_eq!(msg1.name, "EngineData");
        assert_eq!(msg1.size, 8);
        assert_eq!(msg1.sender, Some("ECU1".to_string()));
        assert_eq!(msg1.signals.len(), 2);

        let sig1 = &msg1.signals[0];
        assert_eq!(sig1.name, "EngineSpeed");
        assert_eq!(sig1.layout.start_bit, 0);
        assert_eq!(sig1.layout.length, 16);
        assert_eq!(sig1.layout.byte_order, ByteOrder::LittleEndian);
        assert_eq!(sig1.unit, Some("rpm".to_string()));
    }

    #[test]
    fn test_database_from_file_decodes_frames() {
        let dbc_content = format!(
            "{}{}",
            DBC_HEADER,
            r#"
BO_ 291 EngineData: 8 ECU1
 SG_ EngineSpeed : 0|16@1+ (1,0) [0|8000] "rpm" ECU2
"#
        );

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(dbc_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let db = DbcDatabase::from_dbc_file(temp_file.path()).unwrap();
        let frame = CanFrame::new(291, &[0xE8, 0x03, 0, 0, 0, 0, 0, 0]);
        let msg = db.find_message(&frame).unwrap();
        assert_eq!(
            msg.signals[0].process_as_text(&frame).as_deref(),
            Some("EngineSpeed: 1000 rpm")
        );
    }

    #[test]
    fn test_parse_multiplexed_signals() {
        let dbc_content = format!(
            "{}{}",
            DBC_HEADER,
            r#"
BO_ 512 MultiplexedMsg: 8 ECU1
 SG_ Mode M : 0|8@1+ (1,0) [0|3] "" ECU1
 SG_ SignalA m0 : 8|16@1+ (1,0) [0|100] "%" ECU1
 SG_ SignalB m1 : 8|16@1+ (0.1,0) [0|1000] "mV" ECU1
"#
        );

        let messages = parse_dbc_str(&dbc_content, "mux.dbc").unwrap();
        assert_eq!(messages.len(), 1);
        let msg = &messages[0];
        assert!(msg.is_multiplexed());
        assert_eq!(msg.source, "mux.dbc");

        let sig_a = msg.signals.iter().find(|s| s.name == "SignalA").unwrap();
        let mux = sig_a.multiplexer_info.as_ref().unwrap();
        assert_eq!(mux.multiplexer_signal, "Mode");
        assert_eq!(mux.multiplexer_values, vec![0]);

        let mode = msg.signals.iter().find(|s| s.name == "Mode").unwrap();
        assert!(!mode.is_multiplexed());
    }

    #[test]
    fn test_missing_dbc_file() {
        let err = parse_dbc_file(Path::new("/nonexistent/powertrain.dbc")).unwrap_err();
        assert!(matches!(err, EngineError::DbcParse(_)));
    }
}
