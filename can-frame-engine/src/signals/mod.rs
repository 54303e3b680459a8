//! Signal database and DBC parser
//!
//! This module contains the DBC lookup contract consumed by the view, the
//! in-memory signal database and its DBC file loader.

pub mod database;
pub mod dbc;

pub use database::{
    ByteOrder, Color, DatabaseStats, DbcDatabase, DbcLookup, DbcMessage, DbcSignal,
    MultiplexerInfo, SignalLayout, SignalValue, ValueType,
};
