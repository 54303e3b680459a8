//! CAN Frame Engine Library
//!
//! In-memory ingestion, aggregation and tabular projection of CAN frames,
//! for trace viewers that show a live bus.
//!
//! # Architecture
//!
//! - [`FrameModel`] stores frames either as a log or aggregated per
//!   `(bus, id)`, keeps a filtered view in step with the node-id filters and
//!   reports changes through [`ModelEvent`]s
//! - [`view`] turns the filtered frames into table cells: timestamps, ids,
//!   CANopen function/node labels, SDO descriptions and DBC-decoded data
//! - [`SharedFrameModel`] puts one model behind a lock for producer/consumer
//!   threads
//! - [`script`] fans ingested frames and timer ticks out to attached scripts
//!
//! The library does NOT:
//! - Talk to capture hardware or transmit frames
//! - Read or write trace files (only the node filter file)
//! - Draw anything
//!
//! # Example Usage
//!
//! ```no_run
//! use can_frame_engine::{CanFrame, Column, DbcDatabase, FrameModel};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let dbc = DbcDatabase::from_dbc_file(Path::new("powertrain.dbc")).unwrap();
//! let mut model = FrameModel::new().with_dbc(Arc::new(dbc));
//! model.set_interpret_mode(true);
//!
//! model.ingest(CanFrame::new(0x181, &[0x01, 0x02]).with_timestamp(1_000), true);
//! model.set_aggregate_mode(true);
//!
//! for row in 0..model.row_count() {
//!     println!("{}", model.data(row, Column::Data.index()));
//! }
//! ```

// Public modules
pub mod canopen;
pub mod config;
pub mod filters;
pub mod notify;
pub mod script;
pub mod shared;
pub mod signals;
pub mod store;
pub mod types;
pub mod utility;
pub mod view;

// Re-export main types for convenience
pub use config::{load_config, DisplayConfig, EngineConfig, TimestampMode};
pub use filters::FilterSet;
pub use notify::{ChannelObserver, ModelEvent, ModelObserver};
pub use script::{Script, ScriptDispatcher, ScriptError, ScriptHost};
pub use shared::SharedFrameModel;
pub use signals::{DbcDatabase, DbcLookup, DbcMessage, DbcSignal};
pub use store::FrameModel;
pub use types::{CanFrame, Direction, EngineError, FrameKey, FrameType, Result};
pub use view::{Column, RowColors};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
