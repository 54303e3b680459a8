//! Frame store
//!
//! [`FrameModel`] owns the captured frames and the filtered sequence the
//! view displays. It runs in one of two modes:
//!
//! - **Log mode**: every ingested frame is appended, in arrival order.
//! - **Aggregate mode**: one record per `(bus, id)`, updated in place, with
//!   an occurrence count and the time since the previous occurrence.
//!
//! Switching log → aggregate collapses the log; the collapse loses the
//! individual occurrences, so switching back only rebuilds the filtered
//! view from the collapsed records. Getting the full log back takes a
//! `clear()` and a re-ingest.
//!
//! Every mutation keeps `filtered` equal to the frames that pass the
//! current [`FilterSet`], and reports what changed through
//! [`ModelEvent`]s.

use crate::canopen::FunctionClass;
use crate::config::{DisplayConfig, EngineConfig, TimestampMode};
use crate::filters::FilterSet;
use crate::notify::{ModelEvent, ModelObserver, ObserverList};
use crate::script::ScriptDispatcher;
use crate::signals::DbcLookup;
use crate::types::{CanFrame, FrameKey};
use crate::view::{sort_key, Column};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Frame storage plus the filtered projection shown by the view
pub struct FrameModel {
    /// The log in log mode; unique `(bus, id)` records in aggregate mode
    pub(crate) frames: Vec<CanFrame>,
    /// Copies of the frames that pass the filters, in `frames` order
    pub(crate) filtered: Vec<CanFrame>,
    /// Position of each key in `frames`; only maintained in aggregate mode
    aggregate_index: HashMap<FrameKey, usize>,
    pub(crate) filters: FilterSet,
    pub(crate) display: DisplayConfig,
    pub(crate) dbc: Option<Arc<dyn DbcLookup>>,
    observers: ObserverList,
    scripts: ScriptDispatcher,
    pub(crate) aggregate: bool,
    /// Subtracted from every ingested timestamp
    time_offset: u64,
    needs_filter_refresh: bool,
    /// Frames ingested since the last refresh notification
    last_update_num_frames: usize,
    sort_ascending: bool,
}

impl FrameModel {
    /// Create a model with the default preallocation for this target
    pub fn new() -> Self {
        Self::with_capacity(crate::config::default_capacity())
    }

    /// Create a model preallocating `capacity` frames per sequence
    pub fn with_capacity(capacity: usize) -> Self {
        log::debug!("Preallocating frame model for {} frames", capacity);
        Self {
            frames: Vec::with_capacity(capacity),
            filtered: Vec::with_capacity(capacity),
            aggregate_index: HashMap::new(),
            filters: FilterSet::new(),
            display: DisplayConfig::default(),
            dbc: None,
            observers: ObserverList::new(),
            scripts: ScriptDispatcher::new(),
            aggregate: false,
            time_offset: 0,
            needs_filter_refresh: false,
            last_update_num_frames: 0,
            sort_ascending: false,
        }
    }

    /// Build a model from configuration. An unreadable filter file is
    /// logged and skipped.
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut model = Self::with_capacity(config.effective_capacity());
        model.display = config.display.clone();
        model.aggregate = config.aggregate;
        if let Some(path) = &config.filter_file {
            if let Err(e) = model.filters.load_file(path) {
                log::warn!("Could not load filter file {:?}: {}", path, e);
            }
        }
        model
    }

    /// Builder method: DBC lookup used to interpret payloads
    pub fn with_dbc(mut self, dbc: Arc<dyn DbcLookup>) -> Self {
        self.dbc = Some(dbc);
        self
    }

    /// Replace the DBC lookup
    pub fn set_dbc(&mut self, dbc: Option<Arc<dyn DbcLookup>>) {
        self.dbc = dbc;
        self.emit(ModelEvent::Reset);
    }

    /// Register an observer. Register before the first ingest.
    pub fn add_observer(&mut self, observer: Arc<dyn ModelObserver>) {
        self.observers.add(observer);
    }

    pub fn scripts(&self) -> &ScriptDispatcher {
        &self.scripts
    }

    pub fn scripts_mut(&mut self) -> &mut ScriptDispatcher {
        &mut self.scripts
    }

    fn emit(&self, event: ModelEvent) {
        self.observers.emit(event);
    }

    // ---- display flags -------------------------------------------------

    pub fn display(&self) -> &DisplayConfig {
        &self.display
    }

    /// Replace all display flags; emits `Reset` if anything changed
    pub fn set_display_config(&mut self, display: DisplayConfig) {
        if self.display != display {
            self.display = display;
            self.emit(ModelEvent::Reset);
        }
    }

    pub fn set_hex_mode(&mut self, enabled: bool) {
        let display = self.display.clone().with_hex_mode(enabled);
        self.set_display_config(display);
    }

    pub fn set_timestamp_mode(&mut self, mode: TimestampMode) {
        let display = self.display.clone().with_timestamp_mode(mode);
        self.set_display_config(display);
    }

    pub fn set_time_format(&mut self, format: impl Into<String>) {
        let display = self.display.clone().with_time_format(format);
        self.set_display_config(display);
    }

    pub fn set_interpret_mode(&mut self, enabled: bool) {
        let display = self.display.clone().with_interpret_frames(enabled);
        self.set_display_config(display);
    }

    // ---- accessors ------------------------------------------------------

    /// The view source: the log, or the unique records in aggregate mode
    pub fn frames(&self) -> &[CanFrame] {
        &self.frames
    }

    pub fn filtered(&self) -> &[CanFrame] {
        &self.filtered
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    pub fn total_frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn row_count(&self) -> usize {
        self.filtered.len()
    }

    pub fn is_aggregate(&self) -> bool {
        self.aggregate
    }

    pub fn time_offset(&self) -> u64 {
        self.time_offset
    }

    /// Frames ingested since the last refresh notification
    pub fn pending_update_count(&self) -> usize {
        self.last_update_num_frames
    }

    /// Returns whether a new node-id was seen since the last call, and
    /// clears the flag
    pub fn take_filter_refresh(&mut self) -> bool {
        std::mem::take(&mut self.needs_filter_refresh)
    }

    // ---- ingest ---------------------------------------------------------

    /// Add a live frame. Its timestamp is shifted by the current time
    /// offset and it is offered to attached scripts. With `auto_notify`,
    /// observers see each appended row (`AboutToInsert`/`Inserted`) or a
    /// `Reset` when an aggregate row is replaced.
    pub fn ingest(&mut self, mut frame: CanFrame, auto_notify: bool) {
        frame.timestamp_us = frame.timestamp_us.saturating_sub(self.time_offset);
        frame.frame_count = 1;
        frame.time_delta_us = 0;
        self.last_update_num_frames += 1;

        if self.filters.ensure_node(frame.id) {
            log::debug!("New node 0x{:02X} seen", frame.node_id());
            self.needs_filter_refresh = true;
            self.emit(ModelEvent::FiltersUpdated);
        }

        self.scripts.dispatch_frame(&frame);

        log::trace!(
            "Ingest bus {} id 0x{:X} ts {}",
            frame.bus,
            frame.id,
            frame.timestamp_us
        );
        self.store(frame, auto_notify);
    }

    /// Add a batch of live frames without per-row notifications. In
    /// aggregate mode a single `Reset` follows the batch; in log mode the
    /// producer is expected to call [`bulk_refresh`](Self::bulk_refresh).
    pub fn ingest_bulk<I>(&mut self, frames: I) -> usize
    where
        I: IntoIterator<Item = CanFrame>,
    {
        let mut count = 0;
        for frame in frames {
            self.ingest(frame, false);
            count += 1;
        }
        if self.aggregate && count > 0 {
            self.emit(ModelEvent::Reset);
        }
        count
    }

    /// Mass import of frames that are already normalized (e.g. read from a
    /// saved log). No time offset is applied, scripts are not invoked and
    /// unknown node-ids start enabled. Emits `FiltersUpdated` if new nodes
    /// appeared; row updates are left to [`bulk_refresh`](Self::bulk_refresh).
    pub fn import_frames(&mut self, frames: Vec<CanFrame>) {
        let count = frames.len();
        let mut new_nodes = false;
        for mut frame in frames {
            frame.frame_count = 1;
            frame.time_delta_us = 0;
            if !self.filters.contains(frame.id) {
                self.filters.insert(frame.id, true);
                new_nodes = true;
            }
            self.store(frame, false);
        }
        self.last_update_num_frames = count;
        log::info!("Imported {} frames", count);

        if new_nodes {
            self.needs_filter_refresh = true;
            self.emit(ModelEvent::FiltersUpdated);
        }
    }

    fn store(&mut self, frame: CanFrame, auto_notify: bool) {
        if self.aggregate {
            self.store_aggregate(frame, auto_notify);
        } else {
            self.append_filtered(&frame, auto_notify);
            self.frames.push(frame);
        }
    }

    fn append_filtered(&mut self, frame: &CanFrame, auto_notify: bool) {
        if !self.filters.allows(frame.id) {
            return;
        }
        let row = self.filtered.len();
        if auto_notify {
            self.emit(ModelEvent::AboutToInsert {
                first: row,
                last: row,
            });
        }
        self.filtered.push(frame.clone());
        if auto_notify {
            self.emit(ModelEvent::Inserted {
                first: row,
                last: row,
            });
        }
    }

    fn store_aggregate(&mut self, mut frame: CanFrame, auto_notify: bool) {
        let key = frame.key();
        match self.aggregate_index.get(&key).copied() {
            Some(idx) => {
                let prev = &self.frames[idx];
                frame.frame_count = prev.frame_count.saturating_add(1);
                frame.time_delta_us = frame.timestamp_us as i64 - prev.timestamp_us as i64;

                if let Some(pos) = self.filtered.iter().position(|f| f.key() == key) {
                    self.filtered[pos] = frame.clone();
                    if auto_notify {
                        self.emit(ModelEvent::Reset);
                    }
                }
                self.frames[idx] = frame;
            }
            None => {
                self.append_filtered(&frame, auto_notify);
                self.aggregate_index.insert(key, self.frames.len());
                self.frames.push(frame);
            }
        }
    }

    /// Notify observers of frames ingested without notification. Returns
    /// how many there were; nothing is emitted (and the count is kept) while
    /// the filtered view is empty.
    pub fn bulk_refresh(&mut self) -> usize {
        if self.last_update_num_frames == 0 || self.filtered.is_empty() {
            return 0;
        }
        log::debug!("Bulk refresh of {} frames", self.last_update_num_frames);
        self.emit(ModelEvent::Reset);
        std::mem::take(&mut self.last_update_num_frames)
    }

    // ---- whole-store operations ----------------------------------------

    /// Switch between log and aggregate mode
    pub fn set_aggregate_mode(&mut self, enabled: bool) {
        if self.aggregate == enabled {
            return;
        }
        log::info!("Aggregate mode {}", if enabled { "on" } else { "off" });
        self.aggregate = enabled;
        if enabled {
            self.collapse_to_aggregate();
        } else {
            self.aggregate_index.clear();
        }
        self.send_refresh();
    }

    /// Fold the log into one record per key, last write wins, counting
    /// occurrences and the gap between the last two
    fn collapse_to_aggregate(&mut self) {
        let mut index: HashMap<FrameKey, usize> = HashMap::new();
        let mut unique: Vec<CanFrame> = Vec::new();

        for mut frame in self.frames.drain(..) {
            let key = frame.key();
            match index.get(&key) {
                Some(&i) => {
                    let prev = &unique[i];
                    frame.time_delta_us = frame.timestamp_us as i64 - prev.timestamp_us as i64;
                    frame.frame_count = prev.frame_count.saturating_add(1);
                    unique[i] = frame;
                }
                None => {
                    frame.time_delta_us = 0;
                    frame.frame_count = 1;
                    index.insert(key, unique.len());
                    unique.push(frame);
                }
            }
        }

        log::debug!("Collapsed log into {} unique frames", unique.len());
        self.frames.extend(unique);
        self.aggregate_index = index;
    }

    fn rebuild_aggregate_index(&mut self) {
        self.aggregate_index = self
            .frames
            .iter()
            .enumerate()
            .map(|(i, f)| (f.key(), i))
            .collect();
    }

    fn rebuild_filtered(&mut self) {
        self.filtered.clear();
        let filters = &self.filters;
        self.filtered
            .extend(self.frames.iter().filter(|f| filters.allows(f.id)).cloned());
    }

    /// Rebuild the filtered view from scratch and emit `Reset`
    fn send_refresh(&mut self) {
        log::debug!("Rebuilding filtered view");
        self.rebuild_filtered();
        self.last_update_num_frames = 0;
        self.emit(ModelEvent::Reset);
    }

    /// Shift all timestamps so the earliest frame sits at 0. The shift is
    /// added to the time offset, so later ingests land on the same scale.
    pub fn normalize_timing(&mut self) {
        let Some(min_ts) = self.frames.iter().map(|f| f.timestamp_us).min() else {
            return;
        };
        self.time_offset += min_ts;
        for frame in self.frames.iter_mut().chain(self.filtered.iter_mut()) {
            frame.timestamp_us = frame.timestamp_us.saturating_sub(min_ts);
        }
        log::debug!("Normalized timing, offset now {}", self.time_offset);
        self.emit(ModelEvent::Reset);
    }

    /// Sort the stored frames by a column's numeric key (stable), then
    /// rebuild the filtered view
    pub fn sort(&mut self, column: Column, ascending: bool) {
        let aggregate = self.aggregate;
        if ascending {
            self.frames.sort_by_key(|f| sort_key(f, column, aggregate));
        } else {
            self.frames
                .sort_by(|a, b| sort_key(b, column, aggregate).cmp(&sort_key(a, column, aggregate)));
        }
        self.sort_ascending = ascending;
        log::debug!("Sorted {} frames by {:?} (ascending: {})", self.frames.len(), column, ascending);

        if aggregate {
            self.rebuild_aggregate_index();
        }
        self.send_refresh();
    }

    /// Sort by a column, flipping direction on every call (first call
    /// sorts ascending)
    pub fn sort_by_column(&mut self, column: Column) {
        let ascending = !self.sort_ascending;
        self.sort(column, ascending);
    }

    /// Drop all frames, keeping capacity, filters and the time offset
    pub fn clear(&mut self) {
        self.frames.clear();
        self.filtered.clear();
        self.aggregate_index.clear();
        self.last_update_num_frames = 0;
        log::info!("Frame store cleared");
        self.emit(ModelEvent::Reset);
        self.emit(ModelEvent::FiltersUpdated);
    }

    /// Index of the last frame with `id` whose timestamp is at or before
    /// `ts_seconds`.
    ///
    /// The scan stops at the first matching frame past the target time, so
    /// the answer is only meaningful while the log is in arrival order;
    /// after [`sort`](Self::sort) it may be wrong.
    pub fn index_of_id_at_or_before_time(&self, id: u32, ts_seconds: f64) -> Option<usize> {
        let target = (ts_seconds * 1_000_000.0) as i64;
        let mut best = None;
        for (i, frame) in self.frames.iter().enumerate() {
            if frame.id != id {
                continue;
            }
            if frame.timestamp_us as i64 <= target {
                best = Some(i);
            } else {
                break;
            }
        }
        best
    }

    // ---- filters --------------------------------------------------------

    /// Show or hide a known node; unknown nodes are ignored
    pub fn set_filter_state(&mut self, id: u32, shown: bool) {
        if self.filters.set(id, shown) {
            self.send_refresh();
        }
    }

    pub fn set_all_filters(&mut self, shown: bool) {
        self.filters.set_all(shown);
        self.send_refresh();
    }

    pub fn set_function_class_hidden(&mut self, class: FunctionClass, hidden: bool) {
        if self.filters.is_class_hidden(class) != hidden {
            self.filters.set_class_hidden(class, hidden);
            self.send_refresh();
        }
    }

    /// Replace the node filters from a file. An unreadable file leaves
    /// everything as it was.
    pub fn load_filter_file(&mut self, path: &Path) {
        match self.filters.load_file(path) {
            Ok(()) => {
                self.send_refresh();
                self.emit(ModelEvent::FiltersUpdated);
            }
            Err(e) => log::warn!("Could not load filter file {:?}: {}", path, e),
        }
    }

    pub fn save_filter_file(&self, path: &Path) {
        if let Err(e) = self.filters.save_file(path) {
            log::warn!("Could not save filter file {:?}: {}", path, e);
        }
    }
}

impl Default for FrameModel {
    fn default() -> Self {
        Self::new()
    }
}
