//! Thread-safe handle to a frame model
//!
//! Capture threads ingest through a clone of [`SharedFrameModel`] while the
//! view thread reads cells through another. Every operation takes the one
//! model lock, so ingest order per producer is preserved and readers never
//! see a half-applied mutation.
//!
//! ```rust,no_run
//! # use can_frame_engine::{CanFrame, FrameModel, SharedFrameModel};
//! let shared = SharedFrameModel::new(FrameModel::with_capacity(1024));
//! let producer = shared.clone();
//! std::thread::spawn(move || {
//!     producer.ingest(CanFrame::new(0x181, &[1, 2, 3]), false);
//! });
//! let rows = shared.bulk_refresh();
//! ```

use crate::store::FrameModel;
use crate::types::CanFrame;
use parking_lot::{Mutex, MutexGuard};
use std::ops::Range;
use std::sync::Arc;

#[derive(Clone)]
pub struct SharedFrameModel {
    inner: Arc<Mutex<FrameModel>>,
}

impl SharedFrameModel {
    pub fn new(model: FrameModel) -> Self {
        Self {
            inner: Arc::new(Mutex::new(model)),
        }
    }

    /// Exclusive access for anything not wrapped below. Observers run while
    /// this guard is held.
    pub fn lock(&self) -> MutexGuard<'_, FrameModel> {
        self.inner.lock()
    }

    pub fn ingest(&self, frame: CanFrame, auto_notify: bool) {
        self.inner.lock().ingest(frame, auto_notify);
    }

    pub fn ingest_bulk<I>(&self, frames: I) -> usize
    where
        I: IntoIterator<Item = CanFrame>,
    {
        self.inner.lock().ingest_bulk(frames)
    }

    /// See [`FrameModel::bulk_refresh`]; meant to be called on a timer
    pub fn bulk_refresh(&self) -> usize {
        self.inner.lock().bulk_refresh()
    }

    pub fn row_count(&self) -> usize {
        self.inner.lock().row_count()
    }

    pub fn data(&self, row: usize, column: usize) -> String {
        self.inner.lock().data(row, column)
    }

    /// Copy of the whole filtered view
    pub fn filtered_snapshot(&self) -> Vec<CanFrame> {
        self.inner.lock().filtered().to_vec()
    }

    /// Copy of some filtered rows; the range is clamped to what exists
    pub fn filtered_rows(&self, rows: Range<usize>) -> Vec<CanFrame> {
        let model = self.inner.lock();
        let filtered = model.filtered();
        let end = rows.end.min(filtered.len());
        let start = rows.start.min(end);
        filtered[start..end].to_vec()
    }

    /// Run a closure with the model locked
    pub fn with<R>(&self, f: impl FnOnce(&mut FrameModel) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

impl From<FrameModel> for SharedFrameModel {
    fn from(model: FrameModel) -> Self {
        Self::new(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_concurrent_producers_keep_per_producer_order() {
        let shared = SharedFrameModel::new(FrameModel::with_capacity(4096));

        let handles: Vec<_> = (0..4u8)
            .map(|bus| {
                let producer = shared.clone();
                thread::spawn(move || {
                    for i in 0..500u64 {
                        producer.ingest(CanFrame::new(0x181, &[]).with_bus(bus).with_timestamp(i), false);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let rows = shared.filtered_snapshot();
        assert_eq!(rows.len(), 2000);
        for bus in 0..4u8 {
            let ts: Vec<u64> = rows.iter().filter(|f| f.bus == bus).map(|f| f.timestamp_us).collect();
            assert_eq!(ts, (0..500).collect::<Vec<_>>());
        }
        assert_eq!(shared.bulk_refresh(), 2000);
    }

    #[test]
    fn test_filtered_rows_clamps() {
        let shared: SharedFrameModel = FrameModel::with_capacity(8).into();
        shared.ingest_bulk((0..3).map(|i| CanFrame::new(0x100 + i, &[])));

        assert_eq!(shared.filtered_rows(1..10).len(), 2);
        assert!(shared.filtered_rows(5..9).is_empty());
        assert_eq!(shared.row_count(), 3);
        assert_eq!(shared.data(0, 1), "0x100");
        assert!(shared.with(|m| m.filters().contains(0x100)));
    }
}
