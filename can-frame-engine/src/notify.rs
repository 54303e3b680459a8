//! Change notifications emitted by the frame model
//!
//! Observers are called synchronously while the model is being mutated (and,
//! through [`SharedFrameModel`](crate::shared::SharedFrameModel), while its
//! lock is held). They must not call back into the model. A view living on
//! another thread should use [`ChannelObserver`] and drain the receiver on
//! its own schedule.

use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;

/// A change to the filtered row sequence or the filter set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelEvent {
    /// Rows `first..=last` are about to be appended; the filtered sequence
    /// still has its pre-insert length
    AboutToInsert { first: usize, last: usize },
    /// Rows `first..=last` have been appended
    Inserted { first: usize, last: usize },
    /// Anything in the filtered sequence may have changed
    Reset,
    /// Filter membership changed (new node-id, file loaded, store cleared)
    FiltersUpdated,
}

/// Receiver of model change notifications
pub trait ModelObserver: Send + Sync {
    fn on_event(&self, event: &ModelEvent);
}

/// Forwards events into a crossbeam channel
pub struct ChannelObserver {
    sender: Sender<ModelEvent>,
}

impl ChannelObserver {
    /// Create an observer with an unbounded queue, returning its receiving end
    pub fn new() -> (Self, Receiver<ModelEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self { sender }, receiver)
    }
}

impl ModelObserver for ChannelObserver {
    fn on_event(&self, event: &ModelEvent) {
        // A dropped receiver just means nobody is watching anymore
        let _ = self.sender.send(*event);
    }
}

/// Registered observers of one model
#[derive(Default, Clone)]
pub struct ObserverList {
    observers: Vec<Arc<dyn ModelObserver>>,
}

impl ObserverList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, observer: Arc<dyn ModelObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn emit(&self, event: ModelEvent) {
        for observer in &self.observers {
            observer.on_event(&event);
        }
    }
}

impl std::fmt::Debug for ObserverList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverList")
            .field("observers", &self.observers.len())
            .finish()
    }
}
