//! Single-subscriber callback slots with replace-on-register semantics.
//!
//! The coordinator is the only consumer of connection events, so each event
//! class holds at most one handler; registering again replaces the previous
//! one. Handlers are invoked without any lock held, so a handler may call
//! back into the component that emitted it.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::protocol::OutputSnapshot;

pub struct CallbackSlot<Args> {
    slot: Mutex<Option<Arc<dyn Fn(Args) + Send + Sync>>>,
}

impl<Args> CallbackSlot<Args> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    pub fn set(&self, callback: impl Fn(Args) + Send + Sync + 'static) {
        *self.slot.lock() = Some(Arc::new(callback));
    }

    pub fn emit(&self, args: Args) {
        let callback = self.slot.lock().clone();
        if let Some(callback) = callback {
            callback(args);
        }
    }

    pub fn clear(&self) {
        *self.slot.lock() = None;
    }
}

impl<Args> Default for CallbackSlot<Args> {
    fn default() -> Self {
        Self::new()
    }
}

/// The connection manager's three event classes.
#[derive(Default)]
pub struct ConnectionEvents {
    connection: CallbackSlot<bool>,
    snapshot: CallbackSlot<OutputSnapshot>,
    reconnecting: CallbackSlot<(u32, u32)>,
}

impl ConnectionEvents {
    pub fn on_connection(&self, callback: impl Fn(bool) + Send + Sync + 'static) {
        self.connection.set(callback);
    }

    pub fn on_snapshot(&self, callback: impl Fn(OutputSnapshot) + Send + Sync + 'static) {
        self.snapshot.set(callback);
    }

    pub fn on_reconnecting(&self, callback: impl Fn(u32, u32) + Send + Sync + 'static) {
        self.reconnecting.set(move |(attempt, max)| callback(attempt, max));
    }

    pub fn emit_connection(&self, connected: bool) {
        self.connection.emit(connected);
    }

    pub fn emit_snapshot(&self, snapshot: OutputSnapshot) {
        self.snapshot.emit(snapshot);
    }

    pub fn emit_reconnecting(&self, attempt: u32, max_attempts: u32) {
        self.reconnecting.emit((attempt, max_attempts));
    }

    pub fn clear(&self) {
        self.connection.clear();
        self.snapshot.clear();
        self.reconnecting.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn replace_on_register() {
        let slot: CallbackSlot<u32> = CallbackSlot::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = first.clone();
        slot.set(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        slot.emit(1);

        let counter = second.clone();
        slot.set(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        slot.emit(2);
        slot.emit(3);

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn emit_without_subscriber_is_noop() {
        let slot: CallbackSlot<bool> = CallbackSlot::new();
        slot.emit(true);
        slot.clear();
        slot.emit(false);
    }
}
