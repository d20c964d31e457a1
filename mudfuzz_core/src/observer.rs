use crate::state::FuzzerState;
use std::sync::{Arc, Mutex, MutexGuard};

/// Everything the engine does, reported in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FuzzerEvent {
    StateChanged(FuzzerState),
    ReceivedText(String),
    /// An inbound buffer that was not valid UTF-8; carries its length in bytes.
    ReceivedGarbled(usize),
    SentBuffer(Vec<u8>),
    ErrorDetected,
    /// The bridge stopped and every buffer it delivered has been processed.
    ConnectionClosed,
}

/// An `Observer` receives the engine's event stream.
///
/// Observers are called inline from the tick loop, once per event, so an
/// implementation must return quickly. The engine has exactly one observer;
/// fan-out, if needed, belongs inside the observer.
pub trait Observer {
    fn on_event(&mut self, event: &FuzzerEvent);
}

impl<F> Observer for F
where
    F: FnMut(&FuzzerEvent),
{
    fn on_event(&mut self, event: &FuzzerEvent) {
        self(event)
    }
}

/// An observer that discards every event.
#[derive(Default, Debug, Clone, Copy)]
pub struct NoOpObserver;

impl Observer for NoOpObserver {
    fn on_event(&mut self, _event: &FuzzerEvent) {}
}

/// A recording observer. Clones share one log, so a caller can keep a handle
/// while the engine owns another.
#[derive(Default, Debug, Clone)]
pub struct EventLog {
    events: Arc<Mutex<Vec<FuzzerEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Default::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<FuzzerEvent>> {
        // A poisoned log still holds every event recorded before the panic.
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> Vec<FuzzerEvent> {
        self.lock().clone()
    }

    /// Removes and returns all recorded events.
    pub fn take(&self) -> Vec<FuzzerEvent> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes of every `SentBuffer` event, in order.
    pub fn sent_buffers(&self) -> Vec<Vec<u8>> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                FuzzerEvent::SentBuffer(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    /// States reported by `StateChanged` events, in order.
    pub fn states(&self) -> Vec<FuzzerState> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                FuzzerEvent::StateChanged(state) => Some(*state),
                _ => None,
            })
            .collect()
    }
}

impl Observer for EventLog {
    fn on_event(&mut self, event: &FuzzerEvent) {
        self.lock().push(event.clone());
    }
}
