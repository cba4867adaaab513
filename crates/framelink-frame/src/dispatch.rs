use std::panic::{catch_unwind, AssertUnwindSafe};

use framelink_transport::Message;
use serde_json::Value;
use tracing::warn;

use crate::error::DecodeError;

/// Callback invoked with every decoded inbound message.
pub type Listener = Box<dyn FnMut(&Value) + Send + 'static>;

/// Decode an inbound message body as JSON.
pub fn decode(message: &Message) -> Result<Value, DecodeError> {
    match message {
        Message::Text(text) => Ok(serde_json::from_str(text)?),
        Message::Binary(bytes) => Err(DecodeError::Binary { len: bytes.len() }),
    }
}

/// Outcome of dispatching one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dispatched {
    /// Listeners that returned normally.
    pub delivered: usize,
    /// Indexes of listeners that panicked.
    pub panicked: Vec<usize>,
}

/// Ordered, append-only listener set.
#[derive(Default)]
pub struct Dispatcher {
    listeners: Vec<Listener>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener. No de-duplication.
    pub fn on_message<F>(&mut self, listener: F)
    where
        F: FnMut(&Value) + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Decode `message` and hand the value to every listener in
    /// registration order.
    ///
    /// Nothing is invoked when decoding fails. A panicking listener does not
    /// stop the ones after it.
    pub fn dispatch(&mut self, message: &Message) -> Result<Dispatched, DecodeError> {
        let value = decode(message)?;
        Ok(self.dispatch_value(&value))
    }

    /// Hand an already decoded value to every listener in registration order.
    pub fn dispatch_value(&mut self, value: &Value) -> Dispatched {
        let mut outcome = Dispatched::default();
        for (index, listener) in self.listeners.iter_mut().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| listener(value))) {
                Ok(()) => outcome.delivered += 1,
                Err(_) => {
                    warn!(listener = index, "message listener panicked");
                    outcome.panicked.push(index);
                }
            }
        }
        outcome
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
