//! Where response lines go.

use meshgate_protocol::Response;
use parking_lot::Mutex;

/// Receives the response lines produced by command handling.
pub trait ResponseSink: Send + Sync {
    /// Deliver one response.
    fn send(&self, response: &Response);
}

/// Collects responses in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    responses: Mutex<Vec<Response>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every response collected so far.
    pub fn take(&self) -> Vec<Response> {
        std::mem::take(&mut *self.responses.lock())
    }

    /// Number of responses collected so far.
    pub fn len(&self) -> usize {
        self.responses.lock().len()
    }

    /// Whether nothing has been collected.
    pub fn is_empty(&self) -> bool {
        self.responses.lock().is_empty()
    }
}

impl ResponseSink for MemorySink {
    fn send(&self, response: &Response) {
        self.responses.lock().push(response.clone());
    }
}
