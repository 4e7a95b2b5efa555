//! Notifications published by the control core.

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Capacity of the broadcast channel; slow consumers observe a lag error
/// instead of blocking the acquisition loop.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Asynchronous state changes reported to consumers.
#[derive(Debug, Clone, PartialEq)]
pub enum DsoEvent {
    SamplingStarted,
    SamplingStopped,
    StatusMessage { text: String, level: u32 },
    AvailableRecordLengthsChanged(Vec<u32>),
    RecordLengthChanged(u32),
    RecordTimeChanged(f64),
    SamplerateChanged(f64),
    SamplerateLimitsChanged { min: f64, max: f64 },
    SamplerateSet { mode: u32, steps: Vec<f64> },
    SamplesAvailable,
    CommunicationError,
}

/// Fan-out publisher for [`DsoEvent`]s. Emission never blocks and is a
/// no-op without subscribers.
#[derive(Clone)]
pub struct EventSink {
    tx: broadcast::Sender<DsoEvent>,
}

impl EventSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        EventSink { tx }
    }

    pub fn emit(&self, event: DsoEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DsoEvent> {
        self.tx.subscribe()
    }

    /// Subscription wrapped as a `Stream`.
    pub fn stream(&self) -> BroadcastStream<DsoEvent> {
        BroadcastStream::new(self.subscribe())
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}
