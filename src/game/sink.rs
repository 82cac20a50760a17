//! Best-effort outbound channels to the display and lifecycle consumers

use tokio::sync::mpsc::{self, error::TrySendError};

/// Outbound buffer per sink, matching a websocket writer's queue
pub const SINK_CAPACITY: usize = 256;

/// Identity of a registered sink, used to ignore stale leave requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkId(pub u64);

/// Sending half of a text sink. Pushes never wait.
#[derive(Debug, Clone)]
pub struct Sink {
    id: SinkId,
    tx: mpsc::Sender<String>,
}

impl Sink {
    /// Create a sink and the receiver its writer task drains
    pub fn channel(id: SinkId, capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> SinkId {
        self.id
    }

    /// Try to enqueue a message. `false` means the consumer is too slow or
    /// gone and the sink must be dropped.
    pub fn push(&self, msg: String) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => false,
        }
    }
}
