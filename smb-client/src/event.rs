use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use smb_client_core::logging::trace;

const BUS_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SMBEvent {
    ConnectionClosed { host: String, port: u16 },
    SessionLoggedOff { session_id: u64 },
}

/// In-process pub/sub for connection lifecycle events. Publishing never
/// fails; events are delivered at least once to every live local subscriber.
#[derive(Debug, Clone)]
pub struct SMBEventBus {
    sender: broadcast::Sender<SMBEvent>,
}

impl SMBEventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, event: SMBEvent) {
        trace!(?event, "publishing event");
        // An Err only means nobody is subscribed right now.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> BroadcastStream<SMBEvent> {
        BroadcastStream::new(self.sender.subscribe())
    }
}

impl Default for SMBEventBus {
    fn default() -> Self {
        Self::new()
    }
}
