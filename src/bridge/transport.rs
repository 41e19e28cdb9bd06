use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use crate::bridge::protocol::{PageRequest, Reply, Resolution, SurfaceNotification, TabId};

const OUTBOX_CAPACITY: usize = 256;

/// Where an outbound message should go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextTarget {
    Page(TabId),
    /// Every attached presentation surface
    Surface,
}

/// Who an inbound message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextSource {
    Page(TabId),
    Surface,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Reply { call_id: String, reply: Reply },
    Notify(SurfaceNotification),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Request { call_id: String, request: PageRequest },
    Resolution(Resolution),
    ContentReady,
    TabClosed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub source: ContextSource,
    pub message: Inbound,
}

impl Envelope {
    pub fn new(source: ContextSource, message: Inbound) -> Self {
        Self { source, message }
    }
}

/// Message bus between page, broker and surface contexts.
///
/// `send` is fire-and-forget. Subscribers may observe the same logical message
/// more than once, so consumers have to be idempotent.
pub trait Transport: Send + Sync {
    fn send(&self, target: ContextTarget, message: Outbound);

    fn subscribe(&self) -> Subscription;
}

/// Stream of inbound envelopes for one listener. Unbounded, so a burst of
/// inbound traffic never evicts a resolution or a tab teardown.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<Envelope>) -> Self {
        Self { rx }
    }

    /// Next envelope, or `None` once every sender is gone
    pub async fn next(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }
}

/// Inbound fan-out: every live subscription gets its own copy of each envelope
#[derive(Default)]
pub struct Listeners {
    senders: Mutex<Vec<mpsc::UnboundedSender<Envelope>>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().push(tx);
        Subscription::new(rx)
    }

    /// Queue `envelope` for every live subscription, returning how many got it
    pub fn publish(&self, envelope: Envelope) -> usize {
        let mut senders = self.senders.lock();
        senders.retain(|tx| !tx.is_closed());
        for tx in senders.iter() {
            let _ = tx.send(envelope.clone());
        }
        senders.len()
    }
}

/// Process-local transport, used to embed the broker and to drive it in tests
pub struct InMemoryTransport {
    inbound: Listeners,
    outbound: broadcast::Sender<(ContextTarget, Outbound)>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        let (outbound, _) = broadcast::channel(OUTBOX_CAPACITY);
        Self { inbound: Listeners::new(), outbound }
    }

    /// Inject a message as if it arrived from another context
    pub fn deliver(&self, envelope: Envelope) {
        if self.inbound.publish(envelope) == 0 {
            log::debug!("Transport: no listener for inbound message, dropped");
        }
    }

    /// Observe everything the broker sends out
    pub fn outbox(&self) -> broadcast::Receiver<(ContextTarget, Outbound)> {
        self.outbound.subscribe()
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for InMemoryTransport {
    fn send(&self, target: ContextTarget, message: Outbound) {
        if self.outbound.send((target, message)).is_err() {
            log::debug!("Transport: nobody listening on {:?}, message dropped", target);
        }
    }

    fn subscribe(&self) -> Subscription {
        self.inbound.subscribe()
    }
}
