use async_trait::async_trait;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};

use crate::bridge::protocol::{ClientFrame, ContextRole, PresentationContext, ServerFrame, TabId};
use crate::bridge::surface::{PresentationError, Presenter};
use crate::bridge::transport::{
    ContextSource, ContextTarget, Envelope, Inbound, Listeners, Outbound, Subscription, Transport,
};

type ServerResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;
type Outgoing = mpsc::UnboundedSender<Message>;

/// WebSocket-backed transport. Pages and surfaces are separate connections
/// that introduce themselves with a `hello` frame.
pub struct SocketTransport {
    pages: Mutex<HashMap<TabId, (u64, Outgoing)>>,
    surfaces: Mutex<HashMap<u64, Outgoing>>,
    inbound: Listeners,
    next_connection: AtomicU64,
}

impl SocketTransport {
    pub fn new() -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
            surfaces: Mutex::new(HashMap::new()),
            inbound: Listeners::new(),
            next_connection: AtomicU64::new(1),
        }
    }

    pub fn surface_count(&self) -> usize {
        self.surfaces.lock().len()
    }

    pub fn page_count(&self) -> usize {
        self.pages.lock().len()
    }

    fn publish(&self, source: ContextSource, message: Inbound) {
        if self.inbound.publish(Envelope::new(source, message)) == 0 {
            log::debug!("Bridge: no broker subscribed, inbound message dropped");
        }
    }

    fn attach(&self, source: ContextSource, outgoing: Outgoing) -> u64 {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        match source {
            ContextSource::Page(tab) => {
                if self.pages.lock().insert(tab, (id, outgoing)).is_some() {
                    log::info!("🔄 Bridge: tab {} reconnected", tab);
                }
            }
            ContextSource::Surface => {
                self.surfaces.lock().insert(id, outgoing);
            }
        }
        id
    }

    fn detach(&self, source: ContextSource, id: u64) {
        match source {
            ContextSource::Page(tab) => {
                let removed = {
                    let mut pages = self.pages.lock();
                    match pages.get(&tab) {
                        Some((current, _)) if *current == id => pages.remove(&tab).is_some(),
                        _ => false,
                    }
                };
                // A reload replaces the connection; only the last one closing tears the tab down
                if removed {
                    self.publish(source, Inbound::TabClosed);
                }
            }
            ContextSource::Surface => {
                self.surfaces.lock().remove(&id);
            }
        }
    }
}

impl Default for SocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn encode(frame: &ServerFrame) -> Option<Message> {
    match serde_json::to_string(frame) {
        Ok(text) => Some(Message::Text(text)),
        Err(e) => {
            log::error!("❌ Bridge: failed to encode frame: {}", e);
            None
        }
    }
}

impl Transport for SocketTransport {
    fn send(&self, target: ContextTarget, message: Outbound) {
        let frame = match message {
            Outbound::Reply { call_id, reply } => ServerFrame::Reply { call_id, reply },
            Outbound::Notify(notification) => ServerFrame::Notification { notification },
        };
        let Some(encoded) = encode(&frame) else {
            return;
        };

        match target {
            ContextTarget::Page(tab) => match self.pages.lock().get(&tab) {
                Some((_, outgoing)) => {
                    if outgoing.send(encoded).is_err() {
                        log::debug!("Bridge: tab {} is closing, reply dropped", tab);
                    }
                }
                None => log::debug!("Bridge: tab {} is gone, reply dropped", tab),
            },
            ContextTarget::Surface => {
                let surfaces = self.surfaces.lock();
                if surfaces.is_empty() {
                    log::debug!("Bridge: no surface attached, notification dropped");
                }
                for outgoing in surfaces.values() {
                    let _ = outgoing.send(encoded.clone());
                }
            }
        }
    }

    fn subscribe(&self) -> Subscription {
        self.inbound.subscribe()
    }
}

#[async_trait]
impl Presenter for SocketTransport {
    async fn foreground(&self, context: PresentationContext) -> Result<(), PresentationError> {
        let surfaces = self.surface_count();
        if surfaces == 0 {
            return Err(PresentationError::NoSurface);
        }
        log::info!("🪟 Bridge: presenting in {:?} on {} surface(s)", context, surfaces);
        Ok(())
    }
}

pub struct BridgeServer {
    port: u16,
    transport: Arc<SocketTransport>,
}

impl BridgeServer {
    pub fn new(port: u16, transport: Arc<SocketTransport>) -> Self {
        Self { port, transport }
    }

    pub async fn start(self: Arc<Self>) -> ServerResult<()> {
        let addr: SocketAddr = format!("127.0.0.1:{}", self.port).parse()?;
        let listener = TcpListener::bind(&addr).await?;
        self.serve(listener).await
    }

    /// Accept loop on an already bound listener
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> ServerResult<()> {
        log::info!("🌉 Browser bridge running on ws://{}", listener.local_addr()?);

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream).await {
                            log::warn!("⚠️  Bridge: connection from {} ended with error: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    log::error!("❌ Bridge: error accepting connection: {}", e);
                }
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream) -> ServerResult<()> {
        let ws_stream = accept_async(stream).await?;
        let (mut write, mut read) = ws_stream.split();

        let source = match read_hello(&mut read).await? {
            Ok(source) => source,
            Err(message) => {
                if let Some(frame) = encode(&ServerFrame::Error { message }) {
                    write.send(frame).await?;
                }
                return Ok(());
            }
        };

        let (outgoing, mut queue) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(message) = queue.recv().await {
                if write.send(message).await.is_err() {
                    break;
                }
            }
        });

        let id = self.transport.attach(source, outgoing.clone());
        log::info!("🔌 Bridge: {:?} connected", source);

        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(frame) => match inbound_for(frame) {
                        Some(message) => self.transport.publish(source, message),
                        None => {
                            let error = ServerFrame::Error { message: "Unexpected frame".to_string() };
                            if let Some(frame) = encode(&error) {
                                let _ = outgoing.send(frame);
                            }
                        }
                    },
                    Err(e) => {
                        let error = ServerFrame::Error { message: format!("Invalid request format: {}", e) };
                        if let Some(frame) = encode(&error) {
                            let _ = outgoing.send(frame);
                        }
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(data)) => {
                    let _ = outgoing.send(Message::Pong(data));
                }
                Err(e) => {
                    log::warn!("⚠️  Bridge: WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }

        self.transport.detach(source, id);
        drop(outgoing);
        let _ = writer.await;
        log::info!("🔌 Bridge: {:?} disconnected", source);
        Ok(())
    }
}

/// Wait for the introduction frame. The inner `Err` is a protocol violation
/// reported back to the peer.
async fn read_hello(
    read: &mut SplitStream<WebSocketStream<TcpStream>>,
) -> ServerResult<Result<ContextSource, String>> {
    while let Some(msg) = read.next().await {
        let text = match msg? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        return Ok(match serde_json::from_str::<ClientFrame>(&text) {
            Ok(ClientFrame::Hello { role: ContextRole::Surface, .. }) => Ok(ContextSource::Surface),
            Ok(ClientFrame::Hello { role: ContextRole::Page, tab_id: Some(tab) }) => Ok(ContextSource::Page(tab)),
            Ok(ClientFrame::Hello { role: ContextRole::Page, tab_id: None }) => {
                Err("Page hello requires a tabId".to_string())
            }
            Ok(_) => Err("Expected hello frame".to_string()),
            Err(e) => Err(format!("Invalid request format: {}", e)),
        });
    }
    Ok(Err("Connection closed before hello".to_string()))
}

fn inbound_for(frame: ClientFrame) -> Option<Inbound> {
    match frame {
        ClientFrame::Request { call_id, request } => Some(Inbound::Request { call_id, request }),
        ClientFrame::ContentReady => Some(Inbound::ContentReady),
        ClientFrame::Resolution { resolution } => Some(Inbound::Resolution(resolution)),
        ClientFrame::Hello { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::error::ErrorReason;
    use crate::bridge::handler::{Broker, BrokerServices};
    use crate::bridge::protocol::{PageRequest, Reply, RequestBody, SignMessagePayload};
    use crate::bridge::surface::Approver;
    use crate::signing::SoftwareSigner;
    use crate::storage::MemoryStore;
    use crate::token_lookup::JupiterLookup;
    use crate::wallet::{ActiveWallet, Wallet};
    use std::time::Duration;
    use tokio_tungstenite::{connect_async, MaybeTlsStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn start_server() -> (Arc<SocketTransport>, SocketAddr) {
        let transport = Arc::new(SocketTransport::new());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(BridgeServer::new(addr.port(), transport.clone()));
        tokio::spawn(server.serve(listener));
        (transport, addr)
    }

    fn start_broker(transport: Arc<SocketTransport>, wallet: Wallet) {
        let broker = Arc::new(Broker::new(BrokerServices {
            transport: transport.clone(),
            presenter: transport.clone(),
            wallet: Arc::new(ActiveWallet::new(Some(wallet))),
            lookup: Arc::new(JupiterLookup::new("http://127.0.0.1:9/search")),
            store: Arc::new(MemoryStore::new()),
        }));
        let subscription = transport.subscribe();
        tokio::spawn(broker.run(subscription));
    }

    async fn connect(addr: SocketAddr, hello: ClientFrame) -> Client {
        let (mut ws, _) = connect_async(format!("ws://{}", addr).as_str()).await.unwrap();
        send(&mut ws, &hello).await;
        ws
    }

    async fn send(ws: &mut Client, frame: &ClientFrame) {
        ws.send(Message::Text(serde_json::to_string(frame).unwrap())).await.unwrap();
    }

    async fn recv(ws: &mut Client) -> ServerFrame {
        loop {
            if let Message::Text(text) = ws.next().await.unwrap().unwrap() {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    fn sign_message(call_id: &str) -> ClientFrame {
        ClientFrame::Request {
            call_id: call_id.to_string(),
            request: PageRequest::new(
                RequestBody::SignMessage { payload: SignMessagePayload { message: "hello".into() } },
                "https://jup.ag",
            ),
        }
    }

    #[tokio::test]
    async fn test_sign_message_round_trip_over_socket() {
        let (transport, addr) = start_server().await;
        let wallet = Wallet::new("main".into());
        start_broker(transport.clone(), wallet.clone());

        let mut surface = connect(addr, ClientFrame::Hello { role: ContextRole::Surface, tab_id: None }).await;
        wait_until(|| transport.surface_count() == 1).await;

        let mut page = connect(addr, ClientFrame::Hello { role: ContextRole::Page, tab_id: Some(3) }).await;
        send(&mut page, &sign_message("call-1")).await;

        let notification = match recv(&mut surface).await {
            ServerFrame::Notification { notification } => notification,
            other => panic!("unexpected frame {:?}", other),
        };
        let resolution = Approver::new(SoftwareSigner::new(wallet))
            .approve(&notification)
            .await
            .unwrap();
        send(&mut surface, &ClientFrame::Resolution { resolution }).await;

        match recv(&mut page).await {
            ServerFrame::Reply { call_id, reply: Reply::Payload(payload) } => {
                assert_eq!(call_id, "call-1");
                assert!(payload.signature.is_some());
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_request_without_surface_is_unavailable() {
        let (transport, addr) = start_server().await;
        start_broker(transport, Wallet::new("main".into()));

        let mut page = connect(addr, ClientFrame::Hello { role: ContextRole::Page, tab_id: Some(1) }).await;
        send(&mut page, &sign_message("call-2")).await;

        match recv(&mut page).await {
            ServerFrame::Reply { reply, .. } => {
                assert_eq!(reply.failure_reason(), Some(ErrorReason::PresentationUnavailable))
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_page_disconnect_publishes_tab_closed() {
        let (transport, addr) = start_server().await;
        let mut subscription = transport.subscribe();

        let mut page = connect(addr, ClientFrame::Hello { role: ContextRole::Page, tab_id: Some(5) }).await;
        send(&mut page, &ClientFrame::ContentReady).await;
        let ready = subscription.next().await.unwrap();
        assert_eq!(ready, Envelope::new(ContextSource::Page(5), Inbound::ContentReady));

        page.close(None).await.unwrap();
        let closed = subscription.next().await.unwrap();
        assert_eq!(closed, Envelope::new(ContextSource::Page(5), Inbound::TabClosed));
        wait_until(|| transport.page_count() == 0).await;
    }

    #[tokio::test]
    async fn test_bad_frames_get_error_replies() {
        let (_transport, addr) = start_server().await;

        let (mut ws, _) = connect_async(format!("ws://{}", addr).as_str()).await.unwrap();
        ws.send(Message::Text(r#"{"type":"hello","role":"page"}"#.to_string())).await.unwrap();
        assert!(matches!(recv(&mut ws).await, ServerFrame::Error { .. }));

        let mut page = connect(addr, ClientFrame::Hello { role: ContextRole::Page, tab_id: Some(2) }).await;
        page.send(Message::Text("not json".to_string())).await.unwrap();
        match recv(&mut page).await {
            ServerFrame::Error { message } => assert!(message.starts_with("Invalid request format")),
            other => panic!("unexpected frame {:?}", other),
        }
    }
}
