use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::bridge::error::{BrokerError, ErrorReason};
use crate::bridge::protocol::{
    Decision, PageRequest, PresentationContext, Reply, ReplyPayload, RequestBody, RequestId, RequestKind,
    Resolution, SurfaceNotification, SurfaceView, TabId, TokenClickPayload,
};
use crate::bridge::registry::{Outcome, PendingRequest, RequestRegistry};
use crate::bridge::surface::Presenter;
use crate::bridge::transport::{ContextSource, ContextTarget, Envelope, Inbound, Outbound, Subscription, Transport};
use crate::config::{Blocklist, TrustedOrigins};
use crate::storage::{KeyValueStore, LAST_CLICKED_TOKEN_KEY};
use crate::token_lookup::TokenLookup;
use crate::wallet::WalletState;

/// Token the user clicked on a page, persisted for the swap view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickedToken {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
}

/// External collaborators the broker reads from or calls out to
pub struct BrokerServices {
    pub transport: Arc<dyn Transport>,
    pub presenter: Arc<dyn Presenter>,
    pub wallet: Arc<dyn WalletState>,
    pub lookup: Arc<dyn TokenLookup>,
    pub store: Arc<dyn KeyValueStore>,
}

/// A page request past validation
enum Admitted {
    Answered(Reply),
    TokenClick {
        payload: TokenClickPayload,
        context: PresentationContext,
    },
    Decision(Ticket),
}

/// Registered request waiting on the surface
struct Ticket {
    id: RequestId,
    kind: RequestKind,
    view: SurfaceView,
    payload: serde_json::Value,
    context: PresentationContext,
    auto_close: bool,
    outcome: oneshot::Receiver<Outcome>,
}

/// Background request broker.
///
/// Owns the request registry and the per-tab content script state. Registry
/// locks are never held across an `.await`.
pub struct Broker {
    services: BrokerServices,
    blocklist: Blocklist,
    trusted_origins: TrustedOrigins,
    pending_timeout: Option<Duration>,
    registry: Mutex<RequestRegistry>,
    ready_tabs: Mutex<HashSet<TabId>>,
}

impl Broker {
    pub fn new(services: BrokerServices) -> Self {
        Self {
            services,
            blocklist: Blocklist::default(),
            trusted_origins: TrustedOrigins::default(),
            pending_timeout: None,
            registry: Mutex::new(RequestRegistry::new()),
            ready_tabs: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_blocklist(mut self, blocklist: Blocklist) -> Self {
        self.blocklist = blocklist;
        self
    }

    pub fn with_trusted_origins(mut self, trusted_origins: TrustedOrigins) -> Self {
        self.trusted_origins = trusted_origins;
        self
    }

    pub fn with_pending_timeout(mut self, pending_timeout: Option<Duration>) -> Self {
        self.pending_timeout = pending_timeout;
        self
    }

    /// Pump inbound envelopes until the transport closes
    pub async fn run(self: Arc<Self>, mut subscription: Subscription) {
        log::info!("🌉 Broker: listening for page and surface messages");
        while let Some(envelope) = subscription.next().await {
            self.dispatch(envelope);
        }
        log::info!("🌉 Broker: transport closed, stopping");
    }

    /// Route one inbound envelope.
    ///
    /// Page requests are admitted here, in transport order, so a teardown of
    /// the same tab queued behind them always finds their registry entries.
    /// Only the waiting part runs on its own task.
    pub fn dispatch(self: &Arc<Self>, envelope: Envelope) {
        match (envelope.source, envelope.message) {
            (ContextSource::Page(tab), Inbound::Request { call_id, request }) => {
                let admitted = self.admit(tab, request);
                let broker = Arc::clone(self);
                tokio::spawn(async move {
                    let reply = broker.complete(tab, admitted).await;
                    broker
                        .services
                        .transport
                        .send(ContextTarget::Page(tab), Outbound::Reply { call_id, reply });
                });
            }
            (ContextSource::Surface, Inbound::Resolution(resolution)) => {
                self.apply_resolution(resolution);
            }
            (ContextSource::Page(tab), Inbound::ContentReady) => self.mark_content_ready(tab),
            (ContextSource::Page(tab), Inbound::TabClosed) => {
                self.close_tab(tab);
            }
            (source, message) => {
                log::warn!("⚠️  Broker: dropping {:?} from {:?}, not allowed from that context", message, source);
            }
        }
    }

    /// Handle a page request and always produce a reply, even if the handler
    /// fails or panics
    pub async fn answer(self: &Arc<Self>, tab: TabId, request: PageRequest) -> Reply {
        let admitted = self.admit(tab, request);
        self.complete(tab, admitted).await
    }

    /// Synchronous half of request handling: validate, and register anything
    /// that has to wait on the user
    fn admit(&self, tab: TabId, request: PageRequest) -> Result<Admitted, BrokerError> {
        let context = request.presentation_context();
        match request.body {
            RequestBody::GetPublicKey {} => {
                log::info!("🔑 Broker: public key request from tab {}", tab);
                Ok(Admitted::Answered(Reply::Payload(ReplyPayload {
                    public_key: self.services.wallet.public_key(),
                    ..Default::default()
                })))
            }
            RequestBody::TokenClick { payload } => Ok(Admitted::TokenClick { payload, context }),
            body => {
                validate(&body)?;
                let kind = body
                    .kind()
                    .ok_or_else(|| BrokerError::Internal("request has no kind".to_string()))?;
                let view = kind
                    .view()
                    .ok_or_else(|| BrokerError::Internal(format!("{} has no surface view", kind)))?;

                let pending = PendingRequest::new(tab, kind, &request.origin, context);
                let id = pending.id.clone();
                let (tx, outcome) = oneshot::channel();

                let registered = self.registry.lock().register(
                    pending,
                    Box::new(move |settled| {
                        let _ = tx.send(settled);
                    }),
                );
                if !registered {
                    return Err(BrokerError::Internal(format!("request id {} collided", id)));
                }

                log::info!("📝 Broker: {} {} from tab {} ({})", kind, id, tab, request.origin);
                Ok(Admitted::Decision(Ticket {
                    id,
                    kind,
                    view,
                    payload: body.payload_value(),
                    context,
                    auto_close: self.trusted_origins.contains(&request.origin),
                    outcome,
                }))
            }
        }
    }

    /// Asynchronous half: runs on its own task so a failure or panic still
    /// turns into a reply, and never leaves the request's entry behind
    async fn complete(self: &Arc<Self>, tab: TabId, admitted: Result<Admitted, BrokerError>) -> Reply {
        let admitted = match admitted {
            Ok(admitted) => admitted,
            Err(e) => return failure_reply(tab, e),
        };

        let pending_id = match &admitted {
            Admitted::Decision(ticket) => Some(ticket.id.clone()),
            _ => None,
        };
        let broker = Arc::clone(self);
        let handled = tokio::spawn(async move { broker.settle(admitted).await }).await;

        match handled {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => failure_reply(tab, e),
            Err(e) => {
                log::error!("❌ Broker: request handler for tab {} crashed: {}", tab, e);
                if let Some(id) = pending_id {
                    self.registry.lock().resolve(&id, Outcome::Abandoned);
                }
                Reply::failed(ErrorReason::Unknown)
            }
        }
    }

    async fn settle(&self, admitted: Admitted) -> Result<Reply, BrokerError> {
        match admitted {
            Admitted::Answered(reply) => Ok(reply),
            Admitted::TokenClick { payload, context } => self.token_clicked(payload, context).await,
            Admitted::Decision(ticket) => self.await_decision(ticket).await,
        }
    }

    async fn await_decision(&self, ticket: Ticket) -> Result<Reply, BrokerError> {
        let Ticket { id, kind, view, payload, context, auto_close, mut outcome } = ticket;

        // Torn down between admission and now
        if let Ok(settled) = outcome.try_recv() {
            return Ok(self.reply_for(kind, settled));
        }

        self.services.transport.send(
            ContextTarget::Surface,
            Outbound::Notify(SurfaceNotification {
                view,
                request_id: Some(id.clone()),
                payload,
                presentation_context: context,
                auto_close,
            }),
        );

        if let Err(e) = self.services.presenter.foreground(context).await {
            self.registry.lock().resolve(&id, Outcome::Abandoned);
            return Err(BrokerError::PresentationUnavailable(e.to_string()));
        }

        if let Some(limit) = self.pending_timeout {
            if tokio::time::timeout(limit, &mut outcome).await.is_err() {
                log::warn!("⏰ Broker: {} {} unanswered after {:?}", kind, id, limit);
                self.registry.lock().resolve(&id, Outcome::TimedOut);
            }
        }

        let outcome = outcome.await.unwrap_or(Outcome::Abandoned);
        Ok(self.reply_for(kind, outcome))
    }

    fn reply_for(&self, kind: RequestKind, outcome: Outcome) -> Reply {
        match outcome {
            Outcome::Confirmed(mut payload) => {
                if kind == RequestKind::Connect && payload.public_key.is_none() {
                    payload.public_key = self.services.wallet.public_key();
                }
                Reply::Payload(payload)
            }
            _ => Reply::rejected(),
        }
    }

    /// Apply a surface resolution. Returns `false` for unknown, already
    /// settled, or mismatched resolutions, which are ignored.
    pub fn apply_resolution(&self, resolution: Resolution) -> bool {
        let mut registry = self.registry.lock();
        let pending_kind = registry.get(&resolution.request_id).map(|pending| pending.kind);

        match pending_kind {
            None => {
                log::debug!("Broker: stale resolution for {}", resolution.request_id);
                false
            }
            Some(kind) if kind != resolution.verdict.kind => {
                log::warn!(
                    "⚠️  Broker: {} is a {} request, ignoring {} resolution",
                    resolution.request_id,
                    kind,
                    resolution.verdict.kind
                );
                false
            }
            Some(_) => {
                let outcome = match resolution.verdict.decision {
                    Decision::Confirmed => {
                        Outcome::Confirmed(resolution.result.unwrap_or_default())
                    }
                    Decision::Rejected => Outcome::Rejected,
                };
                registry.resolve(&resolution.request_id, outcome)
            }
        }
    }

    /// Tab teardown: reject everything it still waits on
    pub fn close_tab(&self, tab: TabId) -> usize {
        self.ready_tabs.lock().remove(&tab);
        let cancelled = self.registry.lock().cancel_all(|pending| pending.tab == tab);
        if cancelled > 0 {
            log::info!("👋 Broker: tab {} closed, cancelled {} pending requests", tab, cancelled);
        }
        cancelled
    }

    pub fn mark_content_ready(&self, tab: TabId) {
        self.ready_tabs.lock().insert(tab);
    }

    /// Whether the content script must be (re-)injected before messaging the tab
    pub fn needs_injection(&self, tab: TabId) -> bool {
        !self.ready_tabs.lock().contains(&tab)
    }

    pub fn pending_requests(&self) -> Vec<PendingRequest> {
        self.registry.lock().pending()
    }

    pub fn is_pending(&self, id: &RequestId) -> bool {
        self.registry.lock().get(id).is_some()
    }

    async fn token_clicked(&self, payload: TokenClickPayload, context: PresentationContext) -> Result<Reply, BrokerError> {
        let address = non_blank(payload.address.as_deref());
        let symbol = non_blank(payload.symbol.as_deref());

        if address.is_some_and(|a| self.blocklist.contains_address(a))
            || symbol.is_some_and(|s| self.blocklist.contains_symbol(s))
        {
            let identifier = address.or(symbol).unwrap_or_default();
            return Err(BrokerError::Blocked(identifier.to_string()));
        }

        let token = match (address, symbol) {
            (Some(address), symbol) => {
                if !is_mint_address(address) {
                    return Err(BrokerError::InvalidPayload(format!("{} is not a mint address", address)));
                }
                ClickedToken { address: address.to_string(), symbol: symbol.map(str::to_string) }
            }
            (None, Some(symbol)) => self.resolve_symbol(symbol).await?,
            (None, None) => {
                return Err(BrokerError::InvalidPayload("token click without address or symbol".to_string()))
            }
        };

        let token_value = serde_json::to_value(&token).map_err(|e| BrokerError::Internal(e.to_string()))?;
        self.services.store.set(LAST_CLICKED_TOKEN_KEY, token_value.clone()).await?;

        log::info!("🪙 Broker: token clicked {} ({:?})", token.address, token.symbol);
        self.services.transport.send(
            ContextTarget::Surface,
            Outbound::Notify(SurfaceNotification {
                view: SurfaceView::ShowSwap,
                request_id: None,
                payload: token_value,
                presentation_context: context,
                auto_close: false,
            }),
        );
        Ok(Reply::ok())
    }

    async fn resolve_symbol(&self, symbol: &str) -> Result<ClickedToken, BrokerError> {
        let info = match self.services.lookup.find_by_symbol(symbol).await {
            Ok(Some(info)) => info,
            Ok(None) => return Err(BrokerError::Unsupported(format!("no token found for {}", symbol))),
            Err(e) => return Err(BrokerError::Unsupported(format!("lookup for {} failed: {}", symbol, e))),
        };

        if !info.passes_sanity_checks() {
            return Err(BrokerError::Unsupported(format!(
                "{} failed sanity checks (price {:?}, organic score {})",
                symbol, info.usd_price, info.organic_score
            )));
        }
        if self.blocklist.contains_address(&info.id) {
            return Err(BrokerError::Blocked(info.id));
        }

        Ok(ClickedToken { address: info.id, symbol: Some(info.symbol) })
    }
}

fn failure_reply(tab: TabId, error: BrokerError) -> Reply {
    log::warn!("⚠️  Broker: request from tab {} failed: {}", tab, error);
    Reply::failed(error.reason())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn is_mint_address(value: &str) -> bool {
    bs58::decode(value)
        .into_vec()
        .map(|bytes| bytes.len() == 32)
        .unwrap_or(false)
}

fn is_base64(value: &str) -> bool {
    !value.trim().is_empty() && STANDARD.decode(value.trim()).is_ok()
}

/// Shape checks done before anything is registered or shown
fn validate(body: &RequestBody) -> Result<(), BrokerError> {
    match body {
        RequestBody::SignTransaction { payload } if !is_base64(&payload.transaction) => Err(
            BrokerError::InvalidPayload("transaction must be a non-empty base64 string".to_string()),
        ),
        RequestBody::SignAllTransactions { payload } if payload.transactions.is_empty() => {
            Err(BrokerError::InvalidPayload("no transactions to sign".to_string()))
        }
        RequestBody::SignAllTransactions { payload } => {
            match payload.transactions.iter().position(|tx| !is_base64(tx)) {
                Some(index) => Err(BrokerError::InvalidPayload(format!(
                    "transaction {} is not a base64 string",
                    index
                ))),
                None => Ok(()),
            }
        }
        RequestBody::SignMessage { payload } if payload.message.is_empty() => {
            Err(BrokerError::InvalidPayload("message is empty".to_string()))
        }
        RequestBody::CreateToken { payload } if !payload.has_prefill() => Err(BrokerError::InvalidPayload(
            "token creation needs a name, ticker, imageUrl or description".to_string(),
        )),
        _ => Ok(()),
    }
}
