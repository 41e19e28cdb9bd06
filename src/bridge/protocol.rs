use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::bridge::error::ErrorReason;

/// Browser tab that hosts the requesting page
pub type TabId = u32;

/// Opaque identifier of one pending user decision (`<millis>-<random hex>`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Fresh identifier from the current time plus 64 random bits
    pub fn generate() -> Self {
        let mut nonce = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut nonce);
        RequestId(format!("{}-{}", Utc::now().timestamp_millis(), hex::encode(nonce)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        RequestId(value.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kinds of request a page can make
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    Connect,
    SignTransaction,
    SignAllTransactions,
    SignMessage,
    CreateToken,
    GetPublicKey,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Connect => "Connect",
            RequestKind::SignTransaction => "SignTransaction",
            RequestKind::SignAllTransactions => "SignAllTransactions",
            RequestKind::SignMessage => "SignMessage",
            RequestKind::CreateToken => "CreateToken",
            RequestKind::GetPublicKey => "GetPublicKey",
        }
    }

    /// View the surface opens for this kind
    pub fn view(&self) -> Option<SurfaceView> {
        match self {
            RequestKind::Connect => Some(SurfaceView::ShowConnect),
            RequestKind::SignTransaction => Some(SurfaceView::ShowSignTransaction),
            RequestKind::SignAllTransactions => Some(SurfaceView::ShowSignAllTransactions),
            RequestKind::SignMessage => Some(SurfaceView::ShowSignMessage),
            RequestKind::CreateToken => Some(SurfaceView::ShowTokenCreate),
            RequestKind::GetPublicKey => None,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Connect" => Ok(RequestKind::Connect),
            "SignTransaction" => Ok(RequestKind::SignTransaction),
            "SignAllTransactions" => Ok(RequestKind::SignAllTransactions),
            "SignMessage" => Ok(RequestKind::SignMessage),
            "CreateToken" => Ok(RequestKind::CreateToken),
            "GetPublicKey" => Ok(RequestKind::GetPublicKey),
            other => Err(format!("Unknown request kind: {}", other)),
        }
    }
}

/// Which UI surface the caller wants the request shown in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PresentationContext {
    #[default]
    Popup,
    SidePanel,
}

impl PresentationContext {
    pub fn from_sidebar_flag(is_sidebar_context: bool) -> Self {
        if is_sidebar_context {
            PresentationContext::SidePanel
        } else {
            PresentationContext::Popup
        }
    }
}

/// Inbound request from a page, as produced by the injected SDK
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    #[serde(flatten)]
    pub body: RequestBody,
    #[serde(default)]
    pub is_sidebar_context: bool,
    #[serde(default)]
    pub origin: String,
}

impl PageRequest {
    pub fn new(body: RequestBody, origin: &str) -> Self {
        Self {
            body,
            is_sidebar_context: false,
            origin: origin.to_string(),
        }
    }

    pub fn presentation_context(&self) -> PresentationContext {
        PresentationContext::from_sidebar_flag(self.is_sidebar_context)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RequestBody {
    #[serde(rename = "ConnectRequest")]
    Connect {},

    #[serde(rename = "SignTransactionRequest")]
    SignTransaction { payload: SignTransactionPayload },

    #[serde(rename = "SignAllTransactionsRequest")]
    SignAllTransactions { payload: SignAllTransactionsPayload },

    #[serde(rename = "SignMessageRequest")]
    SignMessage { payload: SignMessagePayload },

    #[serde(rename = "GetPublicKeyRequest")]
    GetPublicKey {},

    #[serde(rename = "CreateTokenRequest")]
    CreateToken {
        #[serde(default)]
        payload: CreateTokenPayload,
    },

    #[serde(rename = "TokenClickRequest")]
    TokenClick { payload: TokenClickPayload },
}

impl RequestBody {
    /// Registry kind, `None` for token clicks which never wait on the user
    pub fn kind(&self) -> Option<RequestKind> {
        match self {
            RequestBody::Connect {} => Some(RequestKind::Connect),
            RequestBody::SignTransaction { .. } => Some(RequestKind::SignTransaction),
            RequestBody::SignAllTransactions { .. } => Some(RequestKind::SignAllTransactions),
            RequestBody::SignMessage { .. } => Some(RequestKind::SignMessage),
            RequestBody::GetPublicKey {} => Some(RequestKind::GetPublicKey),
            RequestBody::CreateToken { .. } => Some(RequestKind::CreateToken),
            RequestBody::TokenClick { .. } => None,
        }
    }

    /// Kind-specific payload forwarded to the surface for display
    pub fn payload_value(&self) -> serde_json::Value {
        let encoded = match self {
            RequestBody::SignTransaction { payload } => serde_json::to_value(payload),
            RequestBody::SignAllTransactions { payload } => serde_json::to_value(payload),
            RequestBody::SignMessage { payload } => serde_json::to_value(payload),
            RequestBody::CreateToken { payload } => serde_json::to_value(payload),
            RequestBody::TokenClick { payload } => serde_json::to_value(payload),
            RequestBody::Connect {} | RequestBody::GetPublicKey {} => Ok(serde_json::Value::Null),
        };
        encoded.unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignTransactionPayload {
    /// Base64 encoded serialized transaction
    pub transaction: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignAllTransactionsPayload {
    pub transactions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignMessagePayload {
    /// Plaintext message shown to the user and signed as UTF-8 bytes
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTokenPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CreateTokenPayload {
    /// Pre-fill is allowed to be partial: one non-blank field is enough
    pub fn has_prefill(&self) -> bool {
        [&self.name, &self.ticker, &self.image_url, &self.description]
            .iter()
            .any(|field| field.as_deref().is_some_and(|value| !value.trim().is_empty()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClickPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
}

/// Views the presentation surface knows how to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SurfaceView {
    ShowConnect,
    ShowSignTransaction,
    ShowSignAllTransactions,
    ShowSignMessage,
    ShowSwap,
    ShowTokenCreate,
}

impl SurfaceView {
    pub fn kind(&self) -> Option<RequestKind> {
        match self {
            SurfaceView::ShowConnect => Some(RequestKind::Connect),
            SurfaceView::ShowSignTransaction => Some(RequestKind::SignTransaction),
            SurfaceView::ShowSignAllTransactions => Some(RequestKind::SignAllTransactions),
            SurfaceView::ShowSignMessage => Some(RequestKind::SignMessage),
            SurfaceView::ShowTokenCreate => Some(RequestKind::CreateToken),
            SurfaceView::ShowSwap => None,
        }
    }
}

/// Broker to surface notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceNotification {
    #[serde(rename = "type")]
    pub view: SurfaceView,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub presentation_context: PresentationContext,
    /// Close the surface once the request is resolved (trusted origins only)
    #[serde(default)]
    pub auto_close: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    Confirmed,
    Rejected,
}

/// `<Kind>Confirmed` / `<Kind>Rejected` resolution type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Verdict {
    pub kind: RequestKind,
    pub decision: Decision,
}

impl Verdict {
    pub fn confirmed(kind: RequestKind) -> Self {
        Self { kind, decision: Decision::Confirmed }
    }

    pub fn rejected(kind: RequestKind) -> Self {
        Self { kind, decision: Decision::Rejected }
    }
}

impl TryFrom<String> for Verdict {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if let Some(kind) = value.strip_suffix("Confirmed") {
            return Ok(Verdict::confirmed(kind.parse()?));
        }
        if let Some(kind) = value.strip_suffix("Rejected") {
            return Ok(Verdict::rejected(kind.parse()?));
        }
        Err(format!("Unknown resolution type: {}", value))
    }
}

impl From<Verdict> for String {
    fn from(verdict: Verdict) -> Self {
        let suffix = match verdict.decision {
            Decision::Confirmed => "Confirmed",
            Decision::Rejected => "Rejected",
        };
        format!("{}{}", verdict.kind, suffix)
    }
}

/// Surface to broker resolution of one pending request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    #[serde(rename = "type")]
    pub verdict: Verdict,
    pub request_id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ReplyPayload>,
}

/// Data returned to the page for a confirmed request; empty on rejection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_transaction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_transactions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

impl ReplyPayload {
    pub fn is_empty(&self) -> bool {
        self == &ReplyPayload::default()
    }
}

/// Reply to the original page call.
///
/// An empty payload (`{}`) means the user declined; callers must not treat it
/// as an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    Status {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<ErrorReason>,
    },
    Payload(ReplyPayload),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Status { success: true, reason: None }
    }

    pub fn failed(reason: ErrorReason) -> Self {
        Reply::Status { success: false, reason: Some(reason) }
    }

    pub fn rejected() -> Self {
        Reply::Payload(ReplyPayload::default())
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, Reply::Payload(payload) if payload.is_empty())
    }

    pub fn failure_reason(&self) -> Option<ErrorReason> {
        match self {
            Reply::Status { success: false, reason } => *reason,
            _ => None,
        }
    }
}

/// Which side of the socket a connection speaks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContextRole {
    Page,
    Surface,
}

/// Frames sent by content scripts and surfaces to the relay socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    #[serde(rename_all = "camelCase")]
    Hello {
        role: ContextRole,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tab_id: Option<TabId>,
    },

    #[serde(rename_all = "camelCase")]
    Request { call_id: String, request: PageRequest },

    ContentReady,

    Resolution { resolution: Resolution },
}

/// Frames sent by the relay socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerFrame {
    #[serde(rename_all = "camelCase")]
    Reply { call_id: String, reply: Reply },

    Notification { notification: SurfaceNotification },

    Error { message: String },
}
