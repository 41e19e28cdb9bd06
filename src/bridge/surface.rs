use async_trait::async_trait;
use thiserror::Error;

use crate::bridge::protocol::{
    PresentationContext, ReplyPayload, RequestKind, Resolution, SignAllTransactionsPayload,
    SignMessagePayload, SignTransactionPayload, SurfaceNotification, Verdict,
};
use crate::signing::{sign_encoded_transaction, sign_text_message, SigningError, TransactionSigner};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PresentationError {
    #[error("no presentation surface is attached")]
    NoSurface,
}

/// Brings the popup or side panel to the foreground
#[async_trait]
pub trait Presenter: Send + Sync {
    async fn foreground(&self, context: PresentationContext) -> Result<(), PresentationError>;
}

/// Surface-side helper turning a notification plus a user decision into the
/// resolution the broker expects
pub struct Approver<S> {
    signer: S,
}

impl<S: TransactionSigner> Approver<S> {
    pub fn new(signer: S) -> Self {
        Self { signer }
    }

    /// Sign whatever the notification asks for and build a `<Kind>Confirmed`
    pub async fn approve(&self, notification: &SurfaceNotification) -> Result<Resolution, SigningError> {
        let (kind, request_id) = match (notification.view.kind(), &notification.request_id) {
            (Some(kind), Some(id)) => (kind, id.clone()),
            _ => {
                return Err(SigningError::Unsupported(format!(
                    "{:?} has nothing to approve",
                    notification.view
                )))
            }
        };

        let result = match kind {
            RequestKind::Connect => ReplyPayload {
                public_key: Some(self.signer.get_public_key().await?),
                ..Default::default()
            },
            RequestKind::SignTransaction => {
                let payload: SignTransactionPayload = parse_payload(notification)?;
                ReplyPayload {
                    signed_transaction: Some(sign_encoded_transaction(&self.signer, &payload.transaction).await?),
                    ..Default::default()
                }
            }
            RequestKind::SignAllTransactions => {
                let payload: SignAllTransactionsPayload = parse_payload(notification)?;
                let mut signed = Vec::with_capacity(payload.transactions.len());
                for transaction in &payload.transactions {
                    signed.push(sign_encoded_transaction(&self.signer, transaction).await?);
                }
                ReplyPayload { signed_transactions: Some(signed), ..Default::default() }
            }
            RequestKind::SignMessage => {
                let payload: SignMessagePayload = parse_payload(notification)?;
                ReplyPayload {
                    signature: Some(sign_text_message(&self.signer, &payload.message).await?),
                    ..Default::default()
                }
            }
            RequestKind::CreateToken | RequestKind::GetPublicKey => {
                return Err(SigningError::Unsupported(format!("{} cannot be approved here", kind)))
            }
        };

        log::info!("✍️  Surface: approved {} {} with {}", kind, request_id, self.signer.get_name());
        Ok(Resolution {
            verdict: Verdict::confirmed(kind),
            request_id,
            result: Some(result),
        })
    }
}

/// `<Kind>Rejected` for a notification, `None` if it carries no request
pub fn reject(notification: &SurfaceNotification) -> Option<Resolution> {
    let kind = notification.view.kind()?;
    let request_id = notification.request_id.clone()?;
    Some(Resolution {
        verdict: Verdict::rejected(kind),
        request_id,
        result: None,
    })
}

fn parse_payload<T: serde::de::DeserializeOwned>(notification: &SurfaceNotification) -> Result<T, SigningError> {
    serde_json::from_value(notification.payload.clone())
        .map_err(|e| SigningError::Unsupported(format!("malformed {:?} payload: {}", notification.view, e)))
}
