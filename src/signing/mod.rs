// src/signing/mod.rs
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use solana_sdk::{pubkey::Pubkey, signature::Signature, transaction::VersionedTransaction};
use std::str::FromStr;
use thiserror::Error;

pub mod software;

pub use software::SoftwareSigner;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Invalid transaction encoding: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("Failed to (de)serialize transaction: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Invalid signer key: {0}")]
    InvalidKey(String),

    #[error("Wallet pubkey not found among required signers")]
    NotARequiredSigner,

    #[error("Signer returned a {0}-byte signature")]
    MalformedSignature(usize),

    #[error("Unsupported request: {0}")]
    Unsupported(String),
}

/// Trait for different transaction signing methods
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Base58 public key of the signer
    async fn get_public_key(&self) -> Result<String, SigningError>;

    /// Detached ed25519 signature over `message`
    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, SigningError>;

    /// Display name for the signing method
    fn get_name(&self) -> String;
}

/// Sign a base64 encoded `VersionedTransaction` and return it re-encoded.
///
/// The signature lands in the slot of the signer's key among the required
/// signers; other slots are left as they were.
pub async fn sign_encoded_transaction<S>(signer: &S, encoded: &str) -> Result<String, SigningError>
where
    S: TransactionSigner + ?Sized,
{
    let tx_bytes = STANDARD.decode(encoded.trim())?;
    let mut versioned_tx: VersionedTransaction = bincode::deserialize(&tx_bytes)?;

    let signer_pubkey = Pubkey::from_str(&signer.get_public_key().await?)
        .map_err(|e| SigningError::InvalidKey(e.to_string()))?;

    let required_signers = versioned_tx.message.header().num_required_signatures as usize;
    let signer_index = versioned_tx
        .message
        .static_account_keys()
        .iter()
        .take(required_signers)
        .position(|key| key == &signer_pubkey)
        .ok_or(SigningError::NotARequiredSigner)?;

    let signature_bytes = signer.sign_message(&versioned_tx.message.serialize()).await?;
    let signature_array = <[u8; 64]>::try_from(signature_bytes.as_slice())
        .map_err(|_| SigningError::MalformedSignature(signature_bytes.len()))?;

    if versioned_tx.signatures.len() != required_signers {
        versioned_tx.signatures = vec![Signature::default(); required_signers];
    }
    versioned_tx.signatures[signer_index] = Signature::from(signature_array);

    let signed_tx_bytes = bincode::serialize(&versioned_tx)?;
    log::info!("📦 Signer: transaction signed ({} bytes)", signed_tx_bytes.len());
    Ok(STANDARD.encode(signed_tx_bytes))
}

/// Sign a plaintext message, returning the base58 signature
pub async fn sign_text_message<S>(signer: &S, message: &str) -> Result<String, SigningError>
where
    S: TransactionSigner + ?Sized,
{
    let signature = signer.sign_message(message.as_bytes()).await?;
    Ok(bs58::encode(signature).into_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Wallet;
    use ed25519_dalek::Verifier;
    use solana_sdk::message::{Message, VersionedMessage};

    fn unsigned_transaction(payer: &Pubkey) -> String {
        let message = Message::new(&[], Some(payer));
        let tx = VersionedTransaction {
            signatures: vec![Signature::default()],
            message: VersionedMessage::Legacy(message),
        };
        STANDARD.encode(bincode::serialize(&tx).unwrap())
    }

    #[tokio::test]
    async fn test_sign_encoded_transaction_fills_signer_slot() {
        let wallet = Wallet::new("main".into());
        let payer = Pubkey::from_str(&wallet.get_public_key()).unwrap();
        let signer = SoftwareSigner::new(wallet.clone());

        let signed = sign_encoded_transaction(&signer, &unsigned_transaction(&payer)).await.unwrap();
        let tx: VersionedTransaction = bincode::deserialize(&STANDARD.decode(signed).unwrap()).unwrap();

        let raw: [u8; 64] = tx.signatures[0].as_ref().try_into().unwrap();
        let signature = ed25519_dalek::Signature::from_bytes(&raw);
        assert!(wallet
            .get_verifying_key()
            .verify(&tx.message.serialize(), &signature)
            .is_ok());
    }

    #[tokio::test]
    async fn test_foreign_transaction_is_refused() {
        let other = Pubkey::new_from_array([7u8; 32]);
        let signer = SoftwareSigner::new(Wallet::new("main".into()));

        let result = sign_encoded_transaction(&signer, &unsigned_transaction(&other)).await;
        assert!(matches!(result, Err(SigningError::NotARequiredSigner)));
    }

    #[tokio::test]
    async fn test_garbage_is_refused() {
        let signer = SoftwareSigner::new(Wallet::new("main".into()));
        assert!(matches!(
            sign_encoded_transaction(&signer, "not base64!").await,
            Err(SigningError::Encoding(_))
        ));
        assert!(matches!(
            sign_encoded_transaction(&signer, "AQID").await,
            Err(SigningError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_sign_text_message() {
        let wallet = Wallet::new("main".into());
        let signer = SoftwareSigner::new(wallet.clone());

        let encoded = sign_text_message(&signer, "log in to jup.ag").await.unwrap();
        let raw: [u8; 64] = bs58::decode(encoded).into_vec().unwrap().try_into().unwrap();
        let signature = ed25519_dalek::Signature::from_bytes(&raw);
        assert!(wallet.get_verifying_key().verify(b"log in to jup.ag", &signature).is_ok());
    }
}
