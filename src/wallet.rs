// src/wallet.rs
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use parking_lot::RwLock;
use rand::{rngs::OsRng, Rng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WalletError {
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Invalid key length: {0} bytes")]
    InvalidLength(usize),
    #[error("Public key does not match private key")]
    KeyMismatch,
}

/// Persistable wallet info, stored under the `wallets` key
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalletInfo {
    pub name: String,
    pub address: String,
    pub encrypted_key: String,
}

/// In-memory wallet holding an ed25519 signing key
#[derive(Debug, Clone)]
pub struct Wallet {
    pub signing_key: SigningKey,
    pub name: String,
}

impl Wallet {
    /// Generate a new random wallet
    pub fn new(name: String) -> Self {
        let secret_bytes: [u8; 32] = OsRng.gen();
        let signing_key = SigningKey::from_bytes(&secret_bytes);
        Self { signing_key, name }
    }

    /// Reconstruct from a raw private key (32 or 64 bytes)
    pub fn from_private_key(private_key_bytes: &[u8], name: String) -> Result<Self, WalletError> {
        match private_key_bytes.len() {
            32 => {
                let mut key_bytes = [0u8; 32];
                key_bytes.copy_from_slice(private_key_bytes);
                Ok(Self { signing_key: SigningKey::from_bytes(&key_bytes), name })
            }
            64 => {
                let mut key_bytes = [0u8; 32];
                key_bytes.copy_from_slice(&private_key_bytes[..32]);
                let signing_key = SigningKey::from_bytes(&key_bytes);
                if signing_key.verifying_key().as_bytes() != &private_key_bytes[32..] {
                    return Err(WalletError::KeyMismatch);
                }
                Ok(Self { signing_key, name })
            }
            len => Err(WalletError::InvalidLength(len)),
        }
    }

    /// Parse a base58 keypair as exported by Solana wallets
    pub fn from_base58(encoded: &str, name: String) -> Result<Self, WalletError> {
        let bytes = bs58::decode(encoded.trim())
            .into_vec()
            .map_err(|e| WalletError::Decode(e.to_string()))?;
        Self::from_private_key(&bytes, name)
    }

    /// Base58-encoded Solana-style public key
    pub fn get_public_key(&self) -> String {
        bs58::encode(self.signing_key.verifying_key().as_bytes()).into_string()
    }

    /// Base58-encoded Solana-compatible keypair (64 bytes)
    pub fn get_private_key(&self) -> String {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&self.signing_key.to_bytes());
        buf.extend_from_slice(self.signing_key.verifying_key().as_bytes());
        bs58::encode(buf).into_string()
    }

    pub fn to_wallet_info(&self) -> WalletInfo {
        WalletInfo {
            name: self.name.clone(),
            address: self.get_public_key(),
            encrypted_key: self.get_private_key(),
        }
    }

    pub fn from_wallet_info(info: &WalletInfo) -> Result<Self, WalletError> {
        Self::from_base58(&info.encrypted_key, info.name.clone())
    }

    pub fn sign_message(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    pub fn get_verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

/// Read access to whichever wallet is currently unlocked
pub trait WalletState: Send + Sync {
    fn public_key(&self) -> Option<String>;
}

/// The wallet the relay signs with, swappable at runtime
#[derive(Default)]
pub struct ActiveWallet {
    current: RwLock<Option<Wallet>>,
}

impl ActiveWallet {
    pub fn new(wallet: Option<Wallet>) -> Self {
        Self { current: RwLock::new(wallet) }
    }

    pub fn update_wallet(&self, wallet: Wallet) {
        log::info!("🔄 Wallet: active wallet is now {}", wallet.name);
        *self.current.write() = Some(wallet);
    }

    pub fn clear(&self) {
        *self.current.write() = None;
    }

    pub fn current(&self) -> Option<Wallet> {
        self.current.read().clone()
    }
}

impl WalletState for ActiveWallet {
    fn public_key(&self) -> Option<String> {
        self.current.read().as_ref().map(Wallet::get_public_key)
    }
}
