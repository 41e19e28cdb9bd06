use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::wallet::{Wallet, WalletInfo};

pub const WALLETS_KEY: &str = "wallets";
pub const LAST_CLICKED_TOKEN_KEY: &str = "last_clicked_token";

const STORE_FILE_NAME: &str = "store.json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed store contents: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}

impl From<String> for StorageError {
    fn from(s: String) -> Self {
        StorageError::Other(s)
    }
}

impl From<&str> for StorageError {
    fn from(s: &str) -> Self {
        StorageError::Other(s.to_string())
    }
}

/// Generic async key-value store backing extension state
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;

    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Single JSON object on disk, rewritten on every mutation
pub struct FileStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileStore {
    pub fn new(storage_dir: &Path) -> Self {
        Self {
            path: storage_dir.join(STORE_FILE_NAME),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Map<String, Value>, StorageError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(data) if data.trim().is_empty() => Ok(Map::new()),
            Ok(data) => Ok(serde_json::from_str(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, entries: &Map<String, Value>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let serialized = serde_json::to_string_pretty(entries)?;
        let staging = self.path.with_extension("json.tmp");
        tokio::fs::write(&staging, serialized).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.read_all().await?.remove(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_all().await?;
        entries.insert(key.to_string(), value);
        self.write_all(&entries).await?;
        log::info!("✅ Storage: saved {} to {}", key, self.path.display());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_all().await?;
        if entries.remove(key).is_some() {
            self.write_all(&entries).await?;
        }
        Ok(())
    }
}

/// `$HOME/.unruggable_relay`, falling back to the working directory
pub fn default_storage_dir() -> PathBuf {
    let home_dir = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home_dir).join(".unruggable_relay")
}

pub async fn load_wallets(store: &dyn KeyValueStore) -> Result<Vec<WalletInfo>, StorageError> {
    match store.get(WALLETS_KEY).await? {
        Some(value) => Ok(serde_json::from_value(value)?),
        None => Ok(Vec::new()),
    }
}

/// Store a wallet as the active one, replacing any entry with the same address
pub async fn save_wallet(store: &dyn KeyValueStore, wallet_info: &WalletInfo) -> Result<(), StorageError> {
    let mut wallets = load_wallets(store).await?;
    wallets.retain(|existing| existing.address != wallet_info.address);
    wallets.insert(0, wallet_info.clone());
    store.set(WALLETS_KEY, serde_json::to_value(&wallets)?).await?;
    log::info!("📊 Storage: {} wallets stored", wallets.len());
    Ok(())
}

/// First stored wallet, the one the relay signs with
pub async fn load_active_wallet(store: &dyn KeyValueStore) -> Result<Option<Wallet>, StorageError> {
    let wallets = load_wallets(store).await?;
    match wallets.first() {
        Some(info) => {
            let wallet = Wallet::from_wallet_info(info).map_err(|e| StorageError::Other(e.to_string()))?;
            Ok(Some(wallet))
        }
        None => Ok(None),
    }
}
