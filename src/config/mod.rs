pub mod blocklist;

pub use blocklist::Blocklist;

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::storage::default_storage_dir;

pub const DEFAULT_PORT: u16 = 3030;
pub const DEFAULT_TOKEN_SEARCH_URL: &str = "https://lite-api.jup.ag/tokens/v2/search";
const BLOCKLIST_FILE_NAME: &str = "blocklist.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} has invalid value {value:?}: {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("Failed to read blocklist {path}: {source}")]
    BlocklistIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse blocklist {path}: {source}")]
    BlocklistFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Exact-origin allowlist deciding the cosmetic trust tier of a page.
///
/// Matching is on the whole origin, never on substrings, so
/// `https://launchpad.evil.example` does not inherit trust from
/// `https://launchpad.example`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustedOrigins {
    origins: HashSet<String>,
}

impl TrustedOrigins {
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            origins: origins
                .into_iter()
                .map(|origin| normalize_origin(origin.as_ref()))
                .filter(|origin| !origin.is_empty())
                .collect(),
        }
    }

    pub fn contains(&self, origin: &str) -> bool {
        self.origins.contains(&normalize_origin(origin))
    }

    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }
}

fn normalize_origin(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}

/// Runtime settings for the relay daemon
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    pub storage_dir: PathBuf,
    pub trusted_origins: TrustedOrigins,
    /// Defaults to `<storage_dir>/blocklist.json`
    pub blocklist_path: Option<PathBuf>,
    pub token_search_url: String,
    /// Auto-reject requests nobody answered; `None` waits forever
    pub pending_timeout: Option<Duration>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            storage_dir: default_storage_dir(),
            trusted_origins: TrustedOrigins::default(),
            blocklist_path: None,
            token_search_url: DEFAULT_TOKEN_SEARCH_URL.to_string(),
            pending_timeout: None,
        }
    }
}

impl RelayConfig {
    /// Load configuration from `RELAY_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(port) = lookup("RELAY_PORT") {
            config.port = parse_value("RELAY_PORT", &port)?;
        }
        if let Some(dir) = lookup("RELAY_STORAGE_DIR").filter(|v| !v.trim().is_empty()) {
            config.storage_dir = PathBuf::from(dir);
        }
        if let Some(origins) = lookup("RELAY_TRUSTED_ORIGINS") {
            config.trusted_origins = TrustedOrigins::new(origins.split(','));
        }
        if let Some(path) = lookup("RELAY_BLOCKLIST").filter(|v| !v.trim().is_empty()) {
            config.blocklist_path = Some(PathBuf::from(path));
        }
        if let Some(url) = lookup("RELAY_TOKEN_SEARCH_URL").filter(|v| !v.trim().is_empty()) {
            config.token_search_url = url;
        }
        if let Some(secs) = lookup("RELAY_PENDING_TIMEOUT_SECS") {
            let secs: u64 = parse_value("RELAY_PENDING_TIMEOUT_SECS", &secs)?;
            config.pending_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        Ok(config)
    }

    pub fn blocklist_path(&self) -> PathBuf {
        self.blocklist_path
            .clone()
            .unwrap_or_else(|| self.storage_dir.join(BLOCKLIST_FILE_NAME))
    }

    pub fn load_blocklist(&self) -> Result<Blocklist, ConfigError> {
        Blocklist::load(&self.blocklist_path())
    }

    pub fn socket_url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }
}

fn parse_value<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        name,
        value: value.to_string(),
        reason: e.to_string(),
    })
}
