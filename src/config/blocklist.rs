use std::collections::HashSet;
use std::path::Path;

use super::ConfigError;

/// Token identifiers (mint addresses or symbols) that are never surfaced.
///
/// Addresses match exactly; symbols match case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blocklist {
    addresses: HashSet<String>,
    symbols: HashSet<String>,
}

impl Blocklist {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut blocklist = Self::default();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            blocklist.addresses.insert(entry.to_string());
            blocklist.symbols.insert(entry.to_lowercase());
        }
        blocklist
    }

    /// Parse a JSON array of identifiers
    pub fn from_json(json_str: &str) -> Result<Self, serde_json::Error> {
        let entries: Vec<String> = serde_json::from_str(json_str)?;
        Ok(Self::new(entries))
    }

    /// Load from disk; a missing file is an empty blocklist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(data) => {
                let blocklist = Self::from_json(&data).map_err(|source| ConfigError::BlocklistFormat {
                    path: path.to_path_buf(),
                    source,
                })?;
                log::info!("🚫 Blocklist: loaded {} entries from {}", blocklist.len(), path.display());
                Ok(blocklist)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("ℹ️ Blocklist: {} not found, starting empty", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::BlocklistIo { path: path.to_path_buf(), source }),
        }
    }

    pub fn contains_address(&self, address: &str) -> bool {
        self.addresses.contains(address.trim())
    }

    pub fn contains_symbol(&self, symbol: &str) -> bool {
        self.symbols.contains(&symbol.trim().to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_rules() {
        let blocklist = Blocklist::new(["RUGxyz111", "SCAM", " "]);
        assert_eq!(blocklist.len(), 2);
        assert!(blocklist.contains_address("RUGxyz111"));
        assert!(!blocklist.contains_address("rugxyz111"));
        assert!(blocklist.contains_symbol("scam"));
        assert!(blocklist.contains_symbol("SCAM "));
        assert!(!blocklist.contains_symbol("JUP"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocklist.json");

        assert!(Blocklist::load(&path).unwrap().is_empty());

        std::fs::write(&path, r#"["SCAM", "RUGxyz111"]"#).unwrap();
        let blocklist = Blocklist::load(&path).unwrap();
        assert!(blocklist.contains_symbol("scam"));

        std::fs::write(&path, r#"{"SCAM": true}"#).unwrap();
        assert!(matches!(Blocklist::load(&path), Err(ConfigError::BlocklistFormat { .. })));
    }
}
