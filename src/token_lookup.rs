use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::DEFAULT_TOKEN_SEARCH_URL;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("Jupiter API request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Jupiter API error {status}: {body}")]
    Status { status: u16, body: String },
}

/// Jupiter Token API V2 search entry (only the fields the relay needs)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenInfo {
    /// Mint address
    pub id: String,
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub icon: Option<String>,
    pub decimals: u8,
    #[serde(rename = "usdPrice", default)]
    pub usd_price: Option<f64>,
    #[serde(rename = "organicScore", default)]
    pub organic_score: f64,
    #[serde(rename = "isVerified", default)]
    pub is_verified: Option<bool>,
}

impl TokenInfo {
    /// Basic sanity: a positive reference price and a non-zero organic score
    pub fn passes_sanity_checks(&self) -> bool {
        self.usd_price.is_some_and(|price| price > 0.0) && self.organic_score > 0.0
    }
}

/// Resolves a ticker symbol to token metadata
#[async_trait]
pub trait TokenLookup: Send + Sync {
    async fn find_by_symbol(&self, symbol: &str) -> Result<Option<TokenInfo>, LookupError>;
}

pub struct JupiterLookup {
    client: Client,
    search_url: String,
}

impl JupiterLookup {
    pub fn new(search_url: &str) -> Self {
        Self {
            client: Client::new(),
            search_url: search_url.to_string(),
        }
    }
}

impl Default for JupiterLookup {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_SEARCH_URL)
    }
}

/// Exact symbol match, preferring verified tokens, then the most organic one
pub fn best_symbol_match(symbol: &str, candidates: Vec<TokenInfo>) -> Option<TokenInfo> {
    candidates
        .into_iter()
        .filter(|token| token.symbol.eq_ignore_ascii_case(symbol))
        .max_by(|a, b| {
            let verified = |t: &TokenInfo| t.is_verified.unwrap_or(false);
            verified(a)
                .cmp(&verified(b))
                .then_with(|| a.organic_score.total_cmp(&b.organic_score))
        })
}

#[async_trait]
impl TokenLookup for JupiterLookup {
    async fn find_by_symbol(&self, symbol: &str) -> Result<Option<TokenInfo>, LookupError> {
        log::info!("🔎 Lookup: searching Jupiter for {}", symbol);

        let response = self
            .client
            .get(&self.search_url)
            .query(&[("query", symbol)])
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LookupError::Status { status: status.as_u16(), body });
        }

        let candidates: Vec<TokenInfo> = response.json().await?;
        log::info!("🔎 Lookup: {} candidates for {}", candidates.len(), symbol);
        Ok(best_symbol_match(symbol, candidates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(symbol: &str, verified: bool, organic: f64, price: Option<f64>) -> TokenInfo {
        TokenInfo {
            id: format!("{}Mint1111111111111111111111111111111111", symbol),
            name: symbol.to_string(),
            symbol: symbol.to_string(),
            icon: None,
            decimals: 6,
            usd_price: price,
            organic_score: organic,
            is_verified: Some(verified),
        }
    }

    #[test]
    fn test_parses_jupiter_search_entry() {
        let raw = r#"[{
            "id": "JUPyiwrYJFskUPiHa7hkeR8VUtAeFoSYbKedZNsDvCN",
            "name": "Jupiter",
            "symbol": "JUP",
            "icon": "https://static.jup.ag/jup/icon.png",
            "decimals": 6,
            "usdPrice": 0.45,
            "organicScore": 97.5,
            "organicScoreLabel": "high",
            "isVerified": true,
            "tokenProgram": "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA"
        }]"#;
        let tokens: Vec<TokenInfo> = serde_json::from_str(raw).unwrap();
        assert_eq!(tokens[0].symbol, "JUP");
        assert!(tokens[0].passes_sanity_checks());
    }

    #[test]
    fn test_sanity_checks() {
        assert!(!token("A", true, 50.0, Some(0.0)).passes_sanity_checks());
        assert!(!token("A", true, 50.0, Some(-1.0)).passes_sanity_checks());
        assert!(!token("A", true, 50.0, None).passes_sanity_checks());
        assert!(!token("A", true, 0.0, Some(1.0)).passes_sanity_checks());
        assert!(token("A", false, 0.1, Some(1.0)).passes_sanity_checks());
    }

    #[test]
    fn test_best_symbol_match() {
        let picked = best_symbol_match(
            "bonk",
            vec![
                token("BONKER", true, 99.0, Some(1.0)),
                token("BONK", false, 90.0, Some(1.0)),
                token("BONK", true, 10.0, Some(1.0)),
            ],
        )
        .unwrap();
        assert_eq!(picked.is_verified, Some(true));
        assert_eq!(picked.organic_score, 10.0);

        assert!(best_symbol_match("WIF", vec![token("BONK", true, 1.0, Some(1.0))]).is_none());
    }
}
