//! Ethplorer token API client (read-only)

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::Config;
use crate::modules::sampler::{HolderSource, SourceError, TokenHolders};

const BROWSER_USER_AGENT: &str = "Mozilla/5.0";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenInfoResponse {
    address: Option<String>,
    symbol: Option<String>,
    holders_count: Option<serde_json::Value>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: Option<i64>,
    message: Option<String>,
}

/// HTTP client for `getTokenInfo`
pub struct EthplorerClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl EthplorerClient {
    pub fn new(config: &Config) -> Result<Self, SourceError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        if config.api_key == "freekey" {
            info!(target: "ETHPLORER", "Using shared public API key (rate limited)");
        }

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn token_info_url(&self, address: &str) -> String {
        format!("{}/getTokenInfo/{}", self.base_url, address)
    }
}

#[async_trait]
impl HolderSource for EthplorerClient {
    async fn fetch_holders(&self, address: &str) -> Result<TokenHolders, SourceError> {
        let response = self
            .client
            .get(self.token_info_url(address))
            .query(&[("apiKey", self.api_key.as_str())])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        debug!(target: "ETHPLORER", entity = %address, status = %status, "getTokenInfo responded");

        let json = match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(json) => json,
            Err(_) if !status.is_success() => return Err(SourceError::Status(status.as_u16())),
            Err(e) => return Err(SourceError::Decode(e.to_string())),
        };

        let parsed = parse_token_info(address, &json);
        if status.is_success() {
            return parsed;
        }

        // An API error body says more than the bare status code
        match parsed {
            Err(api @ SourceError::Api { .. }) => Err(api),
            _ => Err(SourceError::Status(status.as_u16())),
        }
    }
}

/// Map a `getTokenInfo` body onto holder data
pub fn parse_token_info(
    requested: &str,
    body: &serde_json::Value,
) -> Result<TokenHolders, SourceError> {
    let info: TokenInfoResponse = serde_json::from_value(body.clone())
        .map_err(|e| SourceError::Decode(e.to_string()))?;

    if let Some(error) = info.error {
        return Err(SourceError::Api {
            code: error.code,
            message: error
                .message
                .unwrap_or_else(|| "unknown API error".to_string()),
        });
    }

    let holders = info
        .holders_count
        .as_ref()
        .and_then(serde_json::Value::as_i64)
        .filter(|count| *count >= 0)
        .ok_or(SourceError::MissingHolderCount)?;

    Ok(TokenHolders {
        address: info
            .address
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| requested.to_string()),
        symbol: info.symbol.unwrap_or_default(),
        holders,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_success_uses_canonical_address() {
        let body = json!({
            "address": "0xdac17f958d2ee523a2206206994597c13d831ec7",
            "symbol": "USDT",
            "holdersCount": 4_512_331,
        });
        let parsed = parse_token_info("0xDAC17F958D2EE523A2206206994597C13D831EC7", &body).unwrap();

        assert_eq!(parsed.address, "0xdac17f958d2ee523a2206206994597c13d831ec7");
        assert_eq!(parsed.symbol, "USDT");
        assert_eq!(parsed.holders, 4_512_331);
    }

    #[test]
    fn test_parse_missing_symbol_and_address() {
        let body = json!({ "holdersCount": 12 });
        let parsed = parse_token_info("0xabc", &body).unwrap();
        assert_eq!(parsed.address, "0xabc");
        assert_eq!(parsed.symbol, "");
    }

    #[test]
    fn test_parse_api_error() {
        let body = json!({ "error": { "code": 150, "message": "Address is not a token contract" } });
        match parse_token_info("0xabc", &body) {
            Err(SourceError::Api { code, message }) => {
                assert_eq!(code, Some(150));
                assert_eq!(message, "Address is not a token contract");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_parse_non_numeric_holders() {
        let body = json!({ "symbol": "X", "holdersCount": "many" });
        assert!(matches!(
            parse_token_info("0xabc", &body),
            Err(SourceError::MissingHolderCount)
        ));
    }

    #[test]
    fn test_url_and_key() {
        let config = Config {
            api_url: "https://api.ethplorer.io/".to_string(),
            ..Config::default()
        };
        let client = EthplorerClient::new(&config).unwrap();
        assert_eq!(
            client.token_info_url("0xabc"),
            "https://api.ethplorer.io/getTokenInfo/0xabc"
        );
        assert_eq!(client.api_key, "freekey");
    }

    #[tokio::test]
    #[ignore] // Run only when testing with live API
    async fn test_fetch_live_token() {
        let client = EthplorerClient::new(&Config::default()).unwrap();
        let holders = client
            .fetch_holders("0xdac17f958d2ee523a2206206994597c13d831ec7")
            .await
            .unwrap();
        assert_eq!(holders.symbol, "USDT");
        assert!(holders.holders > 0);
    }
}
