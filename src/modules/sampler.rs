//! Sampler - fetches one holder count per entity, tolerating per-entity failure

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use crate::modules::growth_evaluator::Snapshot;

/// Holder data for one token as reported by the source
#[derive(Debug, Clone, PartialEq)]
pub struct TokenHolders {
    /// Canonical address as returned by the source
    pub address: String,
    pub symbol: String,
    pub holders: i64,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("API error (code {code:?}): {message}")]
    Api { code: Option<i64>, message: String },

    #[error("response carries no numeric holdersCount")]
    MissingHolderCount,

    #[error("malformed response: {0}")]
    Decode(String),
}

/// External source of holder counts
#[async_trait]
pub trait HolderSource: Send + Sync {
    async fn fetch_holders(&self, address: &str) -> Result<TokenHolders, SourceError>;
}

pub struct Sampler {
    source: Arc<dyn HolderSource>,
    pause: Duration,
}

impl Sampler {
    pub fn new(source: Arc<dyn HolderSource>, pause: Duration) -> Self {
        Self { source, pause }
    }

    pub fn from_config(config: &Config, source: Arc<dyn HolderSource>) -> Self {
        Self::new(source, Duration::from_millis(config.request_pause_ms))
    }

    /// Sample every entity in order, pausing between requests.
    ///
    /// Every entity yields exactly one snapshot stamped `observed_at`; a
    /// failed fetch becomes a snapshot with an error and no count.
    pub async fn sample_all(&self, entities: &[String], observed_at: DateTime<Utc>) -> Vec<Snapshot> {
        let mut samples = Vec::with_capacity(entities.len());

        for (i, entity) in entities.iter().enumerate() {
            if i > 0 && !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }

            let sample = match self.source.fetch_holders(entity).await {
                Ok(token) => {
                    info!(
                        target: "SAMPLER",
                        entity = %token.address,
                        symbol = %token.symbol,
                        holders = token.holders,
                        "Sampled"
                    );
                    Snapshot::success(&token.address, &token.symbol, token.holders, observed_at)
                }
                Err(e) => {
                    warn!(target: "SAMPLER", entity = %entity, error = %e, "Fetch failed");
                    Snapshot::failure(entity, &e.to_string(), observed_at)
                }
            };
            samples.push(sample);
        }

        samples
    }
}

/// Trim identifiers and drop case-insensitive duplicates, keeping first order
pub fn dedupe_entities<I, T>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    let mut entities: Vec<String> = Vec::new();
    for entity in raw {
        let entity = entity.as_ref().trim();
        if entity.is_empty() || entities.iter().any(|e| e.eq_ignore_ascii_case(entity)) {
            continue;
        }
        entities.push(entity.to_string());
    }
    entities
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::time::Instant;

    struct StubSource {
        holders: HashMap<String, i64>,
    }

    #[async_trait]
    impl HolderSource for StubSource {
        async fn fetch_holders(&self, address: &str) -> Result<TokenHolders, SourceError> {
            match self.holders.get(&address.to_lowercase()) {
                Some(count) => Ok(TokenHolders {
                    address: address.to_lowercase(),
                    symbol: "TKN".to_string(),
                    holders: *count,
                }),
                None => Err(SourceError::Api {
                    code: Some(150),
                    message: "Address is not a token contract".to_string(),
                }),
            }
        }
    }

    fn stub() -> Arc<dyn HolderSource> {
        Arc::new(StubSource {
            holders: HashMap::from([("0xaaa".to_string(), 10), ("0xccc".to_string(), 30)]),
        })
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_batch() {
        let sampler = Sampler::new(stub(), Duration::ZERO);
        let entities = vec!["0xAAA".to_string(), "0xbbb".to_string(), "0xccc".to_string()];
        let samples = sampler.sample_all(&entities, at()).await;

        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].holders, Some(10));
        assert_eq!(samples[0].entity_id, "0xaaa", "canonical address from source");
        assert_eq!(samples[1].holders, None);
        assert!(samples[1]
            .error
            .as_deref()
            .unwrap()
            .contains("not a token contract"));
        assert_eq!(samples[1].entity_id, "0xbbb");
        assert_eq!(samples[2].holders, Some(30));
        assert!(samples.iter().all(|s| s.observed_at == at()));
    }

    #[tokio::test]
    async fn test_pauses_between_requests_only() {
        let sampler = Sampler::new(stub(), Duration::from_millis(25));
        let entities = vec!["0xaaa".to_string(), "0xccc".to_string(), "0xaaa".to_string()];

        let started = Instant::now();
        sampler.sample_all(&entities, at()).await;
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(50));
    }

    #[test]
    fn test_dedupe_entities() {
        let entities = dedupe_entities(["0xAbc", " 0xabc ", "", "0xdef", "0xABC"]);
        assert_eq!(entities, vec!["0xAbc".to_string(), "0xdef".to_string()]);
    }
}
