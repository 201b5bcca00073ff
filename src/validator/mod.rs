//! Client Validator: verifies a LAPI's bearer token against CAPI and caches
//! the decision across a two-tier cache.
//!
//! The in-memory tier and the persistent `validated_clients` table share
//! nothing — the memory tier is rebuilt lazily from cache misses, never
//! from a bulk load of the table.

use crate::config::ClientValidationConfig;
use crate::error::Result;
use crate::storage::Store;
use chrono::{DateTime, Utc};
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Clone, Copy)]
enum MemoryEntry {
    Valid { expires_at: DateTime<Utc> },
    Invalid { expires_at: DateTime<Utc> },
}

pub struct ClientValidator {
    store: Arc<dyn Store>,
    http: reqwest::Client,
    capi_url: String,
    config: ClientValidationConfig,
    memory: Mutex<LruCache<String, MemoryEntry>>,
}

pub enum Outcome {
    Admit,
    Deny,
}

impl ClientValidator {
    pub fn new(store: Arc<dyn Store>, capi_url: String, config: ClientValidationConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_memory_entries.max(1)).unwrap();
        Self {
            store,
            http: reqwest::Client::new(),
            capi_url,
            config,
            memory: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub async fn validate(&self, token: &str) -> Result<Outcome> {
        if !self.config.enabled {
            return Ok(Outcome::Admit);
        }

        let hash = hash_token(token);
        let now = Utc::now();

        if let Some(outcome) = self.check_memory(&hash, now) {
            return Ok(outcome);
        }

        if let Some(client) = self.store.get_validated_client(&hash).await? {
            if client.expires_at > now {
                self.store.touch_validated_client(&hash, now).await?;
                self.cache_memory(&hash, MemoryEntry::Valid { expires_at: client.expires_at });
                return Ok(Outcome::Admit);
            }
        }

        match self.validate_upstream(token).await {
            UpstreamOutcome::Accepted { machine_id } => {
                let expires_at = now + chrono::Duration::seconds(self.config.cache_ttl_seconds as i64);
                self.store
                    .upsert_validated_client(&hash, machine_id.as_deref(), now, expires_at)
                    .await?;
                self.cache_memory(&hash, MemoryEntry::Valid { expires_at });
                Ok(Outcome::Admit)
            }
            UpstreamOutcome::Rejected => Ok(Outcome::Deny),
            UpstreamOutcome::Error(message) => {
                tracing::warn!(error = %message, "client validation upstream error");
                let expires_at = now + chrono::Duration::seconds(self.config.cache_ttl_error_seconds as i64);
                self.cache_memory(&hash, MemoryEntry::Invalid { expires_at });
                if self.config.fail_closed {
                    Ok(Outcome::Deny)
                } else {
                    Ok(Outcome::Admit)
                }
            }
        }
    }

    fn check_memory(&self, hash: &str, now: DateTime<Utc>) -> Option<Outcome> {
        let mut memory = self.memory.lock().unwrap_or_else(|e| e.into_inner());
        match memory.get(hash) {
            Some(MemoryEntry::Valid { expires_at }) if *expires_at > now => Some(Outcome::Admit),
            Some(MemoryEntry::Invalid { expires_at }) if *expires_at > now => {
                if self.config.fail_closed {
                    Some(Outcome::Deny)
                } else {
                    Some(Outcome::Admit)
                }
            }
            _ => None,
        }
    }

    fn cache_memory(&self, hash: &str, entry: MemoryEntry) {
        let mut memory = self.memory.lock().unwrap_or_else(|e| e.into_inner());
        memory.put(hash.to_string(), entry);
    }

    async fn validate_upstream(&self, token: &str) -> UpstreamOutcome {
        let url = format!("{}/v2/decisions?limit=1", self.capi_url.trim_end_matches('/'));
        let timeout = Duration::from_millis(self.config.validation_timeout_ms);

        let result = self
            .http
            .get(&url)
            .bearer_auth(token)
            .timeout(timeout)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => UpstreamOutcome::Accepted { machine_id: None },
            Ok(resp) if resp.status().as_u16() == 401 || resp.status().as_u16() == 403 => {
                UpstreamOutcome::Rejected
            }
            Ok(resp) => UpstreamOutcome::Error(format!("unexpected status {}", resp.status())),
            Err(e) => UpstreamOutcome::Error(e.to_string()),
        }
    }
}

enum UpstreamOutcome {
    Accepted { machine_id: Option<String> },
    Rejected,
    Error(String),
}

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_token_is_deterministic_sha256_hex() {
        let a = hash_token("secret");
        let b = hash_token("secret");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn different_tokens_hash_differently() {
        assert_ne!(hash_token("a"), hash_token("b"));
    }
}
