//! Differentiated response cache.
//!
//! Stores rendered JSON bodies keyed per route. TTL differs by route (the
//! self-IP answer is fresh for seconds, domain records for minutes), so
//! each entry carries its own expiry instant and reads check it lazily;
//! a read at or past the instant is a miss and evicts the entry.

use moka::future::Cache;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Clone)]
struct CachedBody {
    body: Value,
    expires_at: Instant,
}

pub struct ResponseCache {
    cache: Cache<String, CachedBody>,
}

impl ResponseCache {
    pub fn new(max_entries: u64) -> Self {
        Self {
            cache: Cache::builder().max_capacity(max_entries).build(),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        match self.cache.get(key).await {
            Some(entry) if Instant::now() < entry.expires_at => {
                debug!("Cache hit for {}", key);
                Some(entry.body)
            }
            Some(_) => {
                debug!("Cache entry expired for {}", key);
                self.cache.invalidate(key).await;
                None
            }
            None => {
                debug!("Cache miss for {}", key);
                None
            }
        }
    }

    pub async fn put(&self, key: String, body: Value, ttl: Duration) {
        let entry = CachedBody {
            body,
            expires_at: Instant::now() + ttl,
        };
        self.cache.insert(key, entry).await;
    }
}

/// Cache keys are route-prefixed; the self-IP route salts with the client
/// identifier so one client's answer never serves another.
pub fn self_ip_key(client_ip: &str) -> String {
    format!("self-ip:{}", client_ip)
}

pub fn ip_whois_key(ip: &str) -> String {
    format!("ip-whois:{}", ip)
}

pub fn domain_whois_key(domain: &str) -> String {
    format!("domain-whois:{}", domain)
}
