use crate::sync::KeyedLocks;
use crate::types::{ToolCallResult, UserId};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::OwnedMutexGuard;

/// Scope of an idempotency key: one caller-chosen key per user and tool
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub user_id: UserId,
    pub tool: String,
    pub key: String,
}

impl IdempotencyKey {
    pub fn new(user_id: UserId, tool: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            user_id,
            tool: tool.into(),
            key: key.into(),
        }
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} for {} ({})", self.key, self.tool, self.user_id)
    }
}

/// A cached result and the fingerprint of the input that produced it
#[derive(Debug, Clone)]
pub struct CachedCall {
    pub result: ToolCallResult,
    pub fingerprint: String,
    stored_at: Instant,
}

/// Bounded, TTL-limited cache of finished tool calls
pub struct IdempotencyCache {
    ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<IdempotencyKey, CachedCall>>,
    locks: KeyedLocks<IdempotencyKey>,
}

impl IdempotencyCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
            locks: KeyedLocks::new(),
        }
    }

    /// Serialize callers using the same key
    pub async fn lock(&self, key: &IdempotencyKey) -> OwnedMutexGuard<()> {
        self.locks.lock(key).await
    }

    pub fn get(&self, key: &IdempotencyKey) -> Option<CachedCall> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: IdempotencyKey, result: ToolCallResult, fingerprint: String) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);

        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.stored_at)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key,
            CachedCall {
                result,
                fingerprint,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// SHA-256 over the canonical JSON encoding of an input payload
pub fn fingerprint(input: &Value) -> String {
    let mut hasher = Sha256::new();
    // serde_json object keys are ordered, so equal payloads encode equally
    hasher.update(input.to_string().as_bytes());
    hex::encode(hasher.finalize())
}
