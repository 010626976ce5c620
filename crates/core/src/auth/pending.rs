use crate::types::{PendingAuthorization, ProviderId, UserId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory pending authorizations keyed by state token
#[derive(Default)]
pub struct PendingStore {
    pending: Mutex<HashMap<String, PendingAuthorization>>,
}

impl PendingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: PendingAuthorization) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.insert(record.state.clone(), record);
    }

    /// Remove and return the record for `state`. Consumption happens even
    /// when the record turns out to be expired.
    pub fn take(&self, state: &str, now: DateTime<Utc>) -> Option<PendingAuthorization> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending
            .remove(state)
            .filter(|record| !record.is_expired_at(now))
    }

    /// Live record for the same user and provider whose scopes cover `scopes`
    pub fn find_reusable(
        &self,
        user_id: &UserId,
        provider_id: &ProviderId,
        scopes: &[String],
        now: DateTime<Utc>,
    ) -> Option<PendingAuthorization> {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending
            .values()
            .filter(|r| &r.user_id == user_id && &r.provider_id == provider_id)
            .filter(|r| !r.is_expired_at(now))
            .find(|r| scopes.iter().all(|s| r.scopes.contains(s)))
            .cloned()
    }

    pub fn has_live(&self, user_id: &UserId, provider_id: &ProviderId, now: DateTime<Utc>) -> bool {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.values().any(|r| {
            &r.user_id == user_id && &r.provider_id == provider_id && !r.is_expired_at(now)
        })
    }

    /// Drop expired records, returning how many were removed
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let before = pending.len();
        pending.retain(|_, r| !r.is_expired_at(now));
        before - pending.len()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
