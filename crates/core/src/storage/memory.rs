use super::ConnectionStore;
use crate::types::{ConnectionKey, UserConnection, UserId};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Mutex;

/// Non-durable store for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryConnectionStore {
    connections: Mutex<HashMap<ConnectionKey, UserConnection>>,
}

impl MemoryConnectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConnectionStore for MemoryConnectionStore {
    fn get(&self, key: &ConnectionKey) -> Result<Option<UserConnection>> {
        let connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        Ok(connections.get(key).cloned())
    }

    fn put(&self, connection: &UserConnection) -> Result<()> {
        let mut connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        connections.insert(connection.key(), connection.clone());
        Ok(())
    }

    fn delete(&self, key: &ConnectionKey) -> Result<bool> {
        let mut connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        Ok(connections.remove(key).is_some())
    }

    fn list_for_user(&self, user_id: &UserId) -> Result<Vec<UserConnection>> {
        let connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        let mut found: Vec<UserConnection> = connections
            .values()
            .filter(|c| &c.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        Ok(found)
    }
}
