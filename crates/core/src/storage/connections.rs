use super::ConnectionStore;
use crate::types::{ConnectionKey, UserConnection, UserId};
use anyhow::{Context, Result};
use redb::{Database, ReadableTable, TableDefinition};
use std::path::PathBuf;
use std::sync::Arc;

const CONNECTIONS_TABLE: TableDefinition<(&str, &str), &[u8]> =
    TableDefinition::new("connections");

/// Connection store backed by redb
#[derive(Clone)]
pub struct RedbConnectionStore {
    db: Arc<Database>,
}

impl RedbConnectionStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create storage directory")?;
        }

        let db = Database::create(&path).context("Failed to create redb database")?;

        let write_txn = db.begin_write().context("Failed to begin write transaction")?;
        {
            let _connections = write_txn
                .open_table(CONNECTIONS_TABLE)
                .context("Failed to open connections table")?;
        }
        write_txn.commit().context("Failed to commit transaction")?;

        tracing::info!("Opened connection store at {}", path.display());

        Ok(Self { db: Arc::new(db) })
    }
}

impl ConnectionStore for RedbConnectionStore {
    fn get(&self, key: &ConnectionKey) -> Result<Option<UserConnection>> {
        let read_txn = self.db.begin_read().context("Failed to begin read")?;
        let table = read_txn
            .open_table(CONNECTIONS_TABLE)
            .context("Failed to open table")?;

        let value = table
            .get((key.user_id.0.as_str(), key.provider_id.0.as_str()))
            .context("Failed to get connection")?;

        match value {
            Some(guard) => {
                let connection: UserConnection = serde_json::from_slice(guard.value())
                    .context("Failed to deserialize connection")?;
                Ok(Some(connection))
            }
            None => Ok(None),
        }
    }

    fn put(&self, connection: &UserConnection) -> Result<()> {
        let write_txn = self.db.begin_write().context("Failed to begin write")?;
        {
            let mut table = write_txn
                .open_table(CONNECTIONS_TABLE)
                .context("Failed to open table")?;

            let value = serde_json::to_vec(connection).context("Failed to serialize connection")?;
            table
                .insert(
                    (connection.user_id.0.as_str(), connection.provider_id.0.as_str()),
                    value.as_slice(),
                )
                .context("Failed to insert connection")?;
        }
        write_txn.commit().context("Failed to commit")?;
        Ok(())
    }

    fn delete(&self, key: &ConnectionKey) -> Result<bool> {
        let write_txn = self.db.begin_write().context("Failed to begin write")?;
        let removed = {
            let mut table = write_txn
                .open_table(CONNECTIONS_TABLE)
                .context("Failed to open table")?;

            let removed = table
                .remove((key.user_id.0.as_str(), key.provider_id.0.as_str()))
                .context("Failed to remove connection")?;
            removed.is_some()
        };
        write_txn.commit().context("Failed to commit")?;
        Ok(removed)
    }

    fn list_for_user(&self, user_id: &UserId) -> Result<Vec<UserConnection>> {
        let read_txn = self.db.begin_read().context("Failed to begin read")?;
        let table = read_txn
            .open_table(CONNECTIONS_TABLE)
            .context("Failed to open table")?;

        // Keys sort by user first, so one user's connections are contiguous
        let range = table
            .range((user_id.0.as_str(), "")..)
            .context("Failed to scan connections")?;

        let mut connections = Vec::new();
        for item in range {
            let (key, value) = item.context("Failed to read item")?;
            if key.value().0 != user_id.0 {
                break;
            }
            let connection: UserConnection = serde_json::from_slice(value.value())
                .context("Failed to deserialize connection")?;
            connections.push(connection);
        }

        Ok(connections)
    }
}
