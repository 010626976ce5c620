pub mod connections;
pub mod memory;

pub use connections::RedbConnectionStore;
pub use memory::MemoryConnectionStore;

use crate::types::{ConnectionKey, UserConnection, UserId};
use anyhow::Result;

/// Durable keyed store `(user_id, provider_id) -> UserConnection`.
///
/// The key makes "at most one connection per user and provider" structural:
/// `put` always replaces whatever was stored before.
pub trait ConnectionStore: Send + Sync {
    fn get(&self, key: &ConnectionKey) -> Result<Option<UserConnection>>;

    /// Insert or replace the connection under its own key
    fn put(&self, connection: &UserConnection) -> Result<()>;

    /// Returns whether a connection was removed
    fn delete(&self, key: &ConnectionKey) -> Result<bool>;

    fn list_for_user(&self, user_id: &UserId) -> Result<Vec<UserConnection>>;
}
