// Core of Toolgate: tool catalog, per-user OAuth connections, worker pool
// and dispatcher

pub mod auth;
pub mod catalog;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod idempotency;
pub mod runtime;
pub mod storage;
pub mod sync;
pub mod types;
pub mod worker;

pub use error::{AuthError, CatalogError, DispatchError, ExecutionError, ToolFailure};
pub use runtime::Runtime;
pub use types::*;
