use std::sync::Arc;
use toolgate_core::auth::AuthManager;
use toolgate_core::catalog::ToolCatalog;
use toolgate_core::dispatcher::Dispatcher;
use toolgate_core::Runtime;

/// Application state shared across handlers
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub catalog: Arc<ToolCatalog>,
    pub auth: Arc<AuthManager>,
}

impl AppState {
    pub fn from_runtime(runtime: &Runtime) -> Self {
        Self {
            dispatcher: runtime.dispatcher.clone(),
            catalog: runtime.catalog().clone(),
            auth: runtime.auth().clone(),
        }
    }
}
