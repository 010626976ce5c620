use crate::catalog::{ToolContext, ToolDefinition};
use crate::config::WorkerSettings;
use crate::error::ExecutionError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::timeout;

/// Aborts the task when the waiting side goes away
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs tool handlers on their own tasks with per-tool timeouts and
/// concurrency limits
pub struct WorkerPool {
    settings: WorkerSettings,
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl WorkerPool {
    pub fn new(settings: WorkerSettings) -> Self {
        Self {
            settings,
            semaphores: Mutex::new(HashMap::new()),
        }
    }

    fn semaphore_for(&self, tool: &str) -> Option<Arc<Semaphore>> {
        let permits = self.settings.concurrency_for(tool)?;
        let mut semaphores = self.semaphores.lock().unwrap_or_else(|e| e.into_inner());
        let semaphore = semaphores
            .entry(tool.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(permits.max(1))));
        Some(semaphore.clone())
    }

    /// Run the handler of `def`. The timeout covers waiting for a
    /// concurrency permit as well as the handler itself. On timeout or when
    /// this future is dropped the handler task is aborted; whatever external
    /// effect it already caused stays.
    pub async fn execute(
        &self,
        def: &ToolDefinition,
        input: Value,
        ctx: ToolContext,
    ) -> Result<Value, ExecutionError> {
        let tool = def.name().to_string();
        let limit = self.settings.timeout_for(&tool);
        let handler = def.handler();
        let semaphore = self.semaphore_for(&tool);

        tracing::debug!("Executing {} for request {}", tool, ctx.request_id);

        let run = async {
            let permit = match semaphore {
                Some(semaphore) => Some(semaphore.acquire_owned().await.map_err(|_| {
                    ExecutionError::Crashed {
                        tool: tool.clone(),
                        reason: "worker pool is shutting down".to_string(),
                    }
                })?),
                None => None,
            };

            let mut task = AbortOnDrop(tokio::spawn(async move {
                let _permit = permit;
                handler.call(input, ctx).await
            }));

            match (&mut task.0).await {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(failure)) => Err(ExecutionError::Failed {
                    tool: tool.clone(),
                    failure,
                }),
                Err(err) => Err(ExecutionError::Crashed {
                    tool: tool.clone(),
                    reason: panic_reason(err),
                }),
            }
        };

        match timeout(limit, run).await {
            Ok(result) => {
                if let Err(err) = &result {
                    tracing::info!("{}", err);
                }
                result
            }
            Err(_) => {
                tracing::warn!("Tool {} timed out after {:?}", tool, limit);
                Err(ExecutionError::Timeout { tool, after: limit })
            }
        }
    }
}

fn panic_reason(err: JoinError) -> String {
    if !err.is_panic() {
        return "handler task was cancelled".to_string();
    }

    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("handler panicked: {}", message)
    } else {
        "handler panicked".to_string()
    }
}
