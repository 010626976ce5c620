//! Entry point for tool calls: validation, authorization, execution and
//! idempotent replay.

use crate::auth::AuthManager;
use crate::catalog::{ToolCatalog, ToolContext, ToolDefinition};
use crate::config::DispatcherSettings;
use crate::error::{AuthError, DispatchError};
use crate::idempotency::{fingerprint, IdempotencyCache, IdempotencyKey};
use crate::types::{
    AuthorizationPrompt, CallStatus, ProviderId, ToolCallError, ToolCallRequest, ToolCallResult,
};
use crate::worker::WorkerPool;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct Dispatcher {
    catalog: Arc<ToolCatalog>,
    auth: Arc<AuthManager>,
    workers: Arc<WorkerPool>,
    cache: IdempotencyCache,
}

impl Dispatcher {
    pub fn new(
        catalog: Arc<ToolCatalog>,
        auth: Arc<AuthManager>,
        workers: Arc<WorkerPool>,
        settings: &DispatcherSettings,
    ) -> Self {
        Self {
            catalog,
            auth,
            workers,
            cache: IdempotencyCache::new(
                Duration::from_secs(settings.idempotency_ttl_secs),
                settings.idempotency_capacity,
            ),
        }
    }

    pub fn catalog(&self) -> &Arc<ToolCatalog> {
        &self.catalog
    }

    pub fn auth(&self) -> &Arc<AuthManager> {
        &self.auth
    }

    pub fn cache(&self) -> &IdempotencyCache {
        &self.cache
    }

    /// Handle one tool call. Every tool-level outcome, including unknown
    /// tools, bad input, missing authorization, handler failures and
    /// timeouts, comes back as `Ok(ToolCallResult)`. Only infrastructure
    /// failures are `Err`.
    pub async fn invoke(&self, request: ToolCallRequest) -> Result<ToolCallResult, DispatchError> {
        let started = Instant::now();

        let def = match self.catalog.lookup(&request.tool_name) {
            Ok(def) => def,
            Err(err) => return Ok(ToolCallResult::failed(&request, err.into(), started)),
        };
        if let Err(err) = self.catalog.validate_input(&def, &request.input) {
            tracing::debug!("Rejected call {}: {}", request.request_id, err);
            return Ok(ToolCallResult::failed(&request, err.into(), started));
        }

        let Some(idempotency_key) = request.idempotency_key.clone() else {
            return self.run(&def, &request, started).await;
        };

        let key = IdempotencyKey::new(request.user_id.clone(), def.name(), idempotency_key);
        let input_fingerprint = fingerprint(&request.input);
        let _guard = self.cache.lock(&key).await;

        if let Some(cached) = self.cache.get(&key) {
            if cached.fingerprint != input_fingerprint {
                tracing::warn!(
                    "Idempotency key {} reused with a different input; returning the cached result",
                    key
                );
            } else {
                tracing::debug!("Idempotency hit for key {}", key);
            }
            return Ok(cached.result);
        }

        let result = self.run(&def, &request, started).await?;
        // Not cached so that a retry after the user authorizes goes through
        if result.status != CallStatus::AuthRequired {
            self.cache.insert(key, result.clone(), input_fingerprint);
        }
        Ok(result)
    }

    async fn run(
        &self,
        def: &ToolDefinition,
        request: &ToolCallRequest,
        started: Instant,
    ) -> Result<ToolCallResult, DispatchError> {
        let token = match def.auth() {
            None => None,
            Some(requirement) => {
                match self
                    .auth
                    .get_valid_token(&request.user_id, &requirement.provider_id, &requirement.scopes)
                    .await
                {
                    Ok(token) => Some(token),
                    Err(AuthError::AuthorizationRequired { provider_id, scopes })
                    | Err(AuthError::ReauthorizationRequired { provider_id, scopes }) => {
                        return self.prompt(request, &provider_id, &scopes, started);
                    }
                    Err(AuthError::Store(err)) => return Err(DispatchError::Internal(err)),
                    Err(err) => {
                        tracing::warn!("Token resolution for {} failed: {}", request.request_id, err);
                        return Ok(ToolCallResult::failed(request, err.into(), started));
                    }
                }
            }
        };

        let ctx = ToolContext {
            request_id: request.request_id.clone(),
            user_id: request.user_id.clone(),
            token,
        };

        let result = match self.workers.execute(def, request.input.clone(), ctx).await {
            Ok(output) => ToolCallResult::success(request, output, started),
            Err(err) => ToolCallResult::failed(request, ToolCallError::from(err), started),
        };

        tracing::info!(
            "Call {} to {} finished as {:?} in {}ms",
            result.request_id,
            result.tool_name,
            result.status,
            result.duration_ms
        );
        Ok(result)
    }

    fn prompt(
        &self,
        request: &ToolCallRequest,
        provider_id: &ProviderId,
        scopes: &[String],
        started: Instant,
    ) -> Result<ToolCallResult, DispatchError> {
        match self
            .auth
            .start_authorization(&request.user_id, provider_id, scopes)
        {
            Ok(start) => {
                tracing::info!(
                    "Call {} to {} needs authorization with {}",
                    request.request_id,
                    request.tool_name,
                    provider_id
                );
                let prompt = AuthorizationPrompt {
                    url: start.url,
                    provider_id: start.provider_id,
                    scopes: start.scopes,
                };
                Ok(ToolCallResult::auth_required(request, prompt, started))
            }
            Err(AuthError::Store(err)) => Err(DispatchError::Internal(err)),
            Err(err) => Ok(ToolCallResult::failed(request, err.into(), started)),
        }
    }
}
