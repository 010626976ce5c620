//! Error taxonomy for catalog, authorization, execution and dispatch.

use crate::types::{ErrorCode, FieldViolation, ProviderId, ToolCallError};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while registering or resolving tools.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("tool `{name}` is already registered")]
    DuplicateTool { name: String },

    #[error("tool `{name}` is not registered")]
    NotFound { name: String },

    #[error("invalid input for tool `{tool}`: {}", describe_violations(.violations))]
    InvalidInput {
        tool: String,
        violations: Vec<FieldViolation>,
    },

    #[error("invalid tool definition: {reason}")]
    InvalidDefinition { reason: String },
}

fn describe_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failures talking to a provider's OAuth endpoints.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request timed out")]
    Timeout,

    #[error("provider request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("provider rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err)
        }
    }
}

/// Errors raised by the auth manager.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authorization required for provider `{provider_id}`")]
    AuthorizationRequired {
        provider_id: ProviderId,
        scopes: Vec<String>,
    },

    #[error("re-authorization required for provider `{provider_id}`")]
    ReauthorizationRequired {
        provider_id: ProviderId,
        scopes: Vec<String>,
    },

    #[error("authorization state is unknown, expired or already used")]
    InvalidState,

    #[error("auth provider `{0}` is not configured")]
    UnknownProvider(ProviderId),

    #[error("scope `{scope}` is not supported by provider `{provider_id}`")]
    UnsupportedScope {
        provider_id: ProviderId,
        scope: String,
    },

    #[error("token exchange with `{provider_id}` failed: {source}")]
    Exchange {
        provider_id: ProviderId,
        #[source]
        source: ProviderError,
    },

    /// The connection store could not be reached. This is an infrastructure
    /// failure, never a tool-level outcome.
    #[error("connection store failure: {0:#}")]
    Store(#[from] anyhow::Error),
}

/// Error reported by a tool handler. The message is user-facing, the
/// developer message carries provider detail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ToolFailure {
    pub message: String,
    pub developer_message: Option<String>,
    pub can_retry: bool,
    pub retry_after: Option<Duration>,
    pub additional_prompt_content: Option<String>,
    pub upstream_status: Option<u16>,
}

impl ToolFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            developer_message: None,
            can_retry: false,
            retry_after: None,
            additional_prompt_content: None,
            upstream_status: None,
        }
    }

    /// Failure answered by the service the tool called. Rate limits (429)
    /// and server errors (5xx) are retryable.
    pub fn upstream(message: impl Into<String>, status: u16) -> Self {
        let mut failure = Self::new(message);
        failure.upstream_status = Some(status);
        failure.can_retry = status == 429 || status >= 500;
        failure
    }

    /// Upstream rate limit with the wait the service asked for
    pub fn rate_limited(message: impl Into<String>, retry_after: Duration) -> Self {
        Self::upstream(message, 429).with_retry_after(retry_after)
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Extra text for the model to read before it tries again
    pub fn with_prompt_content(mut self, content: impl Into<String>) -> Self {
        self.additional_prompt_content = Some(content.into());
        self
    }

    pub fn with_developer_message(mut self, detail: impl Into<String>) -> Self {
        self.developer_message = Some(detail.into());
        self
    }

    /// Marks the failure as safe for the caller to retry. The dispatcher
    /// itself never retries.
    pub fn retryable(mut self) -> Self {
        self.can_retry = true;
        self
    }
}

/// Errors produced by the worker pool.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("tool `{tool}` failed: {failure}")]
    Failed { tool: String, failure: ToolFailure },

    #[error("tool `{tool}` crashed: {reason}")]
    Crashed { tool: String, reason: String },

    #[error("tool `{tool}` timed out after {}ms", .after.as_millis())]
    Timeout { tool: String, after: Duration },
}

/// Fatal dispatcher failures. Everything tool-level is a `ToolCallResult`.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl From<CatalogError> for ToolCallError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound { .. } => ToolCallError::new(ErrorCode::NotFound, err.to_string()),
            CatalogError::InvalidInput { ref violations, .. } => {
                let violations = violations.clone();
                let mut error = ToolCallError::new(ErrorCode::InvalidInput, err.to_string());
                error.violations = violations;
                error
            }
            CatalogError::DuplicateTool { .. } | CatalogError::InvalidDefinition { .. } => {
                ToolCallError::new(ErrorCode::InvalidInput, err.to_string())
            }
        }
    }
}

impl From<AuthError> for ToolCallError {
    fn from(err: AuthError) -> Self {
        let mut error = ToolCallError::new(ErrorCode::AuthError, "authorization with the provider failed");
        error.developer_message = Some(err.to_string());
        error
    }
}

impl From<ExecutionError> for ToolCallError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::Failed { failure, .. } => {
                let mut error = ToolCallError::new(ErrorCode::ToolExecutionError, failure.message);
                error.developer_message = failure.developer_message;
                error.can_retry = failure.can_retry;
                error.retry_after_ms = failure
                    .retry_after
                    .map(|wait| u64::try_from(wait.as_millis()).unwrap_or(u64::MAX));
                error.additional_prompt_content = failure.additional_prompt_content;
                error.upstream_status = failure.upstream_status;
                error
            }
            ExecutionError::Crashed { ref tool, ref reason } => {
                let mut error = ToolCallError::new(
                    ErrorCode::ToolExecutionError,
                    format!("tool `{tool}` failed unexpectedly"),
                );
                error.developer_message = Some(reason.clone());
                error
            }
            ExecutionError::Timeout { .. } => {
                let mut error = ToolCallError::new(ErrorCode::Timeout, err.to_string());
                error.developer_message =
                    Some("the action may or may not have completed".to_string());
                error
            }
        }
    }
}
