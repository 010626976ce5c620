use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;

/// End user on whose behalf tools are invoked
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a configured OAuth provider (e.g. `github`, `google`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderId(pub String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-supplied identifier of a single tool call
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a stored connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Store key of a connection: one connection per (user, provider)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionKey {
    pub user_id: UserId,
    pub provider_id: ProviderId,
}

impl ConnectionKey {
    pub fn new(user_id: UserId, provider_id: ProviderId) -> Self {
        Self {
            user_id,
            provider_id,
        }
    }
}

impl std::fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.user_id, self.provider_id)
    }
}

/// Bearer token handed to tool handlers. Debug output never shows the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Lifecycle state of a user connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Pending,
    Active,
    Expired,
    Revoked,
}

/// Delegated credential for one user at one provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConnection {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub provider_id: ProviderId,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Scopes granted by the provider, sorted and de-duplicated
    pub scopes: Vec<String>,
    pub state: ConnectionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserConnection {
    pub fn key(&self) -> ConnectionKey {
        ConnectionKey::new(self.user_id.clone(), self.provider_id.clone())
    }

    /// True once `now + margin` has reached the expiry. Tokens without an
    /// expiry never expire locally.
    pub fn is_expired_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => now + margin >= expires_at,
            None => false,
        }
    }

    pub fn covers(&self, scopes: &[String]) -> bool {
        scopes.iter().all(|scope| self.scopes.contains(scope))
    }
}

/// Authorization flow that has been started but not yet completed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAuthorization {
    pub state: String,
    pub user_id: UserId,
    pub provider_id: ProviderId,
    pub scopes: Vec<String>,
    pub redirect_uri: String,
    pub code_verifier: Option<String>,
    pub authorization_url: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingAuthorization {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A request from the agent layer to call one tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    #[serde(default = "RequestId::generate")]
    pub request_id: RequestId,
    pub user_id: UserId,
    pub tool_name: String,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl ToolCallRequest {
    pub fn new(user_id: UserId, tool_name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            request_id: RequestId::generate(),
            user_id,
            tool_name: tool_name.into(),
            input,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Outcome class of a tool call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Success,
    AuthRequired,
    Error,
}

/// Machine-readable error code carried in [`ToolCallError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidInput,
    NotFound,
    AuthError,
    ToolExecutionError,
    Timeout,
}

/// One offending field of a rejected payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub field: String,
    pub reason: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Structured error returned to the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallError {
    pub code: ErrorCode,
    /// User-facing message
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub developer_message: Option<String>,
    #[serde(default)]
    pub can_retry: bool,
    /// How long the caller should wait before retrying
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    /// Extra guidance for the model, e.g. which values would have worked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_prompt_content: Option<String>,
    /// HTTP status reported by the service the tool called
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<FieldViolation>,
}

impl ToolCallError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            developer_message: None,
            can_retry: false,
            retry_after_ms: None,
            additional_prompt_content: None,
            upstream_status: None,
            violations: Vec::new(),
        }
    }
}

/// What the user must do before the call can proceed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationPrompt {
    pub url: String,
    pub provider_id: ProviderId,
    pub scopes: Vec<String>,
}

/// Typed result handed back to the agent session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub request_id: RequestId,
    pub tool_name: String,
    pub status: CallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolCallError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<AuthorizationPrompt>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ToolCallResult {
    pub fn success(request: &ToolCallRequest, output: serde_json::Value, started: Instant) -> Self {
        Self::finish(request, CallStatus::Success, started, |result| {
            result.output = Some(output)
        })
    }

    pub fn failed(request: &ToolCallRequest, error: ToolCallError, started: Instant) -> Self {
        Self::finish(request, CallStatus::Error, started, |result| {
            result.error = Some(error)
        })
    }

    pub fn auth_required(
        request: &ToolCallRequest,
        prompt: AuthorizationPrompt,
        started: Instant,
    ) -> Self {
        Self::finish(request, CallStatus::AuthRequired, started, |result| {
            result.authorization = Some(prompt)
        })
    }

    fn finish(
        request: &ToolCallRequest,
        status: CallStatus,
        started: Instant,
        fill: impl FnOnce(&mut Self),
    ) -> Self {
        let mut result = Self {
            request_id: request.request_id.clone(),
            tool_name: request.tool_name.clone(),
            status,
            output: None,
            error: None,
            authorization: None,
            finished_at: Utc::now(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        fill(&mut result);
        result
    }
}

/// Sort and de-duplicate a scope list so it can be compared and stored
pub fn normalize_scopes<S: AsRef<str>>(scopes: &[S]) -> Vec<String> {
    let mut scopes: Vec<String> = scopes
        .iter()
        .map(|s| s.as_ref().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    scopes.sort();
    scopes.dedup();
    scopes
}
