use crate::error::ToolFailure;
use crate::types::{normalize_scopes, AccessToken, ProviderId, RequestId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Type of a single input value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValueType {
    String,
    Integer,
    Number,
    Boolean,
    /// Any JSON value except null
    Json,
    Array { items: Box<ValueType> },
}

impl ValueType {
    pub fn array_of(items: ValueType) -> Self {
        Self::Array {
            items: Box::new(items),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Json => "json",
            Self::Array { .. } => "array",
        }
    }
}

/// One declared input parameter of a tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub value_type: ValueType,
    pub required: bool,
    /// Closed set of accepted string values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<String>>,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            description: None,
            value_type,
            required: true,
            allowed_values: None,
        }
    }

    pub fn optional(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            required: false,
            ..Self::required(name, value_type)
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn one_of<S: Into<String>>(mut self, values: impl IntoIterator<Item = S>) -> Self {
        self.allowed_values = Some(values.into_iter().map(Into::into).collect());
        self
    }
}

/// Provider and scopes a tool needs before it may run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequirement {
    pub provider_id: ProviderId,
    pub scopes: Vec<String>,
}

/// Per-call data handed to a handler. The token is the only credential a
/// handler ever sees.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub request_id: RequestId,
    pub user_id: UserId,
    pub token: Option<AccessToken>,
}

impl ToolContext {
    /// Token for tools that declared an auth requirement.
    pub fn require_token(&self) -> Result<&AccessToken, ToolFailure> {
        self.token
            .as_ref()
            .ok_or_else(|| ToolFailure::new("this tool was called without an authorization token"))
    }
}

/// Capability implemented by every tool: input plus context in, output or
/// failure out.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, input: Value, ctx: ToolContext) -> Result<Value, ToolFailure>;
}

#[async_trait::async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(Value, ToolContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolFailure>> + Send,
{
    async fn call(&self, input: Value, ctx: ToolContext) -> Result<Value, ToolFailure> {
        (self)(input, ctx).await
    }
}

/// Immutable description of a callable tool
#[derive(Clone)]
pub struct ToolDefinition {
    name: String,
    description: String,
    version: String,
    params: Vec<ParamSpec>,
    auth: Option<AuthRequirement>,
    handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("params", &self.params)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

impl ToolDefinition {
    pub fn new<H>(name: impl Into<String>, description: impl Into<String>, handler: H) -> Self
    where
        H: ToolHandler + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            version: "0.1.0".to_string(),
            params: Vec::new(),
            auth: None,
            handler: Arc::new(handler),
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    pub fn requires_auth<S: AsRef<str>>(mut self, provider_id: impl Into<String>, scopes: &[S]) -> Self {
        self.auth = Some(AuthRequirement {
            provider_id: ProviderId::new(provider_id),
            scopes: normalize_scopes(scopes),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn tool_version(&self) -> &str {
        &self.version
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn auth(&self) -> Option<&AuthRequirement> {
        self.auth.as_ref()
    }

    pub fn handler(&self) -> Arc<dyn ToolHandler> {
        self.handler.clone()
    }

    pub(crate) fn qualify(mut self, toolkit: &str) -> Self {
        self.name = format!("{}.{}", toolkit, self.name);
        self
    }
}

/// Serializable view of a definition, without the handler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
    pub version: String,
    pub params: Vec<ParamSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthRequirement>,
    pub input_schema: Value,
}

impl From<&ToolDefinition> for ToolSummary {
    fn from(def: &ToolDefinition) -> Self {
        Self {
            name: def.name.clone(),
            description: def.description.clone(),
            version: def.version.clone(),
            params: def.params.clone(),
            auth: def.auth.clone(),
            input_schema: super::schema::json_schema(def),
        }
    }
}
