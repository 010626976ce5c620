// MCP server: JSON-RPC over newline-delimited stdio, backed by the dispatcher

use crate::protocol::*;
use anyhow::{Context, Result};
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use toolgate_core::dispatcher::Dispatcher;
use toolgate_core::{CallStatus, ToolCallRequest, ToolCallResult, UserId};

const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Serves the tool catalog to a single MCP client acting for one user
pub struct McpServer {
    dispatcher: Arc<Dispatcher>,
    user_id: UserId,
}

impl McpServer {
    pub fn new(dispatcher: Arc<Dispatcher>, user_id: UserId) -> Self {
        Self {
            dispatcher,
            user_id,
        }
    }

    /// Serve on the process's stdin and stdout
    pub async fn start(&self) -> Result<()> {
        tracing::info!("MCP server listening on stdio for user {}", self.user_id);
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_BYTES));

        while let Some(line) = lines.next().await {
            let response = match line {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => match serde_json::from_str::<JsonRpcRequest>(&line) {
                    Ok(request) => self.handle(request).await,
                    Err(e) => {
                        tracing::warn!("Unparseable MCP message: {}", e);
                        Some(JsonRpcResponse::error(Value::Null, JsonRpcError::parse_error()))
                    }
                },
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    tracing::warn!("MCP message exceeded {} bytes", MAX_LINE_BYTES);
                    Some(JsonRpcResponse::error(Value::Null, JsonRpcError::invalid_request()))
                }
                Err(LinesCodecError::Io(e)) => return Err(e).context("Failed to read from MCP client"),
            };

            if let Some(response) = response {
                let mut encoded =
                    serde_json::to_string(&response).context("Failed to encode MCP response")?;
                encoded.push('\n');
                writer
                    .write_all(encoded.as_bytes())
                    .await
                    .context("Failed to write MCP response")?;
                writer.flush().await.context("Failed to flush MCP response")?;
            }
        }

        tracing::info!("MCP client disconnected");
        Ok(())
    }

    /// Handle one request. Notifications produce no response.
    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::error(
                request.id.unwrap_or(Value::Null),
                JsonRpcError::invalid_request(),
            ));
        }

        let Some(id) = request.id.clone() else {
            tracing::debug!("Received notification {}", request.method);
            return None;
        };

        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(id, self.initialize(request.params)),
            "ping" => JsonRpcResponse::success(id, serde_json::json!({})),
            "tools/list" => JsonRpcResponse::success(id, self.list_tools()),
            "tools/call" => match self.call_tool(request.params).await {
                Ok(result) => JsonRpcResponse::success(id, result),
                Err(error) => JsonRpcResponse::error(id, error),
            },
            other => JsonRpcResponse::error(id, JsonRpcError::method_not_found(other)),
        };
        Some(response)
    }

    fn initialize(&self, params: Option<Value>) -> InitializeResult {
        if let Some(params) = params.and_then(|p| serde_json::from_value::<InitializeParams>(p).ok()) {
            tracing::info!(
                "MCP client {} {} connected (protocol {})",
                params.client_info.name,
                params.client_info.version,
                params.protocol_version
            );
        }

        InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
            },
            server_info: ServerInfo {
                name: "toolgate".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }

    fn list_tools(&self) -> ListToolsResult {
        let tools = self
            .dispatcher
            .catalog()
            .summaries()
            .into_iter()
            .map(|summary| ToolSchema {
                name: summary.name,
                description: summary.description,
                input_schema: summary.input_schema,
            })
            .collect();

        ListToolsResult { tools }
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<CallToolResult, JsonRpcError> {
        let params: CallToolParams = params
            .ok_or_else(|| JsonRpcError::invalid_params("missing params"))
            .and_then(|p| {
                serde_json::from_value(p).map_err(|e| JsonRpcError::invalid_params(e.to_string()))
            })?;

        let mut request = ToolCallRequest::new(self.user_id.clone(), params.name, params.arguments);
        if let Some(key) = params.meta.and_then(|m| m.idempotency_key) {
            request = request.with_idempotency_key(key);
        }

        let result = self.dispatcher.invoke(request).await.map_err(|e| {
            tracing::error!("Tool call failed: {}", e);
            JsonRpcError::internal_error(e.to_string())
        })?;

        Ok(to_call_result(result))
    }
}

/// Render a dispatcher result as MCP tool output
pub fn to_call_result(result: ToolCallResult) -> CallToolResult {
    let structured = serde_json::to_value(&result).ok();

    let (text, is_error) = match result.status {
        CallStatus::Success => {
            let text = match result.output {
                Some(Value::String(text)) => text,
                Some(output) => serde_json::to_string_pretty(&output).unwrap_or_default(),
                None => String::new(),
            };
            (ToolContent::text(text), None)
        }
        CallStatus::AuthRequired => {
            let text = match result.authorization {
                Some(prompt) => format!(
                    "Authorization required. Ask the user to visit {} to connect {} (scopes: {}), then retry.",
                    prompt.url,
                    prompt.provider_id,
                    prompt.scopes.join(", ")
                ),
                None => "Authorization required.".to_string(),
            };
            (ToolContent::text(text), None)
        }
        CallStatus::Error => {
            let message = result
                .error
                .map(|e| format!("{:?}: {}", e.code, e.message))
                .unwrap_or_else(|| "unknown error".to_string());
            (ToolContent::error(message), Some(true))
        }
    };

    CallToolResult {
        content: vec![text],
        is_error,
        structured_content: structured,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use toolgate_core::auth::AuthProvider;
    use toolgate_core::catalog::{ParamSpec, ToolContext, ToolDefinition, Toolkit, ValueType};
    use toolgate_core::config::ToolgateConfig;
    use toolgate_core::{Runtime, ToolFailure};

    fn server(dir: &TempDir) -> McpServer {
        let mut config = ToolgateConfig::default();
        config.data_dir = dir.path().to_path_buf();
        config.providers.push(AuthProvider::new(
            "github",
            "client",
            "https://github.com/login/oauth/authorize",
            "https://github.com/login/oauth/access_token",
        ));

        let toolkit = Toolkit::new("Demo", "Demo tools")
            .tool(
                ToolDefinition::new("Echo", "Echo a message", |input: Value, _ctx: ToolContext| async move {
                    Ok::<_, ToolFailure>(input["message"].clone())
                })
                .param(ParamSpec::required("message", ValueType::String)),
            )
            .tool(
                ToolDefinition::new("Star", "Needs GitHub", |_input: Value, _ctx: ToolContext| async move {
                    Ok::<_, ToolFailure>(Value::Null)
                })
                .requires_auth("github", &["public_repo"]),
            );

        let runtime = Runtime::build(&config, vec![toolkit]).unwrap();
        McpServer::new(runtime.dispatcher.clone(), UserId::new("alice"))
    }

    fn call(id: i64, method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest::new(id, method, params)
    }

    #[tokio::test]
    async fn test_initialize_and_list() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir);

        let init = server
            .handle(call(
                1,
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": { "name": "test", "version": "1.0" }
                }),
            ))
            .await
            .unwrap();
        assert_eq!(init.result.unwrap()["serverInfo"]["name"], "toolgate");

        let list = server.handle(call(2, "tools/list", json!({}))).await.unwrap();
        let tools = list.result.unwrap()["tools"].clone();
        assert_eq!(tools[0]["name"], "Demo.Echo");
        assert_eq!(tools[0]["inputSchema"]["required"], json!(["message"]));
    }

    #[tokio::test]
    async fn test_call_tool() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir);

        let response = server
            .handle(call(3, "tools/call", json!({ "name": "Demo.Echo", "arguments": { "message": "hi" } })))
            .await
            .unwrap();

        let result = response.result.unwrap();
        assert_eq!(result["content"][0]["text"], "hi");
        assert!(result.get("isError").is_none());
        assert_eq!(result["structuredContent"]["status"], "success");
    }

    #[tokio::test]
    async fn test_call_tool_needing_auth_returns_url() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir);

        let response = server
            .handle(call(4, "tools/call", json!({ "name": "Demo.Star", "arguments": {} })))
            .await
            .unwrap();

        let result = response.result.unwrap();
        assert!(result["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("https://github.com/login/oauth/authorize?"));
        assert_eq!(result["structuredContent"]["status"], "auth_required");
    }

    #[tokio::test]
    async fn test_invalid_input_is_tool_error() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir);

        let response = server
            .handle(call(5, "tools/call", json!({ "name": "Demo.Echo", "arguments": { "message": 1 } })))
            .await
            .unwrap();

        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        assert_eq!(result["structuredContent"]["error"]["code"], "INVALID_INPUT");
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir);

        let missing = server.handle(call(6, "resources/list", json!({}))).await.unwrap();
        assert_eq!(missing.error.unwrap().code, -32601);

        let bad_params = server.handle(call(7, "tools/call", json!({ "arguments": {} }))).await.unwrap();
        assert_eq!(bad_params.error.unwrap().code, -32602);

        let notification = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: "notifications/initialized".to_string(),
            params: None,
        };
        assert!(server.handle(notification).await.is_none());
    }

    #[tokio::test]
    async fn test_serve_over_lines() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir);

        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
            "\n",
            "not json\n",
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
        );
        let mut output = Vec::new();
        server.serve(input.as_bytes(), &mut output).await.unwrap();

        let responses: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[1]["error"]["code"], -32700);
    }
}
