use super::ApiResult;
use crate::config::AppState;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use toolgate_core::catalog::ToolSummary;
use toolgate_core::{ToolCallRequest, ToolCallResult};

/// List every registered tool with its input schema
pub async fn list_tools(State(state): State<Arc<AppState>>) -> Json<ListToolsResponse> {
    Json(ListToolsResponse {
        tools: state.catalog.summaries(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListToolsResponse {
    pub tools: Vec<ToolSummary>,
}

/// Invoke a tool on behalf of a user. Tool-level failures, including
/// `auth_required`, come back as a 200 with the typed result.
pub async fn invoke_tool(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ToolCallRequest>,
) -> ApiResult<Json<ToolCallResult>> {
    let result = state.dispatcher.invoke(request).await?;
    Ok(Json(result))
}
