// Authorization redirect, provider callback and connection management

use super::{ApiError, ApiResult};
use crate::config::AppState;
use anyhow::anyhow;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use toolgate_core::{ConnectionState, ProviderId, UserConnection, UserId};

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub user_id: String,
    /// Space or comma separated
    #[serde(default)]
    pub scopes: Option<String>,
}

/// Start (or resume) an authorization flow and redirect to the provider
pub async fn authorize(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(query): Query<AuthorizeQuery>,
) -> ApiResult<Response> {
    if query.user_id.trim().is_empty() {
        return Err(ApiError::bad_request(anyhow!("user_id must not be empty")));
    }

    let scopes = parse_scopes(query.scopes.as_deref());
    let start = state
        .auth
        .start_authorization(&UserId::new(query.user_id), &ProviderId::new(provider), &scopes)
        .map_err(ApiError::auth)?;

    Ok((StatusCode::FOUND, [(header::LOCATION, start.url)]).into_response())
}

fn parse_scopes(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub state: Option<String>,
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Provider redirect target
pub async fn callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
) -> ApiResult<Json<ConnectionView>> {
    let Some(flow_state) = query.state else {
        return Err(ApiError::bad_request(anyhow!("missing state parameter")));
    };

    if let Some(error) = query.error {
        state.auth.cancel_authorization(&flow_state);
        let detail = match query.error_description {
            Some(description) => format!("{}: {}", error, description),
            None => error,
        };
        return Err(ApiError::bad_request(
            anyhow!(detail).context("Authorization was denied by the provider"),
        ));
    }

    let Some(code) = query.code else {
        return Err(ApiError::bad_request(anyhow!("missing code parameter")));
    };

    let connection = state
        .auth
        .complete_authorization(&flow_state, &code)
        .await
        .map_err(ApiError::auth)?;

    Ok(Json(ConnectionView::from(connection)))
}

/// Connection details safe to hand to clients
#[derive(Debug, Serialize, Deserialize)]
pub struct ConnectionView {
    pub user_id: UserId,
    pub provider_id: ProviderId,
    pub state: ConnectionState,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<UserConnection> for ConnectionView {
    fn from(connection: UserConnection) -> Self {
        Self {
            user_id: connection.user_id,
            provider_id: connection.provider_id,
            state: connection.state,
            scopes: connection.scopes,
            expires_at: connection.expires_at,
            updated_at: connection.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConnectionStatusResponse {
    pub user_id: UserId,
    pub provider_id: ProviderId,
    /// `none`, `pending`, `active`, `expired` or `revoked`
    pub state: String,
}

pub async fn connection_status(
    State(state): State<Arc<AppState>>,
    Path((user_id, provider)): Path<(String, String)>,
) -> ApiResult<Json<ConnectionStatusResponse>> {
    let (user_id, provider_id) = connection_path(&state, user_id, provider)?;

    let label = match state
        .auth
        .connection_status(&user_id, &provider_id)
        .map_err(ApiError::auth)?
    {
        None => "none",
        Some(ConnectionState::Pending) => "pending",
        Some(ConnectionState::Active) => "active",
        Some(ConnectionState::Expired) => "expired",
        Some(ConnectionState::Revoked) => "revoked",
    };

    Ok(Json(ConnectionStatusResponse {
        user_id,
        provider_id,
        state: label.to_string(),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListConnectionsResponse {
    pub connections: Vec<ConnectionView>,
}

/// Every stored connection for a user
pub async fn list_connections(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<ListConnectionsResponse>> {
    let connections = state
        .auth
        .list_connections(&UserId::new(user_id))
        .map_err(ApiError::auth)?;

    Ok(Json(ListConnectionsResponse {
        connections: connections.into_iter().map(ConnectionView::from).collect(),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RevokeResponse {
    pub revoked: bool,
}

pub async fn revoke_connection(
    State(state): State<Arc<AppState>>,
    Path((user_id, provider)): Path<(String, String)>,
) -> ApiResult<Json<RevokeResponse>> {
    let (user_id, provider_id) = connection_path(&state, user_id, provider)?;

    let revoked = state
        .auth
        .revoke(&user_id, &provider_id)
        .await
        .map_err(ApiError::auth)?;

    Ok(Json(RevokeResponse { revoked }))
}

fn connection_path(
    state: &AppState,
    user_id: String,
    provider: String,
) -> ApiResult<(UserId, ProviderId)> {
    let provider_id = ProviderId::new(provider);
    if state.auth.provider(&provider_id).is_none() {
        return Err(ApiError::not_found(anyhow!(
            "auth provider `{}` is not configured",
            provider_id
        )));
    }
    Ok((UserId::new(user_id), provider_id))
}
