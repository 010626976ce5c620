use crate::config::AppState;
use crate::middleware::auth::{require_caller, CallerAuth};
use anyhow::{Context, Result};
use axum::{
    http::StatusCode,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use toolgate_core::config::ToolgateConfig;
use toolgate_core::{AuthError, Runtime};
use toolgate_mcp::toolkits;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

mod auth;
mod handlers;

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

/// Start the API server
pub async fn serve(addr: &str, config: ToolgateConfig) -> Result<()> {
    let caller_auth = config
        .api
        .resolve_secret()
        .context("Caller authentication is not configured")?
        .map(|secret| CallerAuth::new(&secret));
    if caller_auth.is_none() {
        tracing::warn!("API caller authentication is disabled; do not expose this server");
    }

    let runtime = Runtime::build(&config, toolkits::builtin()?)?;
    let _maintenance = runtime.spawn_maintenance(MAINTENANCE_INTERVAL);

    let app = create_router(AppState::from_runtime(&runtime), caller_auth);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("API server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the API router. Without `caller_auth` every route is open.
fn create_router(state: AppState, caller_auth: Option<CallerAuth>) -> Router {
    let mut callers = Router::new()
        // Tools
        .route("/api/tools", get(handlers::list_tools))
        .route("/api/tools/invoke", post(handlers::invoke_tool))
        .route("/api/auth/{provider}/authorize", get(auth::authorize))
        // Connections
        .route("/api/connections/{user_id}", get(auth::list_connections))
        .route(
            "/api/connections/{user_id}/{provider}",
            get(auth::connection_status).delete(auth::revoke_connection),
        );
    if let Some(caller_auth) = caller_auth {
        callers = callers.route_layer(from_fn_with_state(Arc::new(caller_auth), require_caller));
    }

    Router::new()
        .route("/api/health", get(health_check))
        // Providers redirect the browser here without caller credentials
        .route("/api/auth/callback", get(auth::callback))
        .merge(callers)
        // Middleware
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "toolgate",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// Custom error type for API handlers. Anything converted through `?` is a
/// 500; client errors are built explicitly.
pub struct ApiError {
    status: StatusCode,
    error: anyhow::Error,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<anyhow::Error>) -> Self {
        Self {
            status,
            error: error.into(),
        }
    }

    pub fn bad_request(error: impl Into<anyhow::Error>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    pub fn unauthorized(error: impl Into<anyhow::Error>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, error)
    }

    pub fn not_found(error: impl Into<anyhow::Error>) -> Self {
        Self::new(StatusCode::NOT_FOUND, error)
    }

    pub fn auth(err: AuthError) -> Self {
        let status = match &err {
            AuthError::UnknownProvider(_) => StatusCode::NOT_FOUND,
            AuthError::InvalidState | AuthError::UnsupportedScope { .. } => StatusCode::BAD_REQUEST,
            AuthError::AuthorizationRequired { .. } | AuthError::ReauthorizationRequired { .. } => {
                StatusCode::UNAUTHORIZED
            }
            AuthError::Exchange { .. } => StatusCode::BAD_GATEWAY,
            AuthError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error_msg = self.error.to_string();
        let details = self
            .error
            .chain()
            .skip(1)
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(": ");

        if self.status.is_server_error() {
            tracing::error!("Request failed: {:#}", self.error);
        }

        let response = if details.is_empty() {
            ErrorResponse::new(error_msg)
        } else {
            ErrorResponse::with_details(error_msg, details)
        };

        (self.status, Json(response)).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use toolgate_core::auth::{AuthProvider, OAuthClient, TokenGrant};
    use toolgate_core::catalog::{ParamSpec, ToolContext, ToolDefinition, Toolkit, ValueType};
    use toolgate_core::error::ProviderError;
    use toolgate_core::storage::MemoryConnectionStore;
    use toolgate_core::ToolFailure;
    use tower::ServiceExt;

    #[derive(Default)]
    struct FakeClient {
        exchanges: AtomicUsize,
        revokes: AtomicUsize,
    }

    #[async_trait]
    impl OAuthClient for FakeClient {
        async fn exchange_code(
            &self,
            _provider: &AuthProvider,
            code: &str,
            _redirect_uri: &str,
            _code_verifier: Option<&str>,
        ) -> Result<TokenGrant, ProviderError> {
            self.exchanges.fetch_add(1, Ordering::SeqCst);
            Ok(TokenGrant {
                access_token: format!("access-{}", code),
                refresh_token: Some("refresh".into()),
                expires_in: Some(3600),
                scopes: None,
            })
        }

        async fn refresh(
            &self,
            _provider: &AuthProvider,
            _refresh_token: &str,
        ) -> Result<TokenGrant, ProviderError> {
            Err(ProviderError::Malformed("not used".into()))
        }

        async fn revoke(&self, _provider: &AuthProvider, _token: &str) -> Result<(), ProviderError> {
            self.revokes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    const WORKER_SECRET: &str = "test-worker-secret";

    fn router(dir: &TempDir, client: Arc<FakeClient>) -> Router {
        build_router(dir, client, None)
    }

    fn secured_router(dir: &TempDir) -> Router {
        build_router(
            dir,
            Arc::new(FakeClient::default()),
            Some(CallerAuth::new(WORKER_SECRET)),
        )
    }

    fn caller_token(secret: &str) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = crate::middleware::auth::CallerClaims {
            sub: Some("agent".into()),
            exp: (now + 300) as u64,
            iat: Some(now as u64),
        };
        jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    async fn send_as(app: &Router, uri: &str, token: Option<&str>) -> StatusCode {
        let mut builder = Request::builder().method(Method::GET).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let response = app.clone().oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
        response.status()
    }

    fn build_router(dir: &TempDir, client: Arc<FakeClient>, caller_auth: Option<CallerAuth>) -> Router {
        let mut config = ToolgateConfig::default();
        config.data_dir = dir.path().to_path_buf();
        config.providers.push(
            AuthProvider::new(
                "github",
                "client",
                "https://github.com/login/oauth/authorize",
                "https://github.com/login/oauth/access_token",
            )
            .with_scopes(&["public_repo", "repo"]),
        );

        let toolkit = Toolkit::new("Demo", "Demo tools")
            .tool(
                ToolDefinition::new("Echo", "Echo a message", |input: Value, _ctx: ToolContext| async move {
                    Ok::<_, ToolFailure>(input["message"].clone())
                })
                .param(ParamSpec::required("message", ValueType::String)),
            )
            .tool(
                ToolDefinition::new("Whoami", "Needs GitHub", |_input: Value, ctx: ToolContext| async move {
                    let token = ctx.require_token()?;
                    Ok::<_, ToolFailure>(json!(token.secret()))
                })
                .requires_auth("github", &["public_repo"]),
            );

        let runtime = Runtime::from_parts(
            &config,
            vec![toolkit],
            Arc::new(MemoryConnectionStore::new()),
            client,
        )
        .unwrap();
        create_router(AppState::from_runtime(&runtime), caller_auth)
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Response) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(body) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };
        let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        (response.status(), response)
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn state_param(location: &str) -> String {
        let query = location.split_once('?').unwrap().1;
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix("state="))
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let dir = TempDir::new().unwrap();
        let app = router(&dir, Arc::new(FakeClient::default()));

        let (status, response) = send(&app, Method::GET, "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(response).await["service"], "toolgate");
    }

    #[tokio::test]
    async fn test_list_and_invoke_tools() {
        let dir = TempDir::new().unwrap();
        let app = router(&dir, Arc::new(FakeClient::default()));

        let (status, response) = send(&app, Method::GET, "/api/tools", None).await;
        assert_eq!(status, StatusCode::OK);
        let tools = json_body(response).await["tools"].clone();
        assert_eq!(tools.as_array().unwrap().len(), 2);
        assert_eq!(tools[0]["name"], "Demo.Echo");

        let (status, response) = send(
            &app,
            Method::POST,
            "/api/tools/invoke",
            Some(json!({
                "user_id": "alice",
                "tool_name": "Demo.Echo",
                "input": { "message": "hello" }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let result = json_body(response).await;
        assert_eq!(result["status"], "success");
        assert_eq!(result["output"], "hello");
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool_is_a_result() {
        let dir = TempDir::new().unwrap();
        let app = router(&dir, Arc::new(FakeClient::default()));

        let (status, response) = send(
            &app,
            Method::POST,
            "/api/tools/invoke",
            Some(json!({ "user_id": "alice", "tool_name": "Demo.Missing" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(response).await["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_authorization_round_trip() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(FakeClient::default());
        let app = router(&dir, client.clone());

        let (status, response) = send(&app, Method::POST, "/api/tools/invoke", Some(json!({
            "user_id": "alice",
            "tool_name": "Demo.Whoami"
        })))
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "auth_required");

        let (status, response) = send(
            &app,
            Method::GET,
            "/api/auth/github/authorize?user_id=alice&scopes=public_repo",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FOUND);
        let location = response.headers()[header::LOCATION].to_str().unwrap().to_string();
        assert!(location.starts_with("https://github.com/login/oauth/authorize?"));
        let state = state_param(&location);

        let (status, response) = send(&app, Method::GET, "/api/connections/alice/github", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(response).await["state"], "pending");

        let callback = format!("/api/auth/callback?state={}&code=abc", state);
        let (status, response) = send(&app, Method::GET, &callback, None).await;
        assert_eq!(status, StatusCode::OK);
        let connection = json_body(response).await;
        assert_eq!(connection["state"], "active");
        assert!(connection.get("access_token").is_none());

        // State is single use
        let (status, _) = send(&app, Method::GET, &callback, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(client.exchanges.load(Ordering::SeqCst), 1);

        let (_, response) = send(&app, Method::POST, "/api/tools/invoke", Some(json!({
            "user_id": "alice",
            "tool_name": "Demo.Whoami"
        })))
        .await;
        assert_eq!(json_body(response).await["output"], "access-abc");

        let (status, response) = send(&app, Method::GET, "/api/connections/alice/github", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(response).await["state"], "active");
    }

    #[tokio::test]
    async fn test_provider_denial_cancels_flow() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(FakeClient::default());
        let app = router(&dir, client.clone());

        let (_, response) = send(&app, Method::GET, "/api/auth/github/authorize?user_id=bob", None).await;
        let state = state_param(response.headers()[header::LOCATION].to_str().unwrap());

        let denied = format!(
            "/api/auth/callback?state={}&error=access_denied&error_description=user+said+no",
            state
        );
        let (status, response) = send(&app, Method::GET, &denied, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["details"], "access_denied: user said no");

        let (_, response) = send(&app, Method::GET, "/api/connections/bob/github", None).await;
        assert_eq!(json_body(response).await["state"], "none");

        let late = format!("/api/auth/callback?state={}&code=abc", state);
        let (status, _) = send(&app, Method::GET, &late, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(client.exchanges.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_authorize_rejections() {
        let dir = TempDir::new().unwrap();
        let app = router(&dir, Arc::new(FakeClient::default()));

        let (status, _) = send(&app, Method::GET, "/api/auth/gitlab/authorize?user_id=alice", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, response) = send(
            &app,
            Method::GET,
            "/api/auth/github/authorize?user_id=alice&scopes=admin:org",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["error"].as_str().unwrap().contains("admin:org"));

        let (status, _) = send(&app, Method::GET, "/api/auth/github/authorize?user_id=", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, Method::GET, "/api/auth/callback?code=abc", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_revoke_connection() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(FakeClient::default());
        let app = router(&dir, client.clone());

        let (status, response) = send(&app, Method::DELETE, "/api/connections/alice/github", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(response).await["revoked"], false);

        let (_, response) = send(
            &app,
            Method::GET,
            "/api/auth/github/authorize?user_id=alice&scopes=public_repo,repo",
            None,
        )
        .await;
        let state = state_param(response.headers()[header::LOCATION].to_str().unwrap());
        let callback = format!("/api/auth/callback?state={}&code=xyz", state);
        let (_, response) = send(&app, Method::GET, &callback, None).await;
        assert_eq!(json_body(response).await["scopes"], json!(["public_repo", "repo"]));

        let (_, response) = send(&app, Method::DELETE, "/api/connections/alice/github", None).await;
        assert_eq!(json_body(response).await["revoked"], true);
        assert_eq!(client.revokes.load(Ordering::SeqCst), 1);

        let (_, response) = send(&app, Method::GET, "/api/connections/alice/github", None).await;
        assert_eq!(json_body(response).await["state"], "none");

        let (status, _) = send(&app, Method::GET, "/api/connections/alice/gitlab", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_caller_routes_require_a_valid_token() {
        let dir = TempDir::new().unwrap();
        let app = secured_router(&dir);

        for uri in [
            "/api/tools",
            "/api/connections/alice",
            "/api/connections/alice/github",
            "/api/auth/github/authorize?user_id=alice",
        ] {
            assert_eq!(send_as(&app, uri, None).await, StatusCode::UNAUTHORIZED, "{}", uri);
            assert_eq!(
                send_as(&app, uri, Some(&caller_token("wrong-secret"))).await,
                StatusCode::UNAUTHORIZED,
                "{}",
                uri
            );
        }
        assert_eq!(send_as(&app, "/api/tools", Some("garbage")).await, StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/tools/invoke")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "user_id": "alice", "tool_name": "Demo.Echo" }).to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error"], "missing bearer token");
    }

    #[tokio::test]
    async fn test_valid_caller_token_is_accepted() {
        let dir = TempDir::new().unwrap();
        let app = secured_router(&dir);
        let token = caller_token(WORKER_SECRET);

        assert_eq!(send_as(&app, "/api/tools", Some(&token)).await, StatusCode::OK);
        assert_eq!(
            send_as(&app, "/api/connections/alice/github", Some(&token)).await,
            StatusCode::OK
        );
        assert_eq!(
            send_as(&app, "/api/auth/github/authorize?user_id=alice", Some(&token)).await,
            StatusCode::FOUND
        );

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/tools/invoke")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::from(
                json!({ "user_id": "alice", "tool_name": "Demo.Echo", "input": { "message": "hi" } })
                    .to_string(),
            ))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["output"], "hi");
    }

    #[tokio::test]
    async fn test_health_and_callback_stay_open() {
        let dir = TempDir::new().unwrap();
        let app = secured_router(&dir);

        assert_eq!(send_as(&app, "/api/health", None).await, StatusCode::OK);
        // Reaches the handler, which rejects the unknown state
        assert_eq!(
            send_as(&app, "/api/auth/callback?state=unknown&code=abc", None).await,
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn test_list_connections() {
        let dir = TempDir::new().unwrap();
        let app = router(&dir, Arc::new(FakeClient::default()));

        let (status, response) = send(&app, Method::GET, "/api/connections/alice", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(response).await["connections"], json!([]));

        let (_, response) = send(
            &app,
            Method::GET,
            "/api/auth/github/authorize?user_id=alice&scopes=repo",
            None,
        )
        .await;
        let state = state_param(response.headers()[header::LOCATION].to_str().unwrap());
        let callback = format!("/api/auth/callback?state={}&code=abc", state);
        send(&app, Method::GET, &callback, None).await;

        let (_, response) = send(&app, Method::GET, "/api/connections/alice", None).await;
        let connections = json_body(response).await["connections"].clone();
        assert_eq!(connections.as_array().unwrap().len(), 1);
        assert_eq!(connections[0]["provider_id"], "github");
        assert_eq!(connections[0]["state"], "active");
        assert!(connections[0].get("access_token").is_none());

        let (_, response) = send(&app, Method::GET, "/api/connections/bob", None).await;
        assert_eq!(json_body(response).await["connections"], json!([]));
    }
}
