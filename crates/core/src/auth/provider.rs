//! OAuth provider configuration and the HTTP client that talks to provider
//! token endpoints.

use crate::error::ProviderError;
use crate::types::{normalize_scopes, ProviderId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// A configured OAuth2 provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthProvider {
    pub id: ProviderId,
    pub client_id: String,
    #[serde(default, skip_serializing)]
    pub client_secret: Option<String>,
    /// Environment variable holding the client secret
    #[serde(default)]
    pub client_secret_env: Option<String>,
    pub authorize_url: String,
    pub token_url: String,
    #[serde(default)]
    pub revoke_url: Option<String>,
    /// Scopes this provider may be asked for. Empty means any scope.
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default = "default_scope_delimiter")]
    pub scope_delimiter: String,
    #[serde(default = "default_pkce")]
    pub pkce: bool,
    /// Extra query parameters appended to the authorization URL
    #[serde(default)]
    pub authorize_params: BTreeMap<String, String>,
}

fn default_scope_delimiter() -> String {
    " ".to_string()
}

fn default_pkce() -> bool {
    true
}

impl AuthProvider {
    pub fn new(
        id: impl Into<String>,
        client_id: impl Into<String>,
        authorize_url: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        Self {
            id: ProviderId::new(id),
            client_id: client_id.into(),
            client_secret: None,
            client_secret_env: None,
            authorize_url: authorize_url.into(),
            token_url: token_url.into(),
            revoke_url: None,
            scopes: Vec::new(),
            scope_delimiter: default_scope_delimiter(),
            pkce: default_pkce(),
            authorize_params: BTreeMap::new(),
        }
    }

    pub fn with_scopes<S: AsRef<str>>(mut self, scopes: &[S]) -> Self {
        self.scopes = normalize_scopes(scopes);
        self
    }

    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    pub fn with_revoke_url(mut self, url: impl Into<String>) -> Self {
        self.revoke_url = Some(url.into());
        self
    }

    /// First scope not in the supported list, if any
    pub fn unsupported_scope<'a>(&self, requested: &'a [String]) -> Option<&'a String> {
        if self.scopes.is_empty() {
            return None;
        }
        requested.iter().find(|scope| !self.scopes.contains(scope))
    }

    /// Inline secret, or the one named by `client_secret_env`
    pub fn resolved_secret(&self) -> Option<String> {
        self.client_secret.clone().or_else(|| {
            self.client_secret_env
                .as_ref()
                .and_then(|name| std::env::var(name).ok())
        })
    }

    pub fn join_scopes(&self, scopes: &[String]) -> String {
        scopes.join(&self.scope_delimiter)
    }

    /// Split a provider scope string. Some providers answer with commas
    /// regardless of the delimiter they accept.
    pub fn split_scopes(&self, raw: &str) -> Vec<String> {
        let parts: Vec<&str> = raw
            .split(|c: char| c == ',' || self.scope_delimiter.contains(c))
            .collect();
        normalize_scopes(&parts)
    }
}

/// Tokens returned by a provider for a code exchange or refresh
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    /// Granted scopes, when the provider reports them
    pub scopes: Option<Vec<String>>,
}

/// Provider token endpoint operations
#[async_trait]
pub trait OAuthClient: Send + Sync {
    async fn exchange_code(
        &self,
        provider: &AuthProvider,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenGrant, ProviderError>;

    async fn refresh(
        &self,
        provider: &AuthProvider,
        refresh_token: &str,
    ) -> Result<TokenGrant, ProviderError>;

    async fn revoke(&self, provider: &AuthProvider, token: &str) -> Result<(), ProviderError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    scope: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// [`OAuthClient`] speaking standard form-encoded OAuth2 over reqwest
#[derive(Clone)]
pub struct HttpOAuthClient {
    client: reqwest::Client,
}

impl HttpOAuthClient {
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("toolgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ProviderError::Transport)?;

        Ok(Self { client })
    }

    async fn post_token(
        &self,
        provider: &AuthProvider,
        mut params: Vec<(&str, String)>,
    ) -> Result<TokenGrant, ProviderError> {
        params.push(("client_id", provider.client_id.clone()));
        if let Some(secret) = provider.resolved_secret() {
            params.push(("client_secret", secret));
        }

        let response = self
            .client
            .post(&provider.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Malformed(format!("invalid token response: {}", e)))?;

        // GitHub reports grant errors with a 200 status
        if let Some(error) = token.error {
            let detail = token
                .error_description
                .map(|d| format!("{}: {}", error, d))
                .unwrap_or(error);
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                body: detail,
            });
        }

        let access_token = token
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ProviderError::Malformed("token response has no access_token".into()))?;

        Ok(TokenGrant {
            access_token,
            refresh_token: token.refresh_token,
            expires_in: token.expires_in,
            scopes: token.scope.map(|raw| provider.split_scopes(&raw)),
        })
    }
}

#[async_trait]
impl OAuthClient for HttpOAuthClient {
    async fn exchange_code(
        &self,
        provider: &AuthProvider,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenGrant, ProviderError> {
        let mut params = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("redirect_uri", redirect_uri.to_string()),
        ];
        if let Some(verifier) = code_verifier {
            params.push(("code_verifier", verifier.to_string()));
        }

        self.post_token(provider, params).await
    }

    async fn refresh(
        &self,
        provider: &AuthProvider,
        refresh_token: &str,
    ) -> Result<TokenGrant, ProviderError> {
        let params = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
        ];

        self.post_token(provider, params).await
    }

    async fn revoke(&self, provider: &AuthProvider, token: &str) -> Result<(), ProviderError> {
        let Some(url) = &provider.revoke_url else {
            return Ok(());
        };

        let mut params = vec![("token", token.to_string()), ("client_id", provider.client_id.clone())];
        if let Some(secret) = provider.resolved_secret() {
            params.push(("client_secret", secret));
        }

        let response = self.client.post(url).form(&params).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> AuthProvider {
        AuthProvider::new(
            "github",
            "client-123",
            format!("{}/login/oauth/authorize", server.uri()),
            format!("{}/login/oauth/access_token", server.uri()),
        )
        .with_client_secret("shh")
        .with_revoke_url(format!("{}/revoke", server.uri()))
    }

    fn client() -> HttpOAuthClient {
        HttpOAuthClient::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_exchange_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login/oauth/access_token"))
            .and(header("accept", "application/json"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=abc"))
            .and(body_string_contains("code_verifier=verifier"))
            .and(body_string_contains("client_secret=shh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "gho_token",
                "refresh_token": "ghr_refresh",
                "expires_in": 28800,
                "scope": "repo,user"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let grant = client()
            .exchange_code(&provider(&server), "abc", "http://localhost/cb", Some("verifier"))
            .await
            .unwrap();

        assert_eq!(grant.access_token, "gho_token");
        assert_eq!(grant.refresh_token.as_deref(), Some("ghr_refresh"));
        assert_eq!(grant.expires_in, Some(28800));
        assert_eq!(grant.scopes, Some(vec!["repo".to_string(), "user".to_string()]));
    }

    #[tokio::test]
    async fn test_error_in_ok_response_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login/oauth/access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": "bad_verification_code",
                "error_description": "The code passed is incorrect or expired."
            })))
            .mount(&server)
            .await;

        let err = client()
            .exchange_code(&provider(&server), "stale", "http://localhost/cb", None)
            .await
            .expect_err("error body should fail");

        match err {
            ProviderError::Rejected { body, .. } => assert!(body.starts_with("bad_verification_code")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_refresh_rejected_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login/oauth/access_token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let err = client()
            .refresh(&provider(&server), "used-refresh")
            .await
            .expect_err("401 should fail");

        assert!(matches!(err, ProviderError::Rejected { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_missing_access_token_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "token_type": "bearer" })))
            .mount(&server)
            .await;

        let err = client()
            .refresh(&provider(&server), "r")
            .await
            .expect_err("missing token should fail");

        assert!(matches!(err, ProviderError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let client = HttpOAuthClient::new(Duration::from_millis(50)).unwrap();
        let err = client
            .refresh(&provider(&server), "r")
            .await
            .expect_err("slow provider should time out");

        assert!(matches!(err, ProviderError::Timeout));
    }

    #[tokio::test]
    async fn test_revoke() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/revoke"))
            .and(body_string_contains("token=gho_token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client().revoke(&provider(&server), "gho_token").await.unwrap();
    }

    #[test]
    fn test_scope_helpers() {
        let provider = AuthProvider::new("google", "id", "https://a", "https://t")
            .with_scopes(&["email", "profile"]);

        assert_eq!(provider.split_scopes("profile email"), vec!["email", "profile"]);
        assert_eq!(provider.join_scopes(&["email".into(), "profile".into()]), "email profile");

        let requested = vec!["email".to_string(), "drive".to_string()];
        assert_eq!(provider.unsupported_scope(&requested).map(String::as_str), Some("drive"));
    }
}
