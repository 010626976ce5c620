// GitHub toolkit. Every tool here acts as the calling user through the
// `github` OAuth connection.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use toolgate_core::catalog::{ParamSpec, ToolContext, ToolDefinition, ToolHandler, Toolkit, ValueType};
use toolgate_core::ToolFailure;
use url::Url;

pub const GITHUB_API: &str = "https://api.github.com";
pub const PROVIDER: &str = "github";

/// Wait suggested to the caller when GitHub rate limits without `Retry-After`
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Handler behind `GitHub.StarRepository`
pub struct StarRepository {
    client: reqwest::Client,
    api_base: Url,
}

impl StarRepository {
    pub fn new(api_base: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("toolgate-mcp/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(15))
            .build()?;
        let api_base = Url::parse(api_base)?;
        if api_base.cannot_be_a_base() {
            anyhow::bail!("GitHub API base {} cannot carry a path", api_base);
        }

        Ok(Self { client, api_base })
    }

    fn starred_url(&self, owner: &str, name: &str) -> Result<Url, ToolFailure> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| ToolFailure::new("GitHub API base is not usable"))?
            .pop_if_empty()
            .extend(["user", "starred", owner, name]);
        Ok(url)
    }
}

/// GitHub owner and repository names: ASCII letters, digits, `.`, `-`, `_`
fn check_repo_part(field: &str, value: &str) -> Result<(), ToolFailure> {
    let valid = !value.is_empty()
        && value != "."
        && value != ".."
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if valid {
        Ok(())
    } else {
        Err(ToolFailure::new(format!("`{}` is not a valid GitHub {}", value, field))
            .with_prompt_content("Owner and repository names may only contain letters, digits, '.', '-' and '_'."))
    }
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Duration {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

fn rate_limit_exhausted(headers: &reqwest::header::HeaderMap) -> bool {
    headers
        .get("x-ratelimit-remaining")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim() == "0")
}

#[derive(Debug, Deserialize)]
struct StarArgs {
    owner: String,
    name: String,
    #[serde(default = "default_starred")]
    starred: bool,
}

fn default_starred() -> bool {
    true
}

#[async_trait]
impl ToolHandler for StarRepository {
    async fn call(&self, input: Value, ctx: ToolContext) -> Result<Value, ToolFailure> {
        let args: StarArgs = serde_json::from_value(input)
            .map_err(|e| ToolFailure::new("invalid arguments").with_developer_message(e.to_string()))?;
        check_repo_part("owner", &args.owner)?;
        check_repo_part("repository name", &args.name)?;
        let token = ctx.require_token()?;

        let url = self.starred_url(&args.owner, &args.name)?;
        let request = if args.starred {
            self.client.put(url)
        } else {
            self.client.delete(url)
        };

        let response = request
            .bearer_auth(token.secret())
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .body("")
            .send()
            .await
            .map_err(|e| {
                ToolFailure::new("Could not reach GitHub")
                    .with_developer_message(e.to_string())
                    .retryable()
            })?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            let detail = format!("GitHub API returned {}: {}", status, body);
            let code = status.as_u16();
            let failure = match status {
                StatusCode::TOO_MANY_REQUESTS => {
                    ToolFailure::rate_limited("GitHub rate limit reached", retry_after(&headers))
                }
                StatusCode::FORBIDDEN if rate_limit_exhausted(&headers) => {
                    ToolFailure::upstream("GitHub rate limit reached", code)
                        .retryable()
                        .with_retry_after(retry_after(&headers))
                }
                StatusCode::NOT_FOUND => ToolFailure::upstream(
                    format!("Repository {}/{} was not found", args.owner, args.name),
                    code,
                ),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    ToolFailure::upstream("GitHub rejected the request for this account", code)
                }
                s if s.is_server_error() => ToolFailure::upstream("GitHub is unavailable", code),
                _ => ToolFailure::upstream("GitHub request failed", code),
            };
            return Err(failure.with_developer_message(detail));
        }

        Ok(json!({
            "owner": args.owner,
            "name": args.name,
            "starred": args.starred,
        }))
    }
}

pub fn toolkit(api_base: &str) -> anyhow::Result<Toolkit> {
    Ok(Toolkit::new("GitHub", "Act on GitHub as the connected user").tool(
        ToolDefinition::new(
            "StarRepository",
            "Star or unstar a GitHub repository for the user",
            StarRepository::new(api_base)?,
        )
        .param(ParamSpec::required("owner", ValueType::String).describe("Repository owner"))
        .param(ParamSpec::required("name", ValueType::String).describe("Repository name"))
        .param(
            ParamSpec::optional("starred", ValueType::Boolean)
                .describe("true to star, false to unstar (default: true)"),
        )
        .requires_auth(PROVIDER, &["public_repo"]),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolgate_core::{AccessToken, RequestId, UserId};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ctx(token: Option<&str>) -> ToolContext {
        ToolContext {
            request_id: RequestId::generate(),
            user_id: UserId::new("alice"),
            token: token.map(AccessToken::new),
        }
    }

    #[tokio::test]
    async fn test_star_repository() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/user/starred/rust-lang/rust"))
            .and(header("authorization", "Bearer gho_alice"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let tool = StarRepository::new(&server.uri()).unwrap();
        let output = tool
            .call(json!({ "owner": "rust-lang", "name": "rust" }), ctx(Some("gho_alice")))
            .await
            .unwrap();

        assert_eq!(output["starred"], true);
    }

    #[tokio::test]
    async fn test_unstar_repository() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/user/starred/tokio-rs/tokio"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let tool = StarRepository::new(&server.uri()).unwrap();
        let output = tool
            .call(
                json!({ "owner": "tokio-rs", "name": "tokio", "starred": false }),
                ctx(Some("gho_alice")),
            )
            .await
            .unwrap();

        assert_eq!(output["starred"], false);
    }

    #[tokio::test]
    async fn test_missing_repository() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(404).set_body_string(r#"{"message":"Not Found"}"#))
            .mount(&server)
            .await;

        let tool = StarRepository::new(&server.uri()).unwrap();
        let err = tool
            .call(json!({ "owner": "nobody", "name": "nothing" }), ctx(Some("gho_alice")))
            .await
            .unwrap_err();

        assert_eq!(err.message, "Repository nobody/nothing was not found");
        assert_eq!(err.upstream_status, Some(404));
        assert!(!err.can_retry);
        assert!(err.developer_message.unwrap().contains("404"));
    }

    #[tokio::test]
    async fn test_path_like_names_are_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        let tool = StarRepository::new(&server.uri()).unwrap();
        for (owner, name) in [
            ("..", "following/attacker"),
            ("rust-lang", "rust/../../following"),
            ("rust-lang", "rust?x=1"),
            ("", "rust"),
        ] {
            let err = tool
                .call(json!({ "owner": owner, "name": name }), ctx(Some("gho_alice")))
                .await
                .unwrap_err();
            assert!(err.message.contains("not a valid GitHub"), "{}/{}", owner, name);
            assert!(err.additional_prompt_content.is_some());
        }
    }

    #[test]
    fn test_starred_url_keeps_base_path() {
        let tool = StarRepository::new("https://ghe.example.com/api/v3/").unwrap();
        let url = tool.starred_url("octo-org", "hello.world").unwrap();
        assert_eq!(url.as_str(), "https://ghe.example.com/api/v3/user/starred/octo-org/hello.world");
    }

    #[tokio::test]
    async fn test_rate_limit_is_retryable_with_wait() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "42"))
            .mount(&server)
            .await;

        let tool = StarRepository::new(&server.uri()).unwrap();
        let err = tool
            .call(json!({ "owner": "rust-lang", "name": "rust" }), ctx(Some("gho_alice")))
            .await
            .unwrap_err();

        assert!(err.can_retry);
        assert_eq!(err.retry_after, Some(Duration::from_secs(42)));
        assert_eq!(err.upstream_status, Some(429));
    }

    #[tokio::test]
    async fn test_exhausted_quota_is_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(403).insert_header("x-ratelimit-remaining", "0"))
            .mount(&server)
            .await;

        let tool = StarRepository::new(&server.uri()).unwrap();
        let err = tool
            .call(json!({ "owner": "rust-lang", "name": "rust" }), ctx(Some("gho_alice")))
            .await
            .unwrap_err();

        assert!(err.can_retry);
        assert_eq!(err.upstream_status, Some(403));
        assert_eq!(err.retry_after, Some(DEFAULT_RETRY_AFTER));
    }

    #[tokio::test]
    async fn test_requires_token() {
        let tool = StarRepository::new("http://127.0.0.1:9").unwrap();
        let err = tool
            .call(json!({ "owner": "a", "name": "b" }), ctx(None))
            .await
            .unwrap_err();

        assert!(err.message.contains("authorization token"));
    }

    #[test]
    fn test_toolkit_declares_auth() {
        let toolkit = toolkit(GITHUB_API).unwrap();
        let auth = toolkit.tools[0].auth().unwrap();

        assert_eq!(auth.provider_id.0, "github");
        assert_eq!(auth.scopes, vec!["public_repo".to_string()]);
    }
}
