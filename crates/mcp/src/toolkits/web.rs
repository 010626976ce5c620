// Web toolkit: fetch pages from an allowlist of domains

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use toolgate_core::catalog::{ParamSpec, ToolContext, ToolDefinition, ToolHandler, Toolkit, ValueType};
use toolgate_core::ToolFailure;
use url::Url;

const MAX_BODY_BYTES: usize = 100_000;
const MAX_REDIRECTS: usize = 10;

pub fn default_allowed_domains() -> Vec<String> {
    [
        // Documentation sites
        "docs.rs",
        "doc.rust-lang.org",
        "developer.mozilla.org",
        // Code hosting
        "github.com",
        "raw.githubusercontent.com",
        "gist.github.com",
        // Package registries
        "crates.io",
        "npmjs.com",
        "pypi.org",
        "wikipedia.org",
    ]
    .iter()
    .map(|d| d.to_string())
    .collect()
}

/// Handler behind `Web.Fetch`
pub struct WebFetch {
    client: reqwest::Client,
    allowed_domains: Vec<String>,
}

impl WebFetch {
    pub fn new(allowed_domains: Vec<String>) -> anyhow::Result<Self> {
        // Every hop is held to the same allowlist as the first request
        let hop_domains = allowed_domains.clone();
        let redirects = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                attempt.error(format!("more than {} redirects", MAX_REDIRECTS))
            } else if !domain_allowed(&hop_domains, attempt.url()) {
                let host = attempt.url().host_str().unwrap_or("unknown").to_string();
                attempt.error(format!("redirect to disallowed domain {}", host))
            } else {
                attempt.follow()
            }
        });

        let client = reqwest::Client::builder()
            .user_agent(concat!("toolgate-mcp/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .redirect(redirects)
            .build()?;

        Ok(Self {
            client,
            allowed_domains,
        })
    }

    fn is_domain_allowed(&self, url: &Url) -> bool {
        domain_allowed(&self.allowed_domains, url)
    }
}

fn domain_allowed(allowed_domains: &[String], url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    allowed_domains
        .iter()
        .any(|allowed| host == allowed || host.ends_with(&format!(".{}", allowed)))
}

/// Read at most `limit` bytes of the body. Returns the bytes and whether more
/// were available.
async fn read_capped(mut response: reqwest::Response, limit: usize) -> reqwest::Result<(Vec<u8>, bool)> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let room = limit - body.len();
        if chunk.len() > room {
            body.extend_from_slice(&chunk[..room]);
            return Ok((body, true));
        }
        body.extend_from_slice(&chunk);
    }
    Ok((body, false))
}

#[derive(Debug, Deserialize)]
struct FetchArgs {
    url: String,
    #[serde(default)]
    include_headers: bool,
}

#[async_trait]
impl ToolHandler for WebFetch {
    async fn call(&self, input: Value, _ctx: ToolContext) -> Result<Value, ToolFailure> {
        let args: FetchArgs = serde_json::from_value(input)
            .map_err(|e| ToolFailure::new("invalid arguments").with_developer_message(e.to_string()))?;

        let url = Url::parse(&args.url)
            .map_err(|e| ToolFailure::new(format!("Invalid URL: {}", e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ToolFailure::new(format!(
                "Only HTTP/HTTPS URLs are supported, got: {}",
                url.scheme()
            )));
        }

        if !self.is_domain_allowed(&url) {
            return Err(ToolFailure::new(format!(
                "Domain not allowed: {}",
                url.host_str().unwrap_or("unknown")
            ))
            .with_developer_message(format!("allowed domains: {}", self.allowed_domains.join(", "))));
        }

        let response = self.client.get(url.as_str()).send().await.map_err(|e| {
            if e.is_redirect() {
                ToolFailure::new("Redirect target is not allowed").with_developer_message(e.to_string())
            } else {
                ToolFailure::new("HTTP request failed")
                    .with_developer_message(e.to_string())
                    .retryable()
            }
        })?;

        let status = response.status();
        let headers: serde_json::Map<String, Value> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    Value::String(value.to_str().unwrap_or("<non-utf8>").to_string()),
                )
            })
            .collect();

        let (mut bytes, truncated) = read_capped(response, MAX_BODY_BYTES).await.map_err(|e| {
            ToolFailure::new("Failed to read response body").with_developer_message(e.to_string())
        })?;
        if truncated {
            // Drop a multi-byte character split by the cap
            if let Err(e) = std::str::from_utf8(&bytes) {
                if e.error_len().is_none() {
                    bytes.truncate(e.valid_up_to());
                }
            }
        }
        let body = String::from_utf8_lossy(&bytes).into_owned();

        let mut output = json!({
            "url": url.as_str(),
            "status": status.as_u16(),
            "body": body,
            "truncated": truncated,
        });
        if args.include_headers {
            output["headers"] = Value::Object(headers);
        }
        Ok(output)
    }
}

pub fn toolkit(allowed_domains: Vec<String>) -> anyhow::Result<Toolkit> {
    let fetch = WebFetch::new(allowed_domains)?;
    let description = format!(
        "Fetch content from a web URL. Only allowed domains: {}",
        fetch.allowed_domains.join(", ")
    );

    Ok(Toolkit::new("Web", "Read-only web access").tool(
        ToolDefinition::new("Fetch", description, fetch)
            .param(ParamSpec::required("url", ValueType::String).describe("The URL to fetch"))
            .param(
                ParamSpec::optional("include_headers", ValueType::Boolean)
                    .describe("Include HTTP response headers in output (default: false)"),
            ),
    ))
}
