//! Per-user OAuth authorization: provider configuration, flow lifecycle and
//! single-flight token refresh.

mod manager;
mod pending;
pub mod pkce;
mod provider;

pub use manager::{AuthManager, AuthorizationStart};
pub use provider::{AuthProvider, HttpOAuthClient, OAuthClient, TokenGrant};
