use super::pending::PendingStore;
use super::pkce::{generate_pkce, generate_state};
use super::provider::{AuthProvider, OAuthClient, TokenGrant};
use crate::config::AuthSettings;
use crate::error::AuthError;
use crate::storage::ConnectionStore;
use crate::sync::KeyedLocks;
use crate::types::{
    normalize_scopes, AccessToken, ConnectionId, ConnectionKey, ConnectionState,
    PendingAuthorization, ProviderId, UserConnection, UserId,
};
use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

/// Result of starting an authorization flow
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationStart {
    pub url: String,
    pub state: String,
    pub provider_id: ProviderId,
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

struct RegisteredProvider {
    config: AuthProvider,
    authorize_url: Url,
}

/// What `get_valid_token` has to do for a stored connection
enum Resolution {
    Ready(AccessToken),
    Refresh { refresh_token: String },
    MarkExpired,
    Fail(AuthError),
}

/// Credential broker for per-user provider connections.
///
/// Connections are persisted in the [`ConnectionStore`]; pending flows live
/// in memory. Every write to a connection happens under the per-key lock, so
/// a refresh never races a completion or a revoke for the same user and
/// provider.
pub struct AuthManager {
    providers: HashMap<ProviderId, RegisteredProvider>,
    client: Arc<dyn OAuthClient>,
    store: Arc<dyn ConnectionStore>,
    pending: PendingStore,
    locks: KeyedLocks<ConnectionKey>,
    settings: AuthSettings,
}

impl AuthManager {
    pub fn new(
        providers: Vec<AuthProvider>,
        client: Arc<dyn OAuthClient>,
        store: Arc<dyn ConnectionStore>,
        settings: AuthSettings,
    ) -> anyhow::Result<Self> {
        Url::parse(&settings.redirect_uri).context("Invalid auth redirect_uri")?;
        settings.validate()?;

        let mut registered = HashMap::new();
        for config in providers {
            let authorize_url = Url::parse(&config.authorize_url)
                .with_context(|| format!("Invalid authorize_url for provider {}", config.id))?;
            let id = config.id.clone();
            if registered
                .insert(id.clone(), RegisteredProvider { config, authorize_url })
                .is_some()
            {
                anyhow::bail!("Auth provider {} is configured twice", id);
            }
            tracing::info!("Configured auth provider {}", id);
        }

        Ok(Self {
            providers: registered,
            client,
            store,
            pending: PendingStore::new(),
            locks: KeyedLocks::new(),
            settings,
        })
    }

    pub fn provider(&self, provider_id: &ProviderId) -> Option<&AuthProvider> {
        self.providers.get(provider_id).map(|p| &p.config)
    }

    pub fn provider_ids(&self) -> Vec<ProviderId> {
        let mut ids: Vec<ProviderId> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn registered(&self, provider_id: &ProviderId) -> Result<&RegisteredProvider, AuthError> {
        self.providers
            .get(provider_id)
            .ok_or_else(|| AuthError::UnknownProvider(provider_id.clone()))
    }

    /// Begin an authorization flow and return the URL the user must visit.
    pub fn start_authorization(
        &self,
        user_id: &UserId,
        provider_id: &ProviderId,
        scopes: &[String],
    ) -> Result<AuthorizationStart, AuthError> {
        let provider = self.registered(provider_id)?;
        let scopes = normalize_scopes(scopes);
        if let Some(scope) = provider.config.unsupported_scope(&scopes) {
            return Err(AuthError::UnsupportedScope {
                provider_id: provider_id.clone(),
                scope: scope.clone(),
            });
        }

        let now = Utc::now();
        if let Some(existing) = self.pending.find_reusable(user_id, provider_id, &scopes, now) {
            tracing::debug!(
                "Reusing pending authorization for {}/{}",
                user_id,
                provider_id
            );
            return Ok(AuthorizationStart {
                url: existing.authorization_url,
                state: existing.state,
                provider_id: existing.provider_id,
                scopes: existing.scopes,
                expires_at: existing.expires_at,
            });
        }

        let state = generate_state();
        let pkce = provider.config.pkce.then(generate_pkce);

        let mut url = provider.authorize_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &provider.config.client_id)
                .append_pair("redirect_uri", &self.settings.redirect_uri)
                .append_pair("state", &state);
            if !scopes.is_empty() {
                query.append_pair("scope", &provider.config.join_scopes(&scopes));
            }
            if let Some(pkce) = &pkce {
                query
                    .append_pair("code_challenge", &pkce.challenge)
                    .append_pair("code_challenge_method", "S256");
            }
            for (key, value) in &provider.config.authorize_params {
                query.append_pair(key, value);
            }
        }

        let expires_at = now + self.settings.pending_ttl();
        let record = PendingAuthorization {
            state: state.clone(),
            user_id: user_id.clone(),
            provider_id: provider_id.clone(),
            scopes: scopes.clone(),
            redirect_uri: self.settings.redirect_uri.clone(),
            code_verifier: pkce.map(|p| p.verifier),
            authorization_url: url.to_string(),
            created_at: now,
            expires_at,
        };
        self.pending.insert(record);

        tracing::info!("Started authorization for {}/{}", user_id, provider_id);

        Ok(AuthorizationStart {
            url: url.into(),
            state,
            provider_id: provider_id.clone(),
            scopes,
            expires_at,
        })
    }

    /// Finish a flow from the provider callback. The state is consumed before
    /// the code exchange, so it can never be used twice.
    pub async fn complete_authorization(
        &self,
        state: &str,
        code: &str,
    ) -> Result<UserConnection, AuthError> {
        let record = self
            .pending
            .take(state, Utc::now())
            .ok_or(AuthError::InvalidState)?;
        let provider = &self.registered(&record.provider_id)?.config;

        let grant = self
            .client
            .exchange_code(
                provider,
                code,
                &record.redirect_uri,
                record.code_verifier.as_deref(),
            )
            .await
            .map_err(|source| AuthError::Exchange {
                provider_id: record.provider_id.clone(),
                source,
            })?;

        let key = ConnectionKey::new(record.user_id.clone(), record.provider_id.clone());
        let _guard = self.locks.lock(&key).await;

        let now = Utc::now();
        let previous = self.store.get(&key)?;
        let connection = UserConnection {
            id: previous.as_ref().map(|c| c.id).unwrap_or_default(),
            user_id: record.user_id,
            provider_id: record.provider_id,
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_at: expiry(now, grant.expires_in),
            scopes: grant.scopes.unwrap_or(record.scopes),
            state: ConnectionState::Active,
            created_at: previous.map(|c| c.created_at).unwrap_or(now),
            updated_at: now,
        };
        self.store.put(&connection)?;

        tracing::info!(
            "Authorization completed for {} (scopes: {})",
            key,
            connection.scopes.join(" ")
        );

        Ok(connection)
    }

    /// Discard a pending flow the provider reported as denied or failed.
    pub fn cancel_authorization(&self, state: &str) -> Option<PendingAuthorization> {
        let record = self.pending.take(state, Utc::now())?;
        tracing::info!(
            "Authorization for {}/{} was cancelled",
            record.user_id,
            record.provider_id
        );
        Some(record)
    }

    /// Return a usable token for `user` at `provider` covering `scopes`,
    /// refreshing it first when it has expired.
    pub async fn get_valid_token(
        &self,
        user_id: &UserId,
        provider_id: &ProviderId,
        scopes: &[String],
    ) -> Result<AccessToken, AuthError> {
        let provider = &self.registered(provider_id)?.config;
        let scopes = normalize_scopes(scopes);
        let key = ConnectionKey::new(user_id.clone(), provider_id.clone());

        let stored = self.store.get(&key)?;
        match self.classify(provider, stored.as_ref(), &scopes) {
            Resolution::Ready(token) => return Ok(token),
            Resolution::Fail(err) => return Err(err),
            Resolution::Refresh { .. } | Resolution::MarkExpired => {}
        }

        // Single flight: whoever gets the lock first refreshes, everyone
        // after that re-reads and finds the fresh token.
        let _guard = self.locks.lock(&key).await;
        let stored = self.store.get(&key)?;

        match (self.classify(provider, stored.as_ref(), &scopes), stored) {
            (Resolution::Ready(token), _) => Ok(token),
            (Resolution::Fail(err), _) => Err(err),
            (Resolution::MarkExpired, Some(mut connection)) => {
                tracing::info!("Connection {} expired without a refresh token", key);
                connection.state = ConnectionState::Expired;
                connection.updated_at = Utc::now();
                self.store.put(&connection)?;
                Err(reauthorization(provider, &connection, &scopes))
            }
            (Resolution::Refresh { refresh_token }, Some(connection)) => {
                self.refresh(provider, connection, &refresh_token, &scopes)
                    .await
            }
            (_, None) => Err(AuthError::AuthorizationRequired {
                provider_id: provider_id.clone(),
                scopes,
            }),
        }
    }

    fn classify(
        &self,
        provider: &AuthProvider,
        stored: Option<&UserConnection>,
        scopes: &[String],
    ) -> Resolution {
        let Some(connection) = stored else {
            return Resolution::Fail(AuthError::AuthorizationRequired {
                provider_id: provider.id.clone(),
                scopes: scopes.to_vec(),
            });
        };

        if connection.state == ConnectionState::Revoked {
            return Resolution::Fail(reauthorization(provider, connection, scopes));
        }

        if !connection.covers(scopes) {
            return Resolution::Fail(AuthError::AuthorizationRequired {
                provider_id: provider.id.clone(),
                scopes: union(provider, &connection.scopes, scopes),
            });
        }

        let margin = self.settings.refresh_margin();
        let expired = connection.state == ConnectionState::Expired
            || connection.is_expired_at(Utc::now(), margin);
        if !expired {
            return Resolution::Ready(AccessToken::new(connection.access_token.clone()));
        }

        match &connection.refresh_token {
            Some(refresh_token) => Resolution::Refresh {
                refresh_token: refresh_token.clone(),
            },
            None if connection.state == ConnectionState::Expired => {
                Resolution::Fail(reauthorization(provider, connection, scopes))
            }
            None => Resolution::MarkExpired,
        }
    }

    async fn refresh(
        &self,
        provider: &AuthProvider,
        mut connection: UserConnection,
        refresh_token: &str,
        scopes: &[String],
    ) -> Result<AccessToken, AuthError> {
        let key = connection.key();
        match self.client.refresh(provider, refresh_token).await {
            Ok(grant) => {
                apply_grant(&mut connection, grant, Utc::now());
                self.store.put(&connection)?;
                tracing::info!("Refreshed token for {}", key);
                Ok(AccessToken::new(connection.access_token))
            }
            Err(err) => {
                tracing::warn!("Token refresh for {} failed: {}", key, err);
                connection.state = ConnectionState::Revoked;
                connection.updated_at = Utc::now();
                self.store.put(&connection)?;
                Err(reauthorization(provider, &connection, scopes))
            }
        }
    }

    /// Drop the connection. The provider-side revoke is best effort; the
    /// local connection is removed regardless.
    pub async fn revoke(&self, user_id: &UserId, provider_id: &ProviderId) -> Result<bool, AuthError> {
        let key = ConnectionKey::new(user_id.clone(), provider_id.clone());
        let _guard = self.locks.lock(&key).await;

        let Some(connection) = self.store.get(&key)? else {
            return Ok(false);
        };

        if let Some(provider) = self.provider(provider_id) {
            if let Err(err) = self.client.revoke(provider, &connection.access_token).await {
                tracing::warn!("Provider revoke for {} failed: {}", key, err);
            }
        }

        let removed = self.store.delete(&key)?;
        tracing::info!("Revoked connection {}", key);
        Ok(removed)
    }

    /// Current lifecycle state, or `None` when there is nothing on record
    pub fn connection_status(
        &self,
        user_id: &UserId,
        provider_id: &ProviderId,
    ) -> Result<Option<ConnectionState>, AuthError> {
        let key = ConnectionKey::new(user_id.clone(), provider_id.clone());
        let now = Utc::now();

        match self.store.get(&key)? {
            Some(connection) => {
                let margin = self.settings.refresh_margin();
                let state = match connection.state {
                    ConnectionState::Active if connection.is_expired_at(now, margin) => {
                        ConnectionState::Expired
                    }
                    state => state,
                };
                Ok(Some(state))
            }
            None if self.pending.has_live(user_id, provider_id, now) => {
                Ok(Some(ConnectionState::Pending))
            }
            None => Ok(None),
        }
    }

    /// Every stored connection of `user_id`, ordered by provider. Active
    /// connections past their expiry are reported as expired.
    pub fn list_connections(&self, user_id: &UserId) -> Result<Vec<UserConnection>, AuthError> {
        let now = Utc::now();
        let margin = self.settings.refresh_margin();
        let mut connections = self.store.list_for_user(user_id)?;
        for connection in &mut connections {
            if connection.state == ConnectionState::Active && connection.is_expired_at(now, margin) {
                connection.state = ConnectionState::Expired;
            }
        }
        connections.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        Ok(connections)
    }

    pub fn prune_expired_pending(&self) -> usize {
        let removed = self.pending.prune(Utc::now());
        if removed > 0 {
            tracing::debug!("Pruned {} expired pending authorizations", removed);
        }
        removed
    }
}

/// Out-of-range `expires_in` values are treated as "no expiry reported".
fn expiry(now: DateTime<Utc>, expires_in: Option<i64>) -> Option<DateTime<Utc>> {
    expires_in
        .and_then(Duration::try_seconds)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
}

fn apply_grant(connection: &mut UserConnection, grant: TokenGrant, now: DateTime<Utc>) {
    connection.access_token = grant.access_token;
    // Providers that do not rotate refresh tokens omit them on refresh
    if let Some(refresh_token) = grant.refresh_token {
        connection.refresh_token = Some(refresh_token);
    }
    connection.expires_at = expiry(now, grant.expires_in);
    if let Some(scopes) = grant.scopes {
        connection.scopes = scopes;
    }
    connection.state = ConnectionState::Active;
    connection.updated_at = now;
}

/// Scopes for a fresh flow: what the user already granted plus what is now
/// requested. Granted scopes the provider config does not list (e.g. an
/// implicit `openid`) are left out, since the authorize request would reject
/// them.
fn union(provider: &AuthProvider, granted: &[String], requested: &[String]) -> Vec<String> {
    let granted = granted
        .iter()
        .filter(|scope| provider.scopes.is_empty() || provider.scopes.contains(scope));
    let mut all: Vec<&String> = granted.chain(requested).collect();
    all.sort();
    all.dedup();
    all.into_iter().cloned().collect()
}

fn reauthorization(
    provider: &AuthProvider,
    connection: &UserConnection,
    requested: &[String],
) -> AuthError {
    AuthError::ReauthorizationRequired {
        provider_id: provider.id.clone(),
        scopes: union(provider, &connection.scopes, requested),
    }
}
