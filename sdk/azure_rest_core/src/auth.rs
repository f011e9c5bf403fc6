use crate::context::Context;
use crate::error::{RestError, RestResult};
use crate::policy::{Next, Policy};
use crate::request::{Request, Response};
use crate::signing::HmacAuthenticationPolicy;
use async_trait::async_trait;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use chrono::{DateTime, TimeDelta, Utc};
use hmac::{Hmac, Mac};
use http::header::AUTHORIZATION;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Environment variable holding a base64 access key.
pub const ACCESS_KEY_ENV: &str = "AZURE_REST_ACCESS_KEY";

/// Environment variable holding a pre-acquired bearer token.
pub const ACCESS_TOKEN_ENV: &str = "AZURE_REST_ACCESS_TOKEN";

/// Tokens are refreshed this long before they expire.
pub const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(120);

/// Credential types supported by the pipeline.
#[derive(Clone)]
pub enum RestCredential {
    /// Shared access key, used to HMAC-sign each request.
    AccessKey(KeyCredential),

    /// Bearer token obtained from a [`TokenCredential`] for the given scopes.
    Token {
        credential: Arc<dyn TokenCredential>,
        scopes: Vec<String>,
    },
}

impl RestCredential {
    /// Create a credential from the environment.
    ///
    /// Checks `AZURE_REST_ACCESS_KEY` first, then `AZURE_REST_ACCESS_TOKEN`.
    pub fn from_env() -> RestResult<Self> {
        match std::env::var(ACCESS_KEY_ENV) {
            Ok(key) if !key.is_empty() => return Self::access_key(key),
            _ => {}
        }
        match std::env::var(ACCESS_TOKEN_ENV) {
            Ok(token) if !token.is_empty() => Ok(Self::token(
                EnvironmentTokenCredential::new(),
                Vec::<String>::new(),
            )),
            _ => Err(RestError::configuration(format!(
                "credential is required. Set it via builder, {ACCESS_KEY_ENV}, or {ACCESS_TOKEN_ENV}."
            ))),
        }
    }

    /// Create an access key credential. Fails if `key` is not valid base64.
    pub fn access_key(key: impl Into<String>) -> RestResult<Self> {
        Ok(Self::AccessKey(KeyCredential::new(key)?))
    }

    /// Create a token credential requesting `scopes`.
    pub fn token<S: Into<String>>(
        credential: impl TokenCredential + 'static,
        scopes: impl IntoIterator<Item = S>,
    ) -> Self {
        Self::Token {
            credential: Arc::new(credential),
            scopes: scopes.into_iter().map(Into::into).collect(),
        }
    }

    /// The authentication policy for this credential.
    pub fn policy(&self) -> Arc<dyn Policy> {
        match self {
            Self::AccessKey(key) => Arc::new(HmacAuthenticationPolicy::new(key.clone())),
            Self::Token { credential, scopes } => Arc::new(BearerTokenPolicy::new(
                credential.clone(),
                scopes.clone(),
            )),
        }
    }
}

impl Debug for RestCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AccessKey(_) => write!(f, "RestCredential::AccessKey(****)"),
            Self::Token { scopes, .. } => f
                .debug_struct("RestCredential::Token")
                .field("scopes", scopes)
                .finish_non_exhaustive(),
        }
    }
}

/// A base64 shared access key.
///
/// The key is validated when constructed, so a malformed key is reported
/// while the client is being built rather than on every call.
#[derive(Clone)]
pub struct KeyCredential {
    key: SecretString,
}

impl KeyCredential {
    pub fn new(key: impl Into<String>) -> RestResult<Self> {
        let key = key.into();
        let decoded = BASE64_STANDARD
            .decode(key.trim())
            .map_err(|_| RestError::configuration("access key is not valid base64"))?;
        if decoded.is_empty() {
            return Err(RestError::configuration("access key is empty"));
        }
        Ok(Self {
            key: SecretString::from(key.trim().to_string()),
        })
    }

    /// Base64 encoded HMAC-SHA256 of `content` keyed by the decoded key.
    pub(crate) fn sign(&self, content: &[u8]) -> RestResult<String> {
        let key = BASE64_STANDARD
            .decode(self.key.expose_secret())
            .map_err(|e| RestError::authentication_with_source("failed to decode access key", e))?;
        let mut mac = Hmac::<Sha256>::new_from_slice(&key)
            .map_err(|e| RestError::authentication_with_source("invalid HMAC key", e))?;
        mac.update(content);
        Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
    }
}

impl Debug for KeyCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyCredential(****)")
    }
}

/// An OAuth bearer token and its expiry.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: SecretString,
    pub expires_on: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_on: DateTime<Utc>) -> Self {
        Self {
            token: SecretString::from(token.into()),
            expires_on,
        }
    }

    /// Whether the token is still usable `margin` from now.
    pub fn is_fresh(&self, margin: Duration) -> bool {
        (self.expires_on - Utc::now())
            .to_std()
            .is_ok_and(|remaining| remaining > margin)
    }
}

/// Source of bearer tokens.
#[async_trait]
pub trait TokenCredential: Debug + Send + Sync {
    async fn get_token(&self, scopes: &[String]) -> RestResult<AccessToken>;
}

/// Always returns the same token.
#[derive(Debug, Clone)]
pub struct StaticTokenCredential {
    token: AccessToken,
}

impl StaticTokenCredential {
    pub fn new(token: impl Into<String>, expires_on: DateTime<Utc>) -> Self {
        Self {
            token: AccessToken::new(token, expires_on),
        }
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    async fn get_token(&self, _scopes: &[String]) -> RestResult<AccessToken> {
        Ok(self.token.clone())
    }
}

/// Reads a token from `AZURE_REST_ACCESS_TOKEN` on every refresh.
///
/// The variable carries no expiry, so tokens are treated as valid for one
/// hour after they are read.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentTokenCredential;

impl EnvironmentTokenCredential {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TokenCredential for EnvironmentTokenCredential {
    async fn get_token(&self, _scopes: &[String]) -> RestResult<AccessToken> {
        let token = std::env::var(ACCESS_TOKEN_ENV)
            .ok()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RestError::authentication(format!("{ACCESS_TOKEN_ENV} is not set")))?;
        Ok(AccessToken::new(token, Utc::now() + TimeDelta::hours(1)))
    }
}

/// Cached token guarded for single-flight refresh.
#[derive(Debug, Default)]
struct TokenCache {
    cached: RwLock<Option<AccessToken>>,
    refresh: Mutex<()>,
}

impl TokenCache {
    async fn fresh(&self) -> Option<AccessToken> {
        self.cached
            .read()
            .await
            .as_ref()
            .filter(|token| token.is_fresh(TOKEN_REFRESH_MARGIN))
            .cloned()
    }
}

/// Sets `Authorization: Bearer <token>` from a [`TokenCredential`].
///
/// The token is cached until shortly before it expires. When it needs
/// refreshing, only one caller asks the credential; concurrent callers wait
/// for that refresh and reuse its result.
#[derive(Debug, Clone)]
pub struct BearerTokenPolicy {
    credential: Arc<dyn TokenCredential>,
    scopes: Vec<String>,
    cache: Arc<TokenCache>,
}

impl BearerTokenPolicy {
    pub fn new(credential: Arc<dyn TokenCredential>, scopes: Vec<String>) -> Self {
        Self {
            credential,
            scopes,
            cache: Arc::new(TokenCache::default()),
        }
    }

    /// Current token, refreshing it if needed.
    pub async fn token(&self) -> RestResult<AccessToken> {
        if let Some(token) = self.cache.fresh().await {
            return Ok(token);
        }

        let _refresh = self.cache.refresh.lock().await;
        // Another caller may have refreshed while we waited.
        if let Some(token) = self.cache.fresh().await {
            return Ok(token);
        }

        tracing::debug!(scopes = ?self.scopes, "refreshing access token");
        let token = self
            .credential
            .get_token(&self.scopes)
            .await
            .map_err(|err| match err {
                RestError::Authentication { .. } | RestError::Cancelled(_) => err,
                other => RestError::authentication_with_source("failed to acquire token", other),
            })?;
        tracing::debug!(expires_on = %token.expires_on, "access token refreshed");

        *self.cache.cached.write().await = Some(token.clone());
        Ok(token)
    }
}

#[async_trait]
impl Policy for BearerTokenPolicy {
    async fn send(
        &self,
        ctx: &Context,
        request: &mut Request,
        next: Next<'_>,
    ) -> RestResult<Response> {
        if request.url().scheme() != "https" && !is_loopback(request.url()) {
            return Err(RestError::authentication(
                "bearer token authentication requires an https endpoint",
            ));
        }

        let token = ctx.run(self.token()).await?;
        request.insert_sensitive_header(
            AUTHORIZATION,
            &format!("Bearer {}", token.token.expose_secret()),
        )?;
        next.run(ctx, request).await
    }
}

fn is_loopback(url: &url::Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}
