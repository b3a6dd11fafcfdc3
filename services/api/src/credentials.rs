//! Upstream credentials: a static API key or a refreshed bearer token.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::{
    process::Command,
    sync::{Mutex, RwLock},
    task::JoinHandle,
};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::{debug, info, warn};

/// Token audience for Azure AI services.
const COGNITIVE_SERVICES_RESOURCE: &str = "https://cognitiveservices.azure.com";

/// Tokens this close to expiry are refreshed before use.
const EXPIRY_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Lifetime assumed when the provider does not report one.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(50 * 60);

/// A bearer token and the moment it stops being valid.
#[derive(Clone)]
pub struct AccessToken {
    token: String,
    pub expires_at: SystemTime,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_at: SystemTime) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    fn expires_within(&self, margin: Duration) -> bool {
        SystemTime::now() + margin >= self.expires_at
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Something that can mint bearer tokens for the upstream service.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn fetch_token(&self) -> Result<AccessToken>;
}

/// Mints tokens through the Azure CLI's cached login.
#[derive(Debug, Default)]
pub struct AzureCliTokenProvider {
    tenant_id: Option<String>,
}

impl AzureCliTokenProvider {
    pub fn new(tenant_id: Option<String>) -> Self {
        Self { tenant_id }
    }
}

#[derive(Deserialize)]
struct CliToken {
    #[serde(rename = "accessToken")]
    access_token: String,
    /// Unix seconds; only reported by newer CLI versions.
    expires_on: Option<u64>,
}

fn parse_cli_token(stdout: &[u8]) -> Result<AccessToken> {
    let parsed: CliToken =
        serde_json::from_slice(stdout).context("Azure CLI returned an unexpected token payload")?;
    let expires_at = match parsed.expires_on {
        Some(secs) => UNIX_EPOCH + Duration::from_secs(secs),
        None => SystemTime::now() + DEFAULT_TOKEN_LIFETIME,
    };
    Ok(AccessToken::new(parsed.access_token, expires_at))
}

#[async_trait]
impl TokenProvider for AzureCliTokenProvider {
    async fn fetch_token(&self) -> Result<AccessToken> {
        let mut command = Command::new("az");
        command.args([
            "account",
            "get-access-token",
            "--output",
            "json",
            "--resource",
            COGNITIVE_SERVICES_RESOURCE,
        ]);
        if let Some(tenant) = &self.tenant_id {
            command.args(["--tenant", tenant.as_str()]);
        }

        let output = command
            .output()
            .await
            .context("Failed to run the Azure CLI")?;
        if !output.status.success() {
            bail!(
                "Azure CLI token request failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        parse_cli_token(&output.stdout)
    }
}

/// Caches a bearer token, refreshing it on demand and on a timer.
pub struct BearerTokenCache {
    provider: Arc<dyn TokenProvider>,
    current: RwLock<AccessToken>,
    /// Held while a refresh is in flight so concurrent callers share it.
    refreshing: Mutex<()>,
}

impl BearerTokenCache {
    /// Fetches the first token so one is ready before any session starts.
    pub async fn warm_up(provider: Arc<dyn TokenProvider>) -> Result<Arc<Self>> {
        let token = provider
            .fetch_token()
            .await
            .context("Failed to obtain the initial bearer token")?;
        info!(expires_at = ?token.expires_at, "Bearer token acquired");
        Ok(Arc::new(Self {
            provider,
            current: RwLock::new(token),
            refreshing: Mutex::new(()),
        }))
    }

    /// The cached token, refreshed first if it is about to expire.
    pub async fn token(&self) -> Result<String> {
        if let Some(token) = self.usable_token().await {
            return Ok(token);
        }
        let _guard = self.refreshing.lock().await;
        // Another caller may have refreshed while this one waited.
        if let Some(token) = self.usable_token().await {
            return Ok(token);
        }
        self.fetch_and_store().await
    }

    pub async fn refresh(&self) -> Result<String> {
        let _guard = self.refreshing.lock().await;
        self.fetch_and_store().await
    }

    async fn usable_token(&self) -> Option<String> {
        let current = self.current.read().await;
        (!current.expires_within(EXPIRY_MARGIN)).then(|| current.token.clone())
    }

    async fn fetch_and_store(&self) -> Result<String> {
        let fresh = self.provider.fetch_token().await?;
        debug!(expires_at = ?fresh.expires_at, "Bearer token refreshed");
        let token = fresh.token.clone();
        *self.current.write().await = fresh;
        Ok(token)
    }

    /// Refreshes the token every `period` until the handle is aborted. A
    /// failed refresh keeps the previous token.
    pub fn spawn_refresh(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately and the token is fresh.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = cache.refresh().await {
                    warn!(error = ?e, "Bearer token refresh failed, keeping the previous token");
                }
            }
        })
    }
}

/// How the relay authenticates its upstream connection.
pub enum UpstreamAuth {
    ApiKey(SecretString),
    Bearer(Arc<BearerTokenCache>),
}

impl fmt::Debug for UpstreamAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("UpstreamAuth::ApiKey"),
            Self::Bearer(_) => f.write_str("UpstreamAuth::Bearer"),
        }
    }
}

impl UpstreamAuth {
    /// The header carrying the credential for one connection attempt.
    pub async fn header(&self) -> Result<(&'static str, HeaderValue)> {
        let (name, raw) = match self {
            Self::ApiKey(key) => ("api-key", key.expose_secret().to_string()),
            Self::Bearer(cache) => ("authorization", format!("Bearer {}", cache.token().await?)),
        };
        let mut value = HeaderValue::from_str(&raw)
            .with_context(|| format!("Credential is not a valid '{name}' header value"))?;
        value.set_sensitive(true);
        Ok((name, value))
    }
}
