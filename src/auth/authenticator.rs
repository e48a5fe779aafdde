use crate::auth::token::{
    parse_credential, parse_tenant_tokens, Credential, TenantTokenMap, TokenStore,
};
use crate::config::TapConfig;
use crate::domain::ports::{Clock, SystemClock};
use crate::utils::error::{Result, TapError};
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::Mutex;
use url::Url;

pub const TOKEN_PATH: &str = "/v1/oauth/token";
pub const MULTI_PODCAST_TOKEN_PATH: &str = "/v1/oauth/multiplePodcastsToken";

/// Client-credentials authenticator with a lazily refreshed token cache.
///
/// Holds two independent caches: the account token used by unpartitioned
/// streams, and the per-podcast token map used by partitioned ones. Each is
/// refreshed with exactly one POST when read after expiry.
pub struct Authenticator {
    client: Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    podcast_id: Option<String>,
    default_expiration: Option<u64>,
    clock: Arc<dyn Clock>,
    store: Mutex<TokenStore>,
}

impl Authenticator {
    pub fn new(client: Client, config: &TapConfig) -> Self {
        Self {
            client,
            base_url: config.api_url().to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            podcast_id: config.podcast_id.clone(),
            default_expiration: config.auth_expiration,
            clock: Arc::new(SystemClock),
            store: Mutex::new(TokenStore::default()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Current token for the account (`None`) or for one podcast.
    pub async fn get_token(&self, tenant_id: Option<&str>) -> Result<String> {
        match tenant_id {
            None => self.account_token().await,
            Some(podcast_id) => {
                let mut store = self.store.lock().await;
                let tenants = self.valid_tenants(&mut store).await?;
                tenants.get(podcast_id).map(str::to_string).ok_or_else(|| {
                    TapError::auth(
                        format!("no token issued for podcast {}", podcast_id),
                        None,
                    )
                })
            }
        }
    }

    /// Podcast ids from the current multi-podcast token map, in response order.
    pub async fn tenant_ids(&self) -> Result<Vec<String>> {
        let mut store = self.store.lock().await;
        Ok(self.valid_tenants(&mut store).await?.tenant_ids())
    }

    /// Forget cached credentials so the next read refreshes.
    pub async fn reset(&self) {
        let mut store = self.store.lock().await;
        *store = TokenStore::default();
    }

    async fn account_token(&self) -> Result<String> {
        let mut store = self.store.lock().await;
        let now = self.clock.now();

        if let Some(credential) = store.default.as_ref().filter(|c| c.is_valid_at(now)) {
            return Ok(credential.token.clone());
        }

        let credential = self.refresh_account().await?;
        let token = credential.token.clone();
        store.default = Some(credential);
        Ok(token)
    }

    async fn valid_tenants<'a>(&self, store: &'a mut TokenStore) -> Result<&'a TenantTokenMap> {
        let now = self.clock.now();
        let expired = store
            .tenants
            .as_ref()
            .map_or(true, |tenants| !tenants.is_valid_at(now));

        if expired {
            // 整份替換，不與舊的 map 合併
            store.tenants = Some(self.refresh_tenants().await?);
        }

        store
            .tenants
            .as_ref()
            .ok_or_else(|| TapError::auth("podcast token map unavailable", None))
    }

    async fn refresh_account(&self) -> Result<Credential> {
        let mut form = vec![("grant_type", "client_credentials")];
        if let Some(podcast_id) = self.podcast_id.as_deref() {
            form.push(("podcast_id", podcast_id));
        }

        let issued_at = self.clock.now();
        let body = self.request_token(TOKEN_PATH, &form).await?;
        let credential = parse_credential(&body, issued_at, self.default_expiration)?;

        tracing::info!(
            "Obtained account token (expires: {})",
            describe_expiry(credential.expires_at)
        );
        Ok(credential)
    }

    async fn refresh_tenants(&self) -> Result<TenantTokenMap> {
        let form = [("grant_type", "client_credentials")];

        let issued_at = self.clock.now();
        let body = self.request_token(MULTI_PODCAST_TOKEN_PATH, &form).await?;
        let tenants = parse_tenant_tokens(&body, issued_at, self.default_expiration)?;

        tracing::info!(
            "Obtained tokens for {} podcast(s) (expires: {})",
            tenants.len(),
            describe_expiry(tenants.expires_at)
        );
        Ok(tenants)
    }

    /// Token endpoint with the client credentials folded into the URL authority.
    fn token_endpoint(&self, path: &str) -> Result<Url> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path)).map_err(|e| {
            TapError::ConfigError {
                message: format!("Invalid token endpoint for api_url '{}': {}", self.base_url, e),
            }
        })?;

        let embedded = url
            .set_username(&self.client_id)
            .and_then(|_| url.set_password(Some(&self.client_secret)));
        if embedded.is_err() {
            return Err(TapError::ConfigError {
                message: format!("Cannot embed client credentials in '{}'", self.base_url),
            });
        }

        Ok(url)
    }

    async fn request_token(&self, path: &str, form: &[(&str, &str)]) -> Result<String> {
        let url = self.token_endpoint(path)?;
        let endpoint = format!("{}{}", self.base_url, path);
        tracing::debug!("Requesting token from {}", endpoint);

        // reqwest 會把 URL 中的帳密轉成 basic auth，這裡不另外組 header
        let response = self
            .client
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|e| {
                TapError::auth(
                    format!("token endpoint {} unreachable: {}", endpoint, e.without_url()),
                    None,
                )
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            TapError::auth(
                format!("failed to read token response: {}", e.without_url()),
                None,
            )
        })?;

        if !status.is_success() {
            return Err(TapError::auth(
                format!("token endpoint {} returned {}", endpoint, status),
                Some(body),
            ));
        }

        Ok(body)
    }
}

fn describe_expiry(expires_at: Option<chrono::DateTime<chrono::Utc>>) -> String {
    expires_at
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| "never".to_string())
}
