#[cfg(feature = "cli")]
pub mod cli;

use crate::core::watermark::parse_instant;
use crate::utils::error::{Result, TapError};
use crate::utils::validation::{
    validate_non_empty_string, validate_positive_number, validate_range, validate_url, Validate,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

pub const DEFAULT_API_URL: &str = "https://api.podbean.com";
pub const MIN_AUTH_EXPIRATION: u64 = 60;
pub const MAX_AUTH_EXPIRATION: u64 = 604_800;

#[derive(Clone, Serialize, Deserialize)]
pub struct TapConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Earliest instant (UTC) to sync; also the CSV report watermark.
    pub start_date: String,
    #[serde(default)]
    pub auth_expiration: Option<u64>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
    /// Podcast the single-tenant token is issued for; the account default when unset.
    #[serde(default)]
    pub podcast_id: Option<String>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl fmt::Debug for TapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TapConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("start_date", &self.start_date)
            .field("auth_expiration", &self.auth_expiration)
            .field("limit", &self.limit)
            .field("user_agent", &self.user_agent)
            .field("api_url", &self.api_url)
            .field("podcast_id", &self.podcast_id)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

impl TapConfig {
    /// 從檔案載入配置（.json 走 JSON，其餘視為 TOML）
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| TapError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        serde_json::from_str(&processed_content).map_err(|e| TapError::ConfigError {
            message: format!("JSON parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${PODBEAN_CLIENT_SECRET})，未設定的保持原樣
    fn substitute_env_vars(content: &str) -> String {
        use regex::{Captures, Regex};
        use std::sync::OnceLock;

        static ENV_VAR: OnceLock<Regex> = OnceLock::new();
        let re = ENV_VAR.get_or_init(|| {
            Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static env var pattern")
        });

        re.replace_all(content, |caps: &Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .into_owned()
    }

    pub fn api_url(&self) -> &str {
        self.api_url
            .as_deref()
            .unwrap_or(DEFAULT_API_URL)
            .trim_end_matches('/')
    }

    pub fn start_instant(&self) -> Result<DateTime<Utc>> {
        parse_instant(&self.start_date).ok_or_else(|| TapError::InvalidConfigValueError {
            field: "start_date".to_string(),
            value: self.start_date.clone(),
            reason: "Expected an ISO 8601 date or date-time".to_string(),
        })
    }

    /// 建立共用的 HTTP client
    pub fn http_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder();
        if let Some(agent) = &self.user_agent {
            builder = builder.user_agent(agent.as_str());
        }
        if let Some(timeout) = self.timeout_seconds {
            builder = builder.timeout(std::time::Duration::from_secs(timeout));
        }

        builder.build().map_err(|e| TapError::ConfigError {
            message: format!("Failed to build HTTP client: {}", e),
        })
    }
}

impl Validate for TapConfig {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("client_id", &self.client_id)?;
        validate_non_empty_string("client_secret", &self.client_secret)?;
        validate_non_empty_string("start_date", &self.start_date)?;
        self.start_instant()?;

        if let Some(expiration) = self.auth_expiration {
            validate_range(
                "auth_expiration",
                expiration,
                MIN_AUTH_EXPIRATION,
                MAX_AUTH_EXPIRATION,
            )?;
        }

        if let Some(api_url) = &self.api_url {
            validate_url("api_url", api_url)?;
        }

        if let Some(timeout) = self.timeout_seconds {
            validate_positive_number("timeout_seconds", timeout, 1)?;
        }

        Ok(())
    }
}
