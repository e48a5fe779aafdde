use crate::utils::error::{Result, TapError};
use reqwest::{Client, Response};
use serde_json::Value;

const ERROR_BODY_PREVIEW: usize = 500;
const SECRET_PARAMS: &[&str] = &["access_token"];

/// Thin wrapper over `reqwest::Client` that maps failures onto `TapError`.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET `{base}{path}` and decode the body as JSON.
    pub async fn get_json(&self, path: &str, params: &[(String, String)]) -> Result<Value> {
        let endpoint = self.endpoint(path);
        tracing::debug!("GET {}?{}", endpoint, redact_params(params));

        let response = self
            .client
            .get(&endpoint)
            .query(params)
            .send()
            .await
            .map_err(|e| transport_error(&endpoint, e))?;
        let response = ensure_success(&endpoint, response).await?;

        let body = response
            .text()
            .await
            .map_err(|e| transport_error(&endpoint, e))?;

        serde_json::from_str(&body)
            .map_err(|e| TapError::malformed(&endpoint, format!("invalid JSON body: {}", e)))
    }

    /// GET an absolute URL and hand back the response for incremental reading.
    pub async fn get_stream(&self, url: &str) -> Result<Response> {
        tracing::debug!("GET {} (streamed)", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(url, e))?;

        ensure_success(url, response).await
    }
}

pub(crate) fn transport_error(endpoint: &str, error: reqwest::Error) -> TapError {
    TapError::Transport {
        endpoint: endpoint.to_string(),
        status: error.status().map(|s| s.as_u16()),
        message: error.without_url().to_string(),
    }
}

async fn ensure_success(endpoint: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let preview: String = body.chars().take(ERROR_BODY_PREVIEW).collect();
    tracing::debug!("{} responded {}: {}", endpoint, status, preview);

    Err(TapError::Transport {
        endpoint: endpoint.to_string(),
        status: Some(status.as_u16()),
        message: if preview.is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, preview)
        },
    })
}

/// Query string for logs with token values masked.
pub fn redact_params(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(key, value)| {
            if SECRET_PARAMS.contains(&key.as_str()) {
                format!("{}=***", key)
            } else {
                format!("{}={}", key, value)
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}
