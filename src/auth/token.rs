use crate::utils::error::{Result, TapError};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

/// A single bearer token. Replaced wholesale on refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires_at| now < expires_at)
    }
}

/// Per-podcast tokens from one multi-podcast refresh. Order is the endpoint's response order.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantTokenMap {
    tokens: Vec<(String, String)>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TenantTokenMap {
    pub fn new(
        pairs: Vec<(String, String)>,
        issued_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        let mut tokens: Vec<(String, String)> = Vec::with_capacity(pairs.len());
        for (podcast_id, token) in pairs {
            match tokens.iter_mut().find(|(id, _)| *id == podcast_id) {
                Some(existing) => existing.1 = token,
                None => tokens.push((podcast_id, token)),
            }
        }

        Self {
            tokens,
            issued_at,
            expires_at,
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires_at| now < expires_at)
    }

    pub fn get(&self, podcast_id: &str) -> Option<&str> {
        self.tokens
            .iter()
            .find(|(id, _)| id == podcast_id)
            .map(|(_, token)| token.as_str())
    }

    pub fn tenant_ids(&self) -> Vec<String> {
        self.tokens.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Cached credentials for both token modes.
#[derive(Debug, Default)]
pub struct TokenStore {
    pub default: Option<Credential>,
    pub tenants: Option<TenantTokenMap>,
}

fn expiry(
    issued_at: DateTime<Utc>,
    body: &Value,
    default_expiration: Option<u64>,
) -> Option<DateTime<Utc>> {
    // expires_in 可能是數字或字串；缺少時退回設定值，兩者皆無則永不過期
    let seconds = match body.get("expires_in") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
    .or(default_expiration)?;

    i64::try_from(seconds)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|d| issued_at.checked_add_signed(d))
}

fn parse_body(body: &str) -> Result<Value> {
    serde_json::from_str(body).map_err(|e| {
        TapError::auth(
            format!("token endpoint returned invalid JSON: {}", e),
            Some(body.to_string()),
        )
    })
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn token_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn parse_credential(
    body: &str,
    issued_at: DateTime<Utc>,
    default_expiration: Option<u64>,
) -> Result<Credential> {
    let json = parse_body(body)?;
    let token = token_string(json.get("access_token")).ok_or_else(|| {
        TapError::auth(
            "token response has no usable access_token",
            Some(body.to_string()),
        )
    })?;

    Ok(Credential {
        token,
        issued_at,
        expires_at: expiry(issued_at, &json, default_expiration),
    })
}

pub fn parse_tenant_tokens(
    body: &str,
    issued_at: DateTime<Utc>,
    default_expiration: Option<u64>,
) -> Result<TenantTokenMap> {
    let json = parse_body(body)?;
    let podcasts = json
        .get("podcasts")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            TapError::auth(
                "multi-podcast token response has no podcasts array",
                Some(body.to_string()),
            )
        })?;

    let mut pairs = Vec::with_capacity(podcasts.len());
    for entry in podcasts {
        let podcast_id = entry.get("podcast_id").and_then(id_string);
        let token = token_string(entry.get("access_token"));
        match (podcast_id, token) {
            (Some(podcast_id), Some(token)) => pairs.push((podcast_id, token)),
            _ => {
                return Err(TapError::auth(
                    format!("podcast token entry is missing podcast_id or access_token: {}", entry),
                    Some(body.to_string()),
                ))
            }
        }
    }

    Ok(TenantTokenMap::new(
        pairs,
        issued_at,
        expiry(issued_at, &json, default_expiration),
    ))
}
