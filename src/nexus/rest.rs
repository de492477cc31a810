//! Nexus Mods client using the v1 REST API

use super::{KeyStatus, MetadataService, ModInfo, NexusError, SearchHit};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const API_BASE: &str = "https://api.nexusmods.com/v1";
const REQUEST_TIMEOUT_SECS: u64 = 8;
const MAX_RETRIES: u32 = 3;
const BASE_RETRY_DELAY_MS: u64 = 1000;
const MAX_RETRY_DELAY_MS: u64 = 10000;

/// REST client for one game domain
#[derive(Clone)]
pub struct NexusClient {
    client: Arc<reqwest::Client>,
    game_domain: String,
    base_url: String,
}

impl NexusClient {
    /// Create a client; a key that is not a valid header value is rejected
    pub fn new(api_key: &str, game_domain: &str) -> Result<Self, NexusError> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(NexusError::InvalidKey);
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            "apikey",
            HeaderValue::from_str(api_key).map_err(|_| NexusError::InvalidKey)?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!("modshelf/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client: Arc::new(client),
            game_domain: game_domain.to_string(),
            base_url: API_BASE.to_string(),
        })
    }

    fn mod_url(&self, mod_id: u64) -> String {
        format!("{}/games/{}/mods/{}.json", self.base_url, self.game_domain, mod_id)
    }

    fn search_url(&self) -> String {
        format!("{}/games/{}/mods.json", self.base_url, self.game_domain)
    }

    fn validate_url(&self) -> String {
        format!("{}/users/validate.json", self.base_url)
    }

    /// GET with retry on rate limiting and server errors
    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<Response, NexusError> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            let response = self.client.get(url).query(query).send().await?;
            let status = response.status();

            let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            if !retryable || attempt >= MAX_RETRIES {
                return Ok(response);
            }

            let delay = retry_delay(&response, attempt);
            tracing::warn!(
                "Nexus returned {} (attempt {}/{}), retrying in {}ms",
                status,
                attempt,
                MAX_RETRIES,
                delay
            );
            sleep(Duration::from_millis(delay)).await;
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, NexusError> {
        let response = self.get(url, query).await?;
        let status = response.status();
        if status != StatusCode::OK {
            tracing::debug!("GET {} -> {}", url, status);
            return Err(NexusError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        decode(&body)
    }
}

#[async_trait]
impl MetadataService for NexusClient {
    async fn fetch_by_id(&self, mod_id: u64) -> Result<ModInfo, NexusError> {
        tracing::debug!("Fetching Nexus mod {}", mod_id);
        self.get_json(&self.mod_url(mod_id), &[]).await
    }

    async fn search(&self, keyword: &str) -> Result<Vec<SearchHit>, NexusError> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Ok(Vec::new());
        }
        tracing::debug!("Searching Nexus for '{}'", keyword);
        self.get_json(&self.search_url(), &[("terms", keyword)]).await
    }

    async fn validate_key(&self) -> Result<KeyStatus, NexusError> {
        let response = self.get(&self.validate_url(), &[]).await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Ok(KeyStatus::default());
        }
        if status != StatusCode::OK {
            return Err(NexusError::Status(status.as_u16()));
        }

        let header_left = header_number(&response, "x-rl-daily-remaining");
        let header_limit = header_number(&response, "x-rl-daily-limit");
        let body = response.text().await?;
        let mut key_status = parse_key_status(&body)?;
        key_status.quota_left = key_status.quota_left.or(header_left);
        key_status.quota_limit = key_status.quota_limit.or(header_limit);
        Ok(key_status)
    }
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, NexusError> {
    serde_json::from_str(body).map_err(|e| NexusError::Decode(e.to_string()))
}

/// Body of a successful `validate.json` call
fn parse_key_status(body: &str) -> Result<KeyStatus, NexusError> {
    #[derive(Deserialize)]
    struct Validate {
        #[serde(default)]
        daily_left: Option<i64>,
        #[serde(default)]
        daily_limit: Option<i64>,
    }

    let data: Validate = decode(body)?;
    Ok(KeyStatus {
        valid: true,
        quota_left: data.daily_left,
        quota_limit: data.daily_limit,
    })
}

fn header_number(response: &Response, name: &str) -> Option<i64> {
    response
        .headers()
        .get(name)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Honour `Retry-After`, otherwise back off exponentially with jitter
fn retry_delay(response: &Response, attempt: u32) -> u64 {
    if let Some(secs) = header_number(response, "retry-after") {
        return (secs.max(0) as u64 * 1000).min(MAX_RETRY_DELAY_MS);
    }
    let base = BASE_RETRY_DELAY_MS * (1 << (attempt - 1));
    let jitter = rand::random::<f64>() * 0.3 + 0.85;
    ((base as f64 * jitter) as u64).min(MAX_RETRY_DELAY_MS)
}
