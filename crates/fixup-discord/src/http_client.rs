use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result};
use base64::Engine as _;
use reqwest::{header::HeaderMap, Method, Response, StatusCode};
use serde_json::json;
use tokio::{sync::Mutex, time::sleep};

use crate::types::API_BASE;

/// 429s are waited out and retried once; every other failure is final.
const MAX_RATE_LIMIT_RETRIES: u8 = 1;
/// Upper bound on any single rate-limit sleep.
const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

/// Non-success response from the Discord API.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Discord request {route} failed ({status}): {body}")]
pub struct ApiError {
    pub status: StatusCode,
    pub route: String,
    pub body: String,
}

#[derive(Debug, Clone)]
struct RateLimitBucket {
    remaining: u32,
    reset_at: f64,
}

/// A file to upload with a webhook message.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

pub struct DiscordHttpClient {
    client: reqwest::Client,
    bot_token: String,
    buckets: Arc<Mutex<HashMap<String, RateLimitBucket>>>,
    global_reset_at: Arc<Mutex<Option<f64>>>,
}

impl DiscordHttpClient {
    #[must_use]
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token: bot_token.into(),
            buckets: Arc::new(Mutex::new(HashMap::new())),
            global_reset_at: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn get_current_user(&self) -> Result<serde_json::Value> {
        let url = format!("{API_BASE}/users/@me");
        self.request_json(Method::GET, &url, None)
            .await
            .context("fetch current Discord user")
    }

    pub async fn get_user(&self, user_id: u64) -> Result<serde_json::Value> {
        let url = format!("{API_BASE}/users/{user_id}");
        self.request_json(Method::GET, &url, None)
            .await
            .context("fetch Discord user")
    }

    pub async fn get_gateway_bot(&self) -> Result<serde_json::Value> {
        let url = format!("{API_BASE}/gateway/bot");
        self.request_json(Method::GET, &url, None)
            .await
            .context("fetch Discord gateway bot data")
    }

    pub async fn get_channel(&self, channel_id: u64) -> Result<serde_json::Value> {
        let url = format!("{API_BASE}/channels/{channel_id}");
        self.request_json(Method::GET, &url, None)
            .await
            .context("fetch Discord channel")
    }

    pub async fn list_channel_webhooks(&self, channel_id: u64) -> Result<serde_json::Value> {
        let url = format!("{API_BASE}/channels/{channel_id}/webhooks");
        self.request_json(Method::GET, &url, None)
            .await
            .context("list Discord channel webhooks")
    }

    /// `avatar` is a data URI, as the API expects.
    pub async fn create_webhook(
        &self,
        channel_id: u64,
        name: &str,
        avatar: Option<String>,
    ) -> Result<serde_json::Value> {
        let url = format!("{API_BASE}/channels/{channel_id}/webhooks");
        let mut body = json!({ "name": name });
        if let Some(avatar) = avatar {
            body["avatar"] = json!(avatar);
        }
        self.request_json(Method::POST, &url, Some(body))
            .await
            .context("create Discord webhook")
    }

    /// Execute a webhook and wait for the created message.
    pub async fn execute_webhook(
        &self,
        webhook_id: u64,
        webhook_token: &str,
        thread_id: Option<u64>,
        payload: serde_json::Value,
        files: &[UploadFile],
    ) -> Result<serde_json::Value> {
        let mut url =
            format!("{API_BASE}/webhooks/{webhook_id}/{webhook_token}?wait=true&with_components=true");
        if let Some(thread_id) = thread_id {
            url.push_str(&format!("&thread_id={thread_id}"));
        }

        let response = if files.is_empty() {
            self.request(Method::POST, &url, Some(payload)).await
        } else {
            self.request_multipart(&url, &payload, files).await
        }
        .context("execute Discord webhook")?;

        response
            .json()
            .await
            .context("parse Discord webhook message JSON")
    }

    pub async fn delete_message(&self, channel_id: u64, message_id: u64) -> Result<()> {
        let url = format!("{API_BASE}/channels/{channel_id}/messages/{message_id}");
        let _response = self
            .request(Method::DELETE, &url, None)
            .await
            .context("delete Discord message")?;
        Ok(())
    }

    pub async fn create_interaction_response(
        &self,
        interaction_id: u64,
        interaction_token: &str,
        response_type: u8,
        data: Option<serde_json::Value>,
    ) -> Result<()> {
        let url = format!("{API_BASE}/interactions/{interaction_id}/{interaction_token}/callback");
        let mut body = json!({ "type": response_type });
        if let Some(payload) = data {
            body["data"] = payload;
        }
        let _response = self
            .request(Method::POST, &url, Some(body))
            .await
            .context("create Discord interaction response")?;
        Ok(())
    }

    /// Post a follow-up message after the initial interaction response.
    pub async fn create_followup_message(
        &self,
        application_id: u64,
        interaction_token: &str,
        body: serde_json::Value,
    ) -> Result<()> {
        let url = format!("{API_BASE}/webhooks/{application_id}/{interaction_token}");
        let _response = self
            .request(Method::POST, &url, Some(body))
            .await
            .context("create Discord interaction follow-up")?;
        Ok(())
    }

    /// Download a CDN file (attachments, avatars). No bot auth is sent.
    pub async fn download(&self, url: &str) -> Result<(Vec<u8>, Option<String>)> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("download Discord CDN file")?;
        if !response.status().is_success() {
            anyhow::bail!("Discord CDN download failed ({})", response.status());
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .context("read Discord CDN file bytes")?;
        Ok((bytes.to_vec(), content_type))
    }

    /// Download an image and encode it as a data URI.
    pub async fn image_data_uri(&self, url: &str) -> Result<String> {
        let (bytes, content_type) = self.download(url).await?;
        Ok(to_data_uri(&bytes, content_type.as_deref()))
    }

    async fn request_json(
        &self,
        method: Method,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let response = self.request(method, url, body).await?;
        response
            .json()
            .await
            .context("parse Discord response JSON")
    }

    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Response> {
        let route_key = Self::bucket_key_from_url(url);
        self.wait_for_limits(&route_key).await;

        for attempt in 0..=MAX_RATE_LIMIT_RETRIES {
            let mut request_builder = self
                .client
                .request(method.clone(), url)
                .header("Authorization", format!("Bot {}", self.bot_token));
            if let Some(payload) = body.clone() {
                request_builder = request_builder.json(&payload);
            }

            let response = request_builder
                .send()
                .await
                .with_context(|| format!("send Discord request {} {route_key}", method.as_str()))?;

            if let Some(response) = self
                .check_response(&method, &route_key, response, attempt)
                .await?
            {
                return Ok(response);
            }
        }

        anyhow::bail!(
            "Discord request {} {route_key} failed due to rate limiting",
            method.as_str()
        )
    }

    async fn request_multipart(
        &self,
        url: &str,
        payload: &serde_json::Value,
        files: &[UploadFile],
    ) -> Result<Response> {
        let route_key = Self::bucket_key_from_url(url);
        self.wait_for_limits(&route_key).await;

        for attempt in 0..=MAX_RATE_LIMIT_RETRIES {
            let mut form = reqwest::multipart::Form::new().text("payload_json", payload.to_string());
            for (index, file) in files.iter().enumerate() {
                let mut part = reqwest::multipart::Part::bytes(file.bytes.clone())
                    .file_name(file.filename.clone());
                if let Some(mime) = &file.content_type {
                    part = part
                        .mime_str(mime)
                        .context("set Discord attachment MIME type")?;
                }
                form = form.part(format!("files[{index}]"), part);
            }

            let response = self
                .client
                .post(url)
                .header("Authorization", format!("Bot {}", self.bot_token))
                .multipart(form)
                .send()
                .await
                .with_context(|| format!("send Discord multipart request POST {route_key}"))?;

            if let Some(response) = self
                .check_response(&Method::POST, &route_key, response, attempt)
                .await?
            {
                return Ok(response);
            }
        }

        anyhow::bail!("Discord multipart request POST {route_key} failed due to rate limiting")
    }

    /// `Ok(None)` means "rate limited, waited, try again".
    async fn check_response(
        &self,
        method: &Method,
        route_key: &str,
        response: Response,
        attempt: u8,
    ) -> Result<Option<Response>> {
        self.update_bucket_from_headers(route_key, response.headers())
            .await;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            if attempt == MAX_RATE_LIMIT_RETRIES {
                anyhow::bail!(
                    "Discord request {} {route_key} exceeded rate limit after {MAX_RATE_LIMIT_RETRIES} retries",
                    method.as_str()
                );
            }
            let is_global = Self::is_global_limit(response.headers());
            let retry_after = Self::parse_retry_after(response.headers())
                .unwrap_or_else(|| Duration::from_secs(1));
            tracing::warn!(route = %route_key, ?retry_after, "Discord rate limited");
            self.handle_429_wait(is_global, retry_after, route_key).await;
            return Ok(None);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|error| format!("<failed to read response body: {error}>"));
            return Err(ApiError {
                status,
                route: format!("{} {route_key}", method.as_str()),
                body,
            }
            .into());
        }

        Ok(Some(response))
    }

    fn parse_header_u32(headers: &HeaderMap, name: &str) -> Option<u32> {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u32>().ok())
    }

    fn parse_header_f64(headers: &HeaderMap, name: &str) -> Option<f64> {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| value.is_finite())
    }

    fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
        Self::parse_header_f64(headers, "Retry-After").map(wait_duration)
    }

    fn is_global_limit(headers: &HeaderMap) -> bool {
        headers
            .get("X-RateLimit-Global")
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.eq_ignore_ascii_case("true"))
    }

    fn now_unix_timestamp() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }

    /// Route key used for rate-limit buckets and error messages. The major
    /// parameter (the channel, guild or webhook id right after the first
    /// segment) is kept because Discord buckets per major parameter; other
    /// snowflakes collapse to `{id}` and webhook/interaction tokens to
    /// `{token}`, so secrets never reach the logs.
    fn bucket_key_from_url(url: &str) -> String {
        let path = reqwest::Url::parse(url)
            .map_or_else(|_| url.to_string(), |parsed| parsed.path().to_string());
        let path_without_api_prefix = path
            .strip_prefix("/api/v10")
            .map_or(path.as_str(), |stripped| stripped);

        let segments: Vec<&str> = path_without_api_prefix
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();

        let normalized = segments
            .iter()
            .enumerate()
            .map(|(index, segment)| {
                let after_tokened_id = index >= 2
                    && matches!(segments[index - 2], "webhooks" | "interactions");
                let major_parameter = index == 1
                    && matches!(segments[0], "channels" | "guilds" | "webhooks");
                if after_tokened_id {
                    "{token}".to_string()
                } else if major_parameter {
                    segment.to_string()
                } else if segment.chars().all(|character| character.is_ascii_digit()) {
                    "{id}".to_string()
                } else {
                    segment.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("/");

        format!("/{normalized}")
    }

    async fn wait_for_limits(&self, route_key: &str) {
        let now = Self::now_unix_timestamp();
        let global_wait = {
            let global_guard = self.global_reset_at.lock().await;
            global_guard.and_then(|reset_at| (reset_at > now).then_some(reset_at - now))
        };
        if let Some(wait_secs) = global_wait {
            sleep(wait_duration(wait_secs)).await;
        }

        let route_wait = {
            let buckets = self.buckets.lock().await;
            buckets.get(route_key).and_then(|bucket| {
                if bucket.remaining == 0 && bucket.reset_at > now {
                    Some(bucket.reset_at - now)
                } else {
                    None
                }
            })
        };
        if let Some(wait_secs) = route_wait {
            sleep(wait_duration(wait_secs)).await;
        }
    }

    async fn handle_429_wait(&self, is_global: bool, retry_after: Duration, route_key: &str) {
        let now = Self::now_unix_timestamp();
        let reset_at = now + retry_after.as_secs_f64();
        if is_global {
            let mut global = self.global_reset_at.lock().await;
            *global = Some(reset_at);
        } else {
            let mut buckets = self.buckets.lock().await;
            buckets.insert(
                route_key.to_string(),
                RateLimitBucket {
                    remaining: 0,
                    reset_at,
                },
            );
        }
        sleep(retry_after).await;
    }

    async fn update_bucket_from_headers(&self, route_key: &str, headers: &HeaderMap) {
        let remaining = Self::parse_header_u32(headers, "X-RateLimit-Remaining");
        let reset_at = Self::parse_header_f64(headers, "X-RateLimit-Reset");

        if let (Some(remaining), Some(reset_at)) = (remaining, reset_at) {
            let mut buckets = self.buckets.lock().await;
            buckets.insert(
                route_key.to_string(),
                RateLimitBucket {
                    remaining,
                    reset_at,
                },
            );
        }
    }
}

/// Seconds from a rate-limit header as a sleep, capped at
/// `MAX_RATE_LIMIT_WAIT`. Negative or NaN values mean no wait.
fn wait_duration(seconds: f64) -> Duration {
    if seconds.is_nan() || seconds <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(seconds.min(MAX_RATE_LIMIT_WAIT.as_secs_f64()))
        .unwrap_or(MAX_RATE_LIMIT_WAIT)
}

fn to_data_uri(bytes: &[u8], content_type: Option<&str>) -> String {
    let mime = content_type
        .filter(|c| c.starts_with("image/"))
        .unwrap_or("image/png");
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{mime};base64,{encoded}")
}
