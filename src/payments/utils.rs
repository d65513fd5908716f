use crate::payments::error::{PaymentError, PaymentResult};
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use sha2::{Sha256, Sha512};
use std::time::Duration;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// How a provider call authenticates.
#[derive(Debug, Clone, Copy)]
pub enum RequestAuth<'a> {
    Bearer(&'a str),
    ApiKeyHeader { header: &'a str, key: &'a str },
}

/// JSON client shared by the provider adapters. Retries connection
/// failures, 429 and 5xx with exponential backoff.
#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    provider: &'static str,
    timeout: Duration,
    max_retries: u32,
}

impl PaymentHttpClient {
    pub fn new(provider: &'static str, timeout: Duration, max_retries: u32) -> PaymentResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentError::NetworkError {
                message: format!("failed to initialize HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            provider,
            timeout,
            max_retries,
        })
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: RequestAuth<'_>,
        body: Option<&JsonValue>,
        idempotency_key: Option<&str>,
    ) -> PaymentResult<T> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            let mut request = self
                .client
                .request(method.clone(), url)
                .timeout(self.timeout);

            request = match auth {
                RequestAuth::Bearer(token) => request.bearer_auth(token),
                RequestAuth::ApiKeyHeader { header, key } => request.header(header, key),
            };
            if let Some(key) = idempotency_key {
                request = request.header("Idempotency-Key", key);
            }
            if let Some(payload) = body {
                request = request.json(payload);
            }

            let resp = match request.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(PaymentError::NetworkError {
                        message: format!("{} request failed: {}", self.provider, e),
                    });
                    if attempt < self.max_retries {
                        backoff(attempt).await;
                    }
                    continue;
                }
            };

            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            if status.is_success() {
                return serde_json::from_str::<T>(&text).map_err(|e| {
                    PaymentError::provider(
                        self.provider,
                        format!("invalid provider JSON response: {}", e),
                        false,
                    )
                });
            }

            if status.as_u16() == 429 {
                if attempt < self.max_retries {
                    backoff(attempt).await;
                    continue;
                }
                return Err(PaymentError::RateLimitError {
                    message: format!("{} rate limit exceeded", self.provider),
                    retry_after_seconds: None,
                });
            }

            if status.is_server_error() && attempt < self.max_retries {
                warn!(
                    provider = self.provider,
                    status = %status,
                    attempt = attempt + 1,
                    "provider server error, retrying"
                );
                backoff(attempt).await;
                continue;
            }

            return Err(PaymentError::ProviderError {
                provider: self.provider.to_string(),
                message: format!("HTTP {}: {}", status, text),
                provider_code: Some(status.as_u16().to_string()),
                retryable: status.is_server_error(),
            });
        }

        Err(last_error.unwrap_or(PaymentError::NetworkError {
            message: format!("{} request failed", self.provider),
        }))
    }
}

async fn backoff(attempt: u32) {
    tokio::time::sleep(Duration::from_millis(250 << attempt.min(6))).await;
}

pub fn hmac_sha256_base64(payload: &[u8], secret: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    Some(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

pub fn hmac_sha256_hex(payload: &[u8], secret: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

pub fn hmac_sha512_hex(payload: &[u8], secret: &str) -> Option<String> {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

pub fn verify_hmac_sha256_base64(payload: &[u8], secret: &str, signature: &str) -> bool {
    match hmac_sha256_base64(payload, secret) {
        Some(computed) => secure_eq(computed.as_bytes(), signature.trim().as_bytes()),
        None => false,
    }
}

pub fn verify_hmac_sha512_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    match hmac_sha512_hex(payload, secret) {
        Some(computed) => secure_eq(
            computed.as_bytes(),
            signature.trim().to_lowercase().as_bytes(),
        ),
        None => false,
    }
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Reads a string at a JSON pointer, accepting numbers as strings.
pub fn json_string(value: &JsonValue, pointer: &str) -> Option<String> {
    match value.pointer(pointer)? {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Reads an amount in minor units, accepting integers or numeric strings.
pub fn json_amount(value: &JsonValue, pointer: &str) -> Option<i64> {
    match value.pointer(pointer)? {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

pub fn json_timestamp(value: &JsonValue, pointer: &str) -> Option<DateTime<Utc>> {
    match value.pointer(pointer)? {
        JsonValue::Number(n) => n.as_i64().and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        JsonValue::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}
