//! OpenAI-compatible chat completions backend.
//!
//! Hosted APIs, credential proxies, and local daemons (Ollama, llama.cpp,
//! vLLM) all expose `POST {base_url}/chat/completions` and
//! `GET {base_url}/models`, so one adapter covers every provider kind.
//!
//! # Descriptor options
//!
//! | Key | Required | Meaning |
//! |-----|----------|---------|
//! | `base_url` | yes | API root, e.g. `http://localhost:11434/v1` |
//! | `model` | yes | Model id sent with each request |
//! | `api_key_env` | no | Environment variable holding a bearer token |
//! | `cost_per_1k_tokens` | no | USD rate used to fill `cost_usd` |
//! | `thermal_max_tokens` | no | Token cap applied while thermals are unsafe (default 256) |

use std::fmt;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{FailureKind, KestrelError, Result};
use crate::routing::health::HealthState;
use crate::routing::provider::CapabilityProvider;
use crate::routing::types::{ProviderDescriptor, QueryOptions, RequestContext, ResponseEnvelope};

/// Token cap applied while the thermal snapshot is unsafe.
const DEFAULT_THERMAL_MAX_TOKENS: u32 = 256;

/// Provider adapter for OpenAI-compatible HTTP endpoints.
pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    model: String,
    api_key: Option<String>,
    cost_per_1k_tokens: Option<f64>,
    thermal_max_tokens: u32,
    client: reqwest::Client,
}

impl fmt::Debug for OpenAiCompatProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiCompatProvider")
            .field("id", &self.id)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

impl OpenAiCompatProvider {
    /// Build from a descriptor's option map.
    ///
    /// # Errors
    /// Returns [`KestrelError::Configuration`] if `base_url` or `model` is
    /// missing or a numeric option does not parse.
    pub fn from_descriptor(descriptor: &ProviderDescriptor) -> Result<Self> {
        let option = |key: &str| descriptor.config.get(key).map(|v| v.trim().to_string());
        let required = |key: &str| {
            option(key).filter(|v| !v.is_empty()).ok_or_else(|| {
                KestrelError::Configuration(format!(
                    "provider '{}': missing option '{key}'",
                    descriptor.id
                ))
            })
        };

        let base_url = required("base_url")?.trim_end_matches('/').to_string();
        let model = required("model")?;

        let api_key = match option("api_key_env") {
            Some(var) => {
                let key = std::env::var(&var).ok().filter(|k| !k.is_empty());
                if key.is_none() {
                    warn!(provider = %descriptor.id, env = %var, "API key variable is not set");
                }
                key
            }
            None => None,
        };

        let cost_per_1k_tokens = option("cost_per_1k_tokens")
            .map(|v| {
                v.parse::<f64>().map_err(|e| {
                    KestrelError::Configuration(format!(
                        "provider '{}': invalid cost_per_1k_tokens '{v}': {e}",
                        descriptor.id
                    ))
                })
            })
            .transpose()?;

        let thermal_max_tokens = option("thermal_max_tokens")
            .map(|v| {
                v.parse::<u32>().map_err(|e| {
                    KestrelError::Configuration(format!(
                        "provider '{}': invalid thermal_max_tokens '{v}': {e}",
                        descriptor.id
                    ))
                })
            })
            .transpose()?
            .unwrap_or(DEFAULT_THERMAL_MAX_TOKENS);

        let client = reqwest::Client::builder()
            .timeout(descriptor.timeout)
            .build()
            .map_err(|e| {
                KestrelError::Configuration(format!(
                    "provider '{}': failed to build HTTP client: {e}",
                    descriptor.id
                ))
            })?;

        Ok(Self {
            id: descriptor.id.clone(),
            base_url,
            model,
            api_key,
            cost_per_1k_tokens,
            thermal_max_tokens,
            client,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {key}")),
            None => request,
        }
    }

    /// Token cap for this call, tightened while thermals are unsafe.
    fn effective_max_tokens(&self, options: &QueryOptions) -> (Option<u32>, bool) {
        match options.thermal {
            Some(thermal) if !thermal.safe => {
                let cap = options
                    .max_tokens
                    .map_or(self.thermal_max_tokens, |m| m.min(self.thermal_max_tokens));
                (Some(cap), true)
            }
            _ => (options.max_tokens, false),
        }
    }

    fn map_http_error(&self, status: reqwest::StatusCode, body: &str) -> KestrelError {
        let message = extract_error_message(body);
        let kind = match status.as_u16() {
            401 | 403 => FailureKind::Auth,
            429 => FailureKind::RateLimit,
            500..=599 => FailureKind::Server,
            _ => FailureKind::Other,
        };
        KestrelError::provider(&self.id, kind, format!("HTTP {}: {message}", status.as_u16()))
    }

    fn map_transport_error(&self, err: &reqwest::Error) -> KestrelError {
        let kind = if err.is_timeout() {
            FailureKind::Timeout
        } else if err.is_decode() {
            FailureKind::InvalidResponse
        } else {
            FailureKind::Network
        };
        KestrelError::provider(&self.id, kind, format!("request failed: {err}"))
    }
}

/// Extract an error message from an OpenAI-style error body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.chars().take(500).collect())
}

/// Pull `(content, total_tokens)` out of a chat completions response.
fn parse_completion(body: &serde_json::Value) -> Option<(String, u64)> {
    let content = body
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()?
        .to_string();
    let usage = body.get("usage");
    let tokens = usage
        .and_then(|u| u.get("total_tokens"))
        .and_then(|t| t.as_u64())
        .or_else(|| {
            let prompt = usage?.get("prompt_tokens")?.as_u64()?;
            let completion = usage?.get("completion_tokens")?.as_u64()?;
            Some(prompt + completion)
        })
        .unwrap_or(0);
    Some((content, tokens))
}

#[async_trait]
impl CapabilityProvider for OpenAiCompatProvider {
    async fn query(
        &self,
        prompt: &str,
        context: &RequestContext,
        options: &QueryOptions,
    ) -> Result<ResponseEnvelope> {
        let url = format!("{}/chat/completions", self.base_url);
        let (max_tokens, throttled) = self.effective_max_tokens(options);

        let mut body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "stream": false,
        });
        if let Some(max) = max_tokens {
            body["max_tokens"] = json!(max);
        }
        if let Some(session) = &context.session_id {
            body["user"] = json!(session);
        }

        debug!(provider = %self.id, url = %url, throttled, "sending completion request");
        let response = self
            .authorize(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(self.map_http_error(status, &text));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| self.map_transport_error(&e))?;
        let (content, tokens) = parse_completion(&json).ok_or_else(|| {
            KestrelError::provider(
                &self.id,
                FailureKind::InvalidResponse,
                "response has no choices[0].message.content",
            )
        })?;

        let cost = self
            .cost_per_1k_tokens
            .map_or(0.0, |rate| tokens as f64 / 1000.0 * rate);

        let mut envelope = ResponseEnvelope::success(&self.id, content)
            .with_tokens(tokens)
            .with_cost(cost)
            .with_metadata("model", json!(self.model));
        if throttled {
            envelope = envelope.with_metadata("thermal_throttled", json!(true));
        }
        Ok(envelope)
    }

    async fn health_check(&self) -> Result<HealthState> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| self.map_transport_error(&e))?;

        let state = match response.status().as_u16() {
            200..=299 => HealthState::Healthy,
            429 => HealthState::Degraded,
            _ => HealthState::Unavailable,
        };
        Ok(state)
    }
}
