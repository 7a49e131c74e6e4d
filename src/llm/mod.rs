//! Stateless LLM client with a disk-backed response cache.
//!
//! One model-agnostic operation: `query(prompt) -> text`. Every query
//! consults the cache with the byte-exact fingerprint of the finished prompt
//! first; every miss is written back before the response is consumed, which
//! is what makes a replayed pick deterministic and network-free.

pub mod cache;
pub mod prompt;
pub mod response;

use std::{thread, time::Duration};

use serde_json::json;

use crate::{config::LlmConfig, errors::PickError, fingerprint::Fingerprint};

use self::cache::ResponseCache;

/// Opaque request/response channel to the model.
///
/// Errors are treated as transient; the client retries with backoff and
/// surfaces `LlmUnavailable` after exhaustion.
pub trait LlmTransport {
    fn send(&self, model: &str, prompt: &str, max_tokens: u32) -> Result<String, String>;
}

/// Blocking HTTP transport posting a JSON body to a single endpoint.
///
/// The endpoint is either configured explicitly or derived from the region,
/// and the reply is expected to carry the generated text under one of a few
/// conventional keys. Proxy and credential configuration are inherited from
/// the ambient process environment.
pub struct HttpTransport {
    agent: ureq::Agent,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(config: &LlmConfig) -> Self {
        let endpoint = config.endpoint.clone().unwrap_or_else(|| {
            format!(
                "https://bedrock-runtime.{}.amazonaws.com/model/{}/invoke",
                config.region, config.model
            )
        });
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(config.request_timeout()))
            .build()
            .into();
        Self { agent, endpoint }
    }
}

impl LlmTransport for HttpTransport {
    fn send(&self, model: &str, prompt: &str, max_tokens: u32) -> Result<String, String> {
        let body = json!({
            "model": model,
            "prompt": prompt,
            "max_tokens": max_tokens,
        });
        let mut response = self
            .agent
            .post(&self.endpoint)
            .header("content-type", "application/json")
            .send_json(&body)
            .map_err(|e| e.to_string())?;
        let value: serde_json::Value = response
            .body_mut()
            .read_json()
            .map_err(|e| e.to_string())?;

        for key in ["completion", "output_text", "text"] {
            if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
                return Ok(text.to_string());
            }
        }
        Err(format!(
            "response from {} carries no recognized text field",
            self.endpoint
        ))
    }
}

/// Cache-fronted client owning the retry policy.
pub struct LlmClient {
    config: LlmConfig,
    cache: ResponseCache,
    transport: Box<dyn LlmTransport>,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        let transport = Box::new(HttpTransport::new(&config));
        Self::with_transport(config, transport)
    }

    /// Construct with a custom transport; tests use an in-memory one.
    pub fn with_transport(config: LlmConfig, transport: Box<dyn LlmTransport>) -> Self {
        let cache = ResponseCache::new(config.cache_path.clone());
        Self {
            config,
            cache,
            transport,
        }
    }

    /// Resolve a prompt to a response, via cache or transport.
    pub fn query(&self, prompt: &str) -> Result<String, PickError> {
        let fingerprint = Fingerprint::of(prompt);
        if let Some(hit) = self.cache.lookup(&fingerprint)? {
            tracing::debug!("LLM cache hit for {fingerprint}");
            return Ok(hit);
        }
        tracing::debug!("LLM cache miss for {fingerprint}");

        let mut last_error = String::new();
        for attempt in 0..self.config.max_attempts {
            if attempt > 0 {
                let backoff =
                    Duration::from_millis(self.config.backoff_base_ms << (attempt - 1));
                tracing::warn!(
                    "LLM attempt {attempt} failed ({last_error}), retrying in {backoff:?}"
                );
                thread::sleep(backoff);
            }
            match self
                .transport
                .send(&self.config.model, prompt, self.config.max_tokens)
            {
                Ok(response) => {
                    // The write precedes consumption so a replayed run sees
                    // the same bytes even if the caller dies mid-pick.
                    self.cache.insert(&fingerprint, &response)?;
                    return Ok(response);
                }
                Err(e) => last_error = e,
            }
        }

        Err(PickError::LlmUnavailable {
            attempts: self.config.max_attempts,
            reason: last_error,
        })
    }
}
