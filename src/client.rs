//! LLM client adapters.
//!
//! A closed set of backends behind one `predict` surface: an
//! OpenRouter-compatible chat completions client with retry/backoff, and a
//! deterministic offline echo stub for reproducible tests. Adding a backend
//! means adding one enum variant.

use crate::config::ClientSettings;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// System instruction sent with every network request
pub const SYSTEM_INSTRUCTION: &str = "Answer strictly with either 'Yes'/'No' or a \
comma-separated id list depending on the question. No extra text.";

/// Status codes that suggest a transient failure
const RETRYABLE_STATUS: [u16; 8] = [408, 409, 425, 429, 500, 502, 503, 504];

/// Request timeout for a single attempt
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Retry/backoff configuration, threaded through client construction so
/// retry behavior is testable by injection.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first call; total calls = `max_retries + 1`
    pub max_retries: u32,
    /// Exponential base for the backoff curve
    pub backoff_base: f64,
    /// Maximum seconds slept between attempts
    pub backoff_cap: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 4,
            backoff_base: 0.8,
            backoff_cap: 8.0,
        }
    }
}

/// Errors that can occur inside a client
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("OPENROUTER_API_KEY missing; set it in the environment")]
    MissingApiKey,

    #[error("Unknown client: {0}")]
    UnknownClient(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response payload: {0}")]
    MalformedResponse(String),
}

impl ClientError {
    /// HTTP status associated with the failure, if the server answered.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True if the failure is worth retrying: network-level faults (no
    /// status) and the fixed retryable status set. Everything else is fatal
    /// and propagates immediately.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Http { status, .. } => RETRYABLE_STATUS.contains(status),
            _ => false,
        }
    }
}

/// Run `op` under the retry policy.
///
/// `op` receives the 1-based attempt number. Transient failures sleep
/// `min(backoff_cap, backoff_base^attempt + jitter)` and retry; after
/// `max_retries` exhausted retries the last failure propagates.
///
/// # Errors
///
/// Returns the first fatal error, or the last transient one once retries
/// are exhausted.
pub fn call_with_retry<T>(
    retry: &RetryConfig,
    mut op: impl FnMut(u32) -> Result<T, ClientError>,
) -> Result<T, ClientError> {
    let mut attempt: u32 = 1;
    loop {
        match op(attempt) {
            Ok(v) => return Ok(v),
            Err(err) => {
                if attempt > retry.max_retries || !err.is_transient() {
                    return Err(err);
                }
                let jitter = rand::random::<f64>() * 0.25;
                let sleep = retry
                    .backoff_cap
                    .min(retry.backoff_base.powi(attempt as i32) + jitter)
                    .max(0.0);
                thread::sleep(Duration::from_secs_f64(sleep));
                attempt += 1;
            }
        }
    }
}

/// Model output for a single prompt
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Trimmed output text
    pub text: String,
    /// Raw response payload
    pub raw: Value,
    /// 1-based number of calls it took to get this response
    pub attempts: u32,
    /// HTTP status of the successful call, if any
    pub status_code: Option<u16>,
}

/// OpenRouter-compatible chat completions client
#[derive(Debug)]
pub struct OpenRouterClient {
    api_key: String,
    base_url: String,
    default_model: String,
    site_url: Option<String>,
    site_title: Option<String>,
    retry: RetryConfig,
    http: reqwest::blocking::Client,
}

impl OpenRouterClient {
    /// Create a client from settings.
    ///
    /// # Errors
    ///
    /// Returns `MissingApiKey` if no credentials are configured. This is a
    /// fatal configuration error raised before any items are processed.
    pub fn new(settings: &ClientSettings, retry: RetryConfig) -> Result<Self, ClientError> {
        let api_key = settings.api_key.clone().ok_or(ClientError::MissingApiKey)?;
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Network(e.to_string()))?;
        Ok(Self {
            api_key,
            base_url: settings.base_url.clone(),
            default_model: settings.default_model.clone(),
            site_url: settings.site_url.clone(),
            site_title: settings.site_title.clone(),
            retry,
            http,
        })
    }

    /// Send a single-prompt chat completion request under the retry policy.
    ///
    /// # Errors
    ///
    /// Returns the underlying failure once retries are exhausted, or
    /// immediately for non-retryable statuses.
    pub fn predict(
        &self,
        prompt: &str,
        model: Option<&str>,
        temperature: f64,
    ) -> Result<LlmResponse, ClientError> {
        let model_name = model.unwrap_or(&self.default_model);
        let payload = json!({
            "model": model_name,
            "messages": [
                {"role": "system", "content": SYSTEM_INSTRUCTION},
                {"role": "user", "content": prompt},
            ],
            "temperature": temperature,
        });
        call_with_retry(&self.retry, |attempt| self.request(&payload, attempt))
    }

    fn request(&self, payload: &Value, attempt: u32) -> Result<LlmResponse, ClientError> {
        let mut req = self
            .http
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(payload);
        if let Some(url) = &self.site_url {
            req = req.header("HTTP-Referer", url);
        }
        if let Some(title) = &self.site_title {
            req = req.header("X-Title", title);
        }

        let resp = req.send().map_err(|e| ClientError::Network(e.to_string()))?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(ClientError::Http {
                status,
                message: body.chars().take(200).collect(),
            });
        }

        let data: Value = resp
            .json()
            .map_err(|e| ClientError::MalformedResponse(e.to_string()))?;
        // Fall back to the raw payload rendered as a string when the shape
        // is unexpected.
        let text = data["choices"][0]["message"]["content"]
            .as_str()
            .map_or_else(|| data.to_string(), |s| s.trim().to_string());
        Ok(LlmResponse {
            text,
            raw: data,
            attempts: attempt,
            status_code: Some(status),
        })
    }
}

/// Offline stub: deterministic pseudo-answers with no network dependency.
///
/// Output is a pure function of `(prompt, seed)` and stable across
/// processes, so repeated runs are byte-identical. Never fails, never
/// retries.
#[derive(Debug, Clone)]
pub struct EchoClient {
    seed: u64,
}

impl EchoClient {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Return a deterministic pseudo-answer: alternating Yes/No, or 0-2
    /// synthetic ids for list-type prompts.
    #[must_use]
    pub fn predict(&self, prompt: &str) -> LlmResponse {
        let mut hasher = Sha256::new();
        hasher.update(self.seed.to_le_bytes());
        hasher.update(b"|");
        hasher.update(prompt.as_bytes());
        let digest = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        let rnd = u64::from_le_bytes(head) % 100;

        let text = if prompt.contains("List ids") {
            let k = rnd % 3;
            (1..=k).map(|i| format!("X{i}")).collect::<Vec<_>>().join(",")
        } else if rnd % 2 == 0 {
            "Yes".to_string()
        } else {
            "No".to_string()
        };
        LlmResponse {
            text,
            raw: json!({"stub": true, "seed": self.seed}),
            attempts: 1,
            status_code: None,
        }
    }
}

/// Closed set of inference backends
#[derive(Debug)]
pub enum Client {
    OpenRouter(OpenRouterClient),
    Echo(EchoClient),
}

impl Client {
    /// Instantiate a client by name.
    ///
    /// # Errors
    ///
    /// Returns `UnknownClient` for unrecognized names and `MissingApiKey`
    /// for the network client without credentials; both are fatal
    /// configuration errors raised before the run loop starts.
    pub fn from_name(
        name: &str,
        settings: &ClientSettings,
        retry: RetryConfig,
        seed: u64,
    ) -> Result<Self, ClientError> {
        match name {
            "openrouter" => Ok(Self::OpenRouter(OpenRouterClient::new(settings, retry)?)),
            "echo" => Ok(Self::Echo(EchoClient::new(seed))),
            other => Err(ClientError::UnknownClient(other.to_string())),
        }
    }

    /// Return the model output for a single prompt.
    ///
    /// # Errors
    ///
    /// Propagates network client failures; the echo stub never fails.
    pub fn predict(
        &self,
        prompt: &str,
        model: Option<&str>,
        temperature: f64,
    ) -> Result<LlmResponse, ClientError> {
        match self {
            Self::OpenRouter(c) => c.predict(prompt, model, temperature),
            Self::Echo(c) => Ok(c.predict(prompt)),
        }
    }

    /// Name used in log events
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenRouter(_) => "openrouter",
            Self::Echo(_) => "echo",
        }
    }

    /// Model label for log events: the requested model, or the client's
    /// own default.
    #[must_use]
    pub fn model_label(&self, requested: Option<&str>) -> String {
        match (self, requested) {
            (_, Some(m)) => m.to_string(),
            (Self::OpenRouter(c), None) => c.default_model.clone(),
            (Self::Echo(_), None) => "echo".to_string(),
        }
    }
}
