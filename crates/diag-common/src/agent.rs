/// HTTP client for the remote agent chat endpoint.
///
/// Every diagnostic step (telemetry, tickets, corrosion, notes, ranking, troubleshooting)
/// is a single chat turn against a dedicated agent id. The endpoint accepts
/// `{user_id, agent_id, session_id, message}` and answers with a JSON object whose
/// `response` field carries the agent text.
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::CommonError;

const DEFAULT_CHAT_URL: &str = "https://agent-prod.studio.lyzr.ai/v3/inference/chat/";
pub const DEFAULT_USER_ID: &str = "default";

#[derive(Clone, Debug)]
pub struct AgentClientConfig {
    pub chat_url: String,
    pub api_key: Option<String>,
    pub feedback_url: Option<String>,
    pub feedback_rag_id: Option<String>,
    pub default_timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_error_body_bytes: usize,
}

impl AgentClientConfig {
    /// Config with the given chat URL and default retry policy.
    pub fn new(chat_url: &str) -> Result<Self, CommonError> {
        Ok(Self {
            chat_url: validate_url("chat", chat_url)?,
            api_key: None,
            feedback_url: None,
            feedback_rag_id: None,
            default_timeout: Duration::from_secs(60),
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_millis(5_000),
            max_error_body_bytes: 8 * 1024,
        })
    }

    /// Optional:
    /// - `AGENT_STUDIO_CHAT_URL` (default: the hosted agent studio inference URL)
    /// - `LYZR_API_KEY`
    /// - `AGENT_LEARNING_FEEDBACK_URL`, `FEEDBACK_RAG_ID`
    /// - `AGENT_TIMEOUT_SECS` (60), `AGENT_MAX_RETRIES` (3)
    /// - `AGENT_RETRY_INITIAL_MS` (200), `AGENT_RETRY_MAX_MS` (5000)
    /// - `AGENT_MAX_ERROR_BODY_BYTES` (8192)
    pub fn from_env() -> Result<Self, CommonError> {
        let chat_url = std::env::var("AGENT_STUDIO_CHAT_URL")
            .unwrap_or_else(|_| DEFAULT_CHAT_URL.to_string());
        let mut config = Self::new(&chat_url)?;

        config.api_key = std::env::var("LYZR_API_KEY").ok().filter(|k| !k.is_empty());
        config.feedback_url = match std::env::var("AGENT_LEARNING_FEEDBACK_URL") {
            Ok(url) if !url.is_empty() => Some(validate_url("feedback", &url)?),
            _ => None,
        };
        config.feedback_rag_id = std::env::var("FEEDBACK_RAG_ID").ok();

        if let Some(secs) = env_parse::<u64>("AGENT_TIMEOUT_SECS") {
            config.default_timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = env_parse::<u32>("AGENT_MAX_RETRIES") {
            config.max_retries = retries;
        }
        if let Some(ms) = env_parse::<u64>("AGENT_RETRY_INITIAL_MS") {
            config.initial_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("AGENT_RETRY_MAX_MS") {
            config.max_backoff = Duration::from_millis(ms);
        }
        if let Some(bytes) = env_parse::<usize>("AGENT_MAX_ERROR_BODY_BYTES") {
            config.max_error_body_bytes = bytes;
        }
        Ok(config)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse::<T>().ok())
}

fn validate_url(label: &str, raw: &str) -> Result<String, CommonError> {
    let url = reqwest::Url::parse(raw.trim())
        .map_err(|e| CommonError::Config(format!("invalid {label} url '{raw}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url.to_string()),
        other => Err(CommonError::Config(format!(
            "invalid {label} url '{raw}': unsupported scheme '{other}'"
        ))),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AgentClientError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid response JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("upstream returned error: status={status} message={message}")]
    Upstream { status: StatusCode, message: String },

    #[error("upstream returned non-JSON error: status={status} body={body}")]
    UpstreamBody { status: StatusCode, body: String },

    #[error("agent reply had no 'response' field")]
    MissingResponse,

    #[error("feedback endpoint not configured (set AGENT_LEARNING_FEEDBACK_URL)")]
    FeedbackDisabled,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentChatRequest {
    pub user_id: String,
    pub agent_id: String,
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentChatResponse {
    pub response: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackRequest {
    pub user_input: String,
    pub agent_output: String,
    pub feedback: String,
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rag_id: Option<String>,
}

/// A conversational agent endpoint. Implemented by [`AgentClient`] over HTTP.
#[async_trait]
pub trait AgentChat: Send + Sync {
    /// Send one message to `agent_id` within `session_id` and return the agent's text.
    async fn chat(
        &self,
        agent_id: &str,
        session_id: &str,
        message: &str,
    ) -> Result<String, AgentClientError>;

    async fn send_feedback(
        &self,
        user_input: &str,
        agent_output: &str,
        feedback: &str,
        agent_id: &str,
    ) -> Result<(), AgentClientError>;
}

#[derive(Clone)]
pub struct AgentClient {
    config: AgentClientConfig,
    http: reqwest::Client,
}

impl AgentClient {
    pub fn new(config: AgentClientConfig) -> Result<Self, AgentClientError> {
        let http = reqwest::Client::builder()
            .user_agent("equipment-diagnostics/troubleshooter")
            .build()?;
        Ok(Self { config, http })
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.header("x-api-key", key),
            None => builder,
        }
    }

    async fn parse_json_response<T: for<'de> Deserialize<'de>>(
        resp: reqwest::Response,
        max_error_body_bytes: usize,
    ) -> Result<T, AgentClientError> {
        if resp.status().is_success() {
            let body = resp.bytes().await?;
            return Ok(serde_json::from_slice::<T>(&body)?);
        }
        Err(Self::to_upstream_error(resp, max_error_body_bytes).await)
    }

    async fn to_upstream_error(
        resp: reqwest::Response,
        max_error_body_bytes: usize,
    ) -> AgentClientError {
        let status = resp.status();
        let body = read_limited_text(resp, max_error_body_bytes).await;
        match serde_json::from_str::<UpstreamErrorEnvelope>(&body)
            .ok()
            .and_then(UpstreamErrorEnvelope::into_message)
        {
            Some(message) => AgentClientError::Upstream { status, message },
            None => AgentClientError::UpstreamBody { status, body },
        }
    }

    async fn request_with_retry<T, Fut, F>(&self, mut f: F) -> Result<T, AgentClientError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, AgentClientError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if attempt > self.config.max_retries || !should_retry(&e) {
                        return Err(e);
                    }
                    let delay = backoff_delay(
                        self.config.initial_backoff,
                        self.config.max_backoff,
                        attempt - 1,
                    );
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "agent request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl AgentChat for AgentClient {
    async fn chat(
        &self,
        agent_id: &str,
        session_id: &str,
        message: &str,
    ) -> Result<String, AgentClientError> {
        let request = AgentChatRequest {
            user_id: DEFAULT_USER_ID.to_string(),
            agent_id: agent_id.to_string(),
            session_id: session_id.to_string(),
            message: message.to_string(),
        };
        debug!(agent_id, session_id, message_len = message.len(), "agent chat request");

        let reply: AgentChatResponse = self
            .request_with_retry(|| async {
                let resp = self
                    .authorized(self.http.post(&self.config.chat_url))
                    .timeout(self.config.default_timeout)
                    .json(&request)
                    .send()
                    .await?;
                Self::parse_json_response(resp, self.config.max_error_body_bytes).await
            })
            .await?;

        reply.response.ok_or(AgentClientError::MissingResponse)
    }

    /// Forward a technician's feedback on an agent answer to the learning endpoint.
    async fn send_feedback(
        &self,
        user_input: &str,
        agent_output: &str,
        feedback: &str,
        agent_id: &str,
    ) -> Result<(), AgentClientError> {
        let url = self
            .config
            .feedback_url
            .as_deref()
            .ok_or(AgentClientError::FeedbackDisabled)?;
        let request = FeedbackRequest {
            user_input: user_input.to_string(),
            agent_output: agent_output.to_string(),
            feedback: feedback.to_string(),
            agent_id: agent_id.to_string(),
            rag_id: self.config.feedback_rag_id.clone(),
        };

        let _: serde_json::Value = self
            .request_with_retry(|| async {
                let resp = self
                    .authorized(self.http.post(url))
                    .timeout(self.config.default_timeout)
                    .json(&request)
                    .send()
                    .await?;
                Self::parse_json_response(resp, self.config.max_error_body_bytes).await
            })
            .await?;
        Ok(())
    }
}

/// Chat turns are not idempotent: a request error is retried only when the connection was
/// never established, so the agent cannot have seen the message.
fn should_retry(err: &AgentClientError) -> bool {
    match err {
        AgentClientError::Request(e) => e.is_connect(),
        AgentClientError::Upstream { status, .. }
        | AgentClientError::UpstreamBody { status, .. } => is_retryable_status(*status),
        AgentClientError::InvalidJson(_)
        | AgentClientError::MissingResponse
        | AgentClientError::FeedbackDisabled => false,
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn backoff_delay(initial: Duration, max: Duration, exponent: u32) -> Duration {
    let mult = 1u128.checked_shl(exponent).unwrap_or(u128::MAX);
    let base_ms = initial.as_millis().saturating_mul(mult);
    let capped_ms = std::cmp::min(base_ms, max.as_millis()) as u64;
    let jitter_cap = std::cmp::max(1, capped_ms / 4);
    Duration::from_millis(capped_ms.saturating_add(pseudo_jitter_ms(jitter_cap)))
}

fn pseudo_jitter_ms(max_inclusive: u64) -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .subsec_nanos() as u64;
    nanos % (max_inclusive + 1)
}

async fn read_limited_text(resp: reqwest::Response, max_bytes: usize) -> String {
    match resp.bytes().await {
        Ok(mut b) => {
            if b.len() > max_bytes {
                b.truncate(max_bytes);
            }
            String::from_utf8_lossy(&b).to_string()
        }
        Err(e) => {
            warn!(error = %e, "failed to read upstream error body");
            "<failed to read error body>".to_string()
        }
    }
}

/// Error bodies seen from the agent studio: `{"detail": "..."}` or `{"message": "..."}`.
#[derive(Debug, Deserialize)]
struct UpstreamErrorEnvelope {
    detail: Option<serde_json::Value>,
    message: Option<String>,
}

impl UpstreamErrorEnvelope {
    fn into_message(self) -> Option<String> {
        match (self.detail, self.message) {
            (Some(serde_json::Value::String(s)), _) => Some(s),
            (Some(other), _) if !other.is_null() => Some(other.to_string()),
            (_, Some(m)) => Some(m),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn retries_refused_connections_but_not_sent_requests() {
        let http = reqwest::Client::builder().no_proxy().build().unwrap();

        // nothing listens on port 1
        let refused = http
            .post("http://127.0.0.1:1/chat")
            .send()
            .await
            .unwrap_err();
        assert!(should_retry(&AgentClientError::Request(refused)));

        // accepted by the kernel backlog, never answered
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let timed_out = http
            .post(format!("http://{addr}/chat"))
            .timeout(Duration::from_millis(200))
            .body("{}")
            .send()
            .await
            .unwrap_err();
        assert!(timed_out.is_timeout());
        assert!(!should_retry(&AgentClientError::Request(timed_out)));
        drop(listener);
    }

    #[test]
    fn retries_only_throttling_and_server_errors() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
        assert!(!is_retryable_status(StatusCode::UNPROCESSABLE_ENTITY));

        assert!(!should_retry(&AgentClientError::MissingResponse));
        assert!(should_retry(&AgentClientError::UpstreamBody {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: String::new(),
        }));
    }

    #[test]
    fn backoff_is_capped_with_bounded_jitter() {
        let initial = Duration::from_millis(200);
        let max = Duration::from_millis(1_000);

        let first = backoff_delay(initial, max, 0);
        assert!(first >= Duration::from_millis(200) && first <= Duration::from_millis(250));

        let late = backoff_delay(initial, max, 40);
        assert!(late >= max && late <= Duration::from_millis(1_250));
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(AgentClientConfig::new("https://agents.example.com/chat/").is_ok());
        assert!(matches!(
            AgentClientConfig::new("ftp://agents.example.com"),
            Err(CommonError::Config(_))
        ));
        assert!(matches!(
            AgentClientConfig::new("not a url"),
            Err(CommonError::Config(_))
        ));
    }

    #[test]
    fn chat_request_uses_wire_field_names() {
        let req = AgentChatRequest {
            user_id: DEFAULT_USER_ID.to_string(),
            agent_id: "kg-agent".to_string(),
            session_id: "VIN123".to_string(),
            message: "rank these".to_string(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["user_id"], "default");
        assert_eq!(json["agent_id"], "kg-agent");
        assert_eq!(json["session_id"], "VIN123");
        assert_eq!(json["message"], "rank these");
    }

    #[test]
    fn upstream_error_message_prefers_detail() {
        let env: UpstreamErrorEnvelope =
            serde_json::from_str(r#"{"detail":"invalid api key","message":"x"}"#).unwrap();
        assert_eq!(env.into_message().as_deref(), Some("invalid api key"));

        let env: UpstreamErrorEnvelope =
            serde_json::from_str(r#"{"detail":[{"loc":["body"],"msg":"field required"}]}"#)
                .unwrap();
        assert!(env.into_message().unwrap().contains("field required"));

        let env: UpstreamErrorEnvelope = serde_json::from_str(r#"{"other":1}"#).unwrap();
        assert!(env.into_message().is_none());
    }
}
