use std::time::Duration;

use futures_util::StreamExt;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::sleep;
use tracing::{debug, warn};

use super::gateway::{
    ChatDeltaStream, ChatModel, ChatModelFuture, ChatModelRequest, ChatReply, ChatStreamFuture,
    LlmGatewayError, LlmTokenUsage,
};
use crate::config::ConfigError;
use crate::config_env::{
    optional_trimmed_env, parse_f32_env, parse_u32_env, parse_u64_env, require_identifier,
};
use crate::models::ChatRole;

const DEFAULT_API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_RETRY_BASE_BACKOFF_MS: u64 = 250;

const DEFAULT_PRIMARY_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_FALLBACK_MODEL: &str = "gemini-1.5-flash";
const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1024;

const API_KEY_HEADER: &str = "x-goog-api-key";
const BLOCKING_FINISH_REASONS: [&str; 4] = ["SAFETY", "BLOCKLIST", "PROHIBITED_CONTENT", "SPII"];

#[derive(Debug, Clone)]
pub struct GeminiModelRoute {
    pub primary_model: String,
    pub fallback_model: Option<String>,
}

impl GeminiModelRoute {
    fn candidate_models(&self) -> Vec<&str> {
        let mut candidates = Vec::new();
        if !self.primary_model.is_empty() {
            candidates.push(self.primary_model.as_str());
        }

        if let Some(fallback_model) = self.fallback_model.as_deref()
            && !fallback_model.is_empty()
            && fallback_model != self.primary_model
        {
            candidates.push(fallback_model);
        }

        candidates
    }
}

/// Sampling settings sent as `generationConfig` with every request.
#[derive(Debug, Clone, PartialEq)]
pub struct GeminiGenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for GeminiGenerationConfig {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }
}

impl GeminiGenerationConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let temperature = parse_f32_env("GEMINI_TEMPERATURE", DEFAULT_TEMPERATURE)?;
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::InvalidConfiguration(
                "GEMINI_TEMPERATURE must be between 0.0 and 2.0".to_string(),
            ));
        }
        let max_output_tokens =
            parse_u32_env("GEMINI_MAX_OUTPUT_TOKENS", DEFAULT_MAX_OUTPUT_TOKENS)?;
        if max_output_tokens == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "GEMINI_MAX_OUTPUT_TOKENS must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            temperature,
            max_output_tokens,
        })
    }
}

#[derive(Debug, Clone)]
pub struct GeminiGatewayConfig {
    pub api_base_url: String,
    pub api_key: String,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_backoff_ms: u64,
    pub model_route: GeminiModelRoute,
    pub generation: GeminiGenerationConfig,
}

impl GeminiGatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = require_identifier("GEMINI_API_KEY")?;
        let api_base_url = optional_trimmed_env("GEMINI_API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        if !api_base_url.starts_with("http://") && !api_base_url.starts_with("https://") {
            return Err(ConfigError::InvalidConfiguration(
                "GEMINI_API_BASE_URL must start with http:// or https://".to_string(),
            ));
        }

        Ok(Self {
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout_ms: parse_u64_env("GEMINI_TIMEOUT_MS", DEFAULT_TIMEOUT_MS)?,
            max_retries: parse_u32_env("GEMINI_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            retry_base_backoff_ms: parse_u64_env(
                "GEMINI_RETRY_BASE_BACKOFF_MS",
                DEFAULT_RETRY_BASE_BACKOFF_MS,
            )?,
            model_route: GeminiModelRoute {
                primary_model: optional_trimmed_env("GEMINI_MODEL_PRIMARY")
                    .unwrap_or_else(|| DEFAULT_PRIMARY_MODEL.to_string()),
                fallback_model: optional_trimmed_env("GEMINI_MODEL_FALLBACK")
                    .or_else(|| Some(DEFAULT_FALLBACK_MODEL.to_string())),
            },
            generation: GeminiGenerationConfig::from_env()?,
        })
    }
}

#[derive(Clone)]
pub struct GeminiGateway {
    client: reqwest::Client,
    config: GeminiGatewayConfig,
}

impl GeminiGateway {
    pub fn new(config: GeminiGatewayConfig) -> Result<Self, LlmGatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| LlmGatewayError::ProviderFailure(format!("http_client: {err}")))?;

        Ok(Self { client, config })
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/models/{model}:{method}", self.config.api_base_url)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let multiplier = 2_u64.saturating_pow(attempt);
        Duration::from_millis(self.config.retry_base_backoff_ms.saturating_mul(multiplier))
    }

    /// Runs `attempt` against each candidate model with retries, stopping at
    /// the first success or at an error that forbids falling back.
    async fn with_model_route<T, F, Fut>(&self, mut attempt: F) -> Result<T, LlmGatewayError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, SendAttemptError>>,
    {
        let candidate_models = self.config.model_route.candidate_models();

        for (index, model) in candidate_models.iter().enumerate() {
            let mut retry = 0_u32;
            let outcome = loop {
                match attempt((*model).to_string()).await {
                    Ok(value) => break Ok(value),
                    Err(err) if err.retryable && retry < self.config.max_retries => {
                        debug!(model, retry, error = %err.error, "retrying gemini request");
                        sleep(self.backoff(retry)).await;
                        retry = retry.saturating_add(1);
                    }
                    Err(err) => break Err(err),
                }
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let has_more_candidates = index + 1 < candidate_models.len();
                    if has_more_candidates && err.fallback_allowed {
                        warn!(model, error = %err.error, "falling back to next gemini model");
                        continue;
                    }
                    return Err(err.error);
                }
            }
        }

        Err(LlmGatewayError::ProviderFailure(
            "no_gemini_model_candidates".to_string(),
        ))
    }

    async fn post(
        &self,
        url: String,
        body: &Value,
    ) -> Result<reqwest::Response, SendAttemptError> {
        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    SendAttemptError::retryable(LlmGatewayError::Timeout)
                } else {
                    SendAttemptError::retryable(LlmGatewayError::ProviderFailure(
                        "request_unavailable".to_string(),
                    ))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(SendAttemptError {
            error: LlmGatewayError::ProviderFailure(format!(
                "status={} code={}",
                status.as_u16(),
                parse_provider_error_code(&body)
            )),
            retryable: is_retryable_status(status),
            fallback_allowed: status != StatusCode::UNAUTHORIZED
                && status != StatusCode::FORBIDDEN,
        })
    }

    async fn generate_once(
        &self,
        model: String,
        body: &Value,
    ) -> Result<ChatReply, SendAttemptError> {
        let response = self.post(self.endpoint(&model, "generateContent"), body).await?;
        let raw = response.text().await.map_err(|_| {
            SendAttemptError::non_retryable(LlmGatewayError::InvalidProviderPayload(
                "response_body_read_failed".to_string(),
            ))
        })?;
        let parsed: GenerateContentResponse = serde_json::from_str(&raw).map_err(|_| {
            SendAttemptError::non_retryable(LlmGatewayError::InvalidProviderPayload(
                "response_json_parse_failed".to_string(),
            ))
        })?;

        let chunk = parsed.into_chunk();
        if let Some(reason) = chunk.blocked_reason {
            return Err(SendAttemptError::blocked(reason));
        }
        if chunk.text.trim().is_empty() {
            return Err(SendAttemptError::non_retryable(
                LlmGatewayError::InvalidProviderPayload("empty_candidate".to_string()),
            ));
        }

        Ok(ChatReply {
            model: chunk.model_version.unwrap_or(model),
            text: chunk.text,
            finish_reason: chunk.finish_reason,
            usage: chunk.usage,
        })
    }
}

impl ChatModel for GeminiGateway {
    fn generate<'a>(&'a self, request: ChatModelRequest) -> ChatModelFuture<'a> {
        Box::pin(async move {
            let body = request_body(&request, &self.config.generation);
            self.with_model_route(|model| {
                let body = &body;
                async move { self.generate_once(model, body).await }
            })
            .await
        })
    }

    fn stream<'a>(&'a self, request: ChatModelRequest) -> ChatStreamFuture<'a> {
        Box::pin(async move {
            let body = request_body(&request, &self.config.generation);
            // Retries and fallback only cover opening the stream.
            let response = self
                .with_model_route(|model| {
                    let body = &body;
                    async move {
                        let url = format!("{}?alt=sse", self.endpoint(&model, "streamGenerateContent"));
                        self.post(url, body).await
                    }
                })
                .await?;

            Ok(sse_deltas(response))
        })
    }
}

fn sse_deltas(response: reqwest::Response) -> ChatDeltaStream {
    Box::pin(async_stream::try_stream! {
        let mut bytes = response.bytes_stream();
        let mut buffer = Vec::new();
        let mut produced_text = false;

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|err| {
                if err.is_timeout() {
                    LlmGatewayError::Timeout
                } else {
                    LlmGatewayError::ProviderFailure("stream_interrupted".to_string())
                }
            })?;
            buffer.extend_from_slice(&chunk);

            while let Some(line) = take_line(&mut buffer) {
                let line = line?;
                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim_start();
                if data.is_empty() || data == "[DONE]" {
                    continue;
                }

                if let Some(text) = delta_from_event(data)? {
                    produced_text = true;
                    yield text;
                }
            }
        }

        if !produced_text {
            Err::<(), _>(LlmGatewayError::InvalidProviderPayload("empty_candidate".to_string()))?;
        }
    })
}

/// Removes the next complete line from `buffer`. Bytes after the last
/// newline stay buffered, so a character split across network reads is
/// decoded only once both halves have arrived.
fn take_line(buffer: &mut Vec<u8>) -> Option<Result<String, LlmGatewayError>> {
    let line_end = buffer.iter().position(|byte| *byte == b'\n')?;
    let mut line = buffer.drain(..=line_end).collect::<Vec<_>>();
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }

    Some(String::from_utf8(line).map_err(|_| {
        LlmGatewayError::InvalidProviderPayload("stream_event_not_utf8".to_string())
    }))
}

/// Text carried by one SSE `data:` payload, if any.
fn delta_from_event(data: &str) -> Result<Option<String>, LlmGatewayError> {
    let chunk = serde_json::from_str::<GenerateContentResponse>(data)
        .map(GenerateContentResponse::into_chunk)
        .map_err(|_| {
            LlmGatewayError::InvalidProviderPayload("stream_event_parse_failed".to_string())
        })?;
    if let Some(reason) = chunk.blocked_reason {
        return Err(LlmGatewayError::Blocked(reason));
    }
    Ok((!chunk.text.is_empty()).then_some(chunk.text))
}

fn request_body(request: &ChatModelRequest, generation: &GeminiGenerationConfig) -> Value {
    let contents = request
        .turns
        .iter()
        .map(|turn| {
            let role = match turn.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "model",
            };
            let mut parts = vec![json!({ "text": turn.text })];
            if let Some(image) = &turn.image {
                parts.push(json!({
                    "inlineData": {
                        "mimeType": image.mime_type,
                        "data": image.data,
                    }
                }));
            }
            json!({ "role": role, "parts": parts })
        })
        .collect::<Vec<_>>();

    json!({
        "systemInstruction": { "parts": [{ "text": request.system_instruction }] },
        "contents": contents,
        "generationConfig": {
            "temperature": generation.temperature,
            "maxOutputTokens": generation.max_output_tokens,
        },
    })
}

#[derive(Debug)]
struct SendAttemptError {
    error: LlmGatewayError,
    retryable: bool,
    fallback_allowed: bool,
}

impl SendAttemptError {
    fn retryable(error: LlmGatewayError) -> Self {
        Self {
            error,
            retryable: true,
            fallback_allowed: true,
        }
    }

    fn non_retryable(error: LlmGatewayError) -> Self {
        Self {
            error,
            retryable: false,
            fallback_allowed: true,
        }
    }

    fn blocked(reason: String) -> Self {
        Self {
            error: LlmGatewayError::Blocked(reason),
            retryable: false,
            fallback_allowed: false,
        }
    }
}

#[derive(Debug, Default)]
struct ContentChunk {
    text: String,
    finish_reason: Option<String>,
    blocked_reason: Option<String>,
    model_version: Option<String>,
    usage: Option<LlmTokenUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    prompt_feedback: Option<GeminiPromptFeedback>,
    usage_metadata: Option<GeminiUsage>,
    model_version: Option<String>,
}

impl GenerateContentResponse {
    fn into_chunk(self) -> ContentChunk {
        let prompt_block = self
            .prompt_feedback
            .and_then(|feedback| feedback.block_reason);
        let usage = self.usage_metadata.map(|usage| LlmTokenUsage {
            prompt_tokens: clamp_u64_to_u32(usage.prompt_token_count.unwrap_or(0)),
            completion_tokens: clamp_u64_to_u32(usage.candidates_token_count.unwrap_or(0)),
            total_tokens: clamp_u64_to_u32(usage.total_token_count.unwrap_or(0)),
        });

        let Some(candidate) = self.candidates.into_iter().next() else {
            return ContentChunk {
                blocked_reason: prompt_block,
                model_version: self.model_version,
                usage,
                ..ContentChunk::default()
            };
        };

        let text = candidate
            .content
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<String>()
            })
            .unwrap_or_default();
        let candidate_block = candidate.finish_reason.as_deref().and_then(|reason| {
            (text.is_empty() && BLOCKING_FINISH_REASONS.contains(&reason))
                .then(|| reason.to_string())
        });

        ContentChunk {
            text,
            blocked_reason: prompt_block.or(candidate_block),
            finish_reason: candidate.finish_reason,
            model_version: self.model_version,
            usage,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
    total_token_count: Option<u64>,
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn parse_provider_error_code(body: &str) -> String {
    #[derive(Deserialize)]
    struct ProviderErrorEnvelope {
        error: Option<ProviderErrorDetails>,
    }

    #[derive(Deserialize)]
    struct ProviderErrorDetails {
        status: Option<String>,
        code: Option<Value>,
    }

    let Some(details) = serde_json::from_str::<ProviderErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error)
    else {
        return "unknown".to_string();
    };

    match (details.status, details.code) {
        (Some(status), _) => status,
        (None, Some(Value::Number(code))) => code.to_string(),
        (None, Some(Value::String(code))) => code,
        _ => "unknown".to_string(),
    }
}

fn clamp_u64_to_u32(value: u64) -> u32 {
    value.min(u32::MAX as u64) as u32
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        GeminiGenerationConfig, GenerateContentResponse, parse_provider_error_code, request_body,
        take_line,
    };
    use crate::llm::gateway::LlmGatewayError;
    use crate::llm::gateway::{ChatModelRequest, ChatTurn};
    use crate::models::{ChatRole, InlineImage};

    #[test]
    fn request_body_maps_roles_and_inline_images() {
        let request = ChatModelRequest {
            system_instruction: "be kind".to_string(),
            turns: vec![
                ChatTurn {
                    role: ChatRole::User,
                    text: "hi".to_string(),
                    image: None,
                },
                ChatTurn {
                    role: ChatRole::Assistant,
                    text: "hello".to_string(),
                    image: None,
                },
                ChatTurn {
                    role: ChatRole::User,
                    text: "what is this rash?".to_string(),
                    image: Some(InlineImage {
                        mime_type: "image/jpeg".to_string(),
                        data: "Zm9v".to_string(),
                    }),
                },
            ],
        };
        let generation = GeminiGenerationConfig {
            temperature: 0.25,
            max_output_tokens: 256,
        };

        let body = request_body(&request, &generation);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be kind");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["contents"][2]["parts"][1]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(body["generationConfig"]["temperature"], 0.25);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
    }

    #[test]
    fn lines_wait_for_split_characters_to_complete() {
        let line = "data: {\"text\":\"नमस्ते\"}\r\n".as_bytes();
        let split_at = line
            .iter()
            .position(|byte| !byte.is_ascii())
            .expect("line has a multibyte character")
            + 1;

        let mut buffer = line[..split_at].to_vec();
        assert!(take_line(&mut buffer).is_none());

        buffer.extend_from_slice(&line[split_at..]);
        let decoded = take_line(&mut buffer)
            .expect("line should be complete")
            .expect("line should decode");
        assert_eq!(decoded, "data: {\"text\":\"नमस्ते\"}");
        assert!(buffer.is_empty());
    }

    #[test]
    fn invalid_utf8_lines_are_rejected() {
        let mut buffer = vec![b'd', 0xff, 0xfe, b'\n', b'x'];
        assert!(matches!(
            take_line(&mut buffer),
            Some(Err(LlmGatewayError::InvalidProviderPayload(ref code))) if code == "stream_event_not_utf8"
        ));
        assert_eq!(buffer, vec![b'x']);
    }

    #[test]
    fn safety_finish_without_text_is_blocked() {
        let parsed: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{ "finishReason": "SAFETY" }]
        }))
        .expect("payload should parse");
        let chunk = parsed.into_chunk();
        assert_eq!(chunk.blocked_reason.as_deref(), Some("SAFETY"));

        let parsed: GenerateContentResponse = serde_json::from_value(json!({
            "promptFeedback": { "blockReason": "OTHER" }
        }))
        .expect("payload should parse");
        assert_eq!(parsed.into_chunk().blocked_reason.as_deref(), Some("OTHER"));
    }

    #[test]
    fn joins_text_parts_and_reads_usage() {
        let parsed: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": "Stay " }, { "text": "hydrated." }] },
                "finishReason": "STOP"
            }],
            "usageMetadata": { "promptTokenCount": 10, "candidatesTokenCount": 4, "totalTokenCount": 14 },
            "modelVersion": "gemini-2.0-flash-001"
        }))
        .expect("payload should parse");
        let chunk = parsed.into_chunk();
        assert_eq!(chunk.text, "Stay hydrated.");
        assert!(chunk.blocked_reason.is_none());
        assert_eq!(chunk.usage.map(|usage| usage.total_tokens), Some(14));
    }

    #[test]
    fn provider_error_code_prefers_status_name() {
        assert_eq!(
            parse_provider_error_code(r#"{"error":{"code":429,"status":"RESOURCE_EXHAUSTED"}}"#),
            "RESOURCE_EXHAUSTED"
        );
        assert_eq!(parse_provider_error_code("oops"), "unknown");
    }
}
