use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::provider::EventStream;
use crate::{FinishReason, ProviderAdapter, Request, Response, StreamEvent, Usage};
use chainflow_types::ChainflowError;

const PROVIDER: &str = "openai";
const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-3.5-turbo-16k";
const STREAM_BUFFER: usize = 64;

// ---------------------------------------------------------------------------
// OpenAiAdapter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OpenAiAdapter {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
    default_model: String,
    timeout: Option<Duration>,
}

impl OpenAiAdapter {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            timeout: None,
        }
    }

    /// Build from `OPENAI_API_KEY`, honouring `OPENAI_BASE_URL` when set.
    pub fn from_env() -> Result<Self, ChainflowError> {
        Self::from_vars(
            std::env::var("OPENAI_API_KEY").ok(),
            std::env::var("OPENAI_BASE_URL").ok(),
        )
    }

    /// Build from already-read key and base URL values. Blank values count
    /// as unset.
    pub fn from_vars(
        api_key: Option<String>,
        base_url: Option<String>,
    ) -> Result<Self, ChainflowError> {
        let key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ChainflowError::AuthError {
                provider: PROVIDER.into(),
            })?;
        let adapter = Self::new(key);
        Ok(match base_url {
            Some(url) if !url.trim().is_empty() => adapter.with_base_url(url),
            _ => adapter,
        })
    }

    /// Accepts both `https://host` and `https://host/v1` forms.
    pub fn with_base_url(mut self, url: String) -> Self {
        let trimmed = url.trim().trim_end_matches('/');
        self.base_url = trimmed.strip_suffix("/v1").unwrap_or(trimmed).to_string();
        self
    }

    /// Bound every HTTP request, including the whole of a streamed body.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ChainflowError> {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainflowError::Config(format!("failed to build HTTP client: {e}")))?;
        self.timeout = Some(timeout);
        Ok(self)
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn build_request_body(&self, request: &Request, stream: bool) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|msg| json!({ "role": msg.role.as_str(), "content": msg.content }))
            .collect();

        let model = if request.model.is_empty() {
            self.default_model.as_str()
        } else {
            request.model.as_str()
        };

        let mut body = json!({
            "model": model,
            "messages": messages,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }

        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({ "include_usage": true });
        }

        body
    }

    fn parse_response(&self, body: serde_json::Value) -> Result<Response, ChainflowError> {
        let id = body["id"].as_str().unwrap_or("").to_string();
        let model = body["model"].as_str().unwrap_or("").to_string();

        let choice = body["choices"]
            .as_array()
            .and_then(|choices| choices.first())
            .ok_or_else(|| ChainflowError::ProviderError {
                provider: PROVIDER.into(),
                status: 200,
                message: "response contained no choices".into(),
            })?;

        let text = choice["message"]["content"].as_str().unwrap_or("").to_string();
        let finish_reason = FinishReason::from_openai(choice["finish_reason"].as_str());

        Ok(Response {
            id,
            text,
            usage: parse_usage(&body["usage"]),
            model,
            finish_reason,
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> ChainflowError {
        if e.is_timeout() {
            ChainflowError::RequestTimeout {
                provider: PROVIDER.into(),
                timeout_ms: self.timeout.map(|t| t.as_millis() as u64).unwrap_or(0),
            }
        } else {
            ChainflowError::ProviderError {
                provider: PROVIDER.into(),
                status: 0,
                message: e.to_string(),
            }
        }
    }

    async fn send(&self, body: &serde_json::Value) -> Result<reqwest::Response, ChainflowError> {
        let resp = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(map_error(status, &text));
        }
        Ok(resp)
    }

    async fn run_stream(
        &self,
        body: serde_json::Value,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<(), ChainflowError> {
        let mut resp = self.send(&body).await?;
        let mut decoder = SseDecoder::default();
        let mut state = StreamState::default();

        while let Some(chunk) = resp.chunk().await.map_err(|e| self.transport_error(e))? {
            for data in decoder.feed(&chunk) {
                for event in state.on_data(&data)? {
                    if tx.send(event).await.is_err() {
                        tracing::debug!("stream receiver dropped, stopping");
                        return Ok(());
                    }
                }
                if state.done {
                    return Ok(());
                }
            }
        }

        state.ensure_done()
    }
}

// ---------------------------------------------------------------------------
// Usage / error mapping
// ---------------------------------------------------------------------------

fn parse_usage(usage: &serde_json::Value) -> Usage {
    Usage::new(
        usage["prompt_tokens"].as_u64().unwrap_or(0),
        usage["completion_tokens"].as_u64().unwrap_or(0),
    )
}

fn map_error(status: reqwest::StatusCode, body: &str) -> ChainflowError {
    let status_u16 = status.as_u16();
    match status_u16 {
        429 => {
            let retry_ms = serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|v| v["error"]["retry_after"].as_f64())
                .map(|s| (s * 1000.0) as u64)
                .unwrap_or(1000);
            ChainflowError::RateLimited {
                provider: PROVIDER.into(),
                retry_after_ms: retry_ms,
            }
        }
        401 | 403 => ChainflowError::AuthError {
            provider: PROVIDER.into(),
        },
        _ => ChainflowError::ProviderError {
            provider: PROVIDER.into(),
            status: status_u16,
            message: extract_error_message(body),
        },
    }
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string())
}

// ---------------------------------------------------------------------------
// Server-sent events
// ---------------------------------------------------------------------------

/// Splits a byte stream into the payloads of `data:` lines.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}

/// Turns chat-completion chunks into [`StreamEvent`]s.
#[derive(Debug, Default)]
struct StreamState {
    started: bool,
    /// Set once the `[DONE]` sentinel has been seen.
    done: bool,
    usage: Usage,
    finish_reason: Option<FinishReason>,
}

impl StreamState {
    /// Handle one `data:` payload. `[DONE]` closes the message.
    fn on_data(&mut self, data: &str) -> Result<Vec<StreamEvent>, ChainflowError> {
        if data == "[DONE]" {
            self.done = true;
            return Ok(vec![self.finish()]);
        }
        let value: serde_json::Value = serde_json::from_str(data)?;
        Ok(self.on_chunk(&value))
    }

    /// A body that closes before `[DONE]` carries a truncated message.
    fn ensure_done(&self) -> Result<(), ChainflowError> {
        if self.done {
            return Ok(());
        }
        Err(ChainflowError::ProviderError {
            provider: PROVIDER.into(),
            status: 0,
            message: "stream ended before [DONE]".into(),
        })
    }

    fn on_chunk(&mut self, chunk: &serde_json::Value) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if !self.started {
            self.started = true;
            events.push(StreamEvent::MessageStart {
                id: chunk["id"].as_str().unwrap_or("").to_string(),
                model: chunk["model"].as_str().unwrap_or("").to_string(),
            });
        }

        if let Some(choice) = chunk["choices"].as_array().and_then(|c| c.first()) {
            if let Some(text) = choice["delta"]["content"].as_str() {
                if !text.is_empty() {
                    events.push(StreamEvent::ContentDelta {
                        text: text.to_string(),
                    });
                }
            }
            if let Some(reason) = choice["finish_reason"].as_str() {
                self.finish_reason = Some(FinishReason::from_openai(Some(reason)));
            }
        }

        if chunk["usage"].is_object() {
            self.usage = parse_usage(&chunk["usage"]);
        }
        events
    }

    fn finish(&self) -> StreamEvent {
        StreamEvent::MessageEnd {
            usage: self.usage,
            finish_reason: self.finish_reason.unwrap_or(FinishReason::EndTurn),
        }
    }
}

// ---------------------------------------------------------------------------
// ProviderAdapter implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    async fn complete(&self, request: &Request) -> Result<Response, ChainflowError> {
        let body = self.build_request_body(request, false);
        let resp = self.send(&body).await?;
        let status = resp.status();
        let response_body = resp.text().await.map_err(|e| self.transport_error(e))?;

        let json: serde_json::Value =
            serde_json::from_str(&response_body).map_err(|e| ChainflowError::ProviderError {
                provider: PROVIDER.into(),
                status: status.as_u16(),
                message: format!("Failed to parse response JSON: {e}"),
            })?;

        self.parse_response(json)
    }

    fn stream(&self, request: &Request) -> EventStream<'_> {
        let body = self.build_request_body(request, true);
        let adapter = self.clone();
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        tokio::spawn(async move {
            if let Err(e) = adapter.run_stream(body, &tx).await {
                tracing::warn!(error = %e, "OpenAI stream failed");
                let _ = tx.send(StreamEvent::Error(Arc::new(e))).await;
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }

    fn name(&self) -> &str {
        PROVIDER
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn supports_streaming(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Message, Role};

    fn make_basic_request() -> Request {
        Request {
            model: "gpt-4o".into(),
            messages: vec![
                Message {
                    role: Role::System,
                    content: "You are helpful.".into(),
                },
                Message::user("Hello"),
            ],
            temperature: Some(0.7),
            max_tokens: Some(4096),
            provider: Some("openai".into()),
        }
    }

    #[test]
    fn from_vars_with_key_returns_ok_and_without_key_returns_err() {
        let adapter = OpenAiAdapter::from_vars(Some("test-key-12345".into()), None).unwrap();
        assert_eq!(adapter.name(), "openai");
        assert_eq!(adapter.default_model(), "gpt-3.5-turbo-16k");
        assert_eq!(adapter.base_url, "https://api.openai.com");

        let err = OpenAiAdapter::from_vars(None, None).unwrap_err();
        assert!(matches!(err, ChainflowError::AuthError { provider } if provider == "openai"));
        assert!(OpenAiAdapter::from_vars(Some("  ".into()), None).is_err());
    }

    #[test]
    fn from_vars_honours_base_url() {
        let adapter = OpenAiAdapter::from_vars(
            Some("key".into()),
            Some("http://localhost:8080/v1".into()),
        )
        .unwrap();
        assert_eq!(adapter.base_url, "http://localhost:8080");

        let blank = OpenAiAdapter::from_vars(Some("key".into()), Some(" ".into())).unwrap();
        assert_eq!(blank.base_url, "https://api.openai.com");
    }

    #[test]
    fn build_request_body_produces_chat_messages() {
        let adapter = OpenAiAdapter::new("test-key".into());
        let body = adapter.build_request_body(&make_basic_request(), false);

        assert_eq!(body["model"], "gpt-4o");
        let messages = body["messages"].as_array().expect("messages should be an array");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "You are helpful.");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[1]["content"], "Hello");
        assert_eq!(body["max_tokens"], 4096);
        let temp = body["temperature"].as_f64().unwrap();
        assert!((temp - 0.7).abs() < 0.01);
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn build_request_body_for_streaming_requests_usage() {
        let adapter = OpenAiAdapter::new("test-key".into());
        let body = adapter.build_request_body(&Request::prompt("", "Hi"), true);
        assert_eq!(body["model"], "gpt-3.5-turbo-16k");
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert!(body.get("temperature").is_none());
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn parse_response_handles_complete_response() {
        let adapter = OpenAiAdapter::new("test-key".into());
        let resp = adapter
            .parse_response(json!({
                "id": "chatcmpl-abc123",
                "model": "gpt-3.5-turbo-16k-0613",
                "choices": [{
                    "index": 0,
                    "message": { "role": "assistant", "content": "Hello! How can I help you?" },
                    "finish_reason": "stop"
                }],
                "usage": { "prompt_tokens": 100, "completion_tokens": 50, "total_tokens": 150 }
            }))
            .unwrap();
        assert_eq!(resp.id, "chatcmpl-abc123");
        assert_eq!(resp.model, "gpt-3.5-turbo-16k-0613");
        assert_eq!(resp.text, "Hello! How can I help you?");
        assert_eq!(resp.finish_reason, FinishReason::EndTurn);
        assert_eq!(resp.usage, Usage::new(100, 50));
    }

    #[test]
    fn parse_response_length_finish() {
        let adapter = OpenAiAdapter::new("test-key".into());
        let resp = adapter
            .parse_response(json!({
                "id": "x",
                "model": "gpt-4o",
                "choices": [{ "message": { "content": "Partial" }, "finish_reason": "length" }],
                "usage": { "prompt_tokens": 5, "completion_tokens": 4096 }
            }))
            .unwrap();
        assert_eq!(resp.finish_reason, FinishReason::MaxTokens);
    }

    #[test]
    fn parse_response_without_choices_is_error() {
        let adapter = OpenAiAdapter::new("test-key".into());
        let err = adapter
            .parse_response(json!({ "id": "x", "choices": [] }))
            .unwrap_err();
        assert!(matches!(err, ChainflowError::ProviderError { status: 200, .. }));
    }

    #[test]
    fn with_base_url_strips_version_suffix() {
        let adapter = OpenAiAdapter::new("key".into()).with_base_url("https://custom.api.com/v1/".into());
        assert_eq!(adapter.base_url, "https://custom.api.com");
        assert_eq!(adapter.endpoint(), "https://custom.api.com/v1/chat/completions");
    }

    #[test]
    fn with_timeout_records_timeout() {
        let adapter = OpenAiAdapter::new("key".into())
            .with_timeout(Duration::from_secs(30))
            .unwrap();
        assert_eq!(adapter.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn error_mapping_429_rate_limited() {
        let err = map_error(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            r#"{"error": {"message": "rate limited", "retry_after": 3.0}}"#,
        );
        assert!(matches!(err, ChainflowError::RateLimited { retry_after_ms: 3000, .. }));
    }

    #[test]
    fn error_mapping_401_auth() {
        let err = map_error(
            reqwest::StatusCode::UNAUTHORIZED,
            r#"{"error": {"message": "invalid api key"}}"#,
        );
        assert!(matches!(err, ChainflowError::AuthError { .. }));
    }

    #[test]
    fn error_mapping_500_is_transient() {
        let err = map_error(
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"error": {"message": "server error"}}"#,
        );
        match &err {
            ChainflowError::ProviderError { status, message, .. } => {
                assert_eq!(*status, 500);
                assert_eq!(message, "server error");
            }
            _ => panic!("expected ProviderError"),
        }
        assert!(err.is_transient());
    }

    #[test]
    fn error_mapping_keeps_plain_body() {
        let err = map_error(reqwest::StatusCode::BAD_REQUEST, "not json");
        assert!(matches!(err, ChainflowError::ProviderError { ref message, status: 400, .. } if message == "not json"));
    }

    #[test]
    fn sse_decoder_handles_split_lines() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.feed(b"data: {\"a\"").is_empty());
        let out = decoder.feed(b":1}\r\n\r\ndata: [DONE]\n");
        assert_eq!(out, vec!["{\"a\":1}".to_string(), "[DONE]".to_string()]);
    }

    #[test]
    fn sse_decoder_ignores_comments_and_other_fields() {
        let mut decoder = SseDecoder::default();
        let out = decoder.feed(b": keep-alive\nevent: message\ndata: x\n");
        assert_eq!(out, vec!["x".to_string()]);
    }

    #[test]
    fn stream_state_emits_start_deltas_and_end() {
        let mut state = StreamState::default();
        let first = state.on_chunk(&json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o",
            "choices": [{ "delta": { "role": "assistant", "content": "" }, "finish_reason": null }]
        }));
        assert_eq!(first.len(), 1);
        assert!(matches!(&first[0], StreamEvent::MessageStart { id, .. } if id == "chatcmpl-1"));

        let second = state.on_chunk(&json!({
            "choices": [{ "delta": { "content": "Hi" }, "finish_reason": null }]
        }));
        assert!(matches!(&second[0], StreamEvent::ContentDelta { text } if text == "Hi"));

        state.on_chunk(&json!({ "choices": [{ "delta": {}, "finish_reason": "stop" }] }));
        state.on_chunk(&json!({
            "choices": [],
            "usage": { "prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4 }
        }));

        match state.finish() {
            StreamEvent::MessageEnd { usage, finish_reason } => {
                assert_eq!(usage.total_tokens, 4);
                assert_eq!(finish_reason, FinishReason::EndTurn);
            }
            other => panic!("expected MessageEnd, got {other:?}"),
        }
    }

    fn decode_body(body: &[u8]) -> (Vec<StreamEvent>, StreamState) {
        let mut decoder = SseDecoder::default();
        let mut state = StreamState::default();
        let mut events = Vec::new();
        for data in decoder.feed(body) {
            events.extend(state.on_data(&data).unwrap());
            if state.done {
                break;
            }
        }
        (events, state)
    }

    #[test]
    fn body_with_done_closes_message() {
        let (events, state) = decode_body(
            b"data: {\"id\":\"c1\",\"model\":\"gpt-4o\",\"choices\":[{\"delta\":{\"content\":\"All\"}}]}\n\n\
              data: [DONE]\n\n",
        );
        assert_eq!(events.len(), 3);
        assert!(matches!(events.last(), Some(StreamEvent::MessageEnd { .. })));
        assert!(state.ensure_done().is_ok());
    }

    #[test]
    fn body_cut_before_done_is_provider_error() {
        let (events, state) = decode_body(
            b"data: {\"id\":\"c1\",\"model\":\"gpt-4o\",\"choices\":[{\"delta\":{\"content\":\"Half an ans\"}}]}\n\n",
        );
        assert!(!events
            .iter()
            .any(|e| matches!(e, StreamEvent::MessageEnd { .. })));

        let err = state.ensure_done().unwrap_err();
        match err {
            ChainflowError::ProviderError { status, message, .. } => {
                assert_eq!(status, 0);
                assert!(message.contains("[DONE]"));
            }
            other => panic!("expected ProviderError, got {other:?}"),
        }
    }

    #[test]
    fn malformed_chunk_is_json_error() {
        let mut state = StreamState::default();
        assert!(matches!(state.on_data("{not json"), Err(ChainflowError::Json(_))));
    }
}
