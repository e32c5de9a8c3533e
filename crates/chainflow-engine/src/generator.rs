//! The text-generation capability the engine drives.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_stream::StreamExt;

use chainflow_llm::{LlmClient, Request, StreamEvent, Usage};
use chainflow_types::{ChainflowError, Result, StepUsage};

/// Per-call settings handed to a [`Generator`].
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Output name of the step being generated.
    pub step: String,
    pub model: String,
    pub temperature: f32,
    /// Stream text to the terminal as it arrives.
    pub stream: bool,
}

/// Text produced for one step plus what it cost.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub usage: StepUsage,
}

/// Turns a rendered prompt into text.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str, request: &GenerationRequest) -> Result<Generation>;
}

// ---------------------------------------------------------------------------
// ChunkSink
// ---------------------------------------------------------------------------

/// Destination for streamed text.
pub trait ChunkSink: Send + Sync {
    fn write_chunk(&self, text: &str);
    /// Called once the step's stream is exhausted.
    fn end_message(&self) {}
}

/// Writes chunks to stdout, separating steps with a blank line.
pub struct StdoutSink;

impl ChunkSink for StdoutSink {
    fn write_chunk(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }

    fn end_message(&self) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(b"\n\n");
        let _ = out.flush();
    }
}

// ---------------------------------------------------------------------------
// LlmGenerator
// ---------------------------------------------------------------------------

/// [`Generator`] backed by an [`LlmClient`], pricing each call from the
/// client's catalog.
pub struct LlmGenerator {
    client: LlmClient,
    sink: Arc<dyn ChunkSink>,
}

impl LlmGenerator {
    pub fn new(client: LlmClient) -> Self {
        Self {
            client,
            sink: Arc::new(StdoutSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ChunkSink>) -> Self {
        self.sink = sink;
        self
    }

    fn step_usage(&self, model: &str, usage: &Usage) -> StepUsage {
        StepUsage {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            cost_usd: self.client.pricing().cost(model, usage),
        }
    }

    async fn generate_streaming(&self, req: &Request) -> Result<Generation> {
        let mut stream = self.client.stream(req)?;
        let mut text = String::new();
        let mut model = req.model.clone();
        let mut usage = Usage::default();
        let mut ended = false;

        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::MessageStart { model: m, .. } if !m.is_empty() => model = m,
                StreamEvent::MessageStart { .. } => {}
                StreamEvent::ContentDelta { text: delta } => {
                    self.sink.write_chunk(&delta);
                    text.push_str(&delta);
                }
                StreamEvent::MessageEnd { usage: u, .. } => {
                    usage = u;
                    ended = true;
                }
                StreamEvent::Error(e) => {
                    return Err(Arc::try_unwrap(e)
                        .unwrap_or_else(|shared| ChainflowError::Other(shared.to_string())));
                }
            }
        }
        if !ended {
            return Err(ChainflowError::ProviderError {
                provider: req
                    .provider
                    .clone()
                    .or_else(|| self.client.pricing().provider_for_model(&req.model).map(String::from))
                    .unwrap_or_else(|| "unknown".into()),
                status: 0,
                message: "stream closed without an end-of-message event".into(),
            });
        }
        self.sink.end_message();

        Ok(Generation {
            text,
            usage: self.step_usage(&model, &usage),
        })
    }
}

#[async_trait]
impl Generator for LlmGenerator {
    async fn generate(&self, prompt: &str, request: &GenerationRequest) -> Result<Generation> {
        let req = Request::prompt(&request.model, prompt).with_temperature(request.temperature);

        if request.stream {
            return self.generate_streaming(&req).await;
        }

        let resp = self.client.complete(&req).await?;
        Ok(Generation {
            usage: self.step_usage(&resp.model, &resp.usage),
            text: resp.text,
        })
    }
}
