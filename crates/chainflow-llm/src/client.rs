use std::collections::HashMap;

use chainflow_types::ChainflowError;

use crate::provider::EventStream;
use crate::{DynProvider, ProviderAdapter, Request, Response, Usage};

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

pub trait Middleware: Send + Sync {
    fn before(&self, _request: &mut Request) {}
    fn after(&self, _request: &Request, _response: &mut Response) {}
}

// ---------------------------------------------------------------------------
// Built-in middleware: LoggingMiddleware
// ---------------------------------------------------------------------------

pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn before(&self, request: &mut Request) {
        tracing::info!(
            model = %request.model,
            messages = request.messages.len(),
            prompt_chars = request.messages.iter().map(|m| m.content.len()).sum::<usize>(),
            "LLM request"
        );
    }

    fn after(&self, _request: &Request, response: &mut Response) {
        tracing::info!(
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            finish = ?response.finish_reason,
            "LLM response"
        );
    }
}

// ---------------------------------------------------------------------------
// ModelPricing / PricingCatalog
// ---------------------------------------------------------------------------

/// USD per 1K tokens for one model family.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPricing {
    pub id: String,
    pub provider: String,
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

impl ModelPricing {
    pub fn cost(&self, usage: &Usage) -> f64 {
        (usage.input_tokens as f64 / 1000.0) * self.prompt_per_1k
            + (usage.output_tokens as f64 / 1000.0) * self.completion_per_1k
    }
}

pub struct PricingCatalog {
    models: HashMap<String, ModelPricing>,
}

impl PricingCatalog {
    pub fn new() -> Self {
        let mut catalog = Self::empty();
        for (id, prompt, completion) in [
            ("gpt-3.5-turbo", 0.0015, 0.002),
            ("gpt-3.5-turbo-16k", 0.003, 0.004),
            ("gpt-3.5-turbo-instruct", 0.0015, 0.002),
            ("gpt-4", 0.03, 0.06),
            ("gpt-4-32k", 0.06, 0.12),
            ("gpt-4-turbo", 0.01, 0.03),
            ("gpt-4o", 0.0025, 0.01),
            ("gpt-4o-mini", 0.00015, 0.0006),
        ] {
            catalog.insert(ModelPricing {
                id: id.to_string(),
                provider: "openai".to_string(),
                prompt_per_1k: prompt,
                completion_per_1k: completion,
            });
        }
        catalog
    }

    pub fn empty() -> Self {
        Self {
            models: HashMap::new(),
        }
    }

    pub fn insert(&mut self, pricing: ModelPricing) {
        self.models.insert(pricing.id.clone(), pricing);
    }

    /// Exact match first, then the longest known id that prefixes `model`
    /// (so dated snapshots like `gpt-4-0613` price as `gpt-4`).
    pub fn lookup(&self, model: &str) -> Option<&ModelPricing> {
        if let Some(pricing) = self.models.get(model) {
            return Some(pricing);
        }
        self.models
            .values()
            .filter(|p| model.starts_with(p.id.as_str()) && model[p.id.len()..].starts_with('-'))
            .max_by_key(|p| p.id.len())
    }

    pub fn provider_for_model(&self, model: &str) -> Option<&str> {
        self.lookup(model).map(|m| m.provider.as_str())
    }

    /// Cost of a call in USD; unknown models cost nothing.
    pub fn cost(&self, model: &str, usage: &Usage) -> f64 {
        match self.lookup(model) {
            Some(pricing) => pricing.cost(usage),
            None => {
                tracing::debug!(model, "no pricing for model, cost recorded as 0");
                0.0
            }
        }
    }
}

impl Default for PricingCatalog {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// LlmClient
// ---------------------------------------------------------------------------

pub struct LlmClient {
    providers: HashMap<String, DynProvider>,
    pricing: PricingCatalog,
    middleware: Vec<Box<dyn Middleware>>,
}

impl LlmClient {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            pricing: PricingCatalog::new(),
            middleware: Vec::new(),
        }
    }

    pub fn register_provider(&mut self, provider: impl ProviderAdapter + 'static) {
        let name = provider.name().to_string();
        self.providers.insert(name, DynProvider::new(provider));
    }

    pub fn with_middleware(mut self, m: impl Middleware + 'static) -> Self {
        self.middleware.push(Box::new(m));
        self
    }

    pub fn with_pricing(mut self, pricing: PricingCatalog) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn pricing(&self) -> &PricingCatalog {
        &self.pricing
    }

    pub async fn complete(&self, request: &Request) -> Result<Response, ChainflowError> {
        let (provider, req) = self.prepare(request)?;
        let mut resp = provider.complete(&req).await?;

        for m in &self.middleware {
            m.after(&req, &mut resp);
        }

        Ok(resp)
    }

    /// Start a streamed completion. Only `before` middleware runs; the
    /// response is assembled by the caller.
    pub fn stream(&self, request: &Request) -> Result<EventStream<'_>, ChainflowError> {
        let (provider, req) = self.prepare(request)?;
        if !provider.supports_streaming() {
            return Err(ChainflowError::Other(format!(
                "Provider '{}' does not support streaming",
                provider.name()
            )));
        }
        Ok(provider.stream(&req))
    }

    /// Resolve the provider, fill an empty model from its default, and run
    /// `before` middleware.
    fn prepare(&self, request: &Request) -> Result<(&DynProvider, Request), ChainflowError> {
        let provider = self.resolve_provider(request)?;
        let mut req = request.clone();
        if req.model.is_empty() {
            req.model = provider.default_model().to_string();
        }

        for m in &self.middleware {
            m.before(&mut req);
        }
        Ok((provider, req))
    }

    fn resolve_provider(&self, request: &Request) -> Result<&DynProvider, ChainflowError> {
        if let Some(ref provider_name) = request.provider {
            return self.providers.get(provider_name).ok_or_else(|| {
                ChainflowError::Other(format!("Provider '{}' not registered", provider_name))
            });
        }

        if let Some(provider_name) = self.pricing.provider_for_model(&request.model) {
            if let Some(provider) = self.providers.get(provider_name) {
                return Ok(provider);
            }
        }

        if let Some(provider) = self.providers.values().next() {
            return Ok(provider);
        }

        Err(ChainflowError::Other("No providers registered".to_string()))
    }

    /// Create from environment variables. `OPENAI_API_KEY` is required.
    pub fn from_env() -> Result<Self, ChainflowError> {
        let adapter = crate::OpenAiAdapter::from_env().map_err(|_| {
            ChainflowError::Config("OPENAI_API_KEY environment variable is not set".to_string())
        })?;
        let mut client = Self::new();
        client.register_provider(adapter);
        Ok(client)
    }
}

impl Default for LlmClient {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
