use async_trait::async_trait;
use futures_core::Stream;
use std::pin::Pin;

use chainflow_types::ChainflowError;

use crate::{Request, Response, StreamEvent};

/// Boxed stream of provider events.
pub type EventStream<'a> = Pin<Box<dyn Stream<Item = StreamEvent> + Send + 'a>>;

// ---------------------------------------------------------------------------
// ProviderAdapter
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn complete(&self, request: &Request) -> Result<Response, ChainflowError>;
    fn stream(&self, request: &Request) -> EventStream<'_>;
    fn name(&self) -> &str;
    fn default_model(&self) -> &str;
    fn supports_streaming(&self) -> bool;
}

// ---------------------------------------------------------------------------
// DynProvider
// ---------------------------------------------------------------------------

pub struct DynProvider(Box<dyn ProviderAdapter>);

impl DynProvider {
    pub fn new(provider: impl ProviderAdapter + 'static) -> Self {
        Self(Box::new(provider))
    }

    pub async fn complete(&self, request: &Request) -> Result<Response, ChainflowError> {
        self.0.complete(request).await
    }

    pub fn stream(&self, request: &Request) -> EventStream<'_> {
        self.0.stream(request)
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn default_model(&self) -> &str {
        self.0.default_model()
    }

    pub fn supports_streaming(&self) -> bool {
        self.0.supports_streaming()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FinishReason, Usage};
    use std::collections::HashMap;
    use tokio_stream::StreamExt;

    struct MockProvider;

    #[async_trait]
    impl ProviderAdapter for MockProvider {
        async fn complete(&self, _request: &Request) -> Result<Response, ChainflowError> {
            Ok(Response {
                id: "mock-resp-1".into(),
                text: "Hello from mock".into(),
                usage: Usage::default(),
                model: "mock-model".into(),
                finish_reason: FinishReason::EndTurn,
            })
        }

        fn stream(&self, _request: &Request) -> EventStream<'_> {
            Box::pin(tokio_stream::iter(vec![
                StreamEvent::ContentDelta { text: "Hel".into() },
                StreamEvent::ContentDelta { text: "lo".into() },
            ]))
        }

        fn name(&self) -> &str {
            "mock"
        }

        fn default_model(&self) -> &str {
            "mock-model"
        }

        fn supports_streaming(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn dyn_provider_complete() {
        let provider = DynProvider::new(MockProvider);
        let resp = provider
            .complete(&Request::prompt("mock-model", "hi"))
            .await
            .unwrap();
        assert_eq!(resp.id, "mock-resp-1");
        assert_eq!(resp.text, "Hello from mock");
        assert_eq!(resp.finish_reason, FinishReason::EndTurn);
    }

    #[tokio::test]
    async fn dyn_provider_stream() {
        let provider = DynProvider::new(MockProvider);
        let req = Request::prompt("mock-model", "hi");
        let mut stream = provider.stream(&req);
        let mut text = String::new();
        while let Some(event) = stream.next().await {
            if let StreamEvent::ContentDelta { text: delta } = event {
                text.push_str(&delta);
            }
        }
        assert_eq!(text, "Hello");
    }

    #[test]
    fn dyn_provider_capability_methods() {
        let provider = DynProvider::new(MockProvider);
        assert_eq!(provider.name(), "mock");
        assert_eq!(provider.default_model(), "mock-model");
        assert!(provider.supports_streaming());
    }

    #[tokio::test]
    async fn dyn_provider_in_hashmap() {
        let mut providers: HashMap<String, DynProvider> = HashMap::new();
        providers.insert("mock".into(), DynProvider::new(MockProvider));

        let provider = providers.get("mock").unwrap();
        let resp = provider
            .complete(&Request::prompt("mock-model", "hi"))
            .await
            .unwrap();
        assert_eq!(resp.text, "Hello from mock");
    }
}
