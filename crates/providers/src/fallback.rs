//! Provider fallback — ordered retry chain with per-call timeouts.
//!
//! Each entry is attempted with its own timeout. Transient failures
//! (timeouts, rate limits, network errors, 5xx) are retried on the same entry
//! up to `retries` times before moving to the next entry. A timed-out call is
//! a failure like any other, never fatal.

use async_trait::async_trait;
use procura_core::error::ProviderError;
use procura_core::provider::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// A provider that wraps an ordered list of providers and falls back on failure.
pub struct FallbackProvider {
    name: String,
    chain: Vec<FallbackEntry>,
    retries: u32,
}

/// A single entry in the fallback chain.
struct FallbackEntry {
    provider: Arc<dyn procura_core::Provider>,
    /// Replaces the request's model when set.
    model: Option<String>,
    timeout: Duration,
}

impl FallbackProvider {
    /// Create a new fallback provider with no entries and one retry per entry.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chain: Vec::new(),
            retries: 1,
        }
    }

    /// Add a provider to the fallback chain with a custom timeout.
    pub fn add(mut self, provider: Arc<dyn procura_core::Provider>, timeout: Duration) -> Self {
        self.chain.push(FallbackEntry {
            provider,
            model: None,
            timeout,
        });
        self
    }

    /// Add a provider that answers with a different model.
    pub fn add_with_model(
        mut self,
        provider: Arc<dyn procura_core::Provider>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        self.chain.push(FallbackEntry {
            provider,
            model: Some(model.into()),
            timeout,
        });
        self
    }

    /// Add a provider with the default timeout (120s).
    pub fn add_default(self, provider: Arc<dyn procura_core::Provider>) -> Self {
        self.add(provider, Duration::from_secs(120))
    }

    /// Retries per entry for transient failures.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Number of providers in the chain.
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    fn request_for(entry: &FallbackEntry, request: &ProviderRequest) -> ProviderRequest {
        let mut request = request.clone();
        if let Some(model) = &entry.model {
            request.model = model.clone();
        }
        request
    }

    /// Run `call` against every entry in order, honoring timeouts and retries.
    async fn run<T, F, Fut>(&self, op: &str, call: F) -> std::result::Result<T, ProviderError>
    where
        F: Fn(&FallbackEntry) -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, ProviderError>>,
    {
        let mut last_error = ProviderError::NotConfigured("No providers in fallback chain".into());

        for (i, entry) in self.chain.iter().enumerate() {
            let provider_name = entry.provider.name().to_string();

            for attempt in 0..=self.retries {
                info!(
                    provider = %provider_name,
                    op,
                    entry = i + 1,
                    total = self.chain.len(),
                    attempt = attempt + 1,
                    "Fallback: trying provider"
                );

                match tokio::time::timeout(entry.timeout, call(entry)).await {
                    Ok(Ok(value)) => return Ok(value),
                    Ok(Err(e)) => {
                        warn!(
                            provider = %provider_name,
                            op,
                            error = %e,
                            "Fallback: provider failed"
                        );
                        let transient = e.is_transient();
                        last_error = e;
                        if !transient {
                            break;
                        }
                    }
                    Err(_) => {
                        warn!(
                            provider = %provider_name,
                            op,
                            timeout_secs = entry.timeout.as_secs_f32(),
                            "Fallback: provider timed out"
                        );
                        last_error = ProviderError::Timeout(format!(
                            "Provider '{}' timed out after {:.1}s",
                            provider_name,
                            entry.timeout.as_secs_f32()
                        ));
                    }
                }
            }
        }

        Err(last_error)
    }
}

#[async_trait]
impl procura_core::Provider for FallbackProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        self.run("complete", |entry| {
            let request = Self::request_for(entry, &request);
            let provider = entry.provider.clone();
            async move { provider.complete(request).await }
        })
        .await
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        self.run("stream", |entry| {
            let request = Self::request_for(entry, &request);
            let provider = entry.provider.clone();
            async move { provider.stream(request).await }
        })
        .await
    }

    async fn embed(
        &self,
        request: EmbeddingRequest,
    ) -> std::result::Result<EmbeddingResponse, ProviderError> {
        self.run("embed", |entry| {
            let request = request.clone();
            let provider = entry.provider.clone();
            async move { provider.embed(request).await }
        })
        .await
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        for entry in &self.chain {
            if let Ok(true) = entry.provider.health_check().await {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procura_core::Provider;
    use procura_core::message::Message;
    use std::sync::Mutex;

    /// A mock provider that always fails.
    struct FailingProvider {
        name: String,
        error: ProviderError,
        call_count: Mutex<usize>,
    }

    impl FailingProvider {
        fn new(name: &str, error: ProviderError) -> Self {
            Self {
                name: name.into(),
                error,
                call_count: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl Provider for FailingProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> std::result::Result<ProviderResponse, ProviderError> {
            *self.call_count.lock().unwrap() += 1;
            Err(self.error.clone())
        }
    }

    /// A mock provider that always succeeds and records the model it was asked for.
    struct SuccessProvider {
        name: String,
        call_count: Mutex<usize>,
        models: Mutex<Vec<String>>,
    }

    impl SuccessProvider {
        fn new(name: &str) -> Self {
            Self {
                name: name.into(),
                call_count: Mutex::new(0),
                models: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl Provider for SuccessProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn complete(
            &self,
            request: ProviderRequest,
        ) -> std::result::Result<ProviderResponse, ProviderError> {
            *self.call_count.lock().unwrap() += 1;
            self.models.lock().unwrap().push(request.model.clone());
            Ok(ProviderResponse {
                message: Message::assistant("success"),
                usage: None,
                model: request.model,
            })
        }
    }

    /// Fails once with a transient error, then succeeds.
    struct FlakyProvider {
        call_count: Mutex<usize>,
    }

    #[async_trait]
    impl Provider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> std::result::Result<ProviderResponse, ProviderError> {
            let mut count = self.call_count.lock().unwrap();
            *count += 1;
            if *count == 1 {
                return Err(ProviderError::Network("reset".into()));
            }
            Ok(ProviderResponse {
                message: Message::assistant("second time lucky"),
                usage: None,
                model: "m".into(),
            })
        }
    }

    /// A mock provider that hangs forever (for timeout testing).
    struct HangingProvider;

    #[async_trait]
    impl Provider for HangingProvider {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> std::result::Result<ProviderResponse, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(ProviderError::Timeout("unreachable".into()))
        }
    }

    fn test_request() -> ProviderRequest {
        ProviderRequest::new("test", vec![Message::user("hola")], 0.0)
    }

    #[tokio::test]
    async fn first_provider_succeeds() {
        let p1 = Arc::new(SuccessProvider::new("primary"));
        let p2 = Arc::new(SuccessProvider::new("secondary"));

        let fallback = FallbackProvider::new("test")
            .add_default(p1.clone())
            .add_default(p2.clone());

        let result = fallback.complete(test_request()).await;
        assert_eq!(result.unwrap().message.content, "success");
        assert_eq!(p1.calls(), 1);
        assert_eq!(p2.calls(), 0);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_once_on_same_entry() {
        let flaky = Arc::new(FlakyProvider {
            call_count: Mutex::new(0),
        });
        let backup = Arc::new(SuccessProvider::new("backup"));

        let fallback = FallbackProvider::new("test")
            .add_default(flaky.clone())
            .add_default(backup.clone());

        let result = fallback.complete(test_request()).await.unwrap();
        assert_eq!(result.message.content, "second time lucky");
        assert_eq!(*flaky.call_count.lock().unwrap(), 2);
        assert_eq!(backup.calls(), 0);
    }

    #[tokio::test]
    async fn permanent_failure_skips_retry() {
        let p1 = Arc::new(FailingProvider::new(
            "primary",
            ProviderError::AuthenticationFailed("bad key".into()),
        ));
        let p2 = Arc::new(SuccessProvider::new("secondary"));

        let fallback = FallbackProvider::new("test")
            .add_default(p1.clone())
            .add_default(p2.clone());

        assert!(fallback.complete(test_request()).await.is_ok());
        assert_eq!(p1.calls(), 1);
        assert_eq!(p2.calls(), 1);
    }

    #[tokio::test]
    async fn all_providers_fail_with_last_error() {
        let p1 = Arc::new(FailingProvider::new(
            "primary",
            ProviderError::Network("conn refused".into()),
        ));
        let p2 = Arc::new(FailingProvider::new(
            "secondary",
            ProviderError::AuthenticationFailed("bad key".into()),
        ));

        let fallback = FallbackProvider::new("test")
            .add_default(p1.clone())
            .add_default(p2.clone());

        match fallback.complete(test_request()).await.unwrap_err() {
            ProviderError::AuthenticationFailed(_) => {}
            other => panic!("Expected AuthenticationFailed, got: {other:?}"),
        }

        // transient error retried once, permanent one not
        assert_eq!(p1.calls(), 2);
        assert_eq!(p2.calls(), 1);
    }

    #[tokio::test]
    async fn timeout_triggers_fallback() {
        let p2 = Arc::new(SuccessProvider::new("secondary"));

        let fallback = FallbackProvider::new("test")
            .add(Arc::new(HangingProvider), Duration::from_millis(20))
            .add_default(p2.clone());

        assert!(fallback.complete(test_request()).await.is_ok());
        assert_eq!(p2.calls(), 1);
    }

    #[tokio::test]
    async fn model_override_is_applied() {
        let p = Arc::new(SuccessProvider::new("same-endpoint"));
        let fallback = FallbackProvider::new("test")
            .add(
                Arc::new(FailingProvider::new(
                    "primary",
                    ProviderError::ApiError {
                        status_code: 400,
                        message: "bad".into(),
                    },
                )),
                Duration::from_secs(1),
            )
            .add_with_model(p.clone(), "gpt-4.1-mini", Duration::from_secs(1));

        let response = fallback.complete(test_request()).await.unwrap();
        assert_eq!(response.model, "gpt-4.1-mini");
        assert_eq!(p.models.lock().unwrap().as_slice(), ["gpt-4.1-mini"]);
    }

    #[tokio::test]
    async fn empty_chain_returns_not_configured() {
        let fallback = FallbackProvider::new("empty");
        match fallback.complete(test_request()).await.unwrap_err() {
            ProviderError::NotConfigured(_) => {}
            other => panic!("Expected NotConfigured, got: {other:?}"),
        }
        assert!(fallback.is_empty());
    }

    #[tokio::test]
    async fn health_check_any_healthy() {
        let fallback = FallbackProvider::new("test")
            .add_default(Arc::new(FailingProvider::new(
                "bad",
                ProviderError::Network("down".into()),
            )))
            .add_default(Arc::new(SuccessProvider::new("good")));

        assert_eq!(fallback.len(), 2);
        assert!(fallback.health_check().await.unwrap());
    }
}
