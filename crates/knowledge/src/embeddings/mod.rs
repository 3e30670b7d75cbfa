//! Embedding service.
//!
//! Wraps a backend behind `EmbeddingProvider` with lazy initialisation,
//! bounded retries, device/model fallback and per-call timeouts. The backend
//! handle is cached once a probe embedding succeeds.

pub mod config;
pub mod provider;
pub mod providers;

pub use config::{Device, EmbeddingConfig};
pub use provider::EmbeddingProvider;

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{KnowledgeError, KnowledgeResult};

/// Builds a backend for a configuration and device.
pub type ProviderFactory = Arc<
    dyn Fn(EmbeddingConfig, Device) -> BoxFuture<'static, KnowledgeResult<Arc<dyn EmbeddingProvider>>>
        + Send
        + Sync,
>;

struct ServiceState {
    backend: Option<Arc<dyn EmbeddingProvider>>,
    device: Device,
    model: String,
}

/// Embedding access for the knowledge store.
pub struct EmbeddingService {
    config: EmbeddingConfig,
    factory: ProviderFactory,
    state: Mutex<ServiceState>,
}

impl std::fmt::Debug for EmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingService")
            .field("provider", &self.config.provider)
            .finish_non_exhaustive()
    }
}

impl EmbeddingService {
    /// Service using the built-in providers.
    pub fn new(config: EmbeddingConfig) -> Self {
        let factory: ProviderFactory =
            Arc::new(|config: EmbeddingConfig, device: Device| {
                providers::create_provider(config, device).boxed()
            });
        Self::with_factory(config, factory)
    }

    /// Service with a custom backend factory.
    pub fn with_factory(config: EmbeddingConfig, factory: ProviderFactory) -> Self {
        let state = ServiceState {
            backend: None,
            device: config.device,
            model: config.effective_model(),
        };
        Self {
            config,
            factory,
            state: Mutex::new(state),
        }
    }

    /// Service that always hands out the given backend.
    pub fn with_provider(config: EmbeddingConfig, provider: Arc<dyn EmbeddingProvider>) -> Self {
        let factory: ProviderFactory = Arc::new(move |_: EmbeddingConfig, _: Device| {
            let provider = Arc::clone(&provider);
            async move { Ok::<_, KnowledgeError>(provider) }.boxed()
        });
        Self::with_factory(config, factory)
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    /// Currently effective device.
    pub async fn device(&self) -> Device {
        self.state.lock().await.device
    }

    /// Currently effective model.
    pub async fn model(&self) -> String {
        self.state.lock().await.model.clone()
    }

    /// Vector size of the initialised backend.
    pub async fn dimensions(&self) -> KnowledgeResult<usize> {
        Ok(self.backend().await?.dimensions())
    }

    /// Embed a single query text.
    #[instrument(skip(self, text), fields(text_len = text.len()))]
    pub async fn embed_query(&self, text: &str) -> KnowledgeResult<Vec<f32>> {
        let backend = self.backend().await?;
        let vector = self.call(backend.embed(text)).await?;
        if vector.is_empty() {
            return Err(KnowledgeError::EmbeddingEmpty);
        }
        Ok(vector)
    }

    /// Embed document texts, one vector per input.
    ///
    /// When a batch call fails its texts are retried one by one; a text that
    /// still fails yields an empty vector in its slot. Only an unusable
    /// backend is reported as an error.
    #[instrument(skip(self, texts), fields(count = texts.len()))]
    pub async fn embed_documents(&self, texts: &[String]) -> KnowledgeResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let backend = self.backend().await?;
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.config.batch_size.max(1)) {
            match self.call(backend.embed_batch(batch)).await {
                Ok(batch_vectors) if batch_vectors.len() == batch.len() => {
                    vectors.extend(batch_vectors);
                }
                Ok(batch_vectors) => {
                    warn!(
                        "Backend returned {} vectors for {} texts, embedding individually",
                        batch_vectors.len(),
                        batch.len()
                    );
                    vectors.extend(self.embed_individually(&backend, batch).await);
                }
                Err(e) => {
                    warn!("Batch embedding failed, embedding individually: {}", e);
                    vectors.extend(self.embed_individually(&backend, batch).await);
                }
            }
        }

        debug!("Generated {} document embeddings", vectors.len());
        Ok(vectors)
    }

    /// Non-throwing readiness probe.
    pub async fn is_ready(&self) -> bool {
        match self.embed_query("test").await {
            Ok(_) => true,
            Err(e) => {
                debug!("Embedding service not ready: {}", e);
                false
            }
        }
    }

    /// Drop the cached backend; the next call initialises again.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.backend = None;
        info!("Embedding backend reset");
    }

    async fn embed_individually(
        &self,
        backend: &Arc<dyn EmbeddingProvider>,
        texts: &[String],
    ) -> Vec<Vec<f32>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for (i, text) in texts.iter().enumerate() {
            match self.call(backend.embed(text)).await {
                Ok(vector) => vectors.push(vector),
                Err(e) => {
                    warn!("Embedding failed for text {} of batch: {}", i, e);
                    vectors.push(Vec::new());
                }
            }
        }
        vectors
    }

    /// Run a backend call under the request timeout.
    async fn call<T>(&self, fut: impl Future<Output = KnowledgeResult<T>>) -> KnowledgeResult<T> {
        match tokio::time::timeout(self.config.request_timeout(), fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(KnowledgeError::EmbeddingEmpty)) => Err(KnowledgeError::EmbeddingEmpty),
            Ok(Err(KnowledgeError::EmbeddingUnavailable(msg))) => {
                Err(KnowledgeError::EmbeddingUnavailable(msg))
            }
            Ok(Err(e)) => Err(KnowledgeError::EmbeddingUnavailable(e.to_string())),
            Err(_) => Err(KnowledgeError::EmbeddingUnavailable(format!(
                "Embedding call timed out after {}s",
                self.config.request_timeout_secs
            ))),
        }
    }

    async fn backend(&self) -> KnowledgeResult<Arc<dyn EmbeddingProvider>> {
        let mut state = self.state.lock().await;
        if let Some(backend) = &state.backend {
            return Ok(Arc::clone(backend));
        }

        let backend = self.initialize(&mut state).await?;
        state.backend = Some(Arc::clone(&backend));
        Ok(backend)
    }

    async fn initialize(
        &self,
        state: &mut ServiceState,
    ) -> KnowledgeResult<Arc<dyn EmbeddingProvider>> {
        let attempts = self.config.max_init_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            info!(
                "Initializing {} embeddings: {} on {} (attempt {}/{})",
                self.config.provider, state.model, state.device, attempt, attempts
            );

            match self.try_initialize(state).await {
                Ok(backend) => {
                    info!(
                        "Embeddings ready: {} ({} dims)",
                        backend.model_name(),
                        backend.dimensions()
                    );
                    return Ok(backend);
                }
                Err(e) => {
                    error!(
                        "Failed to initialize embeddings (attempt {}/{}): {}",
                        attempt, attempts, e
                    );

                    if attempt < attempts {
                        self.apply_fallback(state, &e);
                        tokio::time::sleep(self.config.retry_delay()).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempts made".to_string());
        error!("All {} attempts failed. Embeddings unavailable.", attempts);
        Err(KnowledgeError::EmbeddingUnavailable(reason))
    }

    async fn try_initialize(
        &self,
        state: &ServiceState,
    ) -> KnowledgeResult<Arc<dyn EmbeddingProvider>> {
        let config = EmbeddingConfig {
            model: Some(state.model.clone()),
            device: state.device,
            ..self.config.clone()
        };

        let backend = match tokio::time::timeout(
            self.config.request_timeout(),
            (self.factory)(config, state.device),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(KnowledgeError::EmbeddingUnavailable(
                    "Backend initialisation timed out".to_string(),
                ))
            }
        };

        let probe = match tokio::time::timeout(self.config.request_timeout(), backend.embed("test"))
            .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(KnowledgeError::EmbeddingUnavailable(
                    "Probe embedding timed out".to_string(),
                ))
            }
        };
        if probe.is_empty() {
            return Err(KnowledgeError::EmbeddingEmpty);
        }

        Ok(backend)
    }

    /// Device failures move to the CPU; failures already on the CPU move to
    /// the fallback model once.
    fn apply_fallback(&self, state: &mut ServiceState, err: &KnowledgeError) {
        if matches!(err, KnowledgeError::EmbeddingDevice(_)) && state.device != Device::Cpu {
            warn!("Device error detected, falling back to CPU");
            state.device = Device::Cpu;
            return;
        }

        if state.device == Device::Cpu {
            if let Some(fallback) = &self.config.fallback_model {
                if &state.model != fallback {
                    warn!("Trying alternative embedding model: {}", fallback);
                    state.model = fallback.clone();
                }
            }
        }
    }
}
