//! # ExpTech SW
//!
//! Offline caching service worker engine for the Expérience Tech web app.
//!
//! ## Features
//!
//! - **Network-first fetch policy**: live network, then cache, then the
//!   offline page, then a synthetic 503
//! - **Cache generations**: one versioned store per deploy; stale stores
//!   are pruned on activation
//! - **Lifecycle**: install (precache + skip-waiting), activate (prune +
//!   claim clients)
//! - **Control protocol**: skip-waiting, version query, cache clear
//!
//! ## Architecture
//!
//! ```text
//! page ──── ControlMessage ───→ ServiceWorkerEngine
//!                                   │
//!        FetchRequest ─→ FetchInterceptor ─→ NetworkBackend (live fetch)
//!                                   │
//!                                   └─→ GenerationManager (fallback reads,
//!                                           │               detached writes)
//!                                           └── CacheStorage
//!                                                 └── "experience-tech-v1.0.1-<stamp>"
//! ```

use std::sync::Arc;

use exptech_cache::{CacheError, CacheStorage, GenerationId, GenerationManager};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};
use url::Url;

pub mod clients;
pub mod config;
pub mod control;
pub mod fetch;
pub mod lifecycle;

pub use clients::{Client, ClientType, Clients, VisibilityState};
pub use config::{EngineConfig, PrecacheManifest};
pub use control::{ClearCacheReply, ControlMessage, EngineHandle, VersionReply};
pub use fetch::{
    FetchInterceptor, FetchOutcome, FetchRequest, FetchResponse, NetworkBackend,
};
pub use lifecycle::{ServiceWorker, ServiceWorkerRegistration, WorkerId, WorkerState};

// ==================== Errors ====================

/// Errors that can occur in engine operations.
#[derive(Error, Debug, Clone)]
pub enum SwError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Control channel closed")]
    ChannelClosed,
}

// ==================== Events ====================

/// Engine events, delivered to the embedder over an unbounded channel.
#[derive(Debug, Clone)]
pub enum SwEvent {
    /// A worker changed state.
    StateChange { worker: WorkerId, state: WorkerState },

    /// A precache entry could not be stored and was skipped.
    PrecacheFailed { url: String, reason: String },

    /// A client came under control of the active generation.
    ControllerChange { client_id: String },
}

// ==================== Engine ====================

/// The offline engine: one worker generation, its cache, its clients.
///
/// Lifecycle phases (`install`, `activate`) and fetch events run as
/// independent async tasks; the cache store is the only shared mutable
/// resource.
pub struct ServiceWorkerEngine {
    config: EngineConfig,
    origin: Url,
    generation: GenerationManager,
    interceptor: FetchInterceptor,
    registration: RwLock<ServiceWorkerRegistration>,

    /// Pages controllable by this engine.
    pub clients: Arc<RwLock<Clients>>,

    backend: Arc<dyn NetworkBackend>,
    event_tx: mpsc::UnboundedSender<SwEvent>,
}

impl ServiceWorkerEngine {
    /// Create an engine from configuration and a network backend.
    ///
    /// The generation is stamped here, once per engine instance; the
    /// stamp comes from `config.stamp` or, when absent, the wall clock.
    pub fn new(
        config: EngineConfig,
        backend: Arc<dyn NetworkBackend>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<SwEvent>), SwError> {
        let origin = Url::parse(&config.origin)
            .map_err(|err| SwError::Config(format!("invalid origin {:?}: {err}", config.origin)))?;
        if origin.cannot_be_a_base() {
            return Err(SwError::Config(format!(
                "origin {:?} cannot serve as a base URL",
                config.origin
            )));
        }
        let offline_url = origin
            .join(&config.precache.offline_path)
            .map_err(|err| SwError::Config(format!("invalid offline path: {err}")))?;

        let stamp = config.stamp.unwrap_or_else(exptech_common::unix_time_ms);
        let id = GenerationId::new(config.cache_prefix.clone(), config.version.clone(), stamp);

        let storage = match config.max_cache_bytes {
            Some(budget) => CacheStorage::with_budget(budget),
            None => CacheStorage::new(),
        };
        let generation = GenerationManager::new(id, Arc::new(RwLock::new(storage)));

        let interceptor = FetchInterceptor::new(
            origin.clone(),
            offline_url,
            generation.clone(),
            Arc::clone(&backend),
        );

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let engine = Arc::new(Self {
            config,
            origin,
            generation,
            interceptor,
            registration: RwLock::new(ServiceWorkerRegistration::new()),
            clients: Arc::new(RwLock::new(Clients::new())),
            backend,
            event_tx,
        });

        Ok((engine, event_rx))
    }

    /// The active generation identifier.
    pub fn version(&self) -> &GenerationId {
        self.generation.id()
    }

    /// The generation manager owning this engine's cache.
    pub fn generation(&self) -> &GenerationManager {
        &self.generation
    }

    /// State of the most recent worker, if any.
    pub async fn worker_state(&self) -> Option<WorkerState> {
        let registration = self.registration.read().await;
        registration
            .installing
            .as_ref()
            .or(registration.waiting.as_ref())
            .or(registration.active.as_ref())
            .map(|w| w.state)
    }

    /// Run the install phase: open the current generation's store and
    /// precache the application shell, each entry fetched with cache
    /// bypass for freshness.
    ///
    /// Precaching is best-effort: a failed or non-2xx fetch is logged,
    /// reported as [`SwEvent::PrecacheFailed`] and skipped. Storage
    /// failures are fatal to the phase. On return the worker is waiting
    /// and has already requested skip-waiting.
    pub async fn install(&self) -> Result<(), SwError> {
        let worker_id = {
            let mut registration = self.registration.write().await;
            let mut worker = ServiceWorker::new(self.generation.id().clone());
            worker.set_state(WorkerState::Installing);
            let id = worker.id;
            registration.installing = Some(worker);
            id
        };
        self.emit(SwEvent::StateChange {
            worker: worker_id,
            state: WorkerState::Installing,
        });

        self.generation.open_current().await?;

        for path in &self.config.precache.entries {
            let url = match self.origin.join(path) {
                Ok(url) => url,
                Err(err) => {
                    warn!(path = %path, error = %err, "invalid precache path skipped");
                    self.emit(SwEvent::PrecacheFailed {
                        url: path.clone(),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            let request = FetchRequest::get(url).with_cache_bypass();
            match self.backend.fetch(&request).await {
                Ok(response) if response.is_success() => {
                    self.generation
                        .put(response.to_entry(request.url.as_str()))
                        .await?;
                }
                Ok(response) => {
                    warn!(url = %request.url, status = response.status, "precache fetch returned error status");
                    self.emit(SwEvent::PrecacheFailed {
                        url: request.url.to_string(),
                        reason: format!("status {}", response.status),
                    });
                }
                Err(err) => {
                    warn!(url = %request.url, error = %err, "precache fetch failed");
                    self.emit(SwEvent::PrecacheFailed {
                        url: request.url.to_string(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        self.registration.write().await.install_complete();
        self.emit(SwEvent::StateChange {
            worker: worker_id,
            state: WorkerState::Installed,
        });
        info!(generation = %self.generation.id(), "install complete, skip-waiting requested");
        Ok(())
    }

    /// Run the activate phase: promote the waiting worker, prune stale
    /// generations, then claim every client so the policy applies
    /// without a reload. A no-op when no worker is waiting.
    pub async fn activate(&self) -> Result<(), SwError> {
        let worker_id = {
            let mut registration = self.registration.write().await;
            if registration.waiting.is_none() {
                return Ok(());
            }
            registration.activate();
            registration.active.as_ref().map(|w| w.id)
        };

        self.generation.prune_stale().await?;

        let claimed = self
            .clients
            .write()
            .await
            .claim(self.generation.id().clone());
        for client_id in claimed {
            self.emit(SwEvent::ControllerChange { client_id });
        }

        if let Some(worker) = worker_id {
            self.emit(SwEvent::StateChange {
                worker,
                state: WorkerState::Activated,
            });
        }
        info!(generation = %self.generation.id(), "activated and claimed clients");
        Ok(())
    }

    /// Decide how to answer one intercepted request.
    pub async fn handle_fetch(&self, request: FetchRequest) -> FetchOutcome {
        self.interceptor.handle(request).await
    }

    /// Await every in-flight background cache write.
    pub async fn flush_pending_writes(&self) {
        self.interceptor.flush_pending_writes().await;
    }

    /// Process one control message from a page.
    pub async fn handle_message(&self, message: ControlMessage) {
        match message {
            ControlMessage::SkipWaiting => {
                if let Err(err) = self.activate().await {
                    warn!(error = %err, "skip-waiting activation failed");
                }
            }
            ControlMessage::GetVersion { reply } => {
                let _ = reply.send(VersionReply {
                    version: self.generation.id().to_string(),
                });
            }
            ControlMessage::ClearCache { reply } => {
                let success = match self.generation.clear_all().await {
                    Ok(removed) => {
                        info!(removed, "cache cleared by control message");
                        true
                    }
                    Err(err) => {
                        warn!(error = %err, "cache clear failed");
                        false
                    }
                };
                let _ = reply.send(ClearCacheReply { success });
            }
        }
    }

    /// Spawn the control loop and return the page-side handle to it.
    pub fn spawn_control(self: &Arc<Self>) -> EngineHandle {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                engine.handle_message(message).await;
            }
        });
        EngineHandle::new(tx)
    }

    fn emit(&self, event: SwEvent) {
        let _ = self.event_tx.send(event);
    }
}

// ==================== Test Support ====================
