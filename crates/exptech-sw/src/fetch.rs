//! Fetch interception: network-first with cache fallback.

use std::sync::Arc;

use async_trait::async_trait;
use exptech_cache::{CacheEntry, GenerationManager};
use hashbrown::HashMap;
use http::Method;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use url::Url;

use crate::SwError;

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Request URL.
    pub url: Url,

    /// Request method.
    pub method: Method,

    /// Request headers.
    pub headers: HashMap<String, String>,

    /// Originating client, if any.
    pub client_id: Option<String>,

    /// Whether this is a full-document navigation.
    pub is_navigation: bool,

    /// Skip intermediary HTTP caches on the live fetch.
    pub bypass_cache: bool,
}

impl FetchRequest {
    /// Create a GET request for a sub-resource.
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            headers: HashMap::new(),
            client_id: None,
            is_navigation: false,
            bypass_cache: false,
        }
    }

    /// Create a GET request for a full-document navigation.
    pub fn navigation(url: Url) -> Self {
        Self {
            is_navigation: true,
            ..Self::get(url)
        }
    }

    /// Set the request method.
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Request freshness from intermediary HTTP caches.
    pub fn with_cache_bypass(mut self) -> Self {
        self.bypass_cache = true;
        self
    }
}

/// A response delivered to an intercepted requester.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Status code.
    pub status: u16,

    /// Status text.
    pub status_text: String,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Whether this response was served from the cache.
    pub from_cache: bool,
}

impl FetchResponse {
    /// A 200 OK response with the given body.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            status_text: "OK".to_string(),
            headers: HashMap::new(),
            body: body.into(),
            from_cache: false,
        }
    }

    /// An empty response with the given status.
    pub fn with_status(status: u16, status_text: &str) -> Self {
        Self {
            status,
            status_text: status_text.to_string(),
            headers: HashMap::new(),
            body: Vec::new(),
            from_cache: false,
        }
    }

    /// The synthetic last-resort response for offline sub-resources.
    pub fn service_unavailable() -> Self {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "text/plain".to_string());
        Self {
            status: 503,
            status_text: "Service Unavailable".to_string(),
            headers,
            body: b"Contenu indisponible hors connexion.".to_vec(),
            from_cache: false,
        }
    }

    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Rebuild a response from a stored snapshot.
    pub fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            status: entry.status,
            status_text: entry.status_text.clone(),
            headers: entry.headers.clone(),
            body: entry.body.clone(),
            from_cache: true,
        }
    }

    /// Snapshot this response for storage under the given URL.
    pub fn to_entry(&self, url: &str) -> CacheEntry {
        CacheEntry {
            url: url.to_string(),
            method: Method::GET.to_string(),
            status: self.status,
            status_text: self.status_text.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            cached_at: exptech_common::unix_time_ms(),
        }
    }
}

/// Decision for one intercepted request.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Not intercepted; the embedder performs the request itself.
    Passthrough,
    /// Intercepted; deliver this response to the requester.
    Respond(FetchResponse),
}

impl FetchOutcome {
    /// The response, if the request was intercepted.
    pub fn into_response(self) -> Option<FetchResponse> {
        match self {
            Self::Passthrough => None,
            Self::Respond(response) => Some(response),
        }
    }

    /// Whether the request was passed through untouched.
    pub fn is_passthrough(&self) -> bool {
        matches!(self, Self::Passthrough)
    }
}

/// The live network side of the interceptor.
///
/// `Err` means the fetch itself failed (offline, refused, timed out) and
/// triggers the cache fallback; an HTTP error status is `Ok` with that
/// status.
#[async_trait]
pub trait NetworkBackend: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, SwError>;
}

/// Applies the network-first / cache-fallback / offline-page policy.
pub struct FetchInterceptor {
    origin: Url,
    offline_url: Url,
    generation: GenerationManager,
    backend: Arc<dyn NetworkBackend>,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl FetchInterceptor {
    /// Create an interceptor for the given origin.
    pub fn new(
        origin: Url,
        offline_url: Url,
        generation: GenerationManager,
        backend: Arc<dyn NetworkBackend>,
    ) -> Self {
        Self {
            origin,
            offline_url,
            generation,
            backend,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Decide how to answer one intercepted request.
    ///
    /// Precedence: live network, then cache, then the offline page
    /// (navigations only), then a synthetic 503. Intercepted requesters
    /// always receive a response, never an error.
    pub async fn handle(&self, request: FetchRequest) -> FetchOutcome {
        if request.url.origin() != self.origin.origin() {
            trace!(url = %request.url, "cross-origin request passed through");
            return FetchOutcome::Passthrough;
        }
        if request.method != Method::GET {
            trace!(url = %request.url, method = %request.method, "non-GET request passed through");
            return FetchOutcome::Passthrough;
        }

        match self.backend.fetch(&request).await {
            Ok(response) => {
                // Only exactly-200 responses are cached; 201/204 and error
                // statuses are delivered untouched.
                if response.status == 200 {
                    self.spawn_cache_write(&request, &response).await;
                }
                FetchOutcome::Respond(response)
            }
            Err(err) => {
                debug!(url = %request.url, error = %err, "network fetch failed, trying cache");
                self.offline_fallback(&request).await
            }
        }
    }

    /// Await every in-flight background cache write.
    pub async fn flush_pending_writes(&self) {
        let handles: Vec<_> = {
            let mut pending = self.pending.lock().await;
            pending.drain(..).collect()
        };
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "background cache write task failed");
            }
        }
    }

    async fn offline_fallback(&self, request: &FetchRequest) -> FetchOutcome {
        if let Some(entry) = self.generation.lookup(request.url.as_str()).await {
            debug!(url = %request.url, "served from cache");
            return FetchOutcome::Respond(FetchResponse::from_entry(&entry));
        }

        if request.is_navigation {
            if let Some(entry) = self.generation.lookup(self.offline_url.as_str()).await {
                debug!(url = %request.url, "served offline fallback page");
                return FetchOutcome::Respond(FetchResponse::from_entry(&entry));
            }
        }

        FetchOutcome::Respond(FetchResponse::service_unavailable())
    }

    /// Store a snapshot without blocking response delivery. A failed
    /// write is logged, never surfaced to the requester.
    async fn spawn_cache_write(&self, request: &FetchRequest, response: &FetchResponse) {
        let entry = response.to_entry(request.url.as_str());
        let url = entry.url.clone();
        let generation = self.generation.clone();

        let handle = tokio::spawn(async move {
            if let Err(err) = generation.put(entry).await {
                warn!(url = %url, error = %err, "background cache write failed");
            }
        });

        self.pending.lock().await.push(handle);
    }
}
