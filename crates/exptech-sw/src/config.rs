//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::SwError;

/// URLs fetched and stored proactively at install time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrecacheManifest {
    /// Root-relative (or absolute) paths of the application shell.
    pub entries: Vec<String>,

    /// The document served for navigations with no cached entry.
    pub offline_path: String,
}

impl Default for PrecacheManifest {
    fn default() -> Self {
        Self {
            entries: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/static/css/main.css".to_string(),
                "/static/js/main.js".to_string(),
                "/logo192.png".to_string(),
                "/manifest.json".to_string(),
                "/offline.html".to_string(),
            ],
            offline_path: "/offline.html".to_string(),
        }
    }
}

impl PrecacheManifest {
    /// Number of manifest entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the manifest has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// The origin this engine serves; requests elsewhere pass through.
    pub origin: String,

    /// Cache name prefix.
    pub cache_prefix: String,

    /// Deployed application version.
    pub version: String,

    /// Explicit generation stamp. When absent the engine stamps with
    /// the wall clock at construction time.
    pub stamp: Option<u64>,

    /// Byte budget across all cached generations.
    pub max_cache_bytes: Option<usize>,

    /// Application shell to precache at install.
    pub precache: PrecacheManifest,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            origin: "https://experience-tech.example".to_string(),
            cache_prefix: "experience-tech".to_string(),
            version: "1.0.1".to_string(),
            stamp: None,
            max_cache_bytes: None,
            precache: PrecacheManifest::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, SwError> {
        serde_json::from_str(json).map_err(|err| SwError::Config(err.to_string()))
    }
}
