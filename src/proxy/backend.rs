//! Backend selection by client address hash.
//!
//! Each client address is hashed (djb2: seed 5381, `hash * 33 + byte`) and
//! reduced modulo the number of backends, so a given address always lands on
//! the same backend.

use crate::config::BackendConfig;
use std::fmt;

/// Seed of the djb2 string hash.
pub const HASH_SEED: u64 = 5381;

/// Represents a backend server with its metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    /// Backend URL (e.g., "http://localhost:3000")
    pub url: String,

    /// Optional backend name for logging
    pub name: Option<String>,
}

impl Backend {
    /// Create a new backend from configuration
    pub fn new(config: BackendConfig) -> Self {
        Self {
            url: config.url,
            name: config.name,
        }
    }

    /// Get a display name for the backend (name or URL)
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }
}

#[derive(Debug)]
pub enum SelectorError {
    /// No backends configured; the router cannot route anything
    NoBackends,
    InvalidBackendUrl { url: String, reason: String },
}

impl fmt::Display for SelectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectorError::NoBackends => f.write_str("no backends configured"),
            SelectorError::InvalidBackendUrl { url, reason } => {
                write!(f, "invalid backend url '{}': {}", url, reason)
            }
        }
    }
}

impl std::error::Error for SelectorError {}

/// djb2 over the bytes of `input`, wrapping on overflow.
pub fn hash_address(input: &[u8]) -> u64 {
    input.iter().fold(HASH_SEED, |hash, &byte| {
        hash.wrapping_mul(33).wrapping_add(byte as u64)
    })
}

/// Immutable set of backends, picked by client address hash.
#[derive(Debug, Clone)]
pub struct BackendSelector {
    backends: Vec<Backend>,
}

impl BackendSelector {
    /// Fails on an empty list or a backend URL that does not parse.
    pub fn new(configs: Vec<BackendConfig>) -> Result<Self, SelectorError> {
        if configs.is_empty() {
            return Err(SelectorError::NoBackends);
        }

        for config in &configs {
            url::Url::parse(&config.url).map_err(|e| SelectorError::InvalidBackendUrl {
                url: config.url.clone(),
                reason: e.to_string(),
            })?;
        }

        Ok(Self {
            backends: configs.into_iter().map(Backend::new).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }

    /// Index of the backend for `client_addr`.
    pub fn index_for(&self, client_addr: &str) -> usize {
        (hash_address(client_addr.as_bytes()) % self.backends.len() as u64) as usize
    }

    pub fn select(&self, client_addr: &str) -> &Backend {
        &self.backends[self.index_for(client_addr)]
    }

    /// The line sent back to a routed client.
    pub fn route_message(&self, client_addr: &str) -> String {
        let backend = self.select(client_addr);
        tracing::debug!(client = client_addr, backend = backend.display_name(), "Routed client");
        format!("Routed to backend {}\n", backend.display_name())
    }
}
