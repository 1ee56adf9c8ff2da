//! Image mirroring gate with a run-scoped circuit breaker.

pub mod cloudinary;

use crate::record::CardRecord;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Failures reported by a mirror backend.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// The backend asked us to slow down.
    #[error("mirror rate limit reached: {0}")]
    RateLimited(String),
    /// The backend refused the request.
    #[error("mirror rejected request ({status}): {body}")]
    Rejected {
        /// HTTP status returned by the backend.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },
    /// The request never completed.
    #[error("mirror transport error: {0}")]
    Transport(String),
    /// The backend answered with something we could not read.
    #[error("mirror response undecodable: {0}")]
    Decode(String),
}

impl MirrorError {
    /// True when the failure should open the circuit breaker.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

/// Hosted image store that copies remote images under stable keys.
pub trait MirrorBackend {
    /// Copies `original_url` under `key`, overwriting any previous copy. Returns the hosted URL.
    fn upload(&self, original_url: &str, key: &str) -> Result<String, MirrorError>;

    /// Returns the hosted URL for `key`, if the backend already holds it.
    fn lookup(&self, key: &str) -> Result<Option<String>, MirrorError>;
}

/// Once tripped, stays open for the rest of the run.
#[derive(Debug, Default)]
pub struct CircuitBreaker {
    open: AtomicBool,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the breaker has been tripped.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Opens the breaker. Returns true only for the call that opened it.
    pub fn trip(&self) -> bool {
        !self.open.swap(true, Ordering::AcqRel)
    }
}

/// Mirror gate settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorSettings {
    /// Key namespace on the backend (`<namespace>/<card id>`).
    pub namespace: String,
    /// Host fragment identifying URLs that already point at the mirror.
    pub mirrored_domain: String,
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self {
            namespace: "gundam_cards".to_string(),
            mirrored_domain: "cloudinary.com".to_string(),
        }
    }
}

/// Decides per record whether an image must be mirrored or an existing copy reused.
pub struct ImageMirrorGate {
    backend: Option<Box<dyn MirrorBackend>>,
    settings: MirrorSettings,
}

impl ImageMirrorGate {
    /// Gate backed by `backend`.
    pub fn new(backend: Box<dyn MirrorBackend>, settings: MirrorSettings) -> Self {
        Self {
            backend: Some(backend),
            settings,
        }
    }

    /// Gate that always passes the original URL through.
    pub fn disabled(settings: MirrorSettings) -> Self {
        Self {
            backend: None,
            settings,
        }
    }

    /// True when a backend is configured.
    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// True when `url` already points at the mirror.
    pub fn is_mirrored(&self, url: &str) -> bool {
        !url.is_empty() && url.contains(&self.settings.mirrored_domain)
    }

    /// Backend key for a card.
    pub fn namespaced_key(&self, stable_key: &str) -> String {
        format!("{}/{}", self.settings.namespace, stable_key)
    }

    /// Returns the URL the record should carry for its image.
    ///
    /// A mirrored URL on `prior` is reused without touching the backend. Every failure degrades
    /// to `original_url`; rate limits also trip `breaker` so later calls skip the backend.
    pub fn ensure_mirrored(
        &self,
        original_url: &str,
        stable_key: &str,
        prior: Option<&CardRecord>,
        breaker: &CircuitBreaker,
    ) -> String {
        if let Some(existing) = prior.map(|record| record.image.as_str()) {
            if self.is_mirrored(existing) {
                return existing.to_string();
            }
        }
        let Some(backend) = self.backend.as_deref() else {
            return original_url.to_string();
        };
        if breaker.is_open() {
            return original_url.to_string();
        }

        let key = self.namespaced_key(stable_key);
        match backend.lookup(&key) {
            Ok(Some(url)) => return url,
            Ok(None) => {}
            Err(err) if err.is_rate_limit() => {
                note_rate_limit(breaker, &err);
                return original_url.to_string();
            }
            Err(err) => tracing::debug!(%key, error = %err, "mirror lookup failed"),
        }

        match backend.upload(original_url, &key) {
            Ok(url) => url,
            Err(err) if err.is_rate_limit() => {
                note_rate_limit(breaker, &err);
                original_url.to_string()
            }
            Err(err) => {
                tracing::warn!(%key, error = %err, "image mirror failed, keeping source url");
                original_url.to_string()
            }
        }
    }
}

fn note_rate_limit(breaker: &CircuitBreaker, err: &MirrorError) {
    if breaker.trip() {
        tracing::warn!(error = %err, "mirror rate limit reached, passing source urls through for the rest of the run");
    }
}
