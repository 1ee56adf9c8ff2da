//! Cloudinary-backed image mirror.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::{MirrorBackend, MirrorError};
use crate::record::epoch_ms;

/// Account credentials for the upload and admin APIs.
#[derive(Clone, PartialEq, Eq)]
pub struct CloudinaryCredentials {
    /// Cloud name (first path segment of every API call).
    pub cloud_name: String,
    /// API key.
    pub api_key: String,
    /// API secret, used for signing and basic auth.
    pub api_secret: String,
}

impl CloudinaryCredentials {
    /// Returns credentials when all three parts are present and non-blank.
    pub fn from_parts(
        cloud_name: Option<String>,
        api_key: Option<String>,
        api_secret: Option<String>,
    ) -> Option<Self> {
        let keep = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
        Some(Self {
            cloud_name: keep(cloud_name)?,
            api_key: keep(api_key)?,
            api_secret: keep(api_secret)?,
        })
    }
}

impl std::fmt::Debug for CloudinaryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudinaryCredentials")
            .field("cloud_name", &self.cloud_name)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Blocking Cloudinary client implementing [`MirrorBackend`].
pub struct CloudinaryBackend {
    client: Client,
    credentials: CloudinaryCredentials,
    api_base: String,
}

impl CloudinaryBackend {
    /// Builds the client against the public API endpoint.
    pub fn new(credentials: CloudinaryCredentials, timeout: Duration) -> Result<Self> {
        Self::with_base(credentials, "https://api.cloudinary.com/v1_1", timeout)
    }

    /// Builds the client against an alternate API base (useful for proxies).
    pub fn with_base(
        credentials: CloudinaryCredentials,
        api_base: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build Cloudinary HTTP client")?;
        Ok(Self {
            client,
            credentials,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}/{}", self.api_base, self.credentials.cloud_name, path)
    }
}

impl MirrorBackend for CloudinaryBackend {
    fn upload(&self, original_url: &str, key: &str) -> Result<String, MirrorError> {
        let timestamp = (epoch_ms() / 1000).to_string();
        let signed = [
            ("overwrite", "true"),
            ("public_id", key),
            ("timestamp", timestamp.as_str()),
            ("unique_filename", "false"),
        ];
        let signature = sign(&signed, &self.credentials.api_secret);

        let mut form: Vec<(&str, &str)> = signed.to_vec();
        form.push(("file", original_url));
        form.push(("api_key", self.credentials.api_key.as_str()));
        form.push(("signature_algorithm", "sha256"));
        form.push(("signature", signature.as_str()));

        let response = self
            .client
            .post(self.endpoint("image/upload"))
            .form(&form)
            .send()
            .map_err(|err| MirrorError::Transport(err.to_string()))?;
        let asset: Asset = read_json(response)?;
        Ok(asset.secure_url)
    }

    fn lookup(&self, key: &str) -> Result<Option<String>, MirrorError> {
        let response = self
            .client
            .get(self.endpoint(&format!("resources/image/upload/{key}")))
            .basic_auth(&self.credentials.api_key, Some(&self.credentials.api_secret))
            .send()
            .map_err(|err| MirrorError::Transport(err.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let asset: Asset = read_json(response)?;
        Ok(Some(asset.secure_url))
    }
}

#[derive(Debug, Deserialize)]
struct Asset {
    secure_url: String,
}

fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, MirrorError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .map_err(|err| MirrorError::Decode(err.to_string()));
    }
    let body = response
        .text()
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    Err(classify_failure(status.as_u16(), body))
}

/// Maps a failed API response onto the mirror error taxonomy.
///
/// Cloudinary signals exhausted quotas with 420 on the upload API and 429 elsewhere.
fn classify_failure(status: u16, body: String) -> MirrorError {
    if status == 420 || status == 429 || body.to_lowercase().contains("rate limit") {
        MirrorError::RateLimited(format!("{status}: {body}"))
    } else {
        MirrorError::Rejected { status, body }
    }
}

/// SHA-256 request signature: sorted `k=v` pairs joined by `&`, then the secret appended.
fn sign(params: &[(&str, &str)], secret: &str) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let payload = sorted
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}
