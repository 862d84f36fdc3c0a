// src/registry/http.rs

//! HTTP client for the registry JSON API
//!
//! Endpoints, relative to the registry base URL:
//!
//! - `GET  /api/v1/packages/{name}`: package document
//! - `GET  /api/v1/packages/{name}/{version}/download`: artifact bytes
//! - `GET  /api/v1/search?q={query}`: search hits
//! - `POST /api/v1/packages/{name}/{version}`: publish (bearer token)
//!
//! 404 maps to `Error::NotFound`. Transport failures, timeouts and 5xx
//! responses map to `Error::Network`, which callers may retry.

use crate::error::{Error, Result};
use crate::version::Version;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Serialize;
use std::io::Read;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    ArtifactFetcher, AuthToken, PackageSource, PackageSpec, PublishManifest, Registry, SearchHit,
};

/// Default timeout for HTTP requests (30 seconds)
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum attempts for idempotent metadata requests
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds, multiplied by the attempt number
const RETRY_DELAY_MS: u64 = 500;

/// Publish request body
#[derive(Serialize)]
struct PublishBody<'a> {
    #[serde(flatten)]
    manifest: &'a PublishManifest,
    /// Base64-encoded artifact
    artifact: String,
    sha256: String,
}

/// Registry reached over HTTP(S)
pub struct HttpRegistry {
    client: Client,
    base_url: String,
    token: Option<AuthToken>,
    max_retries: u32,
}

impl HttpRegistry {
    /// Create a client for `base_url`
    pub fn new(base_url: &str, token: Option<AuthToken>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("llamapkg/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            max_retries: MAX_RETRIES,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder, token: Option<&AuthToken>) -> RequestBuilder {
        match token.or(self.token.as_ref()) {
            Some(token) => request.bearer_auth(token.expose()),
            None => request,
        }
    }

    /// Send a request and map HTTP failures onto the error taxonomy
    fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = request
            .send()
            .map_err(|e| Error::Network(format!("Failed to fetch {}: {}", what, e)))?;
        check_status(response, what)
    }

    /// GET with retry for idempotent metadata calls
    fn get_with_retry(&self, url: &str, what: &str) -> Result<Response> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let request = self.authorize(self.client.get(url), None);
            match self.send(request, what) {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    warn!("Registry request attempt {} failed: {}, retrying...", attempt, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn check_status(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::NOT_FOUND => Err(Error::NotFound(what.to_string())),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(Error::Publish(format!("HTTP {} for {}: not authorized", status, what)))
        }
        StatusCode::CONFLICT => {
            let body = response.text().unwrap_or_default();
            Err(Error::Publish(format!("HTTP {} for {}: {}", status, what, body.trim())))
        }
        _ => Err(Error::Network(format!("HTTP {} from registry for {}", status, what))),
    }
}

impl PackageSource for HttpRegistry {
    fn get_package_spec(&self, name: &str) -> Result<PackageSpec> {
        let url = self.url(&format!("packages/{}", name));
        debug!("Fetching package metadata from {}", url);

        let response = self.get_with_retry(&url, &format!("package {}", name))?;
        response
            .json()
            .map_err(|e| Error::Network(format!("Failed to parse metadata for {}: {e}", name)))
    }
}

impl ArtifactFetcher for HttpRegistry {
    fn fetch_artifact(&self, name: &str, version: &Version) -> Result<Box<dyn Read + Send>> {
        let url = self.url(&format!("packages/{}/{}/download", name, version));
        debug!("Downloading {}", url);

        let request = self.authorize(self.client.get(&url), None);
        let response = self.send(request, &format!("artifact {} {}", name, version))?;
        Ok(Box::new(response))
    }
}

impl Registry for HttpRegistry {
    fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let url = self.url("search");
        let request = self.authorize(self.client.get(&url).query(&[("q", query)]), None);
        let response = self.send(request, &format!("search '{}'", query))?;
        response
            .json()
            .map_err(|e| Error::Network(format!("Failed to parse search results: {e}")))
    }

    fn publish(
        &self,
        manifest: &PublishManifest,
        artifact: &[u8],
        token: Option<&AuthToken>,
    ) -> Result<()> {
        if token.is_none() && self.token.is_none() {
            return Err(Error::Publish("publishing requires an auth token".to_string()));
        }

        let url = self.url(&format!("packages/{}/{}", manifest.name, manifest.version));
        let body = PublishBody {
            manifest,
            artifact: BASE64.encode(artifact),
            sha256: crate::hash::sha256(artifact),
        };

        let request = self.authorize(self.client.post(&url).json(&body), token);
        self.send(request, &format!("publish {} {}", manifest.name, manifest.version))?;

        info!("Published {} {} to {}", manifest.name, manifest.version, self.base_url);
        Ok(())
    }
}
