use std::time::Duration;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{
        header::{self, HeaderValue},
        StatusCode,
    },
    response::Response,
};
use serde::Deserialize;
use url::Url;

use crate::config::Identity;
use crate::error::{AppError, UpstreamError};
use crate::normalize::normalize_url;
use crate::shared::AppState;

pub const PROXY_ROUTE: &str = "/proxy-image";

const FALLBACK_CONTENT_TYPE: &str = "image/jpeg";

/// Builds links to [`PROXY_ROUTE`] so raw upstream image URLs never reach clients.
#[derive(Debug, Clone, Default)]
pub struct ProxyLinks {
    public_base: Option<Url>,
}

impl ProxyLinks {
    /// With no public base the links are relative to the serving origin.
    pub fn new(public_base: Option<Url>) -> Self {
        Self { public_base }
    }

    pub fn link(&self, raw: &str) -> Option<String> {
        let target = normalize_url(raw)?;
        let path = format!("{}?url={}", PROXY_ROUTE, urlencoding::encode(&target));
        Some(match &self.public_base {
            Some(base) => format!("{}{}", base.as_str().trim_end_matches('/'), path),
            None => path,
        })
    }
}

/// Fetches external images server-side under a disguised identity and streams
/// them back as same-origin content.
#[derive(Debug, Clone)]
pub struct ImageProxy {
    client: reqwest::Client,
    identity: Identity,
    cache_control: String,
}

impl ImageProxy {
    pub fn new(
        identity: Identity,
        timeout: Duration,
        max_redirects: usize,
        cache_control: String,
    ) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(max_redirects))
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()?;

        Ok(Self {
            client,
            identity,
            cache_control,
        })
    }

    /// Checks a client-supplied target before anything goes on the wire.
    pub fn validate_target(raw: &str) -> Result<Url, AppError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "undefined" {
            return Err(AppError::MissingParameter("url"));
        }

        let normalized = normalize_url(trimmed).ok_or(AppError::MissingParameter("url"))?;
        let target = Url::parse(&normalized)
            .map_err(|e| AppError::InvalidProxyTarget(format!("{}: {}", normalized, e)))?;

        let allowed = matches!(target.scheme(), "http" | "https") && target.host_str().is_some();
        if !allowed {
            return Err(AppError::InvalidProxyTarget(format!(
                "scheme '{}' is not allowed",
                target.scheme()
            )));
        }
        Ok(target)
    }

    pub async fn fetch(&self, raw: &str) -> Result<Response, AppError> {
        let target = Self::validate_target(raw)?;
        tracing::debug!(%target, "proxying image");

        let upstream = self
            .client
            .get(target.clone())
            .header(header::USER_AGENT, &self.identity.user_agent)
            .header(header::ACCEPT, &self.identity.image_accept)
            .header(header::ACCEPT_LANGUAGE, &self.identity.accept_language)
            .header(header::REFERER, &self.identity.referer)
            .header(header::ORIGIN, &self.identity.origin)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(%target, error = %e, "image fetch failed");
                AppError::ProxyFetchFailed(e.to_string())
            })?;

        let status = upstream.status();
        if !status.is_success() {
            tracing::warn!(%target, %status, "image upstream refused");
            return Err(AppError::ProxyFetchFailed(format!(
                "upstream returned status {}",
                status.as_u16()
            )));
        }

        let content_type = upstream
            .headers()
            .get(header::CONTENT_TYPE)
            .cloned()
            .unwrap_or_else(|| guess_content_type(&target));
        let cache_control = HeaderValue::from_str(&self.cache_control)
            .unwrap_or_else(|_| HeaderValue::from_static("public, max-age=86400"));

        let mut builder = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CACHE_CONTROL, cache_control);
        if let Some(length) = upstream.content_length() {
            builder = builder.header(header::CONTENT_LENGTH, length);
        }

        builder
            .body(Body::from_stream(upstream.bytes_stream()))
            .map_err(|e| AppError::Internal(e.to_string()))
    }
}

fn guess_content_type(target: &Url) -> HeaderValue {
    mime_guess::from_path(target.path())
        .first()
        .filter(|mime| mime.type_() == mime_guess::mime::IMAGE)
        .and_then(|mime| HeaderValue::from_str(mime.essence_str()).ok())
        .unwrap_or_else(|| HeaderValue::from_static(FALLBACK_CONTENT_TYPE))
}

#[derive(Debug, Deserialize)]
pub struct ProxyImageParams {
    url: Option<String>,
}

// Handler for re-hosting external images via /proxy-image?url=...
pub async fn proxy_image_handler(
    State(state): State<AppState>,
    Query(params): Query<ProxyImageParams>,
) -> Result<Response, AppError> {
    let raw = params.url.ok_or(AppError::MissingParameter("url"))?;
    state.image_proxy.fetch(&raw).await
}
