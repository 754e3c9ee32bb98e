use std::time::Duration;

use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::Identity;
use crate::error::UpstreamError;

const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Which upstream statuses still carry a body worth parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusPolicy {
    SuccessOnly,
    /// Bot checks often answer 4xx with a page that still embeds state.
    AllowClientErrors,
}

impl StatusPolicy {
    fn accepts(self, status: reqwest::StatusCode) -> bool {
        match self {
            StatusPolicy::SuccessOnly => status.is_success(),
            StatusPolicy::AllowClientErrors => {
                status.is_success() || status.is_redirection() || status.is_client_error()
            }
        }
    }
}

/// Plain HTTP access to upstream pages under a disguised identity.
#[derive(Debug, Clone)]
pub struct UpstreamFetcher {
    client: reqwest::Client,
    identity: Identity,
}

impl UpstreamFetcher {
    pub fn new(identity: Identity, timeout: Duration) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(MAX_CONNECT_TIMEOUT))
            .redirect(reqwest::redirect::Policy::limited(10))
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()?;

        Ok(Self { client, identity })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub async fn fetch_html(&self, url: &Url, policy: StatusPolicy) -> Result<String, UpstreamError> {
        tracing::debug!(%url, "fetching page");

        let response = self
            .client
            .get(url.clone())
            .header(USER_AGENT, &self.identity.user_agent)
            .header(ACCEPT, &self.identity.html_accept)
            .header(ACCEPT_LANGUAGE, &self.identity.accept_language)
            .send()
            .await?;

        let status = response.status();
        tracing::debug!(%url, %status, "page response");
        if !policy.accepts(status) {
            return Err(UpstreamError::Status(status.as_u16()));
        }

        Ok(response.text().await?)
    }

    /// Fetches and decodes a JSON document. A body that does not decode as `T`
    /// is reported as [`UpstreamError::Malformed`].
    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T, UpstreamError> {
        tracing::debug!(%url, "fetching json");

        let response = self
            .client
            .get(url.clone())
            .header(USER_AGENT, &self.identity.user_agent)
            .header(ACCEPT, "application/json,text/plain,*/*")
            .header(ACCEPT_LANGUAGE, &self.identity.accept_language)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| UpstreamError::Malformed(e.to_string()))
    }
}
