use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use url::Url;

use crate::chain::ProfileQuery;
use crate::error::AppError;
use crate::extract;
use crate::fetcher::{StatusPolicy, UpstreamFetcher};
use crate::proxy::ProxyLinks;

const TITLE_PREFIX: &str = "Pay ";
const TITLE_SUFFIX: &str = " on Cash App";

/// Response shape of `/cash`, identical in both modes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CashProfile {
    pub name: String,
    pub avatar: Option<String>,
}

#[async_trait]
pub trait CashResolver: Send + Sync {
    async fn resolve(&self, query: &ProfileQuery) -> Result<CashProfile, AppError>;
}

/// Names the profile after the tag itself and never goes to the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct DerivedCashResolver;

#[async_trait]
impl CashResolver for DerivedCashResolver {
    async fn resolve(&self, query: &ProfileQuery) -> Result<CashProfile, AppError> {
        Ok(CashProfile {
            name: query.handle().to_string(),
            avatar: None,
        })
    }
}

/// Reads the public tag page's Open Graph tags.
pub struct ScrapingCashResolver {
    fetcher: Arc<UpstreamFetcher>,
    base: Url,
    links: ProxyLinks,
}

impl ScrapingCashResolver {
    pub fn new(fetcher: Arc<UpstreamFetcher>, base: Url, links: ProxyLinks) -> Self {
        Self {
            fetcher,
            base,
            links,
        }
    }
}

#[async_trait]
impl CashResolver for ScrapingCashResolver {
    async fn resolve(&self, query: &ProfileQuery) -> Result<CashProfile, AppError> {
        let path = format!("${}", urlencoding::encode(query.handle()));
        let url = self.base.join(&path).map_err(|e| {
            tracing::debug!(error = %e, "bad tag page url");
            AppError::NotFound
        })?;

        let html = self
            .fetcher
            .fetch_html(&url, StatusPolicy::SuccessOnly)
            .await
            .map_err(|e| {
                tracing::info!(tag = %query.tagged(), error = %e, "tag page unavailable");
                AppError::NotFound
            })?;

        let name = extract::meta_property(&html, "og:title")
            .map(|title| clean_title(&title))
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| query.handle().to_string());
        let avatar = extract::meta_property(&html, "og:image").and_then(|raw| self.links.link(&raw));

        Ok(CashProfile { name, avatar })
    }
}

fn clean_title(title: &str) -> String {
    let title = title.trim();
    let title = title.strip_prefix(TITLE_PREFIX).unwrap_or(title);
    let title = title.strip_suffix(TITLE_SUFFIX).unwrap_or(title);
    title.trim().to_string()
}
