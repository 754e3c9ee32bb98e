use std::sync::Arc;

use anyhow::Context;

use crate::browser::PageRenderer;
use crate::cash::{CashResolver, DerivedCashResolver, ScrapingCashResolver};
use crate::config::{CashMode, Config, Identity, TikTokBackend};
use crate::fetcher::UpstreamFetcher;
use crate::proxy::{ImageProxy, ProxyLinks};
use crate::tiktok::TikTokResolver;

// Shared state for the handlers. Built once at startup and never mutated, so
// concurrent requests share nothing but read-only configuration.
#[derive(Clone)]
pub struct AppState {
    pub tiktok: Arc<TikTokResolver>,
    pub cash: Arc<dyn CashResolver>,
    pub image_proxy: Arc<ImageProxy>,
}

impl AppState {
    pub fn new(
        tiktok: TikTokResolver,
        cash: Arc<dyn CashResolver>,
        image_proxy: ImageProxy,
    ) -> Self {
        Self {
            tiktok: Arc::new(tiktok),
            cash,
            image_proxy: Arc::new(image_proxy),
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let identity = config.identity();
        let links = ProxyLinks::new(config.public_base_url.clone());

        let fetcher = Arc::new(
            UpstreamFetcher::new(identity.clone(), config.upstream_timeout())
                .context("failed to build upstream client")?,
        );

        let tiktok = match config.tiktok_backend {
            TikTokBackend::Network => TikTokResolver::network(
                fetcher.clone(),
                config.tiktok_base_url.clone(),
                links.clone(),
            ),
            TikTokBackend::Browser => TikTokResolver::browser(
                browser_renderer(&identity)?,
                config.tiktok_base_url.clone(),
                config.navigation_timeout(),
                links.clone(),
            ),
        };

        let cash: Arc<dyn CashResolver> = match config.cash_mode {
            CashMode::Derive => Arc::new(DerivedCashResolver),
            CashMode::Scrape => Arc::new(ScrapingCashResolver::new(
                fetcher,
                config.cash_base_url.clone(),
                links,
            )),
        };

        let image_proxy = ImageProxy::new(
            identity,
            config.upstream_timeout(),
            config.proxy_max_redirects,
            config.cache_control(),
        )
        .context("failed to build image proxy client")?;

        tracing::info!(
            tiktok_backend = ?config.tiktok_backend,
            strategies = ?tiktok.strategy_names(),
            cash_mode = ?config.cash_mode,
            "resolvers configured"
        );

        Ok(Self::new(tiktok, cash, image_proxy))
    }
}

#[cfg(feature = "browser")]
fn browser_renderer(identity: &Identity) -> anyhow::Result<Arc<dyn PageRenderer>> {
    Ok(Arc::new(crate::browser::ChromiumRenderer::new(identity.clone())))
}

#[cfg(not(feature = "browser"))]
fn browser_renderer(_identity: &Identity) -> anyhow::Result<Arc<dyn PageRenderer>> {
    anyhow::bail!(
        "the browser backend needs a build with `--features browser`; use `--tiktok-backend network` otherwise"
    )
}
