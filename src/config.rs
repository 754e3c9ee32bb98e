use std::time::Duration;

use clap::{Parser, ValueEnum};
use url::Url;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";

const HTML_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8";
const IMAGE_ACCEPT: &str = "image/avif,image/webp,image/apng,image/*,*/*;q=0.8";

const MIN_IMAGE_MAX_AGE: u64 = 3_600;
const MAX_IMAGE_MAX_AGE: u64 = 86_400;

/// How `/cash` obtains a display name and avatar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CashMode {
    /// Derive the name from the tag itself. No network call.
    Derive,
    /// Read `og:title` / `og:image` from the public tag page.
    Scrape,
}

/// Which extractor chain `/tiktok` runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TikTokBackend {
    /// Plain fetch of the profile page, then oEmbed.
    Network,
    /// Headless browser render of the profile page.
    Browser,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "realpfp-server", version, about = "Profile avatar resolver and image re-hosting proxy")]
pub struct Config {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// When set, proxy links are absolute (`<base>/proxy-image?url=...`).
    #[arg(long, env = "PUBLIC_BASE_URL")]
    pub public_base_url: Option<Url>,

    #[arg(long, env = "TIKTOK_BACKEND", value_enum, default_value_t = TikTokBackend::Network)]
    pub tiktok_backend: TikTokBackend,

    #[arg(long, env = "CASH_MODE", value_enum, default_value_t = CashMode::Derive)]
    pub cash_mode: CashMode,

    #[arg(long, env = "TIKTOK_BASE_URL", default_value = "https://www.tiktok.com")]
    pub tiktok_base_url: Url,

    #[arg(long, env = "CASH_BASE_URL", default_value = "https://cash.app")]
    pub cash_base_url: Url,

    #[arg(long, env = "UPSTREAM_USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    #[arg(long, env = "UPSTREAM_ACCEPT_LANGUAGE", default_value = "en-US,en;q=0.9")]
    pub accept_language: String,

    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS", default_value_t = 15)]
    pub upstream_timeout_secs: u64,

    #[arg(long, env = "NAVIGATION_TIMEOUT_SECS", default_value_t = 45)]
    pub navigation_timeout_secs: u64,

    #[arg(long, env = "PROXY_MAX_REDIRECTS", default_value_t = 5)]
    pub proxy_max_redirects: usize,

    /// Freshness window handed to clients; clamped to one hour..one day.
    #[arg(long, env = "IMAGE_MAX_AGE_SECS", default_value_t = 86_400)]
    pub image_max_age_secs: u64,

    /// Directory served for any path the API does not claim.
    #[arg(long, env = "STATIC_DIR")]
    pub static_dir: Option<std::path::PathBuf>,
}

impl Config {
    pub fn identity(&self) -> Identity {
        let origin = self.tiktok_base_url.origin().ascii_serialization();
        Identity {
            user_agent: self.user_agent.clone(),
            accept_language: self.accept_language.clone(),
            html_accept: HTML_ACCEPT.to_string(),
            image_accept: IMAGE_ACCEPT.to_string(),
            referer: format!("{}/", origin),
            origin,
        }
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn cache_control(&self) -> String {
        let max_age = self
            .image_max_age_secs
            .clamp(MIN_IMAGE_MAX_AGE, MAX_IMAGE_MAX_AGE);
        format!("public, max-age={}", max_age)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Disguised client identity presented to upstream sites.
///
/// Built once from [`Config`] and handed to each outbound component at
/// construction time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_agent: String,
    pub accept_language: String,
    pub html_accept: String,
    pub image_accept: String,
    /// Claimed referring page, e.g. `https://www.tiktok.com/`.
    pub referer: String,
    /// Claimed origin, e.g. `https://www.tiktok.com`.
    pub origin: String,
}
