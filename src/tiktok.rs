//! Short-video profile resolution.
//!
//! Two chains are assembled from the strategies here. The network chain
//! fetches the profile page and reads its embedded state, then asks the public
//! oEmbed endpoint. The browser chain renders the page once and reads, in
//! order, an exact embedded-state record from the rendered markup, the
//! `og:image` meta tag, a first-record fallback and finally any avatar field it
//! can find by pattern.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::browser::{render_page, PageRenderer};
use crate::chain::{Confidence, ExtractionAttempt, ExtractorChain, ProfileQuery, Strategy};
use crate::error::UpstreamError;
use crate::extract;
use crate::fetcher::{StatusPolicy, UpstreamFetcher};
use crate::proxy::ProxyLinks;

fn profile_url(base: &Url, handle: &str) -> Result<Url, UpstreamError> {
    base.join(&format!("@{}", urlencoding::encode(handle)))
        .map_err(|e| UpstreamError::Malformed(format!("profile url: {}", e)))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub struct EmbeddedStateStrategy {
    fetcher: Arc<UpstreamFetcher>,
    base: Url,
}

impl EmbeddedStateStrategy {
    pub fn new(fetcher: Arc<UpstreamFetcher>, base: Url) -> Self {
        Self { fetcher, base }
    }
}

#[async_trait]
impl Strategy for EmbeddedStateStrategy {
    fn name(&self) -> &'static str {
        "embedded_state"
    }

    async fn attempt(&self, query: &ProfileQuery) -> Result<Option<ExtractionAttempt>, UpstreamError> {
        let url = profile_url(&self.base, query.handle())?;
        let html = self
            .fetcher
            .fetch_html(&url, StatusPolicy::AllowClientErrors)
            .await?;

        Ok(extract::profile_from_html(&html, query.handle()).map(|profile| ExtractionAttempt {
            strategy: self.name(),
            avatar: Some(profile.avatar),
            name: profile.name,
            confidence: profile.confidence,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct OEmbed {
    author_name: Option<String>,
    thumbnail_url: Option<String>,
}

pub struct OEmbedStrategy {
    fetcher: Arc<UpstreamFetcher>,
    base: Url,
}

impl OEmbedStrategy {
    pub fn new(fetcher: Arc<UpstreamFetcher>, base: Url) -> Self {
        Self { fetcher, base }
    }
}

#[async_trait]
impl Strategy for OEmbedStrategy {
    fn name(&self) -> &'static str {
        "oembed"
    }

    async fn attempt(&self, query: &ProfileQuery) -> Result<Option<ExtractionAttempt>, UpstreamError> {
        let profile = profile_url(&self.base, query.handle())?;
        let mut url = self
            .base
            .join("oembed")
            .map_err(|e| UpstreamError::Malformed(format!("oembed url: {}", e)))?;
        url.query_pairs_mut().append_pair("url", profile.as_str());

        let oembed: OEmbed = self.fetcher.fetch_json(&url).await?;
        let Some(avatar) = non_empty(oembed.thumbnail_url) else {
            return Ok(None);
        };

        Ok(Some(ExtractionAttempt {
            strategy: self.name(),
            avatar: Some(avatar),
            name: non_empty(oembed.author_name),
            confidence: Confidence::Exact,
        }))
    }
}

pub struct RenderedDomStrategy {
    renderer: Arc<dyn PageRenderer>,
    base: Url,
    timeout: Duration,
}

impl RenderedDomStrategy {
    pub fn new(renderer: Arc<dyn PageRenderer>, base: Url, timeout: Duration) -> Self {
        Self {
            renderer,
            base,
            timeout,
        }
    }
}

#[async_trait]
impl Strategy for RenderedDomStrategy {
    fn name(&self) -> &'static str {
        "rendered_dom"
    }

    async fn attempt(&self, query: &ProfileQuery) -> Result<Option<ExtractionAttempt>, UpstreamError> {
        let mut url = profile_url(&self.base, query.handle())?;
        url.query_pairs_mut().append_pair("lang", "en");

        let page = render_page(self.renderer.as_ref(), &url, self.timeout).await?;

        let state = extract::profile_from_html(&page.html, query.handle());
        let from_state = |profile: extract::StateProfile| ExtractionAttempt {
            strategy: self.name(),
            avatar: Some(profile.avatar),
            name: profile.name,
            confidence: profile.confidence,
        };

        // The page's own og:image outranks a record that may be someone else's.
        let state = match state {
            Some(profile) if profile.confidence == Confidence::Exact => {
                return Ok(Some(from_state(profile)));
            }
            other => other,
        };

        if let Some(avatar) = non_empty(page.og_image) {
            return Ok(Some(ExtractionAttempt {
                strategy: self.name(),
                avatar: Some(avatar),
                name: None,
                confidence: Confidence::Exact,
            }));
        }

        if let Some(profile) = state {
            return Ok(Some(from_state(profile)));
        }

        Ok(extract::scan_avatar_fields(&page.html).map(|avatar| ExtractionAttempt {
            strategy: self.name(),
            avatar: Some(avatar),
            name: None,
            confidence: Confidence::Exact,
        }))
    }
}

/// Response shape of `/tiktok`. Only `name`, `avatar` and `blocked` go over
/// the wire; the rest is for in-process callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedProfile {
    #[serde(rename = "name")]
    pub display_name: String,
    /// Always a proxy link, never the raw upstream URL.
    #[serde(rename = "avatar")]
    pub avatar_url: Option<String>,
    pub blocked: bool,
    #[serde(skip)]
    pub strategy: Option<&'static str>,
    #[serde(skip)]
    pub confidence: Option<Confidence>,
}

impl ResolvedProfile {
    fn blocked(query: &ProfileQuery) -> Self {
        Self {
            display_name: query.tagged(),
            avatar_url: None,
            blocked: true,
            strategy: None,
            confidence: None,
        }
    }
}

pub struct TikTokResolver {
    chain: ExtractorChain,
    links: ProxyLinks,
}

impl TikTokResolver {
    pub fn new(chain: ExtractorChain, links: ProxyLinks) -> Self {
        Self { chain, links }
    }

    /// Embedded state from a plain page fetch, then oEmbed.
    pub fn network(fetcher: Arc<UpstreamFetcher>, base: Url, links: ProxyLinks) -> Self {
        let strategies: Vec<Box<dyn Strategy>> = vec![
            Box::new(EmbeddedStateStrategy::new(fetcher.clone(), base.clone())) as Box<dyn Strategy>,
            Box::new(OEmbedStrategy::new(fetcher, base)),
        ];
        let chain = ExtractorChain::new(strategies);
        Self::new(chain, links)
    }

    pub fn browser(
        renderer: Arc<dyn PageRenderer>,
        base: Url,
        timeout: Duration,
        links: ProxyLinks,
    ) -> Self {
        let strategies: Vec<Box<dyn Strategy>> =
            vec![Box::new(RenderedDomStrategy::new(renderer, base, timeout))];
        let chain = ExtractorChain::new(strategies);
        Self::new(chain, links)
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.chain.strategy_names()
    }

    /// Never fails: upstream trouble ends in a `blocked` profile.
    pub async fn resolve(&self, query: &ProfileQuery) -> ResolvedProfile {
        let Some(attempt) = self.chain.run(query).await else {
            tracing::info!(handle = query.handle(), "no strategy produced an avatar");
            return ResolvedProfile::blocked(query);
        };

        match attempt.avatar.as_deref().and_then(|raw| self.links.link(raw)) {
            Some(link) => ResolvedProfile {
                display_name: attempt.name.unwrap_or_else(|| query.tagged()),
                avatar_url: Some(link),
                blocked: false,
                strategy: Some(attempt.strategy),
                confidence: Some(attempt.confidence),
            },
            None => ResolvedProfile::blocked(query),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::FakeRenderer;
    use crate::chain::Platform;
    use crate::config::Identity;
    use httpmock::prelude::*;

    fn identity() -> Identity {
        Identity {
            user_agent: "test-agent/1.0".into(),
            accept_language: "en-US".into(),
            html_accept: "text/html".into(),
            image_accept: "image/*".into(),
            referer: "https://www.tiktok.com/".into(),
            origin: "https://www.tiktok.com".into(),
        }
    }

    fn network_resolver(server: &MockServer) -> TikTokResolver {
        let fetcher = Arc::new(UpstreamFetcher::new(identity(), Duration::from_secs(5)).unwrap());
        let base = Url::parse(&server.base_url()).unwrap();
        TikTokResolver::network(fetcher, base, ProxyLinks::default())
    }

    fn browser_resolver(renderer: FakeRenderer) -> TikTokResolver {
        TikTokResolver::browser(
            Arc::new(renderer),
            Url::parse("https://www.tiktok.com").unwrap(),
            Duration::from_secs(1),
            ProxyLinks::default(),
        )
    }

    fn query(raw: &str) -> ProfileQuery {
        ProfileQuery::parse(Platform::ShortVideo, raw).unwrap()
    }

    fn sigi_page(state: &str) -> String {
        format!(
            r#"<html><head><script id="SIGI_STATE" type="application/json">{}</script></head></html>"#,
            state
        )
    }

    fn proxied(raw: &str) -> String {
        format!("/proxy-image?url={}", urlencoding::encode(raw))
    }

    #[test]
    fn chains_are_assembled_in_priority_order() {
        let fetcher = Arc::new(UpstreamFetcher::new(identity(), Duration::from_secs(5)).unwrap());
        let base = Url::parse("https://www.tiktok.com").unwrap();
        let network = TikTokResolver::network(fetcher, base, ProxyLinks::default());
        assert_eq!(network.strategy_names(), vec!["embedded_state", "oembed"]);

        let browser = browser_resolver(FakeRenderer::default());
        assert_eq!(browser.strategy_names(), vec!["rendered_dom"]);
    }

    #[tokio::test]
    async fn embedded_state_honours_resolution_preference() {
        let server = MockServer::start_async().await;
        let page = server
            .mock_async(|when, then| {
                when.method(GET).path("/@demo");
                then.status(200).body(sigi_page(
                    r#"{"UserModule":{"users":{"demo":{"avatarLarger":"https://cdn.example/A.jpeg","avatarMedium":"https://cdn.example/B.jpeg","nickname":"Demo"}}}}"#,
                ));
            })
            .await;
        let oembed = server
            .mock_async(|when, then| {
                when.method(GET).path("/oembed");
                then.status(200);
            })
            .await;

        let profile = network_resolver(&server).resolve(&query("@demo")).await;

        page.assert_async().await;
        oembed.assert_hits_async(0).await;
        assert_eq!(profile.display_name, "Demo");
        assert_eq!(profile.avatar_url, Some(proxied("https://cdn.example/A.jpeg")));
        assert!(!profile.blocked);
        assert_eq!(profile.strategy, Some("embedded_state"));
        assert_eq!(profile.confidence, Some(Confidence::Exact));
    }

    #[tokio::test]
    async fn missing_name_defaults_to_the_tagged_handle() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/@demo");
                then.status(200).body(sigi_page(
                    r#"{"UserModule":{"users":{"demo":{"avatarThumb":"\/\/cdn.example\/t.jpeg"}}}}"#,
                ));
            })
            .await;

        let profile = network_resolver(&server).resolve(&query("@demo")).await;

        assert_eq!(profile.display_name, "@demo");
        assert_eq!(profile.avatar_url, Some(proxied("https://cdn.example/t.jpeg")));
    }

    #[tokio::test]
    async fn fallback_record_is_distinguishable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/@demo");
                then.status(200).body(sigi_page(
                    r#"{"UserModule":{"users":{"someoneelse":{"avatarLarger":"https://cdn.example/x.jpeg"}}}}"#,
                ));
            })
            .await;

        let profile = network_resolver(&server).resolve(&query("demo")).await;

        assert!(!profile.blocked);
        assert_eq!(profile.confidence, Some(Confidence::FirstRecordFallback));
    }

    #[tokio::test]
    async fn bot_check_page_still_gets_parsed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/@demo");
                then.status(403).body(sigi_page(
                    r#"{"userInfo":{"user":{"uniqueId":"demo","avatarMedium":"https://cdn.example/m.jpeg"}}}"#,
                ));
            })
            .await;

        let profile = network_resolver(&server).resolve(&query("@demo")).await;
        assert_eq!(profile.avatar_url, Some(proxied("https://cdn.example/m.jpeg")));
    }

    #[tokio::test]
    async fn falls_back_to_oembed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/@demo");
                then.status(200).body(sigi_page("{not json"));
            })
            .await;
        let profile_url = format!("{}/@demo", server.base_url());
        let oembed = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/oembed")
                    .query_param("url", profile_url.as_str());
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"author_name":"Demo Person","thumbnail_url":"https://cdn.example/o.jpeg"}"#);
            })
            .await;

        let profile = network_resolver(&server).resolve(&query("@demo")).await;

        oembed.assert_async().await;
        assert_eq!(profile.display_name, "Demo Person");
        assert_eq!(profile.avatar_url, Some(proxied("https://cdn.example/o.jpeg")));
        assert_eq!(profile.strategy, Some("oembed"));
    }

    #[tokio::test]
    async fn everything_failing_is_blocked_not_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/@demo");
                then.status(500);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/oembed");
                then.status(200).body(r#"{"author_name":"Demo","thumbnail_url":""}"#);
            })
            .await;

        let profile = network_resolver(&server).resolve(&query("@demo")).await;

        assert_eq!(
            profile,
            ResolvedProfile {
                display_name: "@demo".into(),
                avatar_url: None,
                blocked: true,
                strategy: None,
                confidence: None,
            }
        );
    }

    #[tokio::test]
    async fn unreachable_upstream_is_blocked() {
        let fetcher = Arc::new(UpstreamFetcher::new(identity(), Duration::from_secs(2)).unwrap());
        let base = Url::parse("http://127.0.0.1:1").unwrap();
        let resolver = TikTokResolver::network(fetcher, base, ProxyLinks::default());

        let profile = resolver.resolve(&query("@demo")).await;
        assert!(profile.blocked);
        assert_eq!(profile.avatar_url, None);
    }

    #[tokio::test]
    async fn concurrent_handles_do_not_interfere() {
        let server = MockServer::start_async().await;
        for handle in ["alpha", "beta"] {
            let state = format!(
                r#"{{"UserModule":{{"users":{{"{0}":{{"avatarLarger":"https://cdn.example/{0}.jpeg","nickname":"{0}"}}}}}}}}"#,
                handle
            );
            server
                .mock_async(move |when, then| {
                    when.method(GET).path(format!("/@{}", handle));
                    then.status(200)
                        .delay(Duration::from_millis(50))
                        .body(sigi_page(&state));
                })
                .await;
        }
        let resolver = network_resolver(&server);

        let (qa, qb) = (query("@alpha"), query("@beta"));
        let (alpha, beta) = tokio::join!(resolver.resolve(&qa), resolver.resolve(&qb));

        assert_eq!(alpha.display_name, "alpha");
        assert_eq!(alpha.avatar_url, Some(proxied("https://cdn.example/alpha.jpeg")));
        assert_eq!(beta.display_name, "beta");
        assert_eq!(beta.avatar_url, Some(proxied("https://cdn.example/beta.jpeg")));
    }

    #[tokio::test]
    async fn rendered_og_image_is_used_and_unescaped() {
        let renderer = FakeRenderer {
            og_image: Some(r"https:\/\/cdn.example\/og.jpeg?a=1&b=2".into()),
            ..FakeRenderer::serving("<html><head></head></html>")
        };
        let resolver = browser_resolver(renderer.clone());

        let profile = resolver.resolve(&query("@demo")).await;

        assert_eq!(profile.display_name, "@demo");
        assert_eq!(
            profile.avatar_url,
            Some(proxied("https://cdn.example/og.jpeg?a=1&b=2"))
        );
        assert_eq!(renderer.opened(), 1);
        assert_eq!(renderer.closed(), 1);
    }

    #[tokio::test]
    async fn rendered_state_comes_before_og_image() {
        let renderer = FakeRenderer {
            og_image: Some("https://cdn.example/og.jpeg".into()),
            ..FakeRenderer::serving(&sigi_page(
                r#"{"UserModule":{"users":{"demo":{"avatarLarger":"https://cdn.example/state.jpeg","nickname":"Demo"}}}}"#,
            ))
        };

        let profile = browser_resolver(renderer).resolve(&query("@demo")).await;

        assert_eq!(profile.display_name, "Demo");
        assert_eq!(profile.avatar_url, Some(proxied("https://cdn.example/state.jpeg")));
    }

    #[tokio::test]
    async fn rendered_og_image_beats_a_fallback_record() {
        let renderer = FakeRenderer {
            og_image: Some("https://cdn.example/own.jpeg".into()),
            ..FakeRenderer::serving(&sigi_page(
                r#"{"UserModule":{"users":{"someoneelse":{"avatarLarger":"https://cdn.example/other.jpeg","nickname":"Other"}}}}"#,
            ))
        };

        let profile = browser_resolver(renderer).resolve(&query("@demo")).await;

        assert_eq!(profile.display_name, "@demo");
        assert_eq!(profile.avatar_url, Some(proxied("https://cdn.example/own.jpeg")));
        assert_eq!(profile.confidence, Some(Confidence::Exact));
    }

    #[tokio::test]
    async fn rendered_fallback_record_is_used_without_og_image() {
        let renderer = FakeRenderer::serving(&sigi_page(
            r#"{"UserModule":{"users":{"someoneelse":{"avatarLarger":"https://cdn.example/other.jpeg","nickname":"Other"}}}}"#,
        ));

        let profile = browser_resolver(renderer).resolve(&query("@demo")).await;

        assert_eq!(profile.avatar_url, Some(proxied("https://cdn.example/other.jpeg")));
        assert_eq!(profile.confidence, Some(Confidence::FirstRecordFallback));
    }

    #[tokio::test]
    async fn rendered_markup_is_scanned_as_a_last_resort() {
        let renderer = FakeRenderer::serving(
            r#"<html><script>window.x={"avatarMedium":"https://cdn.example/m.jpeg","avatarThumb":"https://cdn.example/t.jpeg"}</script></html>"#,
        );

        let profile = browser_resolver(renderer).resolve(&query("@demo")).await;

        assert_eq!(profile.avatar_url, Some(proxied("https://cdn.example/m.jpeg")));
    }

    #[tokio::test]
    async fn failed_render_is_blocked_and_releases_the_browser() {
        let renderer = FakeRenderer::default();

        let profile = browser_resolver(renderer.clone()).resolve(&query("@demo")).await;

        assert!(profile.blocked);
        assert_eq!(renderer.opened(), 1);
        assert_eq!(renderer.closed(), 1);
    }
}
