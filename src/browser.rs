//! Rendered-page access for upstreams that only expose data after scripts run.
//!
//! A [`PageRenderer`] hands out one [`RenderSession`] per request. Sessions are
//! only ever driven through [`render_page`], which closes the session on every
//! exit path, timeouts included. A [`ScopedSession`] dropped without release
//! (task cancelled mid-render) closes itself in the background.

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::UpstreamError;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait RenderSession: Send {
    async fn navigate(&mut self, url: &Url) -> Result<(), UpstreamError>;

    /// Content of `<meta property="...">` in the rendered DOM, if present.
    async fn meta_property(&mut self, property: &str) -> Result<Option<String>, UpstreamError>;

    /// Serialized markup of the rendered document.
    async fn content(&mut self) -> Result<String, UpstreamError>;

    async fn close(self: Box<Self>);
}

#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn RenderSession>, UpstreamError>;
}

/// What a render leaves behind once the session is gone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedPage {
    pub html: String,
    pub og_image: Option<String>,
}

pub struct ScopedSession {
    session: Option<Box<dyn RenderSession>>,
}

impl ScopedSession {
    pub async fn acquire(
        renderer: &dyn PageRenderer,
        timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        let session = tokio::time::timeout(timeout, renderer.open_session())
            .await
            .map_err(|_| UpstreamError::Timeout("browser launch"))??;
        Ok(Self {
            session: Some(session),
        })
    }

    fn session_mut(&mut self) -> Option<&mut (dyn RenderSession + 'static)> {
        self.session.as_deref_mut()
    }

    pub async fn release(mut self) {
        if let Some(session) = self.session.take() {
            if tokio::time::timeout(CLOSE_TIMEOUT, session.close()).await.is_err() {
                tracing::warn!("browser session did not close in time");
            }
        }
    }
}

impl Drop for ScopedSession {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::warn!("browser session dropped before release, closing in background");
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(session.close());
            }
        }
    }
}

/// Aborts a background task when dropped, so a session cancelled halfway
/// through launch does not leave its event loop running.
#[cfg_attr(not(feature = "browser"), allow(dead_code))]
pub(crate) struct TaskGuard(tokio::task::JoinHandle<()>);

#[cfg_attr(not(feature = "browser"), allow(dead_code))]
impl TaskGuard {
    pub(crate) fn new(handle: tokio::task::JoinHandle<()>) -> Self {
        Self(handle)
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Opens a session, loads `url`, captures markup and `og:image`, and closes the
/// session whatever the outcome. `timeout` bounds launch and capture separately.
pub async fn render_page(
    renderer: &dyn PageRenderer,
    url: &Url,
    timeout: Duration,
) -> Result<RenderedPage, UpstreamError> {
    let mut scope = ScopedSession::acquire(renderer, timeout).await?;

    let outcome = match scope.session_mut() {
        Some(session) => tokio::time::timeout(timeout, capture(session, url))
            .await
            .unwrap_or(Err(UpstreamError::Timeout("page navigation"))),
        None => Err(UpstreamError::Browser("session already released".into())),
    };

    scope.release().await;
    outcome
}

async fn capture(session: &mut dyn RenderSession, url: &Url) -> Result<RenderedPage, UpstreamError> {
    session.navigate(url).await?;

    let og_image = match session.meta_property("og:image").await {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, "og:image lookup failed");
            None
        }
    };
    let html = session.content().await?;

    Ok(RenderedPage { html, og_image })
}

#[cfg(feature = "browser")]
pub use chromium::ChromiumRenderer;

#[cfg(feature = "browser")]
mod chromium {
    use async_trait::async_trait;
    use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
    use chromiumoxide::{Browser, BrowserConfig, Page};
    use futures::StreamExt;
    use url::Url;

    use super::{PageRenderer, RenderSession, TaskGuard};
    use crate::config::Identity;
    use crate::error::UpstreamError;

    fn browser_err(e: impl std::fmt::Display) -> UpstreamError {
        UpstreamError::Browser(e.to_string())
    }

    /// Headless Chromium driven over CDP. Launches one browser per session.
    pub struct ChromiumRenderer {
        identity: Identity,
    }

    impl ChromiumRenderer {
        pub fn new(identity: Identity) -> Self {
            Self { identity }
        }
    }

    #[async_trait]
    impl PageRenderer for ChromiumRenderer {
        async fn open_session(&self) -> Result<Box<dyn RenderSession>, UpstreamError> {
            let config = BrowserConfig::builder()
                .no_sandbox()
                .arg("--disable-setuid-sandbox")
                .arg("--disable-dev-shm-usage")
                .arg("--disable-gpu")
                .build()
                .map_err(UpstreamError::Browser)?;

            let (browser, mut handler) = Browser::launch(config).await.map_err(browser_err)?;
            // No await between launch and the session taking ownership: a
            // cancelled open still drops the browser and the handler guard.
            let handler = TaskGuard::new(tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if event.is_err() {
                        break;
                    }
                }
            }));

            let mut session = ChromiumSession {
                browser,
                page: None,
                _handler: handler,
            };

            match session.open_page(&self.identity).await {
                Ok(()) => Ok(Box::new(session)),
                Err(e) => {
                    Box::new(session).close().await;
                    Err(e)
                }
            }
        }
    }

    struct ChromiumSession {
        browser: Browser,
        page: Option<Page>,
        // Held for its drop.
        _handler: TaskGuard,
    }

    impl ChromiumSession {
        async fn open_page(&mut self, identity: &Identity) -> Result<(), UpstreamError> {
            let page = self.browser.new_page("about:blank").await.map_err(browser_err)?;

            let mut params = SetUserAgentOverrideParams::new(identity.user_agent.clone());
            params.accept_language = Some(identity.accept_language.clone());
            page.execute(params).await.map_err(browser_err)?;

            self.page = Some(page);
            Ok(())
        }

        fn page(&self) -> Result<&Page, UpstreamError> {
            self.page
                .as_ref()
                .ok_or_else(|| UpstreamError::Browser("no page open".into()))
        }
    }

    #[async_trait]
    impl RenderSession for ChromiumSession {
        async fn navigate(&mut self, url: &Url) -> Result<(), UpstreamError> {
            self.page()?.goto(url.as_str()).await.map_err(browser_err)?;
            Ok(())
        }

        async fn meta_property(&mut self, property: &str) -> Result<Option<String>, UpstreamError> {
            let selector = format!(r#"meta[property="{}"]"#, property);
            match self.page()?.find_element(selector).await {
                Ok(element) => element.attribute("content").await.map_err(browser_err),
                Err(_) => Ok(None),
            }
        }

        async fn content(&mut self) -> Result<String, UpstreamError> {
            self.page()?.content().await.map_err(browser_err)
        }

        async fn close(mut self: Box<Self>) {
            if let Err(e) = self.browser.close().await {
                tracing::debug!(error = %e, "browser close failed");
            }
            let _ = self.browser.wait().await;
        }
    }
}
