use async_trait::async_trait;
use serde::Serialize;

use crate::error::UpstreamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    ShortVideo,
    Payment,
}

impl Platform {
    pub fn sigil(self) -> char {
        match self {
            Platform::ShortVideo => '@',
            Platform::Payment => '$',
        }
    }
}

/// A handle to resolve, with its sigil stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileQuery {
    platform: Platform,
    handle: String,
}

impl ProfileQuery {
    /// Returns `None` when nothing is left after trimming and sigil stripping.
    pub fn parse(platform: Platform, raw: &str) -> Option<Self> {
        let handle = raw.trim().trim_start_matches(platform.sigil()).trim();
        if handle.is_empty() {
            return None;
        }
        Some(Self {
            platform,
            handle: handle.to_string(),
        })
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// The handle with its platform sigil, e.g. `@demo` or `$alice`.
    pub fn tagged(&self) -> String {
        format!("{}{}", self.platform.sigil(), self.handle)
    }
}

/// How sure a strategy is that the record it read belongs to the queried handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Exact,
    /// The handle's own record was missing and another record stood in.
    FirstRecordFallback,
}

/// What one strategy pulled out of the upstream. Candidates are raw, not yet
/// normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionAttempt {
    pub strategy: &'static str,
    pub avatar: Option<String>,
    pub name: Option<String>,
    pub confidence: Confidence,
}

#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` means the upstream answered but held nothing usable.
    async fn attempt(&self, query: &ProfileQuery) -> Result<Option<ExtractionAttempt>, UpstreamError>;
}

/// Ordered fallback strategies. The first attempt carrying an avatar wins
/// whole; results are never merged across strategies.
pub struct ExtractorChain {
    strategies: Vec<Box<dyn Strategy>>,
}

impl ExtractorChain {
    pub fn new(strategies: Vec<Box<dyn Strategy>>) -> Self {
        Self { strategies }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&self, query: &ProfileQuery) -> Option<ExtractionAttempt> {
        for strategy in &self.strategies {
            let handle = query.handle();
            match strategy.attempt(query).await {
                Ok(Some(attempt)) if attempt.avatar.is_some() => {
                    if attempt.confidence == Confidence::FirstRecordFallback {
                        tracing::warn!(
                            strategy = strategy.name(),
                            handle,
                            "handle's own record missing, used first available record"
                        );
                    }
                    tracing::debug!(strategy = strategy.name(), handle, "avatar found");
                    return Some(attempt);
                }
                Ok(_) => {
                    tracing::debug!(strategy = strategy.name(), handle, "no avatar");
                }
                Err(e) => {
                    tracing::debug!(strategy = strategy.name(), handle, error = %e, "strategy failed");
                }
            }
        }
        None
    }
}
