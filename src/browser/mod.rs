//! Browser session management for JavaScript-rendered pages.
//!
//! The automation backend is kept behind the narrow [`PageDriver`] capability
//! trait so a deterministic fake can drive every component test without a
//! real renderer. The chromiumoxide implementation lives behind the `browser`
//! feature.

pub mod pool;

#[cfg(feature = "browser")]
pub mod chromium;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors surfaced by a page driver.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Navigation was issued but did not complete.
    #[error("navigation failed: {0}")]
    Navigation(String),
    /// The underlying browser session is gone.
    #[error("session crashed: {0}")]
    Crashed(String),
    /// A DOM handle went away between render and read.
    #[error("stale element: {0}")]
    Stale(String),
    #[error("{0}")]
    Other(anyhow::Error),
}

/// Narrow capability surface over one render-capable browser session.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate to a URL. Returns once navigation is issued; render
    /// completion is the fetcher's concern.
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    /// Current rendered document as an HTML string.
    async fn content(&self) -> Result<String, DriverError>;

    /// Scroll to the bottom of the page to trigger lazy content loading.
    async fn scroll_to_bottom(&self) -> Result<(), DriverError>;

    /// Tear the session down. Errors during teardown are swallowed.
    async fn close(&self);
}

/// Async constructor for pool sessions.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self) -> anyhow::Result<Box<dyn PageDriver>>;
}

/// Pool-visible lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Leased,
    Dead,
}

/// One pooled browser session and its bookkeeping.
///
/// Only the pool moves a session between states; holders of a lease interact
/// with the driver alone.
pub struct BrowserSession {
    pub id: u64,
    pub(crate) driver: Box<dyn PageDriver>,
    pub(crate) state: SessionState,
    pub pages_served: u32,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

impl BrowserSession {
    pub(crate) fn new(id: u64, driver: Box<dyn PageDriver>) -> Self {
        let now = Utc::now();
        Self {
            id,
            driver,
            state: SessionState::Idle,
            pages_served: 0,
            created_at: now,
            last_used_at: now,
        }
    }
}

impl std::fmt::Debug for BrowserSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("pages_served", &self.pages_served)
            .finish()
    }
}
