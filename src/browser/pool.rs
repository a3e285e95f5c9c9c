//! Fixed-capacity session pool with exclusive leasing and recycling.
//!
//! The capacity cap doubles as the politeness limit: it bounds how many
//! renderer sessions, and therefore simultaneous requests against the
//! target site, can be in flight. Sessions are created lazily through the
//! factory, handed out under a semaphore, and destroyed once they crash or
//! have served enough pages to be suspect.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use super::{BrowserSession, PageDriver, SessionFactory, SessionState};
use crate::error::ScrapeError;

/// Pages a session may serve before it is recycled.
pub const DEFAULT_RECYCLE_THRESHOLD: u32 = 40;

/// Fixed-size pool of renderer sessions.
pub struct BrowserSessionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    factory: Arc<dyn SessionFactory>,
    semaphore: Arc<Semaphore>,
    idle: Mutex<VecDeque<BrowserSession>>,
    capacity: usize,
    recycle_threshold: u32,
    next_id: AtomicU64,
    leased: AtomicUsize,
}

impl BrowserSessionPool {
    pub fn new(factory: Arc<dyn SessionFactory>, capacity: usize) -> Self {
        Self::with_recycle_threshold(factory, capacity, DEFAULT_RECYCLE_THRESHOLD)
    }

    pub fn with_recycle_threshold(
        factory: Arc<dyn SessionFactory>,
        capacity: usize,
        recycle_threshold: u32,
    ) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(PoolInner {
                factory,
                semaphore: Arc::new(Semaphore::new(capacity)),
                idle: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                recycle_threshold,
                next_id: AtomicU64::new(0),
                leased: AtomicUsize::new(0),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Sessions currently leased out.
    pub fn leased(&self) -> usize {
        self.inner.leased.load(Ordering::Relaxed)
    }

    /// Sessions currently idle and ready to lease.
    pub fn idle(&self) -> usize {
        self.inner.idle.lock().unwrap().len()
    }

    /// Lease an exclusive session, waiting until one frees up or `timeout`
    /// elapses.
    ///
    /// The returned lease releases on drop, so the session comes back even
    /// when the holding task fails or is cancelled mid-fetch.
    pub async fn acquire(&self, timeout: Duration) -> Result<SessionLease, ScrapeError> {
        let permit =
            tokio::time::timeout(timeout, self.inner.semaphore.clone().acquire_owned())
                .await
                .map_err(|_| ScrapeError::PoolTimeout(timeout))?
                .expect("session pool semaphore closed");

        let existing = self.inner.idle.lock().unwrap().pop_front();
        let mut session = match existing {
            Some(session) => session,
            None => self.inner.create_session().await?,
        };

        session.state = SessionState::Leased;
        session.last_used_at = Utc::now();
        self.inner.leased.fetch_add(1, Ordering::Relaxed);
        debug!(session_id = session.id, "leased browser session");

        Ok(SessionLease {
            pool: Arc::clone(&self.inner),
            session: Some(session),
            crashed: false,
            _permit: permit,
        })
    }
}

impl PoolInner {
    async fn create_session(&self) -> Result<BrowserSession, ScrapeError> {
        let driver = self
            .factory
            .create()
            .await
            .map_err(ScrapeError::Driver)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(session_id = id, "created browser session");
        Ok(BrowserSession::new(id, driver))
    }

    /// Put a session back, or destroy and replace it when it crashed or has
    /// served out its page budget.
    fn release(self: &Arc<Self>, mut session: BrowserSession, crashed: bool) {
        self.leased.fetch_sub(1, Ordering::Relaxed);

        let worn_out = session.pages_served >= self.recycle_threshold;
        if !crashed && !worn_out {
            session.state = SessionState::Idle;
            self.idle.lock().unwrap().push_back(session);
            return;
        }

        session.state = SessionState::Dead;
        debug!(
            session_id = session.id,
            crashed,
            pages_served = session.pages_served,
            "recycling browser session"
        );

        // Destroy and respawn off the caller's path. Without a runtime (or
        // when replacement creation fails) the next acquire simply creates a
        // session lazily; capacity is governed by the semaphore either way.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let inner = Arc::clone(self);
            handle.spawn(async move {
                session.driver.close().await;
                drop(session);
                match inner.create_session().await {
                    Ok(fresh) => {
                        let surplus = {
                            let mut idle = inner.idle.lock().unwrap();
                            if idle.len() + inner.leased.load(Ordering::Relaxed) < inner.capacity {
                                idle.push_back(fresh);
                                None
                            } else {
                                // a lazy acquire beat us to the free slot
                                Some(fresh)
                            }
                        };
                        if let Some(extra) = surplus {
                            extra.driver.close().await;
                        }
                    }
                    Err(e) => warn!("failed to replace recycled session: {e}"),
                }
            });
        }
    }
}

/// Exclusive ownership of one session for the duration of one fetch.
pub struct SessionLease {
    pool: Arc<PoolInner>,
    session: Option<BrowserSession>,
    crashed: bool,
    _permit: OwnedSemaphorePermit,
}

impl SessionLease {
    pub fn driver(&self) -> &dyn PageDriver {
        self.session
            .as_ref()
            .expect("lease already released")
            .driver
            .as_ref()
    }

    pub fn session_id(&self) -> u64 {
        self.session.as_ref().expect("lease already released").id
    }

    /// Flag the session so release destroys it instead of reusing it.
    pub fn mark_crashed(&mut self) {
        self.crashed = true;
    }

    /// Count one served page against the recycle budget.
    pub(crate) fn record_page(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.pages_served += 1;
            session.last_used_at = Utc::now();
        }
    }

    /// Explicitly release, destroying the session when `crashed`.
    pub fn release(mut self, crashed: bool) {
        self.crashed = self.crashed || crashed;
        // drop does the rest
    }
}

impl std::fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease")
            .field("session", &self.session)
            .field("crashed", &self.crashed)
            .finish()
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.release(session, self.crashed);
        }
    }
}
