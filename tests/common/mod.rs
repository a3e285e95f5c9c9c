//! Deterministic fake driver for end-to-end tests without a real renderer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use shopscrape::{DriverError, PageDriver, SessionFactory};

/// Failure mode injected into a page's navigations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailMode {
    Navigation,
    Crash,
}

/// One scripted page: successive rendered states plus failure injection.
#[derive(Debug, Clone)]
pub struct FakePage {
    /// Rendered document per scroll position; the last state repeats.
    pub states: Vec<String>,
    /// Navigations to fail before one succeeds.
    pub fail_navigations: u32,
    pub fail_mode: FailMode,
    /// Extra latency per navigation, to script slow pages.
    pub nav_delay: Duration,
}

impl FakePage {
    pub fn ready(html: impl Into<String>) -> Self {
        Self {
            states: vec![html.into()],
            fail_navigations: 0,
            fail_mode: FailMode::Navigation,
            nav_delay: Duration::ZERO,
        }
    }

    pub fn staged(states: Vec<String>) -> Self {
        Self {
            states,
            fail_navigations: 0,
            fail_mode: FailMode::Navigation,
            nav_delay: Duration::ZERO,
        }
    }

    pub fn failing(mut self, failures: u32, mode: FailMode) -> Self {
        self.fail_navigations = failures;
        self.fail_mode = mode;
        self
    }
}

/// High-water gauge over concurrent navigations.
#[derive(Debug, Default)]
pub struct Gauge {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

/// Factory sharing one scripted site across all sessions it creates.
pub struct FakeFactory {
    pages: Arc<Mutex<HashMap<String, FakePage>>>,
    pub sessions_created: AtomicUsize,
    pub in_flight: Arc<Gauge>,
}

impl FakeFactory {
    pub fn new(pages: HashMap<String, FakePage>) -> Arc<Self> {
        Arc::new(Self {
            pages: Arc::new(Mutex::new(pages)),
            sessions_created: AtomicUsize::new(0),
            in_flight: Arc::new(Gauge::default()),
        })
    }

    pub fn created(&self) -> usize {
        self.sessions_created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn create(&self) -> anyhow::Result<Box<dyn PageDriver>> {
        self.sessions_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeDriver {
            pages: Arc::clone(&self.pages),
            gauge: Arc::clone(&self.in_flight),
            current: Mutex::new(None),
            scroll: AtomicUsize::new(0),
        }))
    }
}

pub struct FakeDriver {
    pages: Arc<Mutex<HashMap<String, FakePage>>>,
    gauge: Arc<Gauge>,
    current: Mutex<Option<String>>,
    scroll: AtomicUsize,
}

#[async_trait]
impl PageDriver for FakeDriver {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        let (delay, failure) = {
            let mut pages = self.pages.lock().unwrap();
            match pages.get_mut(url) {
                Some(page) => {
                    let failure = if page.fail_navigations > 0 {
                        page.fail_navigations -= 1;
                        Some(page.fail_mode)
                    } else {
                        None
                    };
                    (page.nav_delay, failure)
                }
                None => (Duration::ZERO, None),
            }
        };

        self.gauge.enter();
        tokio::time::sleep(delay.max(Duration::from_millis(5))).await;
        self.gauge.exit();

        match failure {
            Some(FailMode::Navigation) => {
                Err(DriverError::Navigation(format!("connection reset for {url}")))
            }
            Some(FailMode::Crash) => Err(DriverError::Crashed(format!("tab gone for {url}"))),
            None => {
                *self.current.lock().unwrap() = Some(url.to_string());
                self.scroll.store(0, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    async fn content(&self) -> Result<String, DriverError> {
        let url = self.current.lock().unwrap().clone();
        let Some(url) = url else {
            return Ok("<html><body></body></html>".to_string());
        };

        let pages = self.pages.lock().unwrap();
        match pages.get(&url) {
            Some(page) if !page.states.is_empty() => {
                let idx = self
                    .scroll
                    .load(Ordering::SeqCst)
                    .min(page.states.len() - 1);
                Ok(page.states[idx].clone())
            }
            // unknown URLs render an empty shell
            _ => Ok("<html><body></body></html>".to_string()),
        }
    }

    async fn scroll_to_bottom(&self) -> Result<(), DriverError> {
        self.scroll.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {}
}

/// Install a test subscriber so `RUST_LOG=shopscrape=debug` shows the
/// pipeline's tracing output. Safe to call from every test.
pub fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Selector config shared by the end-to-end tests.
pub const SELECTOR_CONFIG: &str = r#"{
    "mercari": {
        "valid_domains": ["shop.example"],
        "status_map": [["SOLD OUT", "sold"], ["In stock", "available"]],
        "fields": {
            "title": [".legacy-name", "h1.item-name"],
            "price": ["[data-testid='price']"],
            "description": [".item-description"],
            "images": [{"css": "img.item-photo", "attr": "src"}],
            "item_links": ["a.item-link"]
        }
    }
}"#;

pub fn detail_page(title: &str, price_display: &str) -> String {
    format!(
        "<html><body>\
         <h1 class='item-name'>{title}</h1>\
         <div data-testid='price'>{price_display}</div>\
         <div class='item-description'>Ships within two days.</div>\
         <img class='item-photo' src='https://img.shop.example/photo.jpg'>\
         <p>In stock</p>\
         </body></html>"
    )
}

pub fn listing_page(urls: &[String]) -> String {
    let anchors: String = urls
        .iter()
        .map(|url| format!("<a class='item-link' href='{url}'>item</a>"))
        .collect();
    format!("<html><body>{anchors}</body></html>")
}

pub fn item_url(n: usize) -> String {
    format!("https://shop.example/item/{n}")
}
