//! chromiumoxide-backed page driver.
//!
//! One shared Chrome process serves the whole pool; every pooled session is
//! its own page (tab), created through [`ChromiumSessionFactory`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tracing::info;

use super::{DriverError, PageDriver, SessionFactory};

/// Default user agent for browser requests.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const SCROLL_TO_BOTTOM_SCRIPT: &str = "window.scrollTo(0, document.body.scrollHeight);";

/// Launch options for the shared Chrome process.
#[derive(Debug, Clone)]
pub struct ChromiumLaunchConfig {
    pub headless: bool,
    /// Explicit Chrome binary; autodetected when unset.
    pub executable: Option<PathBuf>,
    /// Extra Chrome command line arguments.
    pub chrome_args: Vec<String>,
    /// Deadline for issuing a single navigation.
    pub nav_timeout: Duration,
}

impl Default for ChromiumLaunchConfig {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            chrome_args: Vec::new(),
            nav_timeout: Duration::from_secs(20),
        }
    }
}

/// Creates pool sessions as pages of one launched Chrome.
pub struct ChromiumSessionFactory {
    browser: Arc<tokio::sync::Mutex<Browser>>,
    nav_timeout: Duration,
}

impl ChromiumSessionFactory {
    /// Common Chrome executable paths to check.
    const CHROME_PATHS: &'static [&'static str] = &[
        // Linux
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        // macOS
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        // Common install locations
        "/opt/google/chrome/google-chrome",
    ];

    /// Launch Chrome and return a factory for pooled pages.
    pub async fn launch(config: ChromiumLaunchConfig) -> Result<Self> {
        let chrome_path = match config.executable.clone() {
            Some(path) => path,
            None => Self::find_chrome()?,
        };

        info!(
            "Launching browser (headless={}) at {}",
            config.headless,
            chrome_path.display()
        );

        let mut builder = BrowserConfig::builder().chrome_executable(chrome_path);
        if !config.headless {
            builder = builder.with_head();
        }
        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--no-sandbox") // Often needed for headless in containers/restricted environments
            .arg("--disable-gpu"); // Recommended for headless
        for arg in &config.chrome_args {
            builder = builder.arg(arg);
        }

        let browser_config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build browser config: {}", e))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .context("Failed to launch browser")?;

        // Spawn handler task
        tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(tokio::sync::Mutex::new(browser)),
            nav_timeout: config.nav_timeout,
        })
    }

    /// Find a Chrome executable: env override, known paths, then `which`.
    fn find_chrome() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("CHROME_BINARY_LOCATION") {
            if !path.is_empty() {
                return Ok(PathBuf::from(path));
            }
        }

        for path in Self::CHROME_PATHS {
            let p = std::path::Path::new(path);
            if p.exists() {
                info!("Found Chrome at: {}", path);
                return Ok(p.to_path_buf());
            }
        }

        for cmd in &[
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
        ] {
            if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
                if output.status.success() {
                    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !path.is_empty() {
                        info!("Found Chrome in PATH: {}", path);
                        return Ok(PathBuf::from(path));
                    }
                }
            }
        }

        Err(anyhow::anyhow!(
            "Chrome/Chromium not found. Please install it:\n\
             - Arch/Manjaro: sudo pacman -S chromium\n\
             - Ubuntu/Debian: sudo apt install chromium-browser\n\
             - Fedora: sudo dnf install chromium\n\
             - Or download from: https://www.google.com/chrome/"
        ))
    }
}

#[async_trait]
impl SessionFactory for ChromiumSessionFactory {
    async fn create(&self) -> Result<Box<dyn PageDriver>> {
        let page = {
            let browser = self.browser.lock().await;
            browser
                .new_page("about:blank")
                .await
                .context("failed to open browser page")?
        };

        // Set realistic user agent first (before any navigation)
        page.execute(SetUserAgentOverrideParams::new(
            BROWSER_USER_AGENT.to_string(),
        ))
        .await
        .context("failed to set user agent")?;

        Ok(Box::new(ChromiumDriver {
            page,
            nav_timeout: self.nav_timeout,
        }))
    }
}

/// One Chrome page acting as a pooled session.
pub struct ChromiumDriver {
    page: Page,
    nav_timeout: Duration,
}

/// Map a CDP failure onto the driver error taxonomy.
fn classify(err: chromiumoxide::error::CdpError) -> DriverError {
    let msg = err.to_string();
    let lower = msg.to_lowercase();
    if lower.contains("crash")
        || lower.contains("closed")
        || lower.contains("disconnect")
        || lower.contains("no session")
    {
        DriverError::Crashed(msg)
    } else if lower.contains("node") && lower.contains("not found") {
        DriverError::Stale(msg)
    } else {
        DriverError::Other(anyhow::anyhow!(msg))
    }
}

#[async_trait]
impl PageDriver for ChromiumDriver {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        let nav_params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(|e| DriverError::Navigation(format!("invalid URL {url}: {e}")))?;

        tokio::time::timeout(self.nav_timeout, self.page.execute(nav_params))
            .await
            .map_err(|_| {
                DriverError::Navigation(format!(
                    "navigation timed out after {:?} for {url}",
                    self.nav_timeout
                ))
            })?
            .map_err(classify)?;

        Ok(())
    }

    async fn content(&self) -> Result<String, DriverError> {
        self.page.content().await.map_err(classify)
    }

    async fn scroll_to_bottom(&self) -> Result<(), DriverError> {
        self.page
            .evaluate(SCROLL_TO_BOTTOM_SCRIPT.to_string())
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn close(&self) {
        let _ = self.page.clone().close().await;
    }
}
