//! Chrome DevTools Protocol backend (uses the `headless_chrome` crate)

use headless_chrome::browser::tab::Tab;
use headless_chrome::types::PrintToPdfOptions;
use headless_chrome::{Browser, LaunchOptions};
use log::warn;
use std::sync::Arc;
use std::time::Duration;

use crate::print::{BrowserLauncher, BrowserSession, LaunchSettings, PageTab, PdfParams, ReadyCondition};
use crate::provision::{self, ProvisionConfig};
use crate::{Error, Result};

/// Launches local Chrome/Chromium processes
#[derive(Debug, Clone, Default)]
pub struct ChromeLauncher {
    provision: ProvisionConfig,
}

impl ChromeLauncher {
    pub fn new(provision: ProvisionConfig) -> Self {
        Self { provision }
    }
}

impl BrowserLauncher for ChromeLauncher {
    type Session = ChromeSession;

    fn launch(&self, settings: &LaunchSettings) -> Result<ChromeSession> {
        let path = match &settings.chrome_path {
            Some(path) => Some(path.clone()),
            None => match provision::locate_or_provision(&self.provision) {
                Ok(path) => Some(path),
                Err(e) => {
                    // headless_chrome has its own executable detection; let it try.
                    warn!("{}; falling back to default browser detection", e);
                    None
                }
            },
        };
        ChromeSession::launch(settings, path)
    }
}

/// A running browser process. Dropping it kills the process.
#[derive(Clone)]
pub struct ChromeSession {
    browser: Browser,
}

impl ChromeSession {
    fn launch(settings: &LaunchSettings, path: Option<std::path::PathBuf>) -> Result<Self> {
        let launch_options = LaunchOptions::default_builder()
            .headless(settings.headless)
            .sandbox(settings.sandbox)
            .path(path)
            .idle_browser_timeout(settings.idle_timeout)
            .build()
            .map_err(|e| Error::BrowserError(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::BrowserError(format!("Failed to launch browser: {}", e)))?;
        Ok(Self { browser })
    }

    /// Wrap a browser the caller already manages
    pub fn from_browser(browser: Browser) -> Self {
        Self { browser }
    }

    pub fn browser(&self) -> &Browser {
        &self.browser
    }
}

impl BrowserSession for ChromeSession {
    type Tab = ChromeTab;

    fn open_tab(&self) -> Result<ChromeTab> {
        let tab = self
            .browser
            .new_tab()
            .map_err(|e| Error::BrowserError(format!("Failed to create tab: {}", e)))?;
        Ok(ChromeTab { tab })
    }
}

pub struct ChromeTab {
    tab: Arc<Tab>,
}

impl PageTab for ChromeTab {
    fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        self.tab.set_default_timeout(timeout);
        self.tab
            .navigate_to(url)
            .map_err(|e| Error::BrowserError(format!("Navigation failed: {}", e)))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| Error::BrowserError(format!("Wait for navigation failed: {}", e)))?;
        Ok(())
    }

    fn is_ready(&self, condition: &ReadyCondition) -> Result<bool> {
        let probe = readiness_probe(condition)?;
        let eval = self
            .tab
            .evaluate(&probe, false)
            .map_err(|e| Error::BrowserError(format!("Readiness check failed: {}", e)))?;
        Ok(eval.value.as_ref().and_then(|v| v.as_bool()).unwrap_or(false))
    }

    fn print_pdf(&self, params: &PdfParams, timeout: Duration) -> Result<Vec<u8>> {
        self.tab.set_default_timeout(timeout);
        self.tab
            .print_to_pdf(Some(pdf_options(params)))
            .map_err(|e| Error::BrowserError(format!("Print to PDF failed: {}", e)))
    }

    fn close(&self) -> Result<()> {
        self.tab
            .close(false)
            .map(|_| ())
            .map_err(|e| Error::BrowserError(format!("Failed to close tab: {}", e)))
    }
}

/// Expression evaluating to `true` once the condition holds
fn readiness_probe(condition: &ReadyCondition) -> Result<String> {
    Ok(match condition {
        ReadyCondition::BodyReady => {
            "!!document.body && document.readyState !== 'loading'".to_string()
        }
        ReadyCondition::Visible(selector) => {
            let selector = serde_json::to_string(selector)
                .map_err(|e| Error::ConfigError(format!("invalid wait selector: {}", e)))?;
            format!(
                r#"(function () {{
                    var el = document.querySelector({});
                    if (!el) return false;
                    var style = window.getComputedStyle(el);
                    if (style.display === 'none' || style.visibility === 'hidden') return false;
                    var rect = el.getBoundingClientRect();
                    return rect.width > 0 || rect.height > 0;
                }})()"#,
                selector
            )
        }
    })
}

fn pdf_options(params: &PdfParams) -> PrintToPdfOptions {
    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
    PrintToPdfOptions {
        landscape: Some(params.landscape),
        display_header_footer: Some(params.display_header_footer),
        print_background: Some(params.print_background),
        scale: Some(params.scale),
        paper_width: Some(params.paper_width),
        paper_height: Some(params.paper_height),
        margin_top: Some(params.margins.top),
        margin_bottom: Some(params.margins.bottom),
        margin_left: Some(params.margins.left),
        margin_right: Some(params.margins.right),
        page_ranges: non_empty(&params.page_ranges),
        header_template: non_empty(&params.header_template),
        footer_template: non_empty(&params.footer_template),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::print::{Deadline, PrintDriver, PrintOptions};

    #[test]
    fn selector_is_quoted_into_the_probe() {
        let probe = readiness_probe(&ReadyCondition::Visible("div[data-x=\"1\"]".into())).unwrap();
        assert!(probe.contains(r#"document.querySelector("div[data-x=\"1\"]")"#));
    }

    #[test]
    fn pdf_options_map_every_field() {
        let cfg = PrintOptions {
            page_ranges: "1-2".into(),
            display_header_footer: true,
            ..Default::default()
        }
        .resolve()
        .unwrap();
        let opts = pdf_options(&cfg.pdf);
        assert_eq!(opts.paper_width, Some(8.27));
        assert_eq!(opts.page_ranges.as_deref(), Some("1-2"));
        assert_eq!(opts.header_template.as_deref(), Some("<span> </span>"));
        assert_eq!(opts.print_background, Some(true));
    }

    #[test]
    fn missing_executable_is_a_browser_error() {
        let settings = LaunchSettings {
            chrome_path: Some("/nonexistent/ejspdf-chrome".into()),
            ..Default::default()
        };
        match ChromeLauncher::default().launch(&settings) {
            Err(Error::BrowserError(msg)) => assert!(msg.contains("Failed to launch browser"), "{}", msg),
            Err(other) => panic!("unexpected error: {:?}", other),
            Ok(_) => panic!("launched a browser from a missing path"),
        }
    }

    #[test]
    fn test_chrome_print() {
        // This test requires Chrome to be installed, so we skip it in CI
        if std::env::var("CI").is_ok() {
            return;
        }
        let driver = PrintDriver::new(ChromeLauncher::default());
        let result = driver.print(
            "<h1>Hello</h1>",
            &PrintOptions::default(),
            None,
            &Deadline::after(Duration::from_secs(60)),
        );
        match result {
            Ok(bytes) => assert!(bytes.starts_with(b"%PDF")),
            Err(e) => eprintln!("Skipping CDP print test because Chrome is not available or failed to launch: {}", e),
        }
    }
}
