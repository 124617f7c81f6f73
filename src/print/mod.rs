//! Document print driver.
//!
//! Takes rendered markup and turns it into PDF bytes through a browser
//! backend. One call walks
//! `Init -> Dimensioned -> SessionReady -> NavigatedToContent -> AwaitingReady -> Printed -> Done`
//! and on any failure closes its tab and tears down a session it launched
//! itself. Caller-supplied sessions are never torn down.

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::units::{parse_inches, PaperSize};
use crate::{Error, Result};

pub mod session;

pub use session::{BrowserLauncher, BrowserSession, LaunchSettings, PageTab, SessionHandle};

/// Placeholder used when header/footer display is on but no template was given
pub const EMPTY_HEADER_FOOTER: &str = "<span> </span>";

const READY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// User-facing print options.
///
/// Dimension strings carry a unit suffix (`mm`, `cm`, `in`). Deserializes
/// from JSON with every field optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintOptions {
    /// Named paper size; empty or unknown names mean A4
    pub page_size: String,
    pub landscape: bool,
    /// Explicit width, used only together with `paper_height`
    pub paper_width: Option<String>,
    /// Explicit height, used only together with `paper_width`
    pub paper_height: Option<String>,
    pub margin_top: String,
    pub margin_bottom: String,
    pub margin_left: String,
    pub margin_right: String,
    pub display_header_footer: bool,
    pub header_template: String,
    pub footer_template: String,
    /// CSS selector that must become visible before printing
    pub wait_selector: String,
    /// Settle time after readiness (milliseconds in serialized form)
    #[serde(with = "millis")]
    pub wait_delay: Duration,
    /// Values <= 0 mean 1.0
    pub scale: f64,
    /// e.g. "1-3, 5"; empty prints all pages
    pub page_ranges: String,
    pub ignore_background: bool,
    /// Browser executable override; empty means locate one
    pub chrome_path: String,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            page_size: "A4".to_string(),
            landscape: false,
            paper_width: None,
            paper_height: None,
            margin_top: "10mm".to_string(),
            margin_bottom: "10mm".to_string(),
            margin_left: "10mm".to_string(),
            margin_right: "10mm".to_string(),
            display_header_footer: false,
            header_template: String::new(),
            footer_template: String::new(),
            wait_selector: String::new(),
            wait_delay: Duration::ZERO,
            scale: 1.0,
            page_ranges: String::new(),
            ignore_background: false,
            chrome_path: String::new(),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

impl PrintOptions {
    /// Validate and convert into a fully resolved configuration.
    ///
    /// This is the `Init -> Dimensioned` step; it never touches a browser.
    pub fn resolve(&self) -> Result<PrintConfiguration> {
        let margins = Margins {
            top: parse_inches("margin top", &self.margin_top)?,
            bottom: parse_inches("margin bottom", &self.margin_bottom)?,
            left: parse_inches("margin left", &self.margin_left)?,
            right: parse_inches("margin right", &self.margin_right)?,
        };

        let width = non_empty(&self.paper_width)
            .map(|w| parse_inches("paper width", w))
            .transpose()?;
        let height = non_empty(&self.paper_height)
            .map(|h| parse_inches("paper height", h))
            .transpose()?;
        let (paper_width, paper_height) = match (width, height) {
            (Some(w), Some(h)) => (w, h),
            (w, h) => {
                if w.is_some() || h.is_some() {
                    log::warn!(
                        "only one of paper_width/paper_height is set; using page size {:?}",
                        self.page_size
                    );
                }
                PaperSize::from_name_or_default(&self.page_size).dimensions()
            }
        };

        let (header_template, footer_template) = if self.display_header_footer {
            (placeholder_if_empty(&self.header_template), placeholder_if_empty(&self.footer_template))
        } else {
            (self.header_template.clone(), self.footer_template.clone())
        };

        let scale = if self.scale.is_finite() && self.scale > 0.0 { self.scale } else { 1.0 };

        let ready = match self.wait_selector.trim() {
            "" => ReadyCondition::BodyReady,
            selector => ReadyCondition::Visible(selector.to_string()),
        };

        let chrome_path = match self.chrome_path.trim() {
            "" => None,
            path => Some(PathBuf::from(path)),
        };

        Ok(PrintConfiguration {
            pdf: PdfParams {
                landscape: self.landscape,
                display_header_footer: self.display_header_footer,
                print_background: !self.ignore_background,
                scale,
                paper_width,
                paper_height,
                margins,
                page_ranges: self.page_ranges.trim().to_string(),
                header_template,
                footer_template,
            },
            ready,
            settle_delay: self.wait_delay,
            chrome_path,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn placeholder_if_empty(template: &str) -> String {
    if template.is_empty() {
        EMPTY_HEADER_FOOTER.to_string()
    } else {
        template.to_string()
    }
}

/// Page margins in inches
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Margins {
    pub top: f64,
    pub bottom: f64,
    pub left: f64,
    pub right: f64,
}

/// What "ready to print" means for a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyCondition {
    /// The first element matching the selector is visible
    Visible(String),
    /// `document.body` exists and the document is no longer loading
    BodyReady,
}

/// Parameters of the print-to-document command, all lengths in inches
#[derive(Debug, Clone, PartialEq)]
pub struct PdfParams {
    pub landscape: bool,
    pub display_header_footer: bool,
    pub print_background: bool,
    pub scale: f64,
    pub paper_width: f64,
    pub paper_height: f64,
    pub margins: Margins,
    /// Empty means all pages
    pub page_ranges: String,
    pub header_template: String,
    pub footer_template: String,
}

/// Resolved print configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PrintConfiguration {
    pub pdf: PdfParams,
    pub ready: ReadyCondition,
    pub settle_delay: Duration,
    pub chrome_path: Option<PathBuf>,
}

impl PrintConfiguration {
    pub fn launch_settings(&self) -> LaunchSettings {
        LaunchSettings {
            chrome_path: self.chrome_path.clone(),
            ..LaunchSettings::default()
        }
    }
}

/// Time budget and cancellation flag for one blocking operation
#[derive(Debug, Clone, Default)]
pub struct Deadline {
    at: Option<Instant>,
    budget: Duration,
    cancel: Option<Arc<AtomicBool>>,
}

impl Deadline {
    /// No time limit and no cancellation
    pub fn none() -> Self {
        Self::default()
    }

    pub fn after(budget: Duration) -> Self {
        Self {
            at: Some(Instant::now() + budget),
            budget,
            cancel: None,
        }
    }

    /// Attach a flag; setting it to `true` aborts at the next check
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Time left, or `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if self.is_expired() {
            return Err(self.timeout_error());
        }
        Ok(())
    }

    /// Timeout for the next browser step: the remaining time, capped at
    /// `default` when unbounded
    pub fn step_timeout(&self, default: Duration) -> Result<Duration> {
        self.check()?;
        Ok(self.remaining().unwrap_or(default))
    }

    /// Sleep for `duration`, waking early to honor the deadline
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        let until = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            let mut slice = (until - now).min(READY_POLL_INTERVAL);
            if let Some(left) = self.remaining() {
                slice = slice.min(left);
            }
            std::thread::sleep(slice);
        }
    }

    fn timeout_error(&self) -> Error {
        Error::Timeout(self.budget.as_millis() as u64)
    }

    /// A browser step failed; report it as a timeout or cancellation when
    /// that is what actually happened
    fn classify(&self, err: Error) -> Error {
        if self.is_cancelled() {
            Error::Cancelled
        } else if self.is_expired() {
            self.timeout_error()
        } else {
            err
        }
    }
}

/// Build the `data:` URI the driver navigates to
pub fn data_uri(markup: &str) -> String {
    format!(
        "data:text/html;charset=utf-8;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(markup.as_bytes())
    )
}

/// Prints markup through a browser backend
pub struct PrintDriver<L> {
    launcher: L,
    step_timeout: Duration,
}

impl<L: BrowserLauncher> PrintDriver<L> {
    pub fn new(launcher: L) -> Self {
        Self {
            launcher,
            step_timeout: Duration::from_secs(30),
        }
    }

    /// Per-step timeout used when the deadline is unbounded
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Resolve `options` and print. Configuration errors are returned before
    /// any browser work starts.
    pub fn print(
        &self,
        markup: &str,
        options: &PrintOptions,
        session: Option<&L::Session>,
        deadline: &Deadline,
    ) -> Result<Vec<u8>> {
        let config = options.resolve()?;
        self.print_resolved(markup, &config, session, deadline)
    }

    pub fn print_resolved(
        &self,
        markup: &str,
        config: &PrintConfiguration,
        session: Option<&L::Session>,
        deadline: &Deadline,
    ) -> Result<Vec<u8>> {
        log::trace!(
            "print: dimensioned {:.2}x{:.2}in (landscape: {})",
            config.pdf.paper_width,
            config.pdf.paper_height,
            config.pdf.landscape
        );
        deadline.check()?;

        let session = match session {
            Some(existing) => SessionHandle::Borrowed(existing),
            None => {
                log::debug!("print: launching browser session");
                let launched = self
                    .launcher
                    .launch(&config.launch_settings())
                    .map_err(|e| deadline.classify(e))?;
                SessionHandle::Owned(launched)
            }
        };

        let result = self.print_in_session(&session, markup, config, deadline);

        if session.is_owned() {
            log::debug!("print: tearing down owned browser session");
        }
        drop(session);

        match &result {
            Ok(bytes) => log::debug!("print: done, {} bytes", bytes.len()),
            Err(e) => log::debug!("print: failed: {}", e),
        }
        result
    }

    fn print_in_session(
        &self,
        session: &L::Session,
        markup: &str,
        config: &PrintConfiguration,
        deadline: &Deadline,
    ) -> Result<Vec<u8>> {
        deadline.check()?;
        let tab = session.open_tab().map_err(|e| deadline.classify(e))?;
        log::trace!("print: session ready");

        let result = self.drive(&tab, markup, config, deadline);

        if let Err(e) = tab.close() {
            log::warn!("print: failed to close tab: {}", e);
        }
        result
    }

    fn drive(
        &self,
        tab: &<L::Session as BrowserSession>::Tab,
        markup: &str,
        config: &PrintConfiguration,
        deadline: &Deadline,
    ) -> Result<Vec<u8>> {
        let timeout = deadline.step_timeout(self.step_timeout)?;
        tab.navigate(&data_uri(markup), timeout)
            .map_err(|e| deadline.classify(e))?;
        log::trace!("print: navigated to content ({} bytes of markup)", markup.len());

        self.await_ready(tab, &config.ready, deadline)?;

        if !config.settle_delay.is_zero() {
            log::trace!("print: settling for {:?}", config.settle_delay);
            deadline.sleep(config.settle_delay)?;
        }

        let timeout = deadline.step_timeout(self.step_timeout)?;
        let bytes = tab.print_pdf(&config.pdf, timeout).map_err(|e| deadline.classify(e))?;
        log::trace!("print: printed");
        Ok(bytes)
    }

    fn await_ready(
        &self,
        tab: &<L::Session as BrowserSession>::Tab,
        condition: &ReadyCondition,
        deadline: &Deadline,
    ) -> Result<()> {
        log::trace!("print: awaiting {:?}", condition);
        // An unbounded deadline still gets a bounded readiness wait.
        let fallback = Deadline::after(self.step_timeout);
        let effective = if deadline.remaining().is_some() { deadline } else { &fallback };

        loop {
            deadline.check()?;
            effective.check()?;
            if tab.is_ready(condition).map_err(|e| effective.classify(e))? {
                return Ok(());
            }
            effective.sleep(READY_POLL_INTERVAL)?;
        }
    }
}
