//! Browser backend seam.
//!
//! The print driver only talks to these traits. The `cdp` module implements
//! them on top of `headless_chrome`; tests implement them with an
//! instrumented fake so the driver's state machine runs without Chrome.

use std::ops::Deref;
use std::path::PathBuf;
use std::time::Duration;

use super::{PdfParams, ReadyCondition};
use crate::Result;

/// How a new browser process is started
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    /// Executable override. `None` lets the backend locate one.
    pub chrome_path: Option<PathBuf>,
    pub headless: bool,
    /// Chrome's own process sandbox. Disabled by default so the driver also
    /// works inside containers.
    pub sandbox: bool,
    /// How long an idle browser stays alive before the backend gives up on it
    pub idle_timeout: Duration,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: true,
            sandbox: false,
            idle_timeout: Duration::from_secs(60),
        }
    }
}

/// Starts browser processes
pub trait BrowserLauncher {
    type Session: BrowserSession;

    fn launch(&self, settings: &LaunchSettings) -> Result<Self::Session>;
}

/// A running browser. Dropping an owned session terminates the process.
pub trait BrowserSession {
    type Tab: PageTab;

    /// Open a fresh tab (browsing context) in this browser
    fn open_tab(&self) -> Result<Self::Tab>;
}

/// One tab, used for exactly one print
pub trait PageTab {
    /// Navigate and block until the navigation commits
    fn navigate(&self, url: &str, timeout: Duration) -> Result<()>;

    /// Single, non-blocking readiness probe. The driver polls this against
    /// its deadline.
    fn is_ready(&self, condition: &ReadyCondition) -> Result<bool>;

    fn print_pdf(&self, params: &PdfParams, timeout: Duration) -> Result<Vec<u8>>;

    fn close(&self) -> Result<()>;
}

/// A session either supplied by the caller or allocated for a single print
pub enum SessionHandle<'a, S> {
    /// Allocated by the driver; torn down when the print finishes
    Owned(S),
    /// Supplied by the caller; only a tab is opened on it
    Borrowed(&'a S),
}

impl<S> SessionHandle<'_, S> {
    pub fn is_owned(&self) -> bool {
        matches!(self, SessionHandle::Owned(_))
    }
}

impl<S> Deref for SessionHandle<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        match self {
            SessionHandle::Owned(session) => session,
            SessionHandle::Borrowed(session) => session,
        }
    }
}
