//! ejspdf
//!
//! Render EJS templates to PDF: the template runs in a sandboxed JavaScript
//! interpreter (`boa_engine`) to produce HTML, then a headless Chrome prints
//! that HTML over the DevTools protocol.
//!
//! # Features
//!
//! - **cdp** (default): Chrome backend via `headless_chrome`
//! - **fetch**: download a pinned Chromium snapshot when no browser is installed
//!
//! # Example
//!
//! ```no_run
//! use ejspdf::{PrintOptions, RenderRequest};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let request = RenderRequest::text("<h1><%= title %></h1>").with_value("title", "Invoice #42");
//! let options = PrintOptions {
//!     page_size: "Letter".to_string(),
//!     margin_top: "0.5in".to_string(),
//!     ..Default::default()
//! };
//!
//! let pdf = ejspdf::Pipeline::chrome().render(&request, &options, None, &Default::default())?;
//! std::fs::write("invoice.pdf", pdf)?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub use error::{Error, Result};

pub mod print;
pub mod provision;
pub mod template;
pub mod units;

#[cfg(feature = "cdp")]
pub mod cdp;

// Async-friendly renderer (worker-backed, one shared browser)
#[cfg(feature = "cdp")]
pub mod async_api;

pub use print::{Deadline, PrintConfiguration, PrintDriver, PrintOptions};
pub use template::{DataMap, DataValue, HostFunction, RenderRequest, TemplateConfig, TemplateEngine, TemplateSource};

#[cfg(feature = "cdp")]
pub use async_api::Renderer;

use print::BrowserLauncher;

/// Template engine followed by print driver
pub struct Pipeline<L> {
    engine: TemplateEngine,
    driver: PrintDriver<L>,
}

impl<L: BrowserLauncher> Pipeline<L> {
    pub fn new(engine: TemplateEngine, driver: PrintDriver<L>) -> Self {
        Self { engine, driver }
    }

    pub fn engine(&self) -> &TemplateEngine {
        &self.engine
    }

    pub fn driver(&self) -> &PrintDriver<L> {
        &self.driver
    }

    /// Run only the template stage
    pub fn render_html(&self, request: &RenderRequest) -> Result<String> {
        self.engine.render(request)
    }

    /// Render `request` and print it.
    ///
    /// Print options are resolved first, so a bad margin fails before the
    /// template runs or a browser starts.
    pub fn render(
        &self,
        request: &RenderRequest,
        options: &PrintOptions,
        session: Option<&L::Session>,
        deadline: &Deadline,
    ) -> Result<Vec<u8>> {
        let config = options.resolve()?;
        deadline.check()?;
        let markup = self.engine.render(request)?;
        self.driver.print_resolved(&markup, &config, session, deadline)
    }
}

#[cfg(feature = "cdp")]
impl Pipeline<cdp::ChromeLauncher> {
    /// Default engine limits and a Chrome launcher that locates its own browser
    pub fn chrome() -> Self {
        Self::new(TemplateEngine::default(), PrintDriver::new(cdp::ChromeLauncher::default()))
    }
}

/// Render inline template text to PDF bytes in a one-off browser
#[cfg(feature = "cdp")]
pub fn render_pdf(template: &str, data: DataMap, options: &PrintOptions) -> Result<Vec<u8>> {
    let request = RenderRequest::text(template).with_data(data);
    Pipeline::chrome().render(&request, options, None, &Deadline::none())
}

/// Render a template file to PDF bytes; includes resolve next to the file
#[cfg(feature = "cdp")]
pub fn render_pdf_from_file(path: impl AsRef<std::path::Path>, data: DataMap, options: &PrintOptions) -> Result<Vec<u8>> {
    let request = RenderRequest::file(path.as_ref()).with_data(data);
    Pipeline::chrome().render(&request, options, None, &Deadline::none())
}
