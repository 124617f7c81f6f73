//! Error types for the template-to-PDF pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while rendering a template or printing a document
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration (template source, page geometry, margins).
    /// Raised before any sandbox or browser resource is allocated.
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Template failed to compile or evaluate, an include could not be
    /// resolved, or a host function threw
    #[error("Template rendering failed: {0}")]
    TemplateError(String),

    /// The bundled template library could not be patched or loaded
    #[error("Sandbox initialization failed: {0}")]
    SandboxInitError(String),

    /// Browser launch, navigation, readiness or print failure
    #[error("Browser error: {0}")]
    BrowserError(String),

    /// Operation timed out
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// The caller raised the cancellation flag
    #[error("Operation cancelled")]
    Cancelled,

    /// Browser executable could not be located or provisioned
    #[error("Browser provisioning failed: {0}")]
    ProvisionError(String),

    /// Filesystem error outside the sandbox (output files, cache directory)
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
