use crate::cdp::{ChromeLauncher, ChromeSession};
use crate::print::{BrowserLauncher, Deadline, LaunchSettings, PrintDriver, PrintOptions};
use crate::provision::ProvisionConfig;
use crate::template::{RenderRequest, TemplateConfig, TemplateEngine};
use crate::{Error, Pipeline, Result};
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;

struct PdfJob {
    request: RenderRequest,
    options: PrintOptions,
}

enum Command {
    Pdf(Box<PdfJob>, oneshot::Sender<Result<Vec<u8>>>),
    Html(RenderRequest, oneshot::Sender<Result<String>>),
    Close(oneshot::Sender<Result<()>>),
}

/// Settings for the worker behind a [`Renderer`]
#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub template: TemplateConfig,
    pub provision: ProvisionConfig,
    pub launch: LaunchSettings,
    /// Budget for each render (template and print); `None` is unbounded
    pub timeout: Option<Duration>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            template: TemplateConfig::default(),
            provision: ProvisionConfig::default(),
            launch: LaunchSettings::default(),
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// An async-friendly renderer backed by a dedicated worker thread.
///
/// The worker owns one browser session and reuses it for every job, opening
/// a fresh tab per document. Jobs run one at a time in submission order.
#[derive(Clone)]
pub struct Renderer {
    cmd_tx: Sender<Command>,
}

impl Renderer {
    /// Spawn the worker and launch its browser.
    pub async fn new(config: Option<RendererConfig>) -> Result<Self> {
        let config = config.unwrap_or_default();

        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let (init_tx, init_rx) = oneshot::channel::<Result<()>>();

        thread::spawn(move || {
            let launcher = ChromeLauncher::new(config.provision.clone());
            let session: ChromeSession = match launcher.launch(&config.launch) {
                Ok(session) => session,
                Err(err) => {
                    let _ = init_tx.send(Err(err));
                    return;
                }
            };
            let pipeline = Pipeline::new(TemplateEngine::new(config.template), PrintDriver::new(launcher));
            let _ = init_tx.send(Ok(()));

            while let Ok(cmd) = cmd_rx.recv() {
                match cmd {
                    Command::Pdf(job, resp) => {
                        let deadline = config.timeout.map(Deadline::after).unwrap_or_default();
                        let res = pipeline.render(&job.request, &job.options, Some(&session), &deadline);
                        let _ = resp.send(res);
                    }
                    Command::Html(request, resp) => {
                        let _ = resp.send(pipeline.render_html(&request));
                    }
                    Command::Close(resp) => {
                        drop(session);
                        let _ = resp.send(Ok(()));
                        break;
                    }
                }
            }
            log::debug!("renderer worker stopped");
        });

        init_rx.await.map_err(|e| worker_gone("init", e))??;
        Ok(Self { cmd_tx })
    }

    /// Render a template and print it to PDF bytes
    pub async fn render_pdf(&self, request: RenderRequest, options: PrintOptions) -> Result<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Pdf(Box::new(PdfJob { request, options }), tx))?;
        rx.await.map_err(|e| worker_gone("render", e))?
    }

    /// Render a template to markup only
    pub async fn render_html(&self, request: RenderRequest) -> Result<String> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Html(request, tx))?;
        rx.await.map_err(|e| worker_gone("render", e))?
    }

    /// Stop the worker and kill its browser
    pub async fn close(self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Close(tx))?;
        rx.await.map_err(|e| worker_gone("close", e))?
    }

    fn send(&self, cmd: Command) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| Error::BrowserError("renderer worker is not running".into()))
    }
}

fn worker_gone(what: &str, err: oneshot::error::RecvError) -> Error {
    Error::BrowserError(format!("Renderer {} canceled: {}", what, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires Chrome to be installed
    async fn renders_through_the_worker() {
        let renderer = Renderer::new(None).await.expect("renderer");
        let html = renderer
            .render_html(RenderRequest::text("<p><%= n %></p>").with_value("n", 3))
            .await
            .unwrap();
        assert_eq!(html, "<p>3</p>");

        let pdf = renderer
            .render_pdf(RenderRequest::text("<h1>Hi</h1>"), PrintOptions::default())
            .await
            .unwrap();
        assert!(pdf.starts_with(b"%PDF"));
        renderer.close().await.unwrap();
    }
}
