//! ejspdf CLI - render EJS templates to PDF

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use ejspdf::print::BrowserLauncher;
use ejspdf::provision::{self, ProvisionConfig};
use ejspdf::{Deadline, Pipeline, PrintOptions, RenderRequest};

#[derive(Parser)]
#[command(name = "ejspdf")]
#[command(author, version, about = "Render EJS templates to PDF with headless Chrome", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render one template to PDF (or HTML)
    Render {
        /// Template file
        template: PathBuf,

        /// JSON file with the template data
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// JSON file with print options; flags below override it
        #[arg(long)]
        options: Option<PathBuf>,

        /// Output file (defaults to the template name with .pdf/.html)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Stop after the template stage and write HTML
        #[arg(long)]
        html: bool,

        /// Named paper size (A3, A4, A5, Letter, Legal, Tabloid)
        #[arg(long)]
        page_size: Option<String>,

        #[arg(long)]
        landscape: bool,

        /// Margin for all four sides, e.g. 10mm or 0.5in
        #[arg(long)]
        margin: Option<String>,

        /// CSS selector that must be visible before printing
        #[arg(long)]
        wait_selector: Option<String>,

        /// Extra settle time after the page is ready
        #[arg(long)]
        wait_delay_ms: Option<u64>,

        #[arg(long)]
        scale: Option<f64>,

        /// Browser executable
        #[arg(long)]
        chrome_path: Option<String>,

        /// Overall time budget for the print
        #[arg(long, default_value_t = 60_000)]
        timeout_ms: u64,
    },

    /// Render many templates with one shared browser
    Batch {
        /// Template files
        #[arg(required = true)]
        templates: Vec<PathBuf>,

        /// JSON file with the data shared by every template
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// JSON file with print options
        #[arg(long)]
        options: Option<PathBuf>,

        /// Directory for the generated PDFs
        #[arg(long)]
        out_dir: PathBuf,

        /// Parallel jobs (defaults to the number of CPUs)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Time budget per document
        #[arg(long, default_value_t = 60_000)]
        timeout_ms: u64,
    },

    /// Print the browser executable that would be used
    LocateBrowser {
        /// Download the pinned Chromium snapshot if nothing is installed
        #[arg(long)]
        download: bool,
    },
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Render {
            template,
            data,
            options,
            output,
            html,
            page_size,
            landscape,
            margin,
            wait_selector,
            wait_delay_ms,
            scale,
            chrome_path,
            timeout_ms,
        } => {
            let mut opts = load_options(options.as_deref())?;
            if let Some(size) = page_size {
                opts.page_size = size;
            }
            if landscape {
                opts.landscape = true;
            }
            if let Some(margin) = margin {
                opts.margin_top = margin.clone();
                opts.margin_bottom = margin.clone();
                opts.margin_left = margin.clone();
                opts.margin_right = margin;
            }
            if let Some(selector) = wait_selector {
                opts.wait_selector = selector;
            }
            if let Some(ms) = wait_delay_ms {
                opts.wait_delay = Duration::from_millis(ms);
            }
            if let Some(scale) = scale {
                opts.scale = scale;
            }
            if let Some(path) = chrome_path {
                opts.chrome_path = path;
            }

            let request = load_request(&template, data.as_deref())?;
            let pipeline = Pipeline::chrome();

            if html {
                let out = output.unwrap_or_else(|| template.with_extension("html"));
                let markup = pipeline.render_html(&request)?;
                fs::write(&out, markup).with_context(|| format!("writing {}", out.display()))?;
                println!("{}", out.display());
                return Ok(());
            }

            let out = output.unwrap_or_else(|| template.with_extension("pdf"));
            let deadline = Deadline::after(Duration::from_millis(timeout_ms));
            let pdf = pipeline.render(&request, &opts, None, &deadline)?;
            fs::write(&out, pdf).with_context(|| format!("writing {}", out.display()))?;
            println!("{}", out.display());
        }

        Commands::Batch {
            templates,
            data,
            options,
            out_dir,
            jobs,
            timeout_ms,
        } => {
            let opts = load_options(options.as_deref())?;
            let config = opts.resolve()?;
            fs::create_dir_all(&out_dir).with_context(|| format!("creating {}", out_dir.display()))?;

            let pipeline = Pipeline::chrome();
            let session = pipeline.driver().launcher().launch(&config.launch_settings())?;
            let jobs = jobs.unwrap_or_else(num_cpus::get).clamp(1, templates.len());
            log::info!("rendering {} templates with {} workers", templates.len(), jobs);

            let next = AtomicUsize::new(0);
            let failures = Mutex::new(Vec::new());
            std::thread::scope(|scope| {
                for _ in 0..jobs {
                    scope.spawn(|| loop {
                        let i = next.fetch_add(1, Ordering::SeqCst);
                        let Some(template) = templates.get(i) else { break };
                        let out = out_dir.join(output_name(template));
                        let result = load_request(template, data.as_deref()).and_then(|request| {
                            let deadline = Deadline::after(Duration::from_millis(timeout_ms));
                            let pdf = pipeline.render(&request, &opts, Some(&session), &deadline)?;
                            fs::write(&out, pdf).with_context(|| format!("writing {}", out.display()))
                        });
                        match result {
                            Ok(()) => println!("{}", out.display()),
                            Err(e) => {
                                eprintln!("{}: {:#}", template.display(), e);
                                if let Ok(mut failed) = failures.lock() {
                                    failed.push(template.clone());
                                }
                            }
                        }
                    });
                }
            });

            let failed = failures.into_inner().map(|f| f.len()).unwrap_or(0);
            if failed > 0 {
                bail!("{} of {} templates failed", failed, templates.len());
            }
        }

        Commands::LocateBrowser { download } => {
            let config = ProvisionConfig {
                download,
                ..Default::default()
            };
            let path = provision::locate_or_provision(&config)?;
            println!("{}", path.display());
        }
    }

    Ok(())
}

fn load_options(path: Option<&Path>) -> Result<PrintOptions> {
    let Some(path) = path else {
        return Ok(PrintOptions::default());
    };
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing print options {}", path.display()))
}

fn load_request(template: &Path, data: Option<&Path>) -> Result<RenderRequest> {
    let request = RenderRequest::file(template);
    let Some(data) = data else {
        return Ok(request);
    };
    let text = fs::read_to_string(data).with_context(|| format!("reading {}", data.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("parsing data {}", data.display()))?;
    Ok(request.with_serialized(&value)?)
}

fn output_name(template: &Path) -> PathBuf {
    let stem = template.file_stem().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("document"));
    stem.with_extension("pdf")
}
