//! Render several documents through the async renderer, which keeps one
//! browser alive and opens a tab per document

use ejspdf::{PrintOptions, RenderRequest, Renderer};
use std::time::Instant;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let renderer = Renderer::new(None).await?;
    let template = "<h1>Report <%= n %></h1><p>Generated by ejspdf.</p>";

    for n in 1..=5 {
        let started = Instant::now();
        let pdf = renderer
            .render_pdf(RenderRequest::text(template).with_value("n", n), PrintOptions::default())
            .await?;
        println!("report {}: {} bytes in {:?}", n, pdf.len(), started.elapsed());
    }

    renderer.close().await?;
    Ok(())
}
