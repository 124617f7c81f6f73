//! Render an invoice template with includes and a host formatting function

use ejspdf::{DataValue, PrintOptions, RenderRequest};
use std::fs;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let dir = std::env::temp_dir().join("ejspdf-invoice-demo");
    fs::create_dir_all(&dir)?;
    fs::write(
        dir.join("header.ejs"),
        "<header><h1><%= company %></h1><p>Invoice #<%= number %></p></header>",
    )?;
    fs::write(
        dir.join("invoice.ejs"),
        r#"<!DOCTYPE html>
<html><body>
<%- include('header') %>
<table>
<% lines.forEach(function (line) { -%>
  <tr><td><%= line.description %></td><td><%= money(line.qty * line.price) %></td></tr>
<% }) -%>
</table>
<p><strong>Total: <%= money(lines.reduce(function (sum, l) { return sum + l.qty * l.price; }, 0)) %></strong></p>
</body></html>"#,
    )?;

    let money = DataValue::function(|args| {
        let amount = args.first().and_then(DataValue::as_f64).unwrap_or_default();
        Ok(DataValue::from(format!("${:.2}", amount)))
    });

    let request = RenderRequest::file(dir.join("invoice.ejs"))
        .with_serialized(&serde_json::json!({
            "company": "Acme Widgets",
            "number": 1042,
            "lines": [
                { "description": "Sprocket", "qty": 4, "price": 2.5 },
                { "description": "Flange <large>", "qty": 1, "price": 49.0 }
            ]
        }))?
        .with_value("money", money);

    let options = PrintOptions {
        page_size: "Letter".into(),
        margin_top: "0.75in".into(),
        margin_bottom: "0.75in".into(),
        display_header_footer: true,
        footer_template: r#"<div style="font-size:8px;width:100%;text-align:center"><span class="pageNumber"></span></div>"#.into(),
        ..Default::default()
    };

    let pipeline = ejspdf::Pipeline::chrome();
    println!("{}", pipeline.render_html(&request)?);

    let pdf = pipeline.render(&request, &options, None, &ejspdf::Deadline::none())?;
    let out = dir.join("invoice.pdf");
    fs::write(&out, &pdf)?;
    println!("wrote {} ({} bytes)", out.display(), pdf.len());
    Ok(())
}
