//! End-to-end tests against a real browser

use ejspdf::cdp::{ChromeLauncher, ChromeSession};
use ejspdf::print::{BrowserLauncher, LaunchSettings};
use ejspdf::{Deadline, Error, Pipeline, PrintOptions, RenderRequest};
use std::sync::Once;
use std::time::{Duration, Instant};
use tiny_http::{Response, Server};

static INIT: Once = Once::new();

/// Serves a stylesheet the rendered pages link to
fn start_asset_server() -> String {
    INIT.call_once(|| {
        std::thread::spawn(|| {
            let server = Server::http("127.0.0.1:18081").unwrap();
            for request in server.incoming_requests() {
                let response = match request.url() {
                    "/style.css" => Response::from_string("h1 { color: rebeccapurple; }").with_header(
                        "Content-Type: text/css".parse::<tiny_http::Header>().unwrap(),
                    ),
                    _ => Response::from_string("Not Found").with_status_code(404),
                };
                let _ = request.respond(response);
            }
        });
        std::thread::sleep(Duration::from_millis(100));
    });

    "http://127.0.0.1:18081".to_string()
}

fn is_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF")
}

#[test]
#[ignore] // Requires Chrome to be installed
fn test_render_pdf() {
    let base = start_asset_server();
    let request = RenderRequest::text(
        r#"<html><head><link rel="stylesheet" href="<%= base %>/style.css"></head>
<body><h1><%= title %></h1></body></html>"#,
    )
    .with_value("base", base)
    .with_value("title", "Quarterly report");

    let pdf = Pipeline::chrome()
        .render(&request, &PrintOptions::default(), None, &Deadline::after(Duration::from_secs(60)))
        .expect("render");
    assert!(is_pdf(&pdf));
}

#[test]
#[ignore] // Requires Chrome to be installed
fn test_wait_selector_and_header_footer() {
    let request = RenderRequest::text(
        r#"<body><script>setTimeout(function () {
    var el = document.createElement('div');
    el.id = 'ready';
    el.textContent = 'late content';
    document.body.appendChild(el);
}, 300);</script></body>"#,
    );
    let options = PrintOptions {
        wait_selector: "#ready".into(),
        wait_delay: Duration::from_millis(100),
        display_header_footer: true,
        page_size: "Letter".into(),
        landscape: true,
        ..Default::default()
    };
    let pdf = Pipeline::chrome()
        .render(&request, &options, None, &Deadline::after(Duration::from_secs(60)))
        .expect("render");
    assert!(is_pdf(&pdf));
}

#[test]
#[ignore] // Requires Chrome to be installed
fn test_selector_that_never_appears_times_out() {
    let options = PrintOptions {
        wait_selector: "#never".into(),
        ..Default::default()
    };
    let pipeline = Pipeline::chrome();
    let session = pipeline
        .driver()
        .launcher()
        .launch(&LaunchSettings::default())
        .expect("launch");

    let started = Instant::now();
    let err = pipeline
        .render(&RenderRequest::text("<p>x</p>"), &options, Some(&session), &Deadline::after(Duration::from_secs(2)))
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(2000)), "{:?}", err);
    assert!(started.elapsed() < Duration::from_secs(10));

    // The shared session survives the failed print.
    let pdf = pipeline
        .render(&RenderRequest::text("<p>after</p>"), &PrintOptions::default(), Some(&session), &Deadline::none())
        .expect("render after timeout");
    assert!(is_pdf(&pdf));
}

#[test]
#[ignore] // Requires Chrome to be installed
fn test_shared_session_across_threads() {
    let pipeline = Pipeline::chrome();
    let session: ChromeSession = ChromeLauncher::default()
        .launch(&LaunchSettings::default())
        .expect("launch");

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let pipeline = &pipeline;
                let session = &session;
                scope.spawn(move || {
                    let request = RenderRequest::text("<h1>Page <%= n %></h1>").with_value("n", i);
                    pipeline.render(&request, &PrintOptions::default(), Some(session), &Deadline::none())
                })
            })
            .collect();
        for handle in handles {
            assert!(is_pdf(&handle.join().unwrap().expect("render")));
        }
    });
}
