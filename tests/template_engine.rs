//! Template engine behavior through the public API

use ejspdf::{DataMap, DataValue, Error, RenderRequest, TemplateConfig, TemplateEngine};
use scraper::{Html, Selector};
use std::fs;
use std::path::Path;

fn engine() -> TemplateEngine {
    TemplateEngine::default()
}

fn write(dir: &Path, name: &str, contents: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

#[test]
fn renders_inline_template() {
    let html = engine()
        .render(&RenderRequest::text("<h1><%= value %></h1>").with_value("value", "Hello World"))
        .unwrap();
    assert!(html.contains("<h1>Hello World</h1>"));
    assert!(!html.contains("<%"));
}

#[test]
fn renders_structured_data() {
    let data = serde_json::json!({
        "customer": { "name": "Ada Lovelace" },
        "lines": [
            { "sku": "A-1", "qty": 2, "price": 9.5 },
            { "sku": "B-7", "qty": 1, "price": 120 }
        ]
    });
    let template = r#"<table id="lines">
<% lines.forEach(function (l) { -%>
<tr><td class="sku"><%= l.sku %></td><td class="total"><%= (l.qty * l.price).toFixed(2) %></td></tr>
<% }) -%>
</table><p id="who"><%= customer.name %></p>"#;

    let html = engine()
        .render(&RenderRequest::text(template).with_serialized(&data).unwrap())
        .unwrap();

    let doc = Html::parse_fragment(&html);
    let totals: Vec<String> = doc
        .select(&Selector::parse("td.total").unwrap())
        .map(|td| td.text().collect())
        .collect();
    assert_eq!(totals, vec!["19.00", "120.00"]);
    let who = Selector::parse("#who").unwrap();
    assert_eq!(doc.select(&who).next().unwrap().text().collect::<String>(), "Ada Lovelace");
}

#[test]
fn host_function_output_appears_in_markup() {
    let upper = DataValue::function(|args| {
        let text = args.first().map(DataValue::to_display_string).unwrap_or_default();
        Ok(DataValue::from(text.to_uppercase()))
    });
    let html = engine()
        .render(&RenderRequest::text("<p><%= upper(name) %></p>").with_value("upper", upper).with_value("name", "quiet"))
        .unwrap();
    assert_eq!(html, "<p>QUIET</p>");
}

#[test]
fn host_function_error_becomes_template_error() {
    let broken = DataValue::function(|_| Err("rate service unavailable".to_string()));
    let err = engine()
        .render(&RenderRequest::text("<%= rate() %>").with_value("rate", broken))
        .unwrap_err();
    match err {
        Error::TemplateError(msg) => assert!(msg.contains("rate service unavailable"), "{}", msg),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn sibling_include_precedes_own_content() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "header.ejs", "<header><%= title %></header>");
    write(dir.path(), "page.ejs", "<%- include('header') %><main>body</main>");

    let html = engine()
        .render(&RenderRequest::file(dir.path().join("page.ejs")).with_value("title", "Report"))
        .unwrap();
    let header = html.find("<header>Report</header>").expect("header rendered");
    let main = html.find("<main>body</main>").expect("body rendered");
    assert!(header < main);
}

#[test]
fn nested_includes_resolve_relative_to_the_including_file() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "partials/row.ejs", "<li><%= item %></li>");
    write(
        dir.path(),
        "partials/list.ejs",
        "<ul><% items.forEach(function (item) { %><%- include('row.ejs', { item: item }) %><% }) %></ul>",
    );
    write(dir.path(), "index.ejs", "<%- include('./partials/list') %>");

    let html = engine()
        .render(&RenderRequest::file(dir.path().join("index.ejs")).with_value("items", vec!["a", "b"]))
        .unwrap();
    assert_eq!(html, "<ul><li>a</li><li>b</li></ul>");
}

#[test]
fn inline_template_includes_from_explicit_root() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "footer.ejs", "<footer>fin</footer>");

    let html = engine()
        .render(&RenderRequest::text("<p>x</p><%- include('footer') %>").with_root(dir.path()))
        .unwrap();
    assert_eq!(html, "<p>x</p><footer>fin</footer>");
}

#[test]
fn missing_include_is_a_template_error() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "page.ejs", "<%- include('nope') %>");
    let err = engine().render(&RenderRequest::file(dir.path().join("page.ejs"))).unwrap_err();
    assert!(matches!(err, Error::TemplateError(_)), "{:?}", err);
}

#[test]
fn include_outside_root_is_refused() {
    let outer = tempfile::tempdir().unwrap();
    write(outer.path(), "secret.ejs", "top secret");
    write(outer.path(), "site/page.ejs", "<%- include('../secret.ejs') %>");

    let err = engine()
        .render(&RenderRequest::file(outer.path().join("site/page.ejs")))
        .unwrap_err();
    assert!(matches!(err, Error::TemplateError(_)), "{:?}", err);

    let relaxed = TemplateEngine::new(TemplateConfig {
        confine_to_root: false,
        ..Default::default()
    });
    let html = relaxed
        .render(&RenderRequest::file(outer.path().join("site/page.ejs")))
        .unwrap();
    assert_eq!(html, "top secret");
}

#[test]
fn per_row_includes_are_not_capped_by_depth() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "table.ejs",
        "<table>\n<% items.forEach(function (item) { -%>\n<%- include('row', { item: item }) %>\n<% }) -%>\n</table>",
    );
    write(dir.path(), "row.ejs", "<tr><%- include('cell', { text: item.name }) %></tr>");
    write(dir.path(), "cell.ejs", "<td><%= text %></td>");

    let items: Vec<DataValue> = (0..150)
        .map(|i| [("name", DataValue::from(format!("item-{}", i)))].into_iter().collect())
        .collect();
    let html = engine()
        .render(&RenderRequest::file(dir.path().join("table.ejs")).with_value("items", items))
        .unwrap();

    let doc = Html::parse_fragment(&html);
    let cells: Vec<String> = doc
        .select(&Selector::parse("td").unwrap())
        .map(|td| td.text().collect())
        .collect();
    assert_eq!(cells.len(), 150);
    assert_eq!(cells[0], "item-0");
    assert_eq!(cells[149], "item-149");
}

#[test]
fn self_include_hits_the_depth_limit() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "loop.ejs", "x<%- include('loop') %>");

    let engine = TemplateEngine::new(TemplateConfig {
        max_include_depth: 8,
        ..Default::default()
    });
    let err = engine.render(&RenderRequest::file(dir.path().join("loop.ejs"))).unwrap_err();
    match err {
        Error::TemplateError(msg) => assert!(msg.contains("include depth limit of 8"), "{}", msg),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn nesting_up_to_the_depth_limit_renders() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "level.ejs", "<%= n %><% if (n < limit) { %><%- include('level', { n: n + 1 }) %><% } %>");

    let engine = TemplateEngine::new(TemplateConfig {
        max_include_depth: 4,
        ..Default::default()
    });
    let render = |limit: i32| {
        engine.render(
            &RenderRequest::file(dir.path().join("level.ejs"))
                .with_value("n", 0)
                .with_value("limit", limit),
        )
    };
    assert_eq!(render(4).unwrap(), "01234");
    assert!(matches!(render(5), Err(Error::TemplateError(_))));
}

#[test]
fn total_reads_are_capped() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "list.ejs", "<% for (var i = 0; i < 20; i++) { %><%- include('one') %><% } %>");
    write(dir.path(), "one.ejs", "1");

    let engine = TemplateEngine::new(TemplateConfig {
        max_include_reads: 10,
        ..Default::default()
    });
    let err = engine.render(&RenderRequest::file(dir.path().join("list.ejs"))).unwrap_err();
    match err {
        Error::TemplateError(msg) => assert!(msg.contains("include limit of 10 file reads"), "{}", msg),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn runaway_loop_is_stopped() {
    let engine = TemplateEngine::new(TemplateConfig {
        loop_iteration_limit: 10_000,
        ..Default::default()
    });
    let err = engine.render(&RenderRequest::text("<% while (true) {} %>")).unwrap_err();
    assert!(matches!(err, Error::TemplateError(_)), "{:?}", err);
}

#[test]
fn concurrent_renders_are_isolated() {
    let handles: Vec<_> = (0..8)
        .map(|i| {
            std::thread::spawn(move || {
                let mut data = DataMap::new();
                data.insert("id".into(), DataValue::from(i as i64));
                let template = "<% if (typeof leaked !== 'undefined') { %>LEAK<% } %><% leaked = id %><%= id %>";
                TemplateEngine::default()
                    .render(&RenderRequest::text(template).with_data(data))
                    .unwrap()
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.join().unwrap(), i.to_string());
    }
}
