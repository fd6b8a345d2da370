//! Read-only status endpoints.

use std::fmt::Write as _;

use axum::Json;
use axum::extract::State;
use axum::response::Html;

use super::AppState;
use crate::session::RegistrySnapshot;

/// `GET /`: human-readable session counts.
pub async fn status_page(State(state): State<AppState>) -> Html<String> {
    Html(render_status_page(&state.registry.snapshot()))
}

/// `GET /status`: session counts as JSON.
pub async fn status_json(State(state): State<AppState>) -> Json<RegistrySnapshot> {
    Json(state.registry.snapshot())
}

/// `GET /health`
pub async fn health() -> &'static str {
    "ok"
}

const PAGE_HEAD: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Users playing now</title>
<style>
body { font-family: system-ui, sans-serif; background: #1f1f1f; color: #f0f0f0;
       margin: 0; min-height: 100vh; display: flex; align-items: center; justify-content: center; }
.container { background: #2d2d2d; padding: 20px; border-radius: 10px; width: 100%; max-width: 400px; margin: 20px; }
h1 { font-size: 2.2rem; text-align: center; }
.stat { display: flex; justify-content: space-between; padding: 10px; border-bottom: 1px solid #444; font-size: 1.2rem; }
.stat:last-child { border-bottom: none; }
.stat label { font-weight: bold; }
</style>
</head>
<body>
<div class="container">
<h1>Currently playing users</h1>
"#;

const PAGE_TAIL: &str = "</div>\n</body>\n</html>\n";

/// Render the status page for a counter snapshot.
pub fn render_status_page(snapshot: &RegistrySnapshot) -> String {
    let mut html = String::from(PAGE_HEAD);
    push_stat(&mut html, "total", "Total Users", snapshot.total);
    for category in &snapshot.categories {
        push_stat(
            &mut html,
            &category.name,
            &format!("{} Users", category.label),
            category.active,
        );
    }
    html.push_str(PAGE_TAIL);
    html
}

fn push_stat(html: &mut String, id: &str, label: &str, count: usize) {
    // Writing to a String cannot fail.
    let _ = writeln!(
        html,
        "<div class=\"stat\"><label>{}:</label><span id=\"{}-users\">{count}</span></div>",
        escape_html(label),
        escape_html(id),
    );
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
