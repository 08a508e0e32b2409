//! HTML templates for the web interface.

use serde::Deserialize;

use crate::models::{QueueState, Stats};
use crate::services::{AnnotationTarget, CatalogEntry};

/// One-shot message carried across a redirect in the query string.
#[derive(Debug, Default, Deserialize)]
pub struct Notice {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
}

impl Notice {
    fn render(&self) -> String {
        let Some(msg) = self.msg.as_deref().filter(|m| !m.is_empty()) else {
            return String::new();
        };
        let kind = match self.kind.as_deref() {
            Some("success") => "success",
            Some("warning") => "warning",
            Some("error") => "error",
            _ => "info",
        };
        format!(
            r#"<div class="notice notice-{}">{}</div>"#,
            kind,
            html_escape(msg)
        )
    }
}

/// Base HTML template.
pub fn base_template(title: &str, notice: &Notice, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{} - imagetext</title>
    <link rel="stylesheet" href="/static/style.css">
</head>
<body>
    <header id="main-header">
        <nav>
            <a href="/" class="logo">imagetext</a>
            <a href="/upload">upload</a>
            <a href="/batch">annotate</a>
            <a href="/admin">admin</a>
        </nav>
    </header>
    <main>
        {}
        <h1>{}</h1>
        {}
    </main>
</body>
</html>"#,
        html_escape(title),
        notice.render(),
        html_escape(title),
        content
    )
}

fn progress_bar(stats: &Stats) -> String {
    format!(
        r#"<div class="progress">
            <div class="progress-fill" style="width: {pct}%"></div>
        </div>
        <p class="muted">{done} of {total} processed ({pct}%)</p>"#,
        pct = stats.percent_complete(),
        done = stats.processed_images,
        total = stats.total_images,
    )
}

/// Render the dashboard.
pub fn dashboard(stats: &Stats, notice: &Notice) -> String {
    let state = QueueState::from_stats(stats);
    let status = match state {
        QueueState::NoImages => {
            r#"<p>No images yet. <a href="/upload">Upload some</a> to get started.</p>"#
                .to_string()
        }
        QueueState::HasUnprocessed => format!(
            r#"<p>{} image(s) waiting for text.</p>
        <p><a class="btn" href="/batch">Start annotating</a></p>"#,
            stats.remaining()
        ),
        QueueState::AllProcessed => r#"<p>All images have been processed!</p>
        <p><a href="/upload">Upload more</a> or <a href="/admin/images">review the results</a>.</p>"#
            .to_string(),
    };

    let content = format!(
        r#"
    <table class="stats">
        <tr><th>Total images</th><td>{}</td></tr>
        <tr><th>Processed</th><td>{}</td></tr>
        <tr><th>Remaining</th><td>{}</td></tr>
    </table>
    {}
    <div class="status status-{}">{}</div>
    "#,
        stats.total_images,
        stats.processed_images,
        stats.remaining(),
        progress_bar(stats),
        state.as_str(),
        status
    );

    base_template("Dashboard", notice, &content)
}

/// Render the upload form.
pub fn upload_form(notice: &Notice) -> String {
    let content = r#"
    <form method="post" action="/upload" enctype="multipart/form-data" class="upload-form">
        <p>Allowed types: png, jpg, jpeg, gif, bmp, tiff.</p>
        <input type="file" name="files" accept="image/*" multiple required>
        <button type="submit">Upload</button>
    </form>
    "#;

    base_template("Upload images", notice, content)
}

/// Render the annotation page for one image.
pub fn extract_page(target: &AnnotationTarget, notice: &Notice) -> String {
    let image = &target.image;
    let content = format!(
        r#"
    {progress}
    <div class="extract">
        <figure>
            <img src="{url}" alt="{name}">
            <figcaption>{name} <span class="muted">uploaded {uploaded}</span></figcaption>
        </figure>
        <form method="post" action="/extract/{id}">
            <label for="text_content">Text in this image</label>
            <textarea id="text_content" name="text_content" rows="12" autofocus required></textarea>
            <button type="submit">Save &amp; next</button>
            <a href="/">back to dashboard</a>
        </form>
    </div>
    "#,
        progress = progress_bar(&target.stats),
        url = html_escape(&target.url),
        name = html_escape(&image.filename),
        uploaded = image.created_at.format("%Y-%m-%d %H:%M"),
        id = image.id,
    );

    base_template("Extract text", notice, &content)
}

/// Render the admin tools page.
pub fn admin_tools(notice: &Notice) -> String {
    let content = r#"
    <ul class="admin-links">
        <li><a href="/admin/images">All images</a>: review transcriptions and delete images</li>
        <li><a href="/api/stats">/api/stats</a>: progress as JSON</li>
    </ul>
    <form class="search" onsubmit="runSearch(event)">
        <input type="search" id="q" placeholder="Search extracted text">
        <button type="submit">Search</button>
    </form>
    <pre id="search-results"></pre>
    <script>
        async function runSearch(event) {
            event.preventDefault();
            const q = document.getElementById('q').value;
            const res = await fetch('/api/search?q=' + encodeURIComponent(q));
            const body = await res.json();
            document.getElementById('search-results').textContent = JSON.stringify(body, null, 2);
        }
    </script>
    "#;

    base_template("Admin", notice, content)
}

/// Render the listing of every image, newest first.
pub fn all_images(entries: &[CatalogEntry], notice: &Notice) -> String {
    if entries.is_empty() {
        return base_template(
            "All images",
            notice,
            r#"<p class="muted">No images uploaded yet.</p>"#,
        );
    }

    let mut rows = String::new();
    for entry in entries {
        let image = &entry.entry.image;
        let text = match &entry.entry.text_content {
            Some(text) => format!(r#"<pre class="text">{}</pre>"#, html_escape(text)),
            None => format!(
                r#"<em>not processed</em> <a href="/extract/{}">annotate</a>"#,
                image.id
            ),
        };

        rows.push_str(&format!(
            r#"
        <tr>
            <td><a href="{url}"><img class="thumb" src="{url}" alt="{name}"></a></td>
            <td>{name}</td>
            <td>{uploaded}</td>
            <td>{text}</td>
            <td>
                <form method="post" action="/admin/delete_image/{id}"
                      onsubmit="return confirm('Delete this image?');">
                    <button type="submit" class="btn-small">delete</button>
                </form>
            </td>
        </tr>
        "#,
            url = html_escape(&entry.url),
            name = html_escape(&image.filename),
            uploaded = image.created_at.format("%Y-%m-%d %H:%M"),
            text = text,
            id = image.id,
        ));
    }

    let content = format!(
        r#"
    <table class="file-listing">
        <thead>
            <tr>
                <th>Image</th>
                <th>Filename</th>
                <th>Uploaded</th>
                <th>Text</th>
                <th></th>
            </tr>
        </thead>
        <tbody>
            {}
        </tbody>
    </table>
    "#,
        rows
    );

    base_template("All images", notice, &content)
}

/// Render a bare error page.
pub fn error_page(message: &str) -> String {
    let content = format!(
        r#"<p class="notice notice-error">{}</p><p><a href="/">back to dashboard</a></p>"#,
        html_escape(message)
    );
    base_template("Error", &Notice::default(), &content)
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// CSS styles for the web interface - minimal text-based design.
pub const CSS: &str = r#"
:root {
    --bg: #fff;
    --text: #222;
    --text-muted: #666;
    --link: #0066cc;
    --link-hover: #004499;
    --border: #ccc;
    --panel-bg: #f5f5f5;
    --accent: #0066cc;
    --success: #e6f4e6;
    --warning: #fffbcc;
    --error: #fbe4e4;
}

@media (prefers-color-scheme: dark) {
    :root {
        --bg: #1a1a1a;
        --text: #e0e0e0;
        --text-muted: #888;
        --link: #6ab0ff;
        --link-hover: #8dc4ff;
        --border: #444;
        --panel-bg: #252525;
        --accent: #6ab0ff;
        --success: #1f3320;
        --warning: #3a3520;
        --error: #3a2020;
    }
}

* { box-sizing: border-box; margin: 0; padding: 0; }

body {
    font-family: 'Lucida Console', 'Courier New', monospace;
    font-size: 14px;
    background: var(--bg);
    color: var(--text);
    line-height: 1.5;
}

a { color: var(--link); text-decoration: none; }
a:hover { color: var(--link-hover); text-decoration: underline; }

#main-header {
    border-bottom: 1px solid var(--border);
    padding: 0.5rem 1rem;
    font-size: 13px;
}

#main-header nav {
    display: flex;
    gap: 1.5rem;
    align-items: center;
}

#main-header .logo {
    font-weight: bold;
    letter-spacing: 1px;
}

main { padding: 1rem; max-width: 1100px; }
h1 { font-size: 16px; margin: 1rem 0; }
p { margin: 0.5rem 0; }
.muted { color: var(--text-muted); }

.notice {
    padding: 0.5rem 0.75rem;
    margin-bottom: 1rem;
    border: 1px solid var(--border);
    background: var(--panel-bg);
}
.notice-success { background: var(--success); }
.notice-warning { background: var(--warning); }
.notice-error { background: var(--error); }

table { border-collapse: collapse; margin: 0.5rem 0; }
th, td {
    text-align: left;
    padding: 0.3rem 0.75rem;
    border-bottom: 1px solid var(--border);
    vertical-align: top;
}
.file-listing { width: 100%; }

.progress {
    height: 8px;
    background: var(--panel-bg);
    border: 1px solid var(--border);
    margin-top: 1rem;
}
.progress-fill { height: 100%; background: var(--accent); }

.btn, button {
    display: inline-block;
    font-family: inherit;
    font-size: 13px;
    padding: 0.3rem 0.9rem;
    border: 1px solid var(--border);
    background: var(--panel-bg);
    color: var(--text);
    cursor: pointer;
}
.btn-small { padding: 0.1rem 0.5rem; font-size: 12px; }

.extract { display: flex; gap: 1.5rem; margin-top: 1rem; flex-wrap: wrap; }
.extract figure { flex: 1 1 480px; }
.extract img { max-width: 100%; border: 1px solid var(--border); }
.extract form { flex: 1 1 320px; display: flex; flex-direction: column; gap: 0.5rem; }
textarea, input[type="search"] {
    font-family: inherit;
    font-size: 14px;
    padding: 0.4rem;
    border: 1px solid var(--border);
    background: var(--bg);
    color: var(--text);
}

.thumb { max-width: 120px; max-height: 90px; }
pre.text { white-space: pre-wrap; max-width: 480px; }
.upload-form { display: flex; flex-direction: column; gap: 0.75rem; max-width: 480px; }
.admin-links { margin: 0.5rem 0 1rem 1.25rem; }
.search { display: flex; gap: 0.5rem; margin-bottom: 0.5rem; }
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_escape() {
        assert_eq!(
            html_escape(r#"<a href="x">Tom & Jerry's</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; Jerry&#39;s&lt;/a&gt;"
        );
    }

    #[test]
    fn test_notice_renders_escaped_message() {
        let notice = Notice {
            kind: Some("error".to_string()),
            msg: Some("<bad>".to_string()),
        };
        let html = notice.render();
        assert!(html.contains("notice-error"));
        assert!(html.contains("&lt;bad&gt;"));

        assert!(Notice::default().render().is_empty());
    }

    #[test]
    fn test_dashboard_reflects_queue_state() {
        let empty = dashboard(&Stats::default(), &Notice::default());
        assert!(empty.contains("No images yet"));

        let pending = dashboard(
            &Stats {
                total_images: 3,
                processed_images: 1,
            },
            &Notice::default(),
        );
        assert!(pending.contains("2 image(s) waiting"));
        assert!(pending.contains("/batch"));
    }
}
