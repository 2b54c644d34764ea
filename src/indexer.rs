use crate::error::{ServerError, ServerResult};
use crate::http::{Response, Status};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

/// Handles resolved paths that turned out to be directories: serves a
/// configured index file when one exists, otherwise a generated HTML
/// listing when enabled, otherwise 404.
pub struct DirectoryIndexer {
    index_names: Vec<String>,
    generate_index_pages: bool,
}

impl DirectoryIndexer {
    pub fn new(index_names: Vec<String>, generate_index_pages: bool) -> Self {
        Self {
            index_names,
            generate_index_pages,
        }
    }

    /// The first configured index file that exists inside `dir`, if any.
    /// The caller serves it through the normal cache pipeline.
    pub fn find_index(&self, dir: &Path) -> Option<PathBuf> {
        self.index_names
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
    }

    /// Generate an HTML listing for `dir`. `request_path` is the URL path
    /// the client used, needed for the entry links.
    pub fn listing(&self, dir: &Path, request_path: &str) -> ServerResult<Response> {
        if !self.generate_index_pages {
            return Err(ServerError::NotFound(request_path.to_string()));
        }

        let mut entries: Vec<(String, bool, u64, Option<DateTime<Utc>>)> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            let modified = meta.modified().ok().map(DateTime::<Utc>::from);
            entries.push((name, meta.is_dir(), meta.len(), modified));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let base = request_path.trim_end_matches('/');
        let title = escape_html(if base.is_empty() { "/" } else { base });

        let mut html = String::new();
        html.push_str("<!DOCTYPE html><html><head>");
        html.push_str(&format!("<title>Index of {}</title>", title));
        html.push_str("<style>body{font-family:sans-serif;max-width:800px;margin:0 auto;padding:20px;}");
        html.push_str("table{border-collapse:collapse;width:100%;}");
        html.push_str("td,th{text-align:left;padding:4px 12px 4px 0;}");
        html.push_str("a{text-decoration:none;color:#2980b9;}</style>");
        html.push_str("</head><body>");
        html.push_str(&format!("<h1>Index of {}</h1>", title));
        html.push_str("<table><tr><th>Name</th><th>Size</th><th>Modified</th></tr>");

        if !base.is_empty() {
            let parent = match base.rfind('/') {
                Some(0) | None => "/".to_string(),
                Some(pos) => base[..pos].to_string(),
            };
            html.push_str(&format!(
                "<tr><td><a href=\"{}\">..</a></td><td></td><td></td></tr>",
                escape_html(&parent)
            ));
        }

        for (name, is_dir, size, modified) in entries {
            let href = format!("{}/{}", base, urlencoding::encode(&name));
            let display = if is_dir {
                format!("{}/", name)
            } else {
                name.clone()
            };
            let size_cell = if is_dir {
                "-".to_string()
            } else {
                size.to_string()
            };
            let mtime_cell = modified
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();
            html.push_str(&format!(
                "<tr><td><a href=\"{}\">{}</a></td><td>{}</td><td>{}</td></tr>",
                escape_html(&href),
                escape_html(&display),
                size_cell,
                mtime_cell
            ));
        }

        html.push_str("</table></body></html>");

        let mut response = Response::new(Status::Ok);
        response.set_header("Content-Type", "text/html; charset=utf-8");
        response.set_body(html.as_bytes());
        Ok(response)
    }
}

/// Minimal HTML escaping for listing names and paths.
fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
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
