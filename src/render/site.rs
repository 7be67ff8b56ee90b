//! nginx site files

use std::fmt::Write as _;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteParams {
    pub listen_port: u16,
    /// `_` matches any host
    pub server_name: String,
    pub client_max_body_size: String,
    /// URL prefix -> directory, rendered in order
    pub aliases: Vec<(String, PathBuf)>,
    /// host:port of the upstream web service
    pub upstream: String,
}

pub fn render(p: &SiteParams) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "server {{");
    let _ = writeln!(out, "    listen {};", p.listen_port);
    let _ = writeln!(out, "    server_name {};", p.server_name);
    let _ = writeln!(out);
    let _ = writeln!(out, "    client_max_body_size {};", p.client_max_body_size);

    for (prefix, dir) in &p.aliases {
        let _ = writeln!(out);
        let _ = writeln!(out, "    location {} {{", with_slashes(prefix));
        let dir = dir.display().to_string();
        let _ = writeln!(out, "        alias {}/;", dir.trim_end_matches('/'));
        let _ = writeln!(out, "    }}");
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "    location / {{");
    let _ = writeln!(out, "        proxy_pass http://{};", p.upstream);
    let _ = writeln!(out, "        proxy_set_header Host $host;");
    let _ = writeln!(out, "        proxy_set_header X-Real-IP $remote_addr;");
    let _ = writeln!(out, "        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;");
    let _ = writeln!(out, "        proxy_set_header X-Forwarded-Proto $scheme;");
    let _ = writeln!(out, "    }}");
    let _ = writeln!(out, "}}");
    out
}

/// `static` and `/static` both become `/static/`
fn with_slashes(prefix: &str) -> String {
    format!("/{}/", prefix.trim_matches('/'))
}
