//! Flat `KEY=value` environment files

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::secret::Secret;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvParams {
    pub debug: bool,
    pub allowed_hosts: Vec<String>,
    pub csrf_trusted_origins: Vec<String>,
    pub secret_key: Secret,
    pub db_engine: String,
    pub db_name: String,
    pub db_user: String,
    pub db_password: Secret,
    pub db_host: String,
    pub db_port: u16,
    pub static_root: String,
    pub media_root: String,
    /// Written last, in key order
    pub extra: BTreeMap<String, String>,
}

/// Keys whose values are never shown in previews
pub const SECRET_KEYS: &[&str] = &["SECRET_KEY", "DB_PASSWORD"];

pub fn render(p: &EnvParams) -> String {
    let mut out = String::new();
    for (key, value) in pairs(p) {
        let _ = writeln!(out, "{}={}", key, value);
    }
    out
}

/// Same lines as [`render`] with secret values masked
pub fn render_masked(p: &EnvParams) -> String {
    let mut out = String::new();
    for (key, value) in pairs(p) {
        if SECRET_KEYS.contains(&key.as_str()) {
            let _ = writeln!(out, "{}=********", key);
        } else {
            let _ = writeln!(out, "{}={}", key, value);
        }
    }
    out
}

fn pairs(p: &EnvParams) -> Vec<(String, String)> {
    let mut pairs = vec![
        ("DEBUG".to_string(), if p.debug { "True" } else { "False" }.to_string()),
        ("ALLOWED_HOSTS".to_string(), p.allowed_hosts.join(",")),
        ("CSRF_TRUSTED_ORIGINS".to_string(), p.csrf_trusted_origins.join(",")),
        ("SECRET_KEY".to_string(), p.secret_key.expose().to_string()),
        ("DB_ENGINE".to_string(), p.db_engine.clone()),
        ("DB_NAME".to_string(), p.db_name.clone()),
        ("DB_USER".to_string(), p.db_user.clone()),
        ("DB_PASSWORD".to_string(), p.db_password.expose().to_string()),
        ("DB_HOST".to_string(), p.db_host.clone()),
        ("DB_PORT".to_string(), p.db_port.to_string()),
        ("STATIC_ROOT".to_string(), p.static_root.clone()),
        ("MEDIA_ROOT".to_string(), p.media_root.clone()),
    ];
    pairs.extend(p.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    pairs
}

/// Read an env file back. Blank lines and `#` comments are skipped;
/// values are taken verbatim up to the end of the line.
pub fn parse(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .map(str::trim_start)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .collect()
}

/// Replace the value of every `key` line, keeping all other lines as
/// they are. A missing key is appended.
pub fn set_value(content: &str, key: &str, value: &str) -> String {
    let mut out = String::with_capacity(content.len() + value.len());
    let mut found = false;
    for line in content.lines() {
        let trimmed = line.trim_start();
        let matches = !trimmed.starts_with('#')
            && trimmed.split_once('=').is_some_and(|(k, _)| k.trim() == key);
        if matches {
            let _ = writeln!(out, "{}={}", key, value);
            found = true;
        } else {
            out.push_str(line);
            out.push('\n');
        }
    }
    if !found {
        let _ = writeln!(out, "{}={}", key, value);
    }
    out
}
