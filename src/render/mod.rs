//! Artifact rendering
//!
//! Pure functions from parameters to file text. No I/O happens here: the
//! same parameters always produce byte-identical output, which is what
//! makes the content comparison in the resources meaningful.

pub mod env;
pub mod site;
pub mod unit;

pub use env::EnvParams;
pub use site::SiteParams;
pub use unit::{UnitFlavor, UnitParams};

use similar::TextDiff;

/// Parameters for any of the generated artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactParams {
    ServiceUnit(UnitParams),
    ProxySite(SiteParams),
    EnvFile(EnvParams),
}

/// Render an artifact
pub fn render(params: &ArtifactParams) -> String {
    match params {
        ArtifactParams::ServiceUnit(p) => unit::render(p),
        ArtifactParams::ProxySite(p) => site::render(p),
        ArtifactParams::EnvFile(p) => env::render(p),
    }
}

/// Short content fingerprint shown in status output
pub fn content_hash(content: &str) -> String {
    blake3::hash(content.as_bytes()).to_hex()[..16].to_string()
}

/// Unified diff between what is on disk and what would be written
pub fn unified_diff(current: &str, desired: &str, name: &str) -> String {
    TextDiff::from_lines(current, desired)
        .unified_diff()
        .context_radius(2)
        .header(&format!("{} (current)", name), &format!("{} (desired)", name))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_params() -> UnitParams {
        UnitParams {
            description: "demo web".to_string(),
            user: "demo".to_string(),
            group: "www-data".to_string(),
            working_dir: "/srv/demo/app".into(),
            env_file: Some("/srv/demo/.env".into()),
            environment: vec![("PYTHONUNBUFFERED".to_string(), "1".to_string())],
            exec_start: vec!["/srv/demo/venv/bin/gunicorn".to_string()],
            flavor: UnitFlavor::Web {
                bind: "127.0.0.1:8000".to_string(),
            },
            ..UnitParams::default()
        }
    }

    #[test]
    fn render_is_deterministic() {
        let params = ArtifactParams::ServiceUnit(unit_params());
        assert_eq!(render(&params), render(&params.clone()));
    }

    #[test]
    fn hash_tracks_content() {
        assert_eq!(content_hash("a"), content_hash("a"));
        assert_ne!(content_hash("a"), content_hash("b"));
        assert_eq!(content_hash("a").len(), 16);
    }

    #[test]
    fn diff_shows_changed_lines() {
        let diff = unified_diff("A=1\nB=2\n", "A=1\nB=3\n", "demo.service");
        assert!(diff.contains("-B=2"));
        assert!(diff.contains("+B=3"));
        assert!(diff.contains("demo.service (desired)"));
    }
}
