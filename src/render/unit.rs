//! systemd unit files

use std::fmt::Write as _;
use std::path::PathBuf;

/// Which kind of long-running process the unit supervises
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitFlavor {
    /// Serves HTTP on `bind` (host:port)
    Web { bind: String },
    /// Background worker without a network bind
    Enforcer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitParams {
    pub description: String,
    pub user: String,
    pub group: String,
    pub working_dir: PathBuf,
    pub env_file: Option<PathBuf>,
    /// Extra `Environment=` assignments, in order
    pub environment: Vec<(String, String)>,
    /// Program and arguments
    pub exec_start: Vec<String>,
    pub restart_sec: u32,
    pub wanted_by: String,
    pub flavor: UnitFlavor,
}

impl Default for UnitParams {
    fn default() -> Self {
        Self {
            description: String::new(),
            user: String::new(),
            group: String::new(),
            working_dir: PathBuf::new(),
            env_file: None,
            environment: Vec::new(),
            exec_start: Vec::new(),
            restart_sec: 5,
            wanted_by: "multi-user.target".to_string(),
            flavor: UnitFlavor::Enforcer,
        }
    }
}

pub fn render(p: &UnitParams) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "[Unit]");
    let _ = writeln!(out, "Description={}", p.description);
    let _ = writeln!(out, "After=network.target");
    let _ = writeln!(out);

    let _ = writeln!(out, "[Service]");
    let _ = writeln!(out, "User={}", p.user);
    let _ = writeln!(out, "Group={}", p.group);
    let _ = writeln!(out, "WorkingDirectory={}", p.working_dir.display());
    if let Some(env_file) = &p.env_file {
        let _ = writeln!(out, "EnvironmentFile={}", env_file.display());
    }
    for (key, value) in &p.environment {
        let _ = writeln!(out, "Environment=\"{}={}\"", key, value);
    }
    let _ = writeln!(out, "ExecStart={}", exec_line(p));
    let _ = writeln!(out, "Restart=always");
    let _ = writeln!(out, "RestartSec={}", p.restart_sec);
    if p.flavor == UnitFlavor::Enforcer {
        // Let the worker reap its ffmpeg children before SIGKILL
        let _ = writeln!(out, "KillMode=mixed");
        let _ = writeln!(out, "TimeoutStopSec=10");
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "[Install]");
    let _ = writeln!(out, "WantedBy={}", p.wanted_by);
    out
}

fn exec_line(p: &UnitParams) -> String {
    let mut args: Vec<String> = p.exec_start.iter().map(|a| quote(a)).collect();
    if let UnitFlavor::Web { bind } = &p.flavor {
        args.push("--bind".to_string());
        args.push(quote(bind));
    }
    args.join(" ")
}

fn quote(arg: &str) -> String {
    if arg.is_empty() || arg.contains(char::is_whitespace) || arg.contains('"') {
        format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        arg.to_string()
    }
}
