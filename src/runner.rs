//! Host command execution
//!
//! [`SystemHost`] is the production [`HostExecutor`]: every collaborator
//! (apt, systemctl, psql, nginx, git) is spawned through it.

use std::io::{self, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use declarative::{CommandOutput, HostExecutor};

use crate::progress;

/// Spawns real processes and captures their output
#[derive(Debug, Default)]
pub struct SystemHost;

impl HostExecutor for SystemHost {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
        log::debug!("$ {} {}", program, args.join(" "));
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()?;
        log_exit(program, &output.status);
        Ok(output.into())
    }

    fn run_with_input(
        &self,
        program: &str,
        args: &[&str],
        input: &[u8],
    ) -> io::Result<CommandOutput> {
        // stdin is never logged
        log::debug!("$ {} {} < (stdin)", program, args.join(" "));
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input)?;
        }
        let output = child.wait_with_output()?;
        log_exit(program, &output.status);
        Ok(output.into())
    }

    fn run_in(
        &self,
        dir: &Path,
        envs: &[(String, String)],
        program: &str,
        args: &[&str],
    ) -> io::Result<CommandOutput> {
        log::debug!("$ (cd {}) {} {}", dir.display(), program, args.join(" "));
        let output = Command::new(program)
            .args(args)
            .current_dir(dir)
            .envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .output()?;
        log_exit(program, &output.status);
        Ok(output.into())
    }

    fn pause(&self, duration: Duration) {
        let spinner = progress::spinner(&format!(
            "Waiting {}s for services to settle...",
            duration.as_secs()
        ));
        std::thread::sleep(duration);
        progress::finish_clear(&spinner);
    }
}

fn log_exit(program: &str, status: &std::process::ExitStatus) {
    if !status.success() {
        log::debug!("{} exited with {}", program, status);
    }
}

/// Whether the effective uid is 0
#[allow(unsafe_code)]
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}

/// Check if a command exists
pub fn command_exists(cmd: &str) -> bool {
    Command::new("which")
        .arg(cmd)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout() {
        let out = SystemHost.run("echo", &["hello"]).unwrap();
        assert!(out.success);
        assert_eq!(out.stdout_str().trim(), "hello");
    }

    #[test]
    fn feeds_stdin() {
        let out = SystemHost.run_with_input("cat", &[], b"from stdin").unwrap();
        assert_eq!(out.stdout_str(), "from stdin");
    }

    #[test]
    fn runs_in_directory_with_env() {
        let dir = tempfile::tempdir().unwrap();
        let envs = vec![("STACKUP_TEST_VAR".to_string(), "42".to_string())];
        let out = SystemHost
            .run_in(dir.path(), &envs, "sh", &["-c", "echo $STACKUP_TEST_VAR; pwd"])
            .unwrap();
        let text = out.stdout_str();
        assert!(text.starts_with("42\n"));
        assert!(text.trim_end().ends_with(
            dir.path().file_name().unwrap().to_str().unwrap()
        ));
    }

    #[test]
    fn missing_program_is_not_found() {
        let err = SystemHost.run("stackup-no-such-binary", &[]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn nonzero_exit_is_captured() {
        let out = SystemHost.run("sh", &["-c", "echo boom >&2; exit 3"]).unwrap();
        assert!(!out.success);
        assert_eq!(out.diagnostics(), "boom");
    }

    #[test]
    fn command_exists_finds_sh() {
        assert!(command_exists("sh"));
        assert!(!command_exists("stackup-no-such-binary"));
    }
}
