//! Concrete resources for the application stack
//!
//! Every host object stackup manages is a [`declarative::Resource`]:
//! - Probe (read-only inspection, absence is not an error)
//! - Apply (idempotent convergence through an external collaborator)
//! - Remove, for the kinds that support it
//!
//! All external commands go through [`RunContext::host`] so tests can
//! swap in a simulated host.

pub mod database;
pub mod deployment;
pub mod directory;
pub mod env_file;
pub mod package;
pub mod package_index;
pub mod proxy_site;
pub mod service_unit;
pub mod user_group;

pub use database::{Database, DatabaseRole};
pub use deployment::Deployment;
pub use directory::Directory;
pub use env_file::EnvFile;
pub use package::Package;
pub use package_index::PackageIndex;
pub use proxy_site::ProxySite;
pub use service_unit::ServiceUnit;
pub use user_group::UserGroup;

use declarative::{CommandOutput, ConvergeError, RunContext};
use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

/// Run an inspection command. A missing tool is a probe error; a non-zero
/// exit is returned to the caller, which decides what absence looks like.
pub fn run_probe(
    ctx: &RunContext,
    key: &str,
    program: &str,
    args: &[&str],
) -> Result<CommandOutput, ConvergeError> {
    ctx.host
        .run(program, args)
        .map_err(|e| ConvergeError::probe(key, io_message(program, &e)))
}

/// Run a mutating command; non-zero exit is an apply error carrying the
/// command's output.
pub fn run_apply(
    ctx: &RunContext,
    key: &str,
    program: &str,
    args: &[&str],
) -> Result<CommandOutput, ConvergeError> {
    let output = ctx
        .host
        .run(program, args)
        .map_err(|e| ConvergeError::apply(key, io_message(program, &e)))?;
    if !output.success {
        return Err(
            ConvergeError::apply(key, format!("{} failed", command_line(program, args)))
                .with_diagnostics(output.diagnostics()),
        );
    }
    Ok(output)
}

/// Best-effort command: failures are logged and swallowed
pub fn run_advisory(ctx: &RunContext, program: &str, args: &[&str]) -> bool {
    match ctx.host.run(program, args) {
        Ok(output) if output.success => true,
        Ok(output) => {
            log::warn!(
                "{} failed: {}",
                command_line(program, args),
                output.diagnostics()
            );
            false
        }
        Err(e) => {
            log::warn!("{}", io_message(program, &e));
            false
        }
    }
}

pub fn io_message(program: &str, err: &io::Error) -> String {
    if err.kind() == io::ErrorKind::NotFound {
        format!("required executable `{}` not found", program)
    } else {
        format!("could not run `{}`: {}", program, err)
    }
}

fn command_line(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Read a file that may legitimately be absent
pub fn read_optional(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Replace `path` with `content` through a temporary sibling and rename
pub fn write_atomic(path: &Path, content: &str, mode: u32) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.stackup-tmp", file_name));

    {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(&tmp)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
    }
    fs::set_permissions(&tmp, fs::Permissions::from_mode(mode))?;
    fs::rename(&tmp, path)
}

/// Octal permission bits of an existing path, e.g. `"640"`
pub fn mode_string(path: &Path) -> io::Result<String> {
    let mode = fs::metadata(path)?.permissions().mode() & 0o7777;
    Ok(format!("{:o}", mode))
}
