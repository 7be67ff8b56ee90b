//! Simulated host for resource and plan tests
//!
//! [`FakeHost`] answers the commands stackup issues (dpkg-query, getent,
//! systemctl, psql, git, ...) from an in-memory model and records every
//! call. Directories and files still live on the real filesystem, inside
//! a tempdir owned by the test.

use std::cell::{Ref, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use declarative::{CommandOutput, HostExecutor};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostState {
    pub packages: BTreeSet<String>,
    pub groups: BTreeSet<String>,
    pub users: BTreeSet<String>,
    /// path -> (owner:group, octal mode)
    pub owners: BTreeMap<PathBuf, (String, String)>,
    pub enabled: BTreeSet<String>,
    pub active: BTreeSet<String>,
    /// Units that start but never reach active
    pub broken_units: BTreeSet<String>,
    pub roles: BTreeSet<String>,
    pub databases: BTreeSet<String>,
    pub remote_head: String,
    pub heads: BTreeMap<PathBuf, String>,
    pub missing: BTreeSet<String>,
    /// program -> stderr of a forced failure
    pub failures: BTreeMap<String, String>,
    pub calls: Vec<String>,
    pub inputs: Vec<String>,
    pub pauses: Vec<Duration>,
}

#[derive(Debug, Default)]
pub struct FakeHost {
    state: RefCell<HostState>,
}

impl FakeHost {
    pub fn new() -> Self {
        let host = Self::default();
        host.state.borrow_mut().remote_head = "a1b2c3".to_string();
        host
    }

    pub fn state(&self) -> Ref<'_, HostState> {
        self.state.borrow()
    }

    pub fn update(&self, f: impl FnOnce(&mut HostState)) {
        f(&mut self.state.borrow_mut());
    }

    /// Host objects only, without the call log
    pub fn snapshot(&self) -> HostState {
        let mut state = self.state.borrow().clone();
        state.calls.clear();
        state.inputs.clear();
        state.pauses.clear();
        state
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    pub fn called(&self, prefix: &str) -> bool {
        self.state.borrow().calls.iter().any(|c| c.starts_with(prefix))
    }

    pub fn remove_program(&self, program: &str) {
        self.state.borrow_mut().missing.insert(program.to_string());
    }

    pub fn fail(&self, program: &str, stderr: &str) {
        self.state
            .borrow_mut()
            .failures
            .insert(program.to_string(), stderr.to_string());
    }

    /// Undo [`Self::fail`]
    pub fn recover(&self, program: &str) {
        self.state.borrow_mut().failures.remove(program);
    }

    fn record(&self, program: &str, args: &[&str]) {
        let call = if args.is_empty() {
            program.to_string()
        } else {
            format!("{} {}", program, args.join(" "))
        };
        self.state.borrow_mut().calls.push(call);
    }

    fn dispatch(
        &self,
        program: &str,
        args: &[&str],
        input: Option<&str>,
    ) -> io::Result<CommandOutput> {
        {
            let state = self.state.borrow();
            if state.missing.contains(program) {
                return Err(io::Error::new(io::ErrorKind::NotFound, "No such file or directory"));
            }
            if let Some(stderr) = state.failures.get(program) {
                return Ok(CommandOutput::failed(stderr.clone()));
            }
        }

        let mut s = self.state.borrow_mut();
        let last = args.last().copied().unwrap_or_default().to_string();
        let out = match program {
            "env" => {
                let rest: Vec<&str> =
                    args.iter().copied().skip_while(|a| a.contains('=')).collect();
                drop(s);
                return match rest.split_first() {
                    Some((inner, inner_args)) => self.dispatch(inner, inner_args, input),
                    None => Ok(CommandOutput::ok("")),
                };
            }
            "runuser" => {
                let rest: Vec<&str> =
                    args.iter().copied().skip_while(|a| *a != "--").skip(1).collect();
                drop(s);
                return match rest.split_first() {
                    Some((inner, inner_args)) => self.dispatch(inner, inner_args, input),
                    None => Ok(CommandOutput::failed("runuser: no command")),
                };
            }
            "apt-get" => {
                if args.contains(&"install") {
                    s.packages.insert(last);
                }
                CommandOutput::ok("")
            }
            "dpkg-query" => {
                if s.packages.contains(&last) {
                    CommandOutput::ok("install ok installed|1.0-1")
                } else {
                    CommandOutput::failed(format!(
                        "dpkg-query: no packages found matching {}",
                        last
                    ))
                }
            }
            "getent" => {
                let set = if args.first() == Some(&"group") { &s.groups } else { &s.users };
                if set.contains(&last) {
                    CommandOutput::ok(format!("{}:x:999:", last))
                } else {
                    CommandOutput::failed("")
                }
            }
            "groupadd" => {
                if s.groups.insert(last.clone()) {
                    CommandOutput::ok("")
                } else {
                    CommandOutput::failed(format!("groupadd: group '{}' already exists", last))
                }
            }
            "useradd" => {
                if s.users.insert(last.clone()) {
                    CommandOutput::ok("")
                } else {
                    CommandOutput::failed(format!("useradd: user '{}' already exists", last))
                }
            }
            "stat" => {
                let path = PathBuf::from(&last);
                let (owner, mode) = match s.owners.get(&path) {
                    Some(entry) => entry.clone(),
                    None if path.exists() => ("root:root".to_string(), "755".to_string()),
                    None => {
                        return Ok(CommandOutput::failed(format!("stat: cannot stat '{}'", last)));
                    }
                };
                if flag(args, "-c") == Some("%U:%G") {
                    CommandOutput::ok(format!("{}\n", owner))
                } else {
                    CommandOutput::ok(format!("{}:{}\n", owner, mode))
                }
            }
            "install" => {
                let owner = flag(args, "-o").unwrap_or("root");
                let group = flag(args, "-g").unwrap_or("root");
                let mode = flag(args, "-m").unwrap_or("755");
                let path = PathBuf::from(&last);
                fs::create_dir_all(&path)?;
                s.owners
                    .insert(path, (format!("{}:{}", owner, group), mode.to_string()));
                CommandOutput::ok("")
            }
            "chown" => {
                let owner = args.first().copied().unwrap_or_default().to_string();
                let entry = s
                    .owners
                    .entry(PathBuf::from(&last))
                    .or_insert_with(|| (String::new(), "644".to_string()));
                entry.0 = owner;
                CommandOutput::ok("")
            }
            "systemctl" => systemctl(&mut s, args),
            "journalctl" => {
                CommandOutput::ok("Traceback (most recent call last):\nRuntimeError: boom\n")
            }
            "nginx" => CommandOutput {
                stdout: Vec::new(),
                stderr: b"nginx: configuration file test is successful".to_vec(),
                success: true,
            },
            "psql" => match input {
                Some(sql) => sql_script(&mut s, sql, "CREATE ROLE \"", '"'),
                None => sql_query(
                    &mut s,
                    args,
                    ("pg_roles", "pg_database"),
                    ("CREATE DATABASE \"", '"'),
                ),
            },
            "mysql" => match input {
                Some(sql) => sql_script(&mut s, sql, "CREATE USER IF NOT EXISTS '", '\''),
                None => sql_query(
                    &mut s,
                    args,
                    ("mysql.user", "schemata"),
                    ("CREATE DATABASE IF NOT EXISTS `", '`'),
                ),
            },
            "git" => git(&mut s, args)?,
            _ => CommandOutput::ok(""),
        };
        Ok(out)
    }
}

impl HostExecutor for FakeHost {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
        self.record(program, args);
        self.dispatch(program, args, None)
    }

    fn run_with_input(
        &self,
        program: &str,
        args: &[&str],
        input: &[u8],
    ) -> io::Result<CommandOutput> {
        self.record(program, args);
        let input = String::from_utf8_lossy(input).to_string();
        self.state.borrow_mut().inputs.push(input.clone());
        self.dispatch(program, args, Some(&input))
    }

    fn run_in(
        &self,
        _dir: &Path,
        _envs: &[(String, String)],
        program: &str,
        args: &[&str],
    ) -> io::Result<CommandOutput> {
        self.record(program, args);
        self.dispatch(program, args, None)
    }

    fn pause(&self, duration: Duration) {
        self.state.borrow_mut().pauses.push(duration);
    }
}

fn flag<'a>(args: &[&'a str], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| *a == name)
        .and_then(|i| args.get(i + 1))
        .copied()
}

/// Text between `start` and the next `end` character
fn quoted_after(text: &str, start: &str, end: char) -> Option<String> {
    let rest = &text[text.find(start)? + start.len()..];
    Some(rest[..rest.find(end)?].to_string())
}

fn systemctl(s: &mut HostState, args: &[&str]) -> CommandOutput {
    let verb = args.first().copied().unwrap_or_default();
    let unit = args.get(1).map(ToString::to_string).unwrap_or_default();
    match verb {
        "enable" => {
            s.enabled.insert(unit);
        }
        "disable" => {
            s.enabled.remove(&unit);
        }
        "start" | "restart" => {
            if !s.broken_units.contains(&unit) {
                s.active.insert(unit);
            }
        }
        "stop" => {
            s.active.remove(&unit);
        }
        "is-active" => {
            return if s.active.contains(&unit) {
                CommandOutput::ok("active\n")
            } else {
                let state = if s.broken_units.contains(&unit) { "failed\n" } else { "inactive\n" };
                CommandOutput {
                    stdout: state.as_bytes().to_vec(),
                    stderr: Vec::new(),
                    success: false,
                }
            };
        }
        "is-enabled" => {
            return if s.enabled.contains(&unit) {
                CommandOutput::ok("enabled\n")
            } else {
                CommandOutput {
                    stdout: b"disabled\n".to_vec(),
                    stderr: Vec::new(),
                    success: false,
                }
            };
        }
        _ => {}
    }
    CommandOutput::ok("")
}

fn sql_query(
    s: &mut HostState,
    args: &[&str],
    catalogs: (&str, &str),
    create: (&str, char),
) -> CommandOutput {
    let sql = args.last().copied().unwrap_or_default();
    let name = quoted_after(sql, "'", '\'').unwrap_or_default();
    if sql.contains(catalogs.0) {
        return CommandOutput::ok(if s.roles.contains(&name) { "1\n" } else { "" });
    }
    if sql.contains(catalogs.1) {
        return CommandOutput::ok(if s.databases.contains(&name) { "1\n" } else { "" });
    }
    if let Some(db) = quoted_after(sql, create.0, create.1) {
        if !s.databases.insert(db.clone()) && create.1 == '"' {
            return CommandOutput::failed(format!("ERROR:  database \"{}\" already exists", db));
        }
    }
    CommandOutput::ok("")
}

fn sql_script(s: &mut HostState, sql: &str, create: &str, quote: char) -> CommandOutput {
    if let Some(role) = quoted_after(sql, create, quote) {
        if !s.roles.insert(role.clone()) && quote == '"' {
            return CommandOutput::failed(format!("ERROR:  role \"{}\" already exists", role));
        }
    }
    CommandOutput::ok("")
}

fn git(s: &mut HostState, args: &[&str]) -> io::Result<CommandOutput> {
    let dir = flag(args, "-C").map(PathBuf::from);
    let out = if args.contains(&"rev-parse") {
        match dir.and_then(|d| s.heads.get(&d).cloned()) {
            Some(head) => CommandOutput::ok(format!("{}\n", head)),
            None => CommandOutput::failed("fatal: not a git repository"),
        }
    } else if args.contains(&"ls-remote") {
        CommandOutput::ok(format!("{}\trefs/heads/main\n", s.remote_head))
    } else if args.contains(&"clone") {
        let target = PathBuf::from(args.last().copied().unwrap_or_default());
        fs::create_dir_all(target.join(".git"))?;
        s.heads.insert(target, s.remote_head.clone());
        CommandOutput::ok("")
    } else if args.contains(&"pull") {
        if let Some(d) = dir {
            s.heads.insert(d, s.remote_head.clone());
        }
        CommandOutput::ok("")
    } else {
        CommandOutput::ok("")
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwraps_env_and_runuser() {
        let host = FakeHost::new();
        host.run("env", &["DEBIAN_FRONTEND=noninteractive", "apt-get", "install", "-y", "nginx"])
            .unwrap();
        assert!(host.state().packages.contains("nginx"));

        let query = "SELECT 1 FROM pg_roles WHERE rolname = 'app'";
        let out = host
            .run("runuser", &["-u", "postgres", "--", "psql", "-X", "-tAc", query])
            .unwrap();
        assert_eq!(out.stdout_str(), "");
    }

    #[test]
    fn forced_failure_and_missing_program() {
        let host = FakeHost::new();
        host.fail("nginx", "bad config");
        assert!(!host.run("nginx", &["-t"]).unwrap().success);
        host.remove_program("psql");
        assert!(host.run("psql", &[]).is_err());
    }
}
