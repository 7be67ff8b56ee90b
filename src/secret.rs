//! Secret collection and generation
//!
//! Operator secrets are read from the controlling terminal (`/dev/tty`)
//! rather than stdin, so prompts keep working under `sudo` or when stdin
//! is piped. Input is read with echo turned off and kept verbatim; nothing
//! interprets `!` or any other character.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read};

use console::Term;
use thiserror::Error;

/// A value that must never reach a log line
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw value. Call sites are the only places a secret leaves memory.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(********)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("********")
    }
}

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("no terminal available to prompt for a secret")]
    NoTerminal,

    #[error("terminal I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("input closed while reading {label}")]
    Eof { label: String },
}

/// Source of hidden operator input
pub trait SecretInput {
    /// Show `prompt` and read one line without echo. `None` on end of input.
    fn read_hidden(&mut self, prompt: &str) -> io::Result<Option<String>>;

    /// Tell the operator something (retry hints)
    fn notice(&mut self, message: &str);
}

pub struct SecretCollector<I> {
    input: I,
}

impl<I: SecretInput> SecretCollector<I> {
    pub fn new(input: I) -> Self {
        Self { input }
    }

    /// Read one secret
    pub fn collect(&mut self, label: &str) -> Result<Secret, SecretError> {
        self.input
            .read_hidden(&format!("{}: ", label))?
            .map(Secret::new)
            .ok_or_else(|| SecretError::Eof {
                label: label.to_string(),
            })
    }

    /// Read a secret twice until both entries are non-empty and identical.
    /// There is no attempt limit.
    pub fn collect_confirmed(&mut self, label: &str) -> Result<Secret, SecretError> {
        loop {
            let first = self.collect(label)?;
            if first.is_empty() {
                self.input.notice(&format!("{} must not be empty, try again", label));
                continue;
            }

            let second = self.collect(&format!("Confirm {}", label))?;
            if first.expose().as_bytes() != second.expose().as_bytes() {
                self.input.notice("Entries do not match, try again");
                continue;
            }
            return Ok(first);
        }
    }
}

// ============================================================================
// Terminal input
// ============================================================================

/// Hidden input from the controlling terminal
pub struct TerminalInput {
    term: Term,
}

impl TerminalInput {
    /// Prefer `/dev/tty`; fall back to stderr when it is a terminal
    pub fn open() -> Result<Self, SecretError> {
        let term = match OpenOptions::new().read(true).write(true).open("/dev/tty") {
            Ok(tty) => Term::read_write_pair(tty.try_clone()?, tty),
            Err(e) => {
                log::debug!("Cannot open /dev/tty: {}", e);
                Term::stderr()
            }
        };
        if !term.is_term() {
            return Err(SecretError::NoTerminal);
        }
        Ok(Self { term })
    }
}

impl SecretInput for TerminalInput {
    /// `console` reads the controlling terminal with echo off, even when
    /// stdin is redirected
    fn read_hidden(&mut self, prompt: &str) -> io::Result<Option<String>> {
        self.term.write_str(prompt)?;
        self.term.read_secure_line().map(Some)
    }

    fn notice(&mut self, message: &str) {
        let _ = self.term.write_line(message);
    }
}

// ============================================================================
// Generation
// ============================================================================

const KEY_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789_-";

/// Length of the generated application secret key
pub const SECRET_KEY_LEN: usize = 50;

/// Generate the application secret key from the OS random device
pub fn generate_secret_key() -> io::Result<Secret> {
    let urandom = File::open("/dev/urandom")?;
    generate_secret_key_from(urandom, SECRET_KEY_LEN)
}

/// Rejection sampling keeps every character equally likely
pub fn generate_secret_key_from(mut source: impl Read, len: usize) -> io::Result<Secret> {
    let n = KEY_CHARSET.len();
    let limit = 256 - (256 % n);
    let mut key = String::with_capacity(len);
    let mut buf = [0u8; 64];

    while key.len() < len {
        let read = source.read(&mut buf)?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "random source exhausted",
            ));
        }
        for &b in &buf[..read] {
            if usize::from(b) < limit && key.len() < len {
                key.push(char::from(KEY_CHARSET[usize::from(b) % n]));
            }
        }
    }
    Ok(Secret(key))
}
