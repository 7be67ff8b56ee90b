//! Desired-state description of the application stack
//!
//! Loaded from `stackup.toml`, then adjusted by CLI overrides. Every
//! interactive choice of the old installers (database engine, proxy mode)
//! is a tagged variant here, resolved once before planning.

use anyhow::{Context, Result};
use declarative::{ConvergeError, Operation};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::cli::OverrideArgs;
use crate::paths;

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]{0,63}$").expect("valid regex"));

static DB_IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("valid regex"));

static BIND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9.\-\[\]:]+:[0-9]{1,5}$").expect("valid regex"));

// ============================================================================
// Main Config Schema
// ============================================================================

/// The full desired state of one application stack on this host
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub app: AppConfig,
    pub enforcer: EnforcerConfig,
    pub database: DatabaseConfig,
    pub proxy: ReverseProxy,
    pub env: EnvConfig,
    pub packages: PackagesConfig,
    pub host: HostConfig,
}

impl StackConfig {
    /// Load from the first config file found, or defaults
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let Some(path) = paths::find_config(explicit) else {
            return Ok((Self::default(), None));
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Could not read config file: {}", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok((config, Some(path)))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid TOML format in stackup config")
    }

    /// Apply CLI overrides on top of the file
    pub fn apply_overrides(&mut self, o: &OverrideArgs) {
        if let Some(name) = &o.app_name {
            self.app.name.clone_from(name);
        }
        if let Some(user) = &o.user {
            self.app.user = Some(user.clone());
        }
        if let Some(dir) = &o.base_dir {
            self.app.base_dir = Some(dir.clone());
        }
        if let Some(bind) = &o.bind {
            self.app.bind.clone_from(bind);
        }
        if let Some(url) = &o.repo_url {
            self.app.repo_url.clone_from(url);
        }
        if let Some(branch) = &o.branch {
            self.app.branch.clone_from(branch);
        }
        if let Some(name) = &o.web_service {
            self.app.web_service = Some(name.clone());
        }
        if let Some(name) = &o.enforcer_service {
            self.enforcer.service = Some(name.clone());
        }
        if let Some(engine) = o.db_engine {
            self.database.engine = engine;
        }
        if let ReverseProxy::DirectSite(site) = &mut self.proxy {
            if let Some(port) = o.listen_port {
                site.listen_port = port;
            }
            if let Some(server_name) = &o.server_name {
                site.server_name.clone_from(server_name);
            }
        }
    }

    /// Check what `operation` needs before any mutation happens. Only
    /// `install` deploys, so only it needs a repository.
    pub fn validate_for(&self, operation: Operation) -> Result<(), ConvergeError> {
        self.validate()?;
        if operation != Operation::Install {
            return Ok(());
        }
        if self.app.repo_url.trim().is_empty() {
            return Err(ConvergeError::validation(
                "app.repo_url is empty; set it in stackup.toml or pass --repo-url",
            ));
        }
        if self.app.branch.trim().is_empty() {
            return Err(ConvergeError::validation("app.branch is empty"));
        }
        Ok(())
    }

    /// Names, bind address and paths every operation relies on
    pub fn validate(&self) -> Result<(), ConvergeError> {
        check_identifier("app.name", &self.app.name)?;
        check_identifier("app.user", &self.user())?;
        check_identifier("app.group", &self.app.group)?;
        check_identifier("service name", &self.web_service())?;
        if self.enforcer.enabled {
            check_identifier("service name", &self.enforcer_service())?;
        }
        check_db_identifier("database.name", &self.database_name())?;
        check_db_identifier("database.user", &self.database_user())?;

        if !BIND_RE.is_match(&self.app.bind) {
            return Err(ConvergeError::validation(format!(
                "app.bind must be host:port, got '{}'",
                self.app.bind
            )));
        }
        if self.app.workers == 0 {
            return Err(ConvergeError::validation("app.workers must be at least 1"));
        }
        if !self.base_dir().is_absolute() {
            return Err(ConvergeError::validation(format!(
                "app.base_dir must be absolute, got '{}'",
                self.base_dir().display()
            )));
        }
        if let ReverseProxy::DirectSite(site) = &self.proxy {
            check_identifier("proxy.name", &self.site_name())?;
            if site.listen_port == 0 {
                return Err(ConvergeError::validation("proxy.listen_port must not be 0"));
            }
            if site.server_name.trim().is_empty() {
                return Err(ConvergeError::validation(
                    "proxy.server_name is empty (use \"_\" for any host)",
                ));
            }
        }
        for (key, value) in &self.env.extra {
            if key.is_empty() || key.contains('=') || key.contains(char::is_whitespace) {
                return Err(ConvergeError::validation(format!(
                    "env.extra key '{}' is not a valid variable name",
                    key
                )));
            }
            if value.contains('\n') {
                return Err(ConvergeError::validation(format!(
                    "env.extra value for '{}' spans several lines",
                    key
                )));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Derived values
    // ------------------------------------------------------------------------

    /// Run-as identity, defaults to the app name
    pub fn user(&self) -> String {
        self.app.user.clone().unwrap_or_else(|| self.app.name.clone())
    }

    pub fn base_dir(&self) -> PathBuf {
        match &self.app.base_dir {
            Some(dir) => paths::expand(dir),
            None => Path::new("/srv").join(&self.app.name),
        }
    }

    /// Source tree checkout
    pub fn app_dir(&self) -> PathBuf {
        self.base_dir().join("app")
    }

    pub fn venv_dir(&self) -> PathBuf {
        self.base_dir().join("venv")
    }

    pub fn static_dir(&self) -> PathBuf {
        self.base_dir().join("static")
    }

    pub fn media_dir(&self) -> PathBuf {
        self.base_dir().join("media")
    }

    pub fn env_file(&self) -> PathBuf {
        self.base_dir().join(".env")
    }

    pub fn web_service(&self) -> String {
        self.app
            .web_service
            .clone()
            .unwrap_or_else(|| format!("{}_gunicorn", self.app.name))
    }

    pub fn enforcer_service(&self) -> String {
        self.enforcer
            .service
            .clone()
            .unwrap_or_else(|| format!("{}_enforcer", self.app.name))
    }

    /// Every service unit this config manages
    pub fn services(&self) -> Vec<String> {
        let mut services = vec![self.web_service()];
        if self.enforcer.enabled {
            services.push(self.enforcer_service());
        }
        services
    }

    pub fn site_name(&self) -> String {
        match &self.proxy {
            ReverseProxy::DirectSite(site) => {
                site.name.clone().unwrap_or_else(|| self.app.name.clone())
            }
            _ => self.app.name.clone(),
        }
    }

    pub fn database_name(&self) -> String {
        self.database.name.clone().unwrap_or_else(|| self.app.name.clone())
    }

    pub fn database_user(&self) -> String {
        self.database.user.clone().unwrap_or_else(|| self.app.name.clone())
    }

    pub fn database_port(&self) -> u16 {
        self.database
            .port
            .unwrap_or_else(|| self.database.engine.default_port())
    }

    pub fn wsgi_module(&self) -> String {
        self.app
            .wsgi_module
            .clone()
            .unwrap_or_else(|| format!("{}.wsgi:application", self.app.name))
    }

    /// Replace `{app_dir}`, `{venv}`, `{base_dir}` and `{python}` in a template
    pub fn expand_placeholders(&self, template: &str) -> String {
        template
            .replace("{app_dir}", &self.app_dir().to_string_lossy())
            .replace("{venv}", &self.venv_dir().to_string_lossy())
            .replace("{base_dir}", &self.base_dir().to_string_lossy())
            .replace("{python}", &self.app.python)
    }

    /// Packages required by the chosen variants plus extras, deduplicated
    pub fn packages(&self) -> Vec<String> {
        let mut packages: Vec<String> = ["git", "python3", "python3-venv", "python3-pip"]
            .iter()
            .map(ToString::to_string)
            .collect();
        packages.extend(self.database.engine.packages().iter().map(ToString::to_string));
        if matches!(self.proxy, ReverseProxy::DirectSite(_)) {
            packages.push("nginx".to_string());
        }
        packages.extend(self.packages.extra.iter().cloned());

        let mut seen = std::collections::HashSet::new();
        packages.retain(|p| seen.insert(p.clone()));
        packages
    }
}

fn check_identifier(field: &str, value: &str) -> Result<(), ConvergeError> {
    if IDENTIFIER_RE.is_match(value) {
        Ok(())
    } else {
        Err(ConvergeError::validation(format!(
            "{} '{}' must start with a letter or '_' and contain only letters, digits, '_' or '-'",
            field, value
        )))
    }
}

fn check_db_identifier(field: &str, value: &str) -> Result<(), ConvergeError> {
    if DB_IDENTIFIER_RE.is_match(value) {
        Ok(())
    } else {
        Err(ConvergeError::validation(format!(
            "{} '{}' must start with a letter or '_' and contain only letters, digits or '_'",
            field, value
        )))
    }
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application name, the default for most other identifiers
    pub name: String,
    /// Run-as user (defaults to `name`)
    pub user: Option<String>,
    pub group: String,
    /// Defaults to `/srv/<name>`
    pub base_dir: Option<String>,
    pub repo_url: String,
    pub branch: String,
    /// host:port the web service binds to
    pub bind: String,
    pub workers: u32,
    /// Defaults to `<name>.wsgi:application`
    pub wsgi_module: Option<String>,
    pub python: String,
    /// Web service unit name (defaults to `<name>_gunicorn`)
    pub web_service: Option<String>,
    /// Commands run as the app user in the source tree after each checkout
    /// change. Placeholders: `{app_dir}`, `{venv}`, `{base_dir}`, `{python}`.
    pub deploy: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "ip_transcoder".to_string(),
            user: None,
            group: "www-data".to_string(),
            base_dir: None,
            repo_url: String::new(),
            branch: "main".to_string(),
            bind: "127.0.0.1:8000".to_string(),
            workers: 3,
            wsgi_module: None,
            python: "python3".to_string(),
            web_service: None,
            deploy: vec![
                "{python} -m venv {venv}".to_string(),
                "{venv}/bin/pip install --upgrade pip".to_string(),
                "{venv}/bin/pip install -r requirements.txt gunicorn".to_string(),
                "{venv}/bin/python manage.py migrate --noinput".to_string(),
                "{venv}/bin/python manage.py collectstatic --noinput".to_string(),
            ],
        }
    }
}

/// Background worker that has no network bind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnforcerConfig {
    pub enabled: bool,
    /// Unit name (defaults to `<name>_enforcer`)
    pub service: Option<String>,
    /// Command line, placeholders as in `app.deploy`
    pub command: String,
}

impl Default for EnforcerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service: None,
            command: "{venv}/bin/python manage.py transcoder_enforcer".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEngine {
    #[default]
    Postgres,
    Mysql,
}

impl DatabaseEngine {
    pub fn default_port(self) -> u16 {
        match self {
            Self::Postgres => 5432,
            Self::Mysql => 3306,
        }
    }

    /// Value for the env file's `DB_ENGINE`
    pub fn backend(self) -> &'static str {
        match self {
            Self::Postgres => "django.db.backends.postgresql",
            Self::Mysql => "django.db.backends.mysql",
        }
    }

    pub fn packages(self) -> &'static [&'static str] {
        match self {
            Self::Postgres => &["postgresql", "postgresql-contrib", "libpq-dev"],
            Self::Mysql => &["mysql-server", "default-libmysqlclient-dev", "pkg-config"],
        }
    }
}

impl std::fmt::Display for DatabaseEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Postgres => write!(f, "postgres"),
            Self::Mysql => write!(f, "mysql"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub engine: DatabaseEngine,
    /// Defaults to the app name
    pub name: Option<String>,
    /// Defaults to the app name
    pub user: Option<String>,
    pub host: String,
    /// Defaults to the engine's standard port
    pub port: Option<u16>,
    /// Environment variable consulted for the password before prompting
    pub password_env: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            engine: DatabaseEngine::default(),
            name: None,
            user: None,
            host: "localhost".to_string(),
            port: None,
            password_env: "STACKUP_DB_PASSWORD".to_string(),
        }
    }
}

/// How HTTP traffic reaches the web service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReverseProxy {
    /// No proxy: the web service is reached directly on its bind address
    None,
    /// A managed site file for the local nginx
    DirectSite(SiteConfig),
    /// An external gateway forwards to the bind address; nothing local
    ManagedGateway {
        #[serde(default)]
        public_url: Option<String>,
    },
}

impl Default for ReverseProxy {
    fn default() -> Self {
        Self::DirectSite(SiteConfig::default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Site file name (defaults to the app name)
    pub name: Option<String>,
    /// `_` matches any host
    pub server_name: String,
    pub listen_port: u16,
    pub client_max_body_size: String,
    /// Extra URL prefix -> directory aliases besides static and media
    pub aliases: BTreeMap<String, String>,
    /// Unlink the distribution's `default` site
    pub replace_default: bool,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            name: None,
            server_name: "_".to_string(),
            listen_port: 80,
            client_max_body_size: "100M".to_string(),
            aliases: BTreeMap::new(),
            replace_default: true,
        }
    }
}

/// Non-secret runtime settings written to the env file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    pub debug: bool,
    pub allowed_hosts: Vec<String>,
    pub csrf_trusted_origins: Vec<String>,
    pub extra: BTreeMap<String, String>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            debug: false,
            allowed_hosts: vec!["localhost".to_string(), "127.0.0.1".to_string()],
            csrf_trusted_origins: Vec::new(),
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackagesConfig {
    pub extra: Vec<String>,
}

impl Default for PackagesConfig {
    fn default() -> Self {
        Self {
            extra: vec!["ffmpeg".to_string()],
        }
    }
}

/// Where host collaborators keep their files
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub systemd_dir: String,
    pub nginx_dir: String,
    pub apt_lists_dir: String,
    /// Seconds to wait before checking that services are active
    pub health_wait_secs: u64,
    /// Package index younger than this is not refreshed
    pub index_max_age_secs: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            systemd_dir: "/etc/systemd/system".to_string(),
            nginx_dir: "/etc/nginx".to_string(),
            apt_lists_dir: "/var/lib/apt/lists".to_string(),
            health_wait_secs: 3,
            index_max_age_secs: 6 * 3600,
        }
    }
}

impl HostConfig {
    pub fn systemd_dir(&self) -> PathBuf {
        paths::expand(&self.systemd_dir)
    }

    pub fn nginx_dir(&self) -> PathBuf {
        paths::expand(&self.nginx_dir)
    }

    pub fn apt_lists_dir(&self) -> PathBuf {
        paths::expand(&self.apt_lists_dir)
    }
}
