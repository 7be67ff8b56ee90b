//! Execution planner - builds resource plans from the stack config

use std::time::Duration;

use declarative::Plan;

use super::secrets::Secrets;
use crate::config::{ReverseProxy, StackConfig};
use crate::render::{self, ArtifactParams, EnvParams, SiteParams, UnitFlavor, UnitParams};
use crate::resource::{
    Database, DatabaseRole, Deployment, Directory, EnvFile, Package, PackageIndex, ProxySite,
    ServiceUnit, UserGroup,
};

/// Install-time switches that change desired state
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    pub rotate_db_password: bool,
    pub redeploy: bool,
}

/// Everything `install` converges, in dependency order
pub fn install_plan(config: &StackConfig, secrets: &Secrets, opts: InstallOptions) -> Plan {
    let user = config.user();
    let group = &config.app.group;
    let engine = config.database.engine;
    let db_user = config.database_user();

    let mut plan = Plan::new().with(Box::new(PackageIndex::new(
        config.host.apt_lists_dir(),
        Duration::from_secs(config.host.index_max_age_secs),
    )));
    for package in config.packages() {
        plan.push(Box::new(Package::new(&package)));
    }

    plan.push(Box::new(UserGroup::new(&user, group, config.base_dir())));
    plan.push(Box::new(Directory::new(config.base_dir(), &user, group, "755")));
    plan.push(Box::new(Directory::new(config.static_dir(), &user, group, "755")));
    plan.push(Box::new(Directory::new(config.media_dir(), &user, group, "775")));

    plan.push(Box::new(DatabaseRole::new(
        engine,
        &db_user,
        secrets.db_password.clone(),
        opts.rotate_db_password,
    )));
    plan.push(Box::new(Database::new(engine, &config.database_name(), &db_user)));

    plan.push(Box::new(
        EnvFile::new(config.env_file(), &user, group, env_params(config, secrets))
            .rotate_db_password(opts.rotate_db_password)
            .services(config.services()),
    ));

    let hooks = config
        .app
        .deploy
        .iter()
        .map(|hook| config.expand_placeholders(hook))
        .collect();
    plan.push(Box::new(
        Deployment::new(config.app_dir(), &config.app.repo_url, &config.app.branch, &user)
            .env_file(config.env_file())
            .hooks(hooks)
            .services(config.services())
            .redeploy(opts.redeploy),
    ));

    push_units(&mut plan, config);
    push_site(&mut plan, config);
    plan
}

/// Read-only view: packages, service units and the proxy site
pub fn status_plan(config: &StackConfig) -> Plan {
    let mut plan = Plan::new();
    for package in config.packages() {
        plan.push(Box::new(Package::new(&package)));
    }
    push_units(&mut plan, config);
    push_site(&mut plan, config);
    plan
}

/// Units and sites to take away. Empty selections mean everything this
/// config manages. Directories and data are never part of it.
pub fn remove_plan(config: &StackConfig, services: &[String], sites: &[String]) -> Plan {
    let unit_dir = config.host.systemd_dir();
    let nginx_dir = config.host.nginx_dir();

    let (services, sites) = if services.is_empty() && sites.is_empty() {
        let sites = match config.proxy {
            ReverseProxy::DirectSite(_) => vec![config.site_name()],
            _ => Vec::new(),
        };
        (config.services(), sites)
    } else {
        (services.to_vec(), sites.to_vec())
    };

    let mut plan = Plan::new();
    for name in &services {
        plan.push(Box::new(ServiceUnit::existing(name, &unit_dir)));
    }
    for name in &sites {
        plan.push(Box::new(ProxySite::existing(name, &nginx_dir)));
    }
    plan
}

fn push_units(plan: &mut Plan, config: &StackConfig) {
    let unit_dir = config.host.systemd_dir();
    let wait = Duration::from_secs(config.host.health_wait_secs);

    let web = render::render(&ArtifactParams::ServiceUnit(web_unit(config)));
    plan.push(Box::new(ServiceUnit::new(&config.web_service(), &unit_dir, web, wait)));

    if config.enforcer.enabled {
        let enforcer = render::render(&ArtifactParams::ServiceUnit(enforcer_unit(config)));
        plan.push(Box::new(ServiceUnit::new(
            &config.enforcer_service(),
            &unit_dir,
            enforcer,
            wait,
        )));
    }
}

fn push_site(plan: &mut Plan, config: &StackConfig) {
    if let ReverseProxy::DirectSite(site) = &config.proxy {
        let content = render::render(&ArtifactParams::ProxySite(site_params(config)));
        plan.push(Box::new(ProxySite::new(
            &config.site_name(),
            config.host.nginx_dir(),
            content,
            site.replace_default,
        )));
    }
}

fn base_unit(config: &StackConfig, description: String) -> UnitParams {
    UnitParams {
        description,
        user: config.user(),
        group: config.app.group.clone(),
        working_dir: config.app_dir(),
        env_file: Some(config.env_file()),
        environment: vec![("PYTHONUNBUFFERED".to_string(), "1".to_string())],
        ..UnitParams::default()
    }
}

pub fn web_unit(config: &StackConfig) -> UnitParams {
    let gunicorn = config.venv_dir().join("bin/gunicorn");
    UnitParams {
        exec_start: vec![
            gunicorn.to_string_lossy().to_string(),
            "--workers".to_string(),
            config.app.workers.to_string(),
            "--access-logfile".to_string(),
            "-".to_string(),
            config.wsgi_module(),
        ],
        flavor: UnitFlavor::Web {
            bind: config.app.bind.clone(),
        },
        ..base_unit(config, format!("{} web (gunicorn)", config.app.name))
    }
}

pub fn enforcer_unit(config: &StackConfig) -> UnitParams {
    UnitParams {
        exec_start: config
            .expand_placeholders(&config.enforcer.command)
            .split_whitespace()
            .map(ToString::to_string)
            .collect(),
        flavor: UnitFlavor::Enforcer,
        ..base_unit(config, format!("{} enforcer", config.app.name))
    }
}

pub fn site_params(config: &StackConfig) -> SiteParams {
    let (listen_port, server_name, client_max_body_size, extra) = match &config.proxy {
        ReverseProxy::DirectSite(site) => (
            site.listen_port,
            site.server_name.clone(),
            site.client_max_body_size.clone(),
            site.aliases.clone(),
        ),
        _ => (80, "_".to_string(), "100M".to_string(), Default::default()),
    };

    let mut aliases = vec![
        ("static".to_string(), config.static_dir()),
        ("media".to_string(), config.media_dir()),
    ];
    aliases.extend(
        extra
            .into_iter()
            .map(|(prefix, dir)| (prefix, crate::paths::expand(&dir))),
    );

    SiteParams {
        listen_port,
        server_name,
        client_max_body_size,
        aliases,
        upstream: config.app.bind.clone(),
    }
}

pub fn env_params(config: &StackConfig, secrets: &Secrets) -> EnvParams {
    EnvParams {
        debug: config.env.debug,
        allowed_hosts: config.env.allowed_hosts.clone(),
        csrf_trusted_origins: config.env.csrf_trusted_origins.clone(),
        secret_key: secrets.secret_key.clone(),
        db_engine: config.database.engine.backend().to_string(),
        db_name: config.database_name(),
        db_user: config.database_user(),
        db_password: secrets.db_password.clone(),
        db_host: config.database.host.clone(),
        db_port: config.database_port(),
        static_root: config.static_dir().to_string_lossy().to_string(),
        media_root: config.media_dir().to_string_lossy().to_string(),
        extra: config.env.extra.clone(),
    }
}
