//! Database roles and databases (PostgreSQL or MySQL)
//!
//! Catalog queries go through argv. Anything carrying a password is fed
//! to the client on stdin and redacted from diagnostics.

use declarative::{
    CommandOutput, ConvergeError, ProbeResult, Resource, ResourceKind, ResourceSpec, RunContext,
};

use super::io_message;
use crate::config::DatabaseEngine;
use crate::secret::Secret;

/// Mark set once a role's password has been written in this run
fn password_mark(role: &str) -> String {
    format!("db-password-set:{}", role)
}

/// Local administrative access to the database server
#[derive(Debug, Clone, Copy)]
pub struct DbClient {
    pub engine: DatabaseEngine,
}

impl DbClient {
    pub fn new(engine: DatabaseEngine) -> Self {
        Self { engine }
    }

    fn program(self) -> &'static str {
        match self.engine {
            DatabaseEngine::Postgres => "psql",
            DatabaseEngine::Mysql => "mysql",
        }
    }

    /// Run one statement and capture its tuples
    pub fn query(self, ctx: &RunContext, sql: &str) -> std::io::Result<CommandOutput> {
        match self.engine {
            DatabaseEngine::Postgres => ctx
                .host
                .run("runuser", &["-u", "postgres", "--", "psql", "-X", "-tAc", sql]),
            DatabaseEngine::Mysql => ctx
                .host
                .run("mysql", &["--batch", "--skip-column-names", "-e", sql]),
        }
    }

    /// Run a script from stdin, stopping at the first error
    pub fn execute_script(self, ctx: &RunContext, sql: &str) -> std::io::Result<CommandOutput> {
        match self.engine {
            DatabaseEngine::Postgres => ctx.host.run_with_input(
                "runuser",
                &["-u", "postgres", "--", "psql", "-X", "-q", "-v", "ON_ERROR_STOP=1"],
                sql.as_bytes(),
            ),
            DatabaseEngine::Mysql => ctx.host.run_with_input("mysql", &["--batch"], sql.as_bytes()),
        }
    }

    /// Whether a catalog query returned a row
    fn exists(self, ctx: &RunContext, key: &str, sql: &str) -> Result<bool, ConvergeError> {
        let output = self
            .query(ctx, sql)
            .map_err(|e| ConvergeError::probe(key, io_message(self.program(), &e)))?;
        if !output.success {
            return Err(ConvergeError::probe(
                key,
                format!("{} query failed: {}", self.program(), output.diagnostics()),
            ));
        }
        Ok(output.stdout_str().trim() == "1")
    }

    fn role_exists(self, ctx: &RunContext, role: &str) -> Result<bool, ConvergeError> {
        let sql = match self.engine {
            DatabaseEngine::Postgres => {
                format!("SELECT 1 FROM pg_roles WHERE rolname = {}", self.literal(role))
            }
            DatabaseEngine::Mysql => {
                format!("SELECT 1 FROM mysql.user WHERE user = {} LIMIT 1", self.literal(role))
            }
        };
        self.exists(ctx, role, &sql)
    }

    fn database_exists(self, ctx: &RunContext, name: &str) -> Result<bool, ConvergeError> {
        let sql = match self.engine {
            DatabaseEngine::Postgres => {
                format!("SELECT 1 FROM pg_database WHERE datname = {}", self.literal(name))
            }
            DatabaseEngine::Mysql => format!(
                "SELECT 1 FROM information_schema.schemata WHERE schema_name = {}",
                self.literal(name)
            ),
        };
        self.exists(ctx, name, &sql)
    }

    /// Quoted string literal
    pub fn literal(self, value: &str) -> String {
        match self.engine {
            DatabaseEngine::Postgres => format!("'{}'", value.replace('\'', "''")),
            DatabaseEngine::Mysql => {
                format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
            }
        }
    }

    /// Quoted identifier
    pub fn ident(self, name: &str) -> String {
        match self.engine {
            DatabaseEngine::Postgres => format!("\"{}\"", name.replace('"', "\"\"")),
            DatabaseEngine::Mysql => format!("`{}`", name.replace('`', "``")),
        }
    }

    fn account(self, role: &str) -> String {
        format!("{}@'localhost'", self.literal(role))
    }
}

// ============================================================================
// DatabaseRole
// ============================================================================

/// Login role for the application. Existing roles are left alone unless
/// password rotation was requested.
#[derive(Debug)]
pub struct DatabaseRole {
    spec: ResourceSpec,
    client: DbClient,
    password: Secret,
    rotate_password: bool,
}

impl DatabaseRole {
    pub fn new(
        engine: DatabaseEngine,
        role: &str,
        password: Secret,
        rotate_password: bool,
    ) -> Self {
        Self {
            spec: ResourceSpec::new(ResourceKind::DatabaseRole, role)
                .with_attr("engine", engine.to_string()),
            client: DbClient::new(engine),
            password,
            rotate_password,
        }
    }

    fn role(&self) -> &str {
        &self.spec.identity_key
    }

    fn create_sql(&self) -> String {
        let c = self.client;
        let role = self.role();
        let password = c.literal(self.password.expose());
        match c.engine {
            DatabaseEngine::Postgres => format!(
                "CREATE ROLE {ident} LOGIN PASSWORD {password};\n{settings}",
                ident = c.ident(role),
                settings = self.settings_sql(),
            ),
            DatabaseEngine::Mysql => format!(
                "CREATE USER IF NOT EXISTS {account} IDENTIFIED BY {password};\n\
                 ALTER USER {account} IDENTIFIED BY {password};\n",
                account = c.account(role),
            ),
        }
    }

    fn alter_sql(&self) -> String {
        let c = self.client;
        let password = c.literal(self.password.expose());
        match c.engine {
            DatabaseEngine::Postgres => format!(
                "ALTER ROLE {} WITH LOGIN PASSWORD {};\n{}",
                c.ident(self.role()),
                password,
                self.settings_sql()
            ),
            DatabaseEngine::Mysql => format!(
                "ALTER USER {} IDENTIFIED BY {};\n",
                c.account(self.role()),
                password
            ),
        }
    }

    /// Session defaults Django expects
    fn settings_sql(&self) -> String {
        let ident = self.client.ident(self.role());
        format!(
            "ALTER ROLE {ident} SET client_encoding TO 'utf8';\n\
             ALTER ROLE {ident} SET default_transaction_isolation TO 'read committed';\n\
             ALTER ROLE {ident} SET timezone TO 'UTC';\n"
        )
    }

    fn run_script(&self, ctx: &RunContext, sql: &str) -> Result<CommandOutput, ConvergeError> {
        self.client
            .execute_script(ctx, sql)
            .map_err(|e| ConvergeError::apply(self.role(), io_message(self.client.program(), &e)))
    }

    fn redact(&self, text: &str) -> String {
        let password = self.password.expose();
        if password.is_empty() {
            text.to_string()
        } else {
            text.replace(password, "********")
        }
    }
}

impl Resource for DatabaseRole {
    fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    fn description(&self) -> String {
        format!("{} role {}", self.client.engine, self.role())
    }

    fn probe(&self, ctx: &RunContext) -> Result<ProbeResult, ConvergeError> {
        if !self.client.role_exists(ctx, self.role())? {
            return Ok(ProbeResult::absent());
        }
        let probe = ProbeResult::present();
        if self.rotate_password && !ctx.is_marked(&password_mark(self.role())) {
            return Ok(probe.with_drift("password"));
        }
        Ok(probe)
    }

    fn apply(&self, ctx: &mut RunContext, current: &ProbeResult) -> Result<(), ConvergeError> {
        let output = if current.exists {
            self.run_script(ctx, &self.alter_sql())?
        } else {
            let created = self.run_script(ctx, &self.create_sql())?;
            if !created.success && self.client.role_exists(ctx, self.role()).unwrap_or(false) {
                // Probe was inconclusive and the role is already there
                self.run_script(ctx, &self.alter_sql())?
            } else {
                created
            }
        };

        if !output.success {
            return Err(
                ConvergeError::apply(self.role(), "could not create or update role")
                    .with_diagnostics(self.redact(&output.diagnostics())),
            );
        }
        ctx.mark(password_mark(self.role()));
        Ok(())
    }

    fn preview(&self, current: &ProbeResult) -> Option<String> {
        Some(if current.exists {
            format!("set new password for role {}", self.role())
        } else {
            format!("create role {} with login", self.role())
        })
    }
}

// ============================================================================
// Database
// ============================================================================

#[derive(Debug)]
pub struct Database {
    spec: ResourceSpec,
    client: DbClient,
    owner: String,
}

impl Database {
    pub fn new(engine: DatabaseEngine, name: &str, owner: &str) -> Self {
        Self {
            spec: ResourceSpec::new(ResourceKind::Database, name)
                .with_attr("engine", engine.to_string())
                .with_attr("owner", owner),
            client: DbClient::new(engine),
            owner: owner.to_string(),
        }
    }

    fn name(&self) -> &str {
        &self.spec.identity_key
    }

    fn statements(&self) -> Vec<String> {
        let c = self.client;
        let db = c.ident(self.name());
        match c.engine {
            DatabaseEngine::Postgres => {
                let owner = c.ident(&self.owner);
                vec![
                    format!(
                        "CREATE DATABASE {db} OWNER {owner} ENCODING 'UTF8' TEMPLATE template0"
                    ),
                    format!("GRANT ALL PRIVILEGES ON DATABASE {db} TO {owner}"),
                ]
            }
            DatabaseEngine::Mysql => vec![
                format!(
                    "CREATE DATABASE IF NOT EXISTS {db} \
                     CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci"
                ),
                format!("GRANT ALL PRIVILEGES ON {db}.* TO {}", c.account(&self.owner)),
                "FLUSH PRIVILEGES".to_string(),
            ],
        }
    }
}

impl Resource for Database {
    fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    fn description(&self) -> String {
        format!("{} database {} owned by {}", self.client.engine, self.name(), self.owner)
    }

    fn probe(&self, ctx: &RunContext) -> Result<ProbeResult, ConvergeError> {
        Ok(if self.client.database_exists(ctx, self.name())? {
            ProbeResult::present().with_observed("owner", &self.owner)
        } else {
            ProbeResult::absent()
        })
    }

    fn apply(&self, ctx: &mut RunContext, _current: &ProbeResult) -> Result<(), ConvergeError> {
        // CREATE DATABASE has no IF NOT EXISTS in PostgreSQL
        if self.client.database_exists(ctx, self.name()).unwrap_or(false) {
            log::info!("database {} already exists", self.name());
            return Ok(());
        }

        for sql in self.statements() {
            let output = self.client.query(ctx, &sql).map_err(|e| {
                ConvergeError::apply(self.name(), io_message(self.client.program(), &e))
            })?;
            if !output.success {
                return Err(ConvergeError::apply(self.name(), format!("`{}` failed", sql))
                    .with_diagnostics(output.diagnostics()));
            }
        }
        Ok(())
    }

    fn preview(&self, _current: &ProbeResult) -> Option<String> {
        Some(self.statements().join(";\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHost;
    use declarative::{Action, NoProgress, Plan, install};

    fn plan(engine: DatabaseEngine, password: &str, rotate: bool) -> Plan {
        Plan::new()
            .with(Box::new(Database::new(engine, "demo", "demo")))
            .with(Box::new(DatabaseRole::new(
                engine,
                "demo",
                Secret::new(password),
                rotate,
            )))
    }

    #[test]
    fn role_precedes_database() {
        assert_eq!(
            plan(DatabaseEngine::Postgres, "pw", false).kinds(),
            vec![ResourceKind::DatabaseRole, ResourceKind::Database]
        );
    }

    #[test]
    fn password_travels_on_stdin_only() {
        let host = FakeHost::new();
        let mut ctx = RunContext::new(&host);
        let report = install(
            &plan(DatabaseEngine::Postgres, "s3cr'et!", false),
            &mut ctx,
            &mut NoProgress,
        );

        assert!(report.is_success());
        assert!(host.calls().iter().all(|c| !c.contains("s3cr")));
        let inputs = host.state().inputs.clone();
        assert_eq!(inputs.len(), 1);
        assert!(inputs[0].contains("CREATE ROLE \"demo\" LOGIN PASSWORD 's3cr''et!';"));
        assert!(inputs[0].contains("SET timezone TO 'UTC'"));
        assert!(host.state().databases.contains("demo"));
    }

    #[test]
    fn existing_role_is_sufficient() {
        let host = FakeHost::new();
        host.update(|s| {
            s.roles.insert("demo".to_string());
            s.databases.insert("demo".to_string());
        });
        let mut ctx = RunContext::new(&host);
        let report = install(
            &plan(DatabaseEngine::Postgres, "pw", false),
            &mut ctx,
            &mut NoProgress,
        );

        assert_eq!(report.action_of("demo"), Some(Action::Skipped));
        assert!(report.records.iter().all(|r| r.action == Action::Skipped));
        assert!(host.state().inputs.is_empty());
    }

    #[test]
    fn rotation_updates_existing_role_once() {
        let host = FakeHost::new();
        host.update(|s| {
            s.roles.insert("demo".to_string());
            s.databases.insert("demo".to_string());
        });
        let mut ctx = RunContext::new(&host);
        let report = install(
            &plan(DatabaseEngine::Postgres, "new", true),
            &mut ctx,
            &mut NoProgress,
        );

        assert_eq!(report.records[0].action, Action::Updated);
        let inputs = host.state().inputs.clone();
        assert!(inputs[0].starts_with("ALTER ROLE \"demo\" WITH LOGIN PASSWORD 'new';"));
    }

    #[test]
    fn mysql_uses_if_not_exists() {
        let host = FakeHost::new();
        let mut ctx = RunContext::new(&host);
        let report = install(&plan(DatabaseEngine::Mysql, "pw", false), &mut ctx, &mut NoProgress);

        assert!(report.is_success());
        assert!(host.state().inputs[0].starts_with("CREATE USER IF NOT EXISTS 'demo'@'localhost'"));
        assert!(host.called(
            "mysql --batch --skip-column-names -e CREATE DATABASE IF NOT EXISTS `demo`"
        ));
    }

    #[test]
    fn failure_diagnostics_are_redacted() {
        let host = FakeHost::new();
        host.fail("psql", "ERROR: syntax error at or near \"hunter2\"");
        let mut ctx = RunContext::new(&host);
        let role =
            DatabaseRole::new(DatabaseEngine::Postgres, "demo", Secret::new("hunter2"), false);

        let err = role.apply(&mut ctx, &ProbeResult::present()).unwrap_err();
        let diagnostics = err.diagnostics().unwrap();
        assert!(!diagnostics.contains("hunter2"));
        assert!(diagnostics.contains("********"));
    }

    #[test]
    fn identifiers_and_literals_are_escaped() {
        let pg = DbClient::new(DatabaseEngine::Postgres);
        assert_eq!(pg.literal("it's"), "'it''s'");
        assert_eq!(pg.ident("a\"b"), "\"a\"\"b\"");
        let my = DbClient::new(DatabaseEngine::Mysql);
        assert_eq!(my.literal("a\\'b"), "'a\\\\''b'");
        assert_eq!(my.ident("db"), "`db`");
    }
}
