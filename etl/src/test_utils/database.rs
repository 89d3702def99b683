use config::shared::{PgConnectionConfig, QualifiedName, SourceConfig, TlsConfig};
use sqlx::{Connection, Executor, PgConnection, PgPool};

/// The schema holding the capture procedure and staging table of test databases.
pub const TEST_DATABASE_SCHEMA: &str = "test";

/// Returns `name` qualified with the test schema.
pub fn test_object_name(name: &str) -> QualifiedName {
    QualifiedName {
        schema: Some(TEST_DATABASE_SCHEMA.to_string()),
        name: name.to_string(),
    }
}

/// Builds the connection of an isolated test database from the environment.
///
/// Configuration is read from:
/// - `TESTS_DATABASE_HOST`: Postgres server hostname
/// - `TESTS_DATABASE_PORT`: Postgres server port
/// - `TESTS_DATABASE_USERNAME`: database user
/// - `TESTS_DATABASE_PASSWORD`: database password (optional)
///
/// Returns `None` when the host is not set, so tests needing a server can be skipped.
fn local_pg_connection_config() -> Option<PgConnectionConfig> {
    let host = std::env::var("TESTS_DATABASE_HOST").ok()?;

    Some(PgConnectionConfig {
        host,
        port: std::env::var("TESTS_DATABASE_PORT")
            .expect("TESTS_DATABASE_PORT must be set")
            .parse()
            .expect("TESTS_DATABASE_PORT must be a valid port number"),
        // Unique name for test isolation.
        name: format!("cdc_tests_{:016x}", rand::random::<u64>()),
        username: std::env::var("TESTS_DATABASE_USERNAME")
            .expect("TESTS_DATABASE_USERNAME must be set"),
        password: std::env::var("TESTS_DATABASE_PASSWORD")
            .ok()
            .map(Into::into),
        tls: TlsConfig::disabled(),
    })
}

/// A freshly created Postgres database, with the test schema in place.
pub struct PgDatabase {
    pub config: PgConnectionConfig,
    pub pool: PgPool,
}

impl PgDatabase {
    /// Returns a source configuration reading from this database.
    pub fn source_config(&self, capture_procedure: &str, staging_table: &str) -> SourceConfig {
        SourceConfig {
            connection: self.config.clone(),
            capture_procedure: test_object_name(capture_procedure),
            staging_table: test_object_name(staging_table),
        }
    }

    /// Runs each statement in order, panicking on the first failure.
    pub async fn run_statements(&self, statements: &[&str]) {
        for statement in statements {
            self.pool
                .execute(*statement)
                .await
                .unwrap_or_else(|e| panic!("Failed to run `{statement}`: {e}"));
        }
    }

    /// Closes the pool and drops the database.
    pub async fn drop_database(self) {
        self.pool.close().await;
        drop_pg_database(&self.config).await;
    }
}

/// Creates a database with a unique name and the test schema.
///
/// Returns `None` when no test server is configured.
///
/// # Panics
///
/// Panics if the database or the test schema cannot be created.
pub async fn spawn_source_database() -> Option<PgDatabase> {
    let config = local_pg_connection_config()?;

    let mut connection = PgConnection::connect_with(&config.without_db(None))
        .await
        .expect("Failed to connect to Postgres");
    connection
        .execute(&*format!(r#"create database "{}";"#, config.name))
        .await
        .expect("Failed to create database");
    let _ = connection.close().await;

    let pool = PgPool::connect_with(config.with_db(None))
        .await
        .expect("Failed to connect to Postgres");
    pool.execute(&*format!("create schema {TEST_DATABASE_SCHEMA}"))
        .await
        .expect("Failed to create test schema");

    Some(PgDatabase { config, pool })
}

/// Terminates the connections to the database and drops it.
///
/// Errors are printed and otherwise ignored.
pub async fn drop_pg_database(config: &PgConnectionConfig) {
    let mut connection = match PgConnection::connect_with(&config.without_db(None)).await {
        Ok(connection) => connection,
        Err(e) => {
            eprintln!("warning: failed to connect to Postgres for cleanup: {e}");
            return;
        }
    };

    if let Err(e) = connection
        .execute(&*format!(
            r#"
            select pg_terminate_backend(pg_stat_activity.pid)
            from pg_stat_activity
            where pg_stat_activity.datname = '{}'
            and pid <> pg_backend_pid();"#,
            config.name
        ))
        .await
    {
        eprintln!(
            "warning: failed to terminate connections for database {}: {e}",
            config.name
        );
    }

    if let Err(e) = connection
        .execute(&*format!(r#"drop database if exists "{}";"#, config.name))
        .await
    {
        eprintln!("warning: failed to drop database {}: {e}", config.name);
    }
}
