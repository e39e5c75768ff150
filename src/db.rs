use crate::config::AppConfig;
use crate::entities::{order, order_line, payment_transaction, wallet_account};
use crate::errors::ServiceError;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema};
use std::time::Duration;
use tracing::info;

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Configuration for database connection
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

/// Establishes a connection pool to the database.
pub async fn establish_connection(config: &DbConfig) -> Result<DbPool, ServiceError> {
    let mut options = ConnectOptions::new(config.url.clone());
    options
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .idle_timeout(config.idle_timeout)
        .acquire_timeout(config.acquire_timeout)
        .sqlx_logging(false);

    let pool = Database::connect(options).await?;
    info!(url = %config.url, "database connection established");
    Ok(pool)
}

/// Connection pool sized from application configuration.
pub async fn establish_connection_from_app_config(
    cfg: &AppConfig,
) -> Result<DbPool, ServiceError> {
    let db_config = DbConfig {
        url: cfg.database_url.clone(),
        max_connections: cfg.db_max_connections,
        min_connections: cfg.db_min_connections,
        ..Default::default()
    };
    establish_connection(&db_config).await
}

/// Creates the checkout tables when missing. The schema is derived from the
/// entity definitions, so it works on both SQLite and Postgres backends.
pub async fn run_migrations(db: &DatabaseConnection) -> Result<(), ServiceError> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut statements = vec![
        schema.create_table_from_entity(order::Entity),
        schema.create_table_from_entity(order_line::Entity),
        schema.create_table_from_entity(payment_transaction::Entity),
        schema.create_table_from_entity(wallet_account::Entity),
    ];

    for stmt in &mut statements {
        stmt.if_not_exists();
        db.execute(backend.build(&*stmt)).await?;
    }

    info!("database schema up to date");
    Ok(())
}
