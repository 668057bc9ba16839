use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr, Schema};
use tracing::info;

use crate::config::AppConfig;
use crate::entities;

/// Establishes a database connection pool from application configuration.
pub async fn establish_connection(cfg: &AppConfig) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(cfg.database_url.clone());
    options
        .max_connections(cfg.db_max_connections)
        .min_connections(cfg.db_min_connections)
        .connect_timeout(Duration::from_secs(cfg.db_connect_timeout_secs))
        .acquire_timeout(Duration::from_secs(cfg.db_acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(cfg.db_idle_timeout_secs))
        .sqlx_logging(false);

    let db = Database::connect(options).await?;
    info!("Database connection established");
    Ok(db)
}

/// Creates any missing tables from the entity definitions.
///
/// Schema statements are derived from the entities themselves, so the same
/// bootstrap works for Postgres in production and SQLite in tests.
pub async fn ensure_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    use sea_orm::ConnectionTrait;

    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let mut statements = vec![
        schema.create_table_from_entity(entities::product::Entity),
        schema.create_table_from_entity(entities::cart::Entity),
        schema.create_table_from_entity(entities::cart_item::Entity),
        schema.create_table_from_entity(entities::cart_discount::Entity),
        schema.create_table_from_entity(entities::discount_rule::Entity),
        schema.create_table_from_entity(entities::order::Entity),
        schema.create_table_from_entity(entities::order_item::Entity),
    ];

    for statement in &mut statements {
        statement.if_not_exists();
        db.execute(builder.build(&*statement)).await?;
    }

    info!("Database schema verified");
    Ok(())
}
