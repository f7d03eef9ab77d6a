use crate::entities::projects;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema, Statement};
use std::env;
use std::time::Duration;
use tracing::info;

pub async fn setup_database() -> anyhow::Result<DatabaseConnection> {
    let db_url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://terrainflow.db?mode=rwc".to_string());

    info!("📂 Database: {}", db_url);

    let mut opt = ConnectOptions::new(&db_url);
    opt.max_connections(20)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let db = Database::connect(opt).await?;

    info!("✅ Database connected successfully");

    run_migrations(&db).await?;

    Ok(db)
}

/// Creates the catalog table and its `(owner_id, artifact_key)` unique index.
pub async fn run_migrations(db: &DatabaseConnection) -> anyhow::Result<()> {
    info!("🔄 Running SeaORM auto-migrations...");
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let stmt = schema
        .create_table_from_entity(projects::Entity)
        .if_not_exists()
        .to_owned();
    db.execute(builder.build(&stmt)).await?;

    db.execute(Statement::from_string(
        builder,
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_projects_owner_artifact ON projects(owner_id, artifact_key);"
            .to_string(),
    ))
    .await?;

    db.execute(Statement::from_string(
        builder,
        "CREATE INDEX IF NOT EXISTS idx_projects_owner ON projects(owner_id);".to_string(),
    ))
    .await?;

    Ok(())
}
