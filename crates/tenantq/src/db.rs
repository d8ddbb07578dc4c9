use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::config::Config;

/// One pool serves the workers, the reaper and the API handlers, so its
/// size comes from `DB_MAX_CONNECTIONS` rather than a constant.
pub async fn make_pool(cfg: &Config) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_max_connections)
        .connect(&cfg.database_url)
        .await?;

    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
