use anyhow::Result;
use sqlx::PgPool;

/// Creates users, relationship_edges, matches, match_streaks and notifications
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let migrator = sqlx::migrate!("./migrations");
    tracing::info!("Checking {} schema migration(s)", migrator.iter().count());
    migrator.run(pool).await?;
    Ok(())
}
