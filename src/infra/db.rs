use anyhow::{anyhow, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::migrate::Migrator;
use sqlx::PgPool;
use std::path::Path;
use std::time::Duration;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let database_url = config
            .database_url
            .as_deref()
            .ok_or_else(|| anyhow!("missing required env var: DATABASE_URL"))?;
        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .acquire_timeout(Duration::from_secs(config.db_connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.db_idle_timeout_seconds))
            .max_lifetime(Duration::from_secs(config.db_max_lifetime_seconds))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Apply pending migrations from `dir`. Applied versions and their
    /// checksums are tracked in `_sqlx_migrations`.
    pub async fn run_migrations(&self, dir: &Path) -> Result<usize> {
        let migrator = Migrator::new(dir)
            .await
            .map_err(|err| anyhow!("cannot load migrations from {}: {}", dir.display(), err))?;
        migrator.run(&self.pool).await?;

        let known = migrator.iter().count();
        tracing::info!(migrations = %dir.display(), known, "database schema up to date");
        Ok(known)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_directory_loads_into_migrator() {
        let dir = Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/migrations"));
        let migrator = Migrator::new(dir).await.unwrap();

        let versions: Vec<i64> = migrator.iter().map(|migration| migration.version).collect();
        assert_eq!(versions, vec![1]);
        assert_eq!(migrator.iter().next().unwrap().description, "stories");
    }
}
