use async_trait::async_trait;
use std::error::Error;

/// A single schema migration step.
///
/// Migrations must be idempotent and safe to run more than once.
#[async_trait]
pub trait Migration: Send + Sync {
    /// The schema version this migration upgrades to.
    fn target_version(&self) -> u32;

    fn description(&self) -> &str;

    async fn apply(&self) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// Tracks the schema version of a store backend and applies migrations.
#[async_trait]
pub trait Migrator: Send + Sync {
    /// Current stored version, 0 on a fresh database.
    async fn get_current_version(&self) -> Result<u32, Box<dyn Error + Send + Sync>>;

    async fn set_version(&self, version: u32) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Available migrations, ordered by target version.
    fn get_migrations(&self) -> Vec<Box<dyn Migration>>;

    /// Apply every migration above the stored version, recording the
    /// version after each step.
    ///
    /// Fails if a migration fails or the stored version is newer than any
    /// known migration.
    async fn migrate_to_latest(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let current_version = self.get_current_version().await?;
        let migrations = self.get_migrations();

        if migrations.is_empty() {
            tracing::info!("No migrations available");
            return Ok(());
        }

        let latest_version = migrations
            .iter()
            .map(|m| m.target_version())
            .max()
            .unwrap_or(0);

        if current_version > latest_version {
            return Err(format!(
                "Stored schema version {} is higher than latest available version {}. \
                The download store was written by a newer release.",
                current_version, latest_version
            )
            .into());
        }

        if current_version == latest_version {
            tracing::debug!(version = current_version, "Download store schema is up to date");
            return Ok(());
        }

        tracing::info!(
            from = current_version,
            to = latest_version,
            "Migrating download store schema"
        );

        for migration in migrations {
            let target = migration.target_version();
            if target <= current_version {
                continue;
            }

            tracing::info!(target, description = migration.description(), "Applying migration");

            migration
                .apply()
                .await
                .map_err(|e| format!("Failed to apply migration to version {}: {}", target, e))?;

            self.set_version(target)
                .await
                .map_err(|e| format!("Failed to update schema version to {}: {}", target, e))?;
        }

        Ok(())
    }
}

pub mod store;
