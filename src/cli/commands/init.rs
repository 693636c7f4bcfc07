//! Initialize command.

use console::style;

use crate::cli::helpers::{db_context, storage};
use ocrvault::config::Settings;
use ocrvault::error::{AppError, ErrorKind};
use ocrvault::storage::BlobStorage;

/// Create the data directory, database schema and storage root.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&settings.data_dir)
        .await
        .map_err(|e| {
            AppError::wrap(ErrorKind::Configuration, "cannot create data directory", e)
                .with_context("data_dir", settings.data_dir.display().to_string())
        })?;

    // Validates remote settings before anything is written.
    let storage = storage(settings)?;

    let ctx = db_context(settings);
    ctx.init_schema()
        .await
        .map_err(|e| AppError::database("init schema", e))?;

    match &storage {
        BlobStorage::Local(local) => {
            tokio::fs::create_dir_all(local.root()).await.map_err(|e| {
                AppError::wrap(ErrorKind::Storage, "cannot create storage root", e)
                    .with_context("root", local.root().display().to_string())
            })?;
            println!(
                "  {} Local storage at {}",
                style("✓").green(),
                local.root().display()
            );
        }
        BlobStorage::S3(_) => {
            println!("  {} S3 storage configured", style("✓").green());
        }
    }

    println!(
        "{} Initialized ocrvault in {}",
        style("✓").green(),
        settings.data_dir.display()
    );
    Ok(())
}
