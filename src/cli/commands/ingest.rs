//! Ingest command.

use std::path::PathBuf;

use console::style;

use crate::cli::helpers::{db_context, reporter, storage};
use ocrvault::config::Settings;
use ocrvault::correlation::CorrelationId;
use ocrvault::error::{AppError, ErrorKind};
use ocrvault::services::{Attachment, AttachmentIngestor, IngestOutcome};

/// Ingest local files, one correlation id per file under a shared root.
pub async fn cmd_ingest(
    settings: &Settings,
    files: &[PathBuf],
    content_type: Option<&str>,
    pages: Option<i32>,
) -> anyhow::Result<()> {
    let ingestor = AttachmentIngestor::new(db_context(settings), storage(settings)?);
    let reporter = reporter();
    let cid = CorrelationId::new();

    let (mut created, mut existing, mut skipped, mut failed) = (0, 0, 0, 0);
    for path in files {
        let child = cid.child();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let err = AppError::wrap(ErrorKind::ResourceNotFound, "cannot read file", e)
                    .with_context("path", path.display().to_string())
                    .with_correlation(&child);
                reporter.report(&err, &child).await;
                println!("  {} {}: cannot read file", style("✗").red(), filename);
                failed += 1;
                continue;
            }
        };

        let mut attachment = Attachment::new(filename.clone(), bytes);
        if let Some(ct) = content_type {
            attachment = attachment.with_content_type(ct);
        }
        if let Some(pages) = pages {
            attachment = attachment.with_page_count(pages);
        }

        match ingestor.ingest(&attachment, &child).await {
            Ok(IngestOutcome::Created(doc)) => {
                created += 1;
                println!(
                    "  {} {} -> {} ({})",
                    style("✓").green(),
                    filename,
                    doc.id,
                    doc.content_type
                );
            }
            Ok(IngestOutcome::Existing(doc)) => {
                existing += 1;
                println!("  {} {} already stored as {}", style("=").cyan(), filename, doc.id);
            }
            Ok(IngestOutcome::Skipped { reason, .. }) => {
                skipped += 1;
                println!("  {} {}: {}", style("-").yellow(), filename, reason);
            }
            Err(e) => {
                failed += 1;
                reporter.report(&e, &child).await;
                println!(
                    "  {} {}: {}",
                    style("✗").red(),
                    filename,
                    e.user_facing().message
                );
            }
        }
    }

    println!(
        "{} {} created, {} existing, {} skipped, {} failed",
        style("Ingest:").bold(),
        created,
        existing,
        skipped,
        failed
    );
    Ok(())
}
