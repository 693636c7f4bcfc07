//! Reprocess command.

use console::style;

use crate::cli::helpers::print_json;
use ocrvault::reprocess::{ReprocessRequest, ReprocessTarget};

/// Validate a reprocess request and print the job it would queue.
pub fn cmd_reprocess(
    target: ReprocessTarget,
    engine: Option<String>,
    workflow: String,
    priority: String,
    process_attachments: bool,
) -> anyhow::Result<()> {
    let request = ReprocessRequest {
        target,
        ocr_engine: engine,
        workflow_config: workflow,
        priority,
        process_attachments,
    };
    let job = request.validate()?;

    eprintln!(
        "{} Reprocess job {} for {} {}",
        style("✓").green(),
        job.job_id,
        job.target.kind(),
        job.target.id()
    );
    print_json(&job)
}
