//! Selection, comparison and document status commands.

use console::style;

use crate::cli::helpers::{opt, opt_f64, print_json, selection_engine};
use ocrvault::config::Settings;
use ocrvault::correlation::CorrelationId;
use ocrvault::selection::{SelectionCriteria, SelectionReport};

fn print_report(report: &SelectionReport) {
    let verb = if report.applied { "Selected" } else { "Would select" };
    println!(
        "{} {} run {} ({})",
        style("✓").green(),
        verb,
        report.run_id,
        report.engine
    );
    println!(
        "  Chosen by: {}",
        report
            .tier
            .map(|t| t.as_str())
            .unwrap_or(report.criteria.as_str())
    );
    println!(
        "  Text:      {} chars from {}",
        report.text_length,
        report.text_source.as_str()
    );
}

pub async fn cmd_select(
    settings: &Settings,
    document_id: &str,
    criteria: SelectionCriteria,
    dry_run: bool,
    json: bool,
) -> anyhow::Result<()> {
    let engine = selection_engine(settings)?;
    let cid = CorrelationId::new();
    let report = if dry_run {
        engine.preview(document_id, criteria, &cid).await?
    } else {
        engine.select_canonical(document_id, criteria, &cid).await?
    };

    if json {
        return print_json(&report);
    }
    match report {
        Some(report) => print_report(&report),
        None => println!(
            "{} No completed OCR runs for {}; document unchanged",
            style("!").yellow(),
            document_id
        ),
    }
    Ok(())
}

pub async fn cmd_compare(settings: &Settings, run_ids: &[String], json: bool) -> anyhow::Result<()> {
    let comparison = selection_engine(settings)?
        .compare_runs(run_ids, &CorrelationId::new())
        .await?;

    if json {
        return print_json(&comparison);
    }

    println!(
        "{:<36} {:<10} {:<11} {:>6} {:>6} {:>7} {:>8} {:>5} {:>7}",
        "Run", "Engine", "Status", "Conf", "Pages", "Words", "Latency", "Cost", "Text"
    );
    println!("{}", "-".repeat(104));
    for run in &comparison.runs {
        println!(
            "{:<36} {:<10} {:<11} {:>6} {:>6} {:>7} {:>8} {:>5} {:>7}",
            run.id,
            run.engine,
            run.status.as_str(),
            opt_f64(run.metrics.confidence_mean),
            opt(run.metrics.pages_parsed),
            opt(run.metrics.word_count),
            opt(run.metrics.latency_ms),
            opt(run.metrics.cost_cents),
            run.text_length
        );
    }

    let best = &comparison.best;
    println!("\n{}", style("Best by metric").bold());
    for (label, id) in [
        ("highest confidence", &best.highest_confidence),
        ("most words", &best.most_words),
        ("most pages", &best.most_pages),
        ("fastest", &best.fastest),
        ("cheapest", &best.cheapest),
        ("most recent", &best.most_recent),
    ] {
        println!("  {:<19} {}", label, id.as_deref().unwrap_or("-"));
    }

    for id in &comparison.missing {
        println!("{} Unknown run {}", style("!").yellow(), id);
    }
    Ok(())
}

pub async fn cmd_status(settings: &Settings, document_id: &str, json: bool) -> anyhow::Result<()> {
    let status = selection_engine(settings)?
        .document_status(document_id)
        .await?;

    if json {
        return print_json(&status);
    }

    println!("{} {}", style("Document").bold(), status.document_id);
    println!("  File:        {}", status.filename);
    println!("  Status:      {}", status.status.as_str());
    println!("  Page count:  {}", opt(status.page_count));
    println!("  Engine:      {}", opt(status.ocr_engine.as_deref()));
    println!("  Confidence:  {}", opt_f64(status.ocr_confidence));
    println!("  Pages:       {}", opt(status.pages_parsed));
    println!("  Words:       {}", opt(status.word_count));
    println!(
        "  Processed:   {}",
        opt(status.processed_at.map(|t| t.to_rfc3339()))
    );
    println!(
        "  Runs:        {} total, {} completed, {} failed, {} pending, {} processing",
        status.runs.total,
        status.runs.completed,
        status.runs.failed,
        status.runs.pending,
        status.runs.processing
    );
    println!(
        "  Engines:     {}",
        if status.engines.is_empty() {
            "-".to_string()
        } else {
            status.engines.join(", ")
        }
    );
    match &status.best {
        Some(best) => println!(
            "  Best run:    {} ({}, {})",
            best.run_id,
            best.engine,
            best.tier.map(|t| t.as_str()).unwrap_or("-")
        ),
        None => println!("  Best run:    -"),
    }
    Ok(())
}
