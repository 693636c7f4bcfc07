//! OCR run inspection commands.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use console::style;

use crate::cli::helpers::{db_context, opt, opt_f64, print_json, truncate};
use ocrvault::config::Settings;
use ocrvault::error::AppError;
use ocrvault::models::ProcessingStatus;
use ocrvault::registry::{RunQuery, SortField, SortOrder, DEFAULT_LIMIT};

#[derive(clap::Args, Debug)]
pub struct ListArgs {
    #[arg(long)]
    document: Option<String>,
    #[arg(long)]
    engine: Option<String>,
    /// pending, processing, completed or failed
    #[arg(long, value_parser = parse_status)]
    status: Option<ProcessingStatus>,
    /// Created at or after (RFC 3339 or YYYY-MM-DD)
    #[arg(long, value_parser = parse_since)]
    since: Option<DateTime<Utc>>,
    /// Created at or before (RFC 3339 or YYYY-MM-DD, whole day included)
    #[arg(long, value_parser = parse_until)]
    until: Option<DateTime<Utc>>,
    #[arg(long)]
    min_confidence: Option<f64>,
    #[arg(long)]
    max_confidence: Option<f64>,
    #[arg(long)]
    max_latency_ms: Option<i64>,
    #[arg(long)]
    min_pages: Option<i32>,
    #[arg(long)]
    max_pages: Option<i32>,
    /// created_at, confidence_mean, latency_ms, pages_parsed, word_count, cost_cents
    #[arg(long, default_value = "created_at")]
    sort: SortField,
    #[arg(long, default_value = "desc")]
    order: SortOrder,
    #[arg(short, long, default_value_t = DEFAULT_LIMIT)]
    limit: i64,
    #[arg(long, default_value_t = 0)]
    offset: i64,
    #[arg(long)]
    json: bool,
}

impl ListArgs {
    fn query(&self) -> RunQuery {
        let mut query = RunQuery::new()
            .sort_by(self.sort, self.order)
            .paginate(self.limit, self.offset);
        query.document_id = self.document.clone();
        query.engine = self.engine.clone();
        query.status = self.status;
        query.created_after = self.since;
        query.created_before = self.until;
        query.min_confidence = self.min_confidence;
        query.max_confidence = self.max_confidence;
        query.max_latency_ms = self.max_latency_ms;
        query.min_pages = self.min_pages;
        query.max_pages = self.max_pages;
        query
    }
}

fn parse_status(s: &str) -> Result<ProcessingStatus, String> {
    ProcessingStatus::from_str(&s.trim().to_ascii_lowercase()).ok_or_else(|| {
        format!(
            "unknown status '{}', expected one of: pending, processing, completed, failed",
            s
        )
    })
}

fn parse_datetime(s: &str, day_time: NaiveTime) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(|d| d.and_time(day_time).and_utc())
        .map_err(|_| format!("invalid date '{}', expected RFC 3339 or YYYY-MM-DD", s))
}

fn parse_since(s: &str) -> Result<DateTime<Utc>, String> {
    parse_datetime(s, NaiveTime::MIN)
}

fn parse_until(s: &str) -> Result<DateTime<Utc>, String> {
    let end_of_day = NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN);
    parse_datetime(s, end_of_day)
}

pub async fn cmd_runs_list(settings: &Settings, args: ListArgs) -> anyhow::Result<()> {
    let registry = db_context(settings).registry();
    let query = args.query();
    let (runs, total) = registry
        .search(&query)
        .await
        .map_err(|e| AppError::database("search runs", e))?;

    if args.json {
        return print_json(&serde_json::json!({ "total": total, "runs": runs }));
    }

    if runs.is_empty() {
        println!("{} No matching runs", style("!").yellow());
        return Ok(());
    }

    println!(
        "{:<36} {:<10} {:<11} {:>6} {:>6} {:>7} {:>8}  Created",
        "Run", "Engine", "Status", "Conf", "Pages", "Words", "Latency"
    );
    println!("{}", "-".repeat(110));
    for run in &runs {
        println!(
            "{:<36} {:<10} {:<11} {:>6} {:>6} {:>7} {:>8}  {}",
            run.id,
            truncate(&run.engine, 10),
            run.status.as_str(),
            opt_f64(run.metrics.confidence_mean),
            opt(run.metrics.pages_parsed),
            opt(run.metrics.word_count),
            opt(run.metrics.latency_ms),
            run.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!(
        "\nShowing {} of {} (offset {})",
        runs.len(),
        total,
        query.offset
    );
    Ok(())
}

pub async fn cmd_runs_show(
    settings: &Settings,
    run_id: &str,
    show_text: bool,
    json: bool,
) -> anyhow::Result<()> {
    let registry = db_context(settings).registry();
    let run = registry
        .get(run_id)
        .await
        .map_err(|e| AppError::database("load run", e))?
        .ok_or_else(|| AppError::not_found("ocr run", run_id))?;
    let pages = registry
        .pages_for_run(run_id)
        .await
        .map_err(|e| AppError::database("load pages", e))?;

    if json {
        return print_json(&serde_json::json!({ "run": run, "pages": pages }));
    }

    println!("{} {}", style("Run").bold(), run.id);
    println!("  Document:   {}", run.document_id);
    println!(
        "  Engine:     {} {}",
        run.engine,
        run.engine_version.as_deref().unwrap_or("")
    );
    println!("  Status:     {}", run.status.as_str());
    if let Some(code) = &run.error_code {
        println!(
            "  Error:      {} {}",
            style(code).red(),
            run.error_message.as_deref().unwrap_or("")
        );
    }
    println!("  Confidence: {}", opt_f64(run.metrics.confidence_mean));
    println!("  Pages:      {}", opt(run.metrics.pages_parsed));
    println!("  Words:      {}", opt(run.metrics.word_count));
    println!("  Tables:     {}", opt(run.metrics.table_count));
    println!("  Latency ms: {}", opt(run.metrics.latency_ms));
    println!("  Cost cents: {}", opt(run.metrics.cost_cents));
    println!("  Response:   {}", run.raw_response_path.as_deref().unwrap_or("-"));
    println!("  Created:    {}", run.created_at.to_rfc3339());
    println!("  Completed:  {}", opt(run.completed_at.map(|t| t.to_rfc3339())));
    println!("  Stored pages: {}", pages.len());

    if show_text {
        for page in &pages {
            println!(
                "\n{} {} ({} words)",
                style("Page").bold(),
                page.page_number,
                page.word_count
            );
            println!("{}", page.text_content);
        }
    }
    Ok(())
}

pub async fn cmd_runs_stats(
    settings: &Settings,
    days: i64,
    engine: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let registry = db_context(settings).registry();
    let stats = registry
        .performance_stats(Duration::days(days.max(0)), engine)
        .await
        .map_err(|e| AppError::database("performance stats", e))?;

    if json {
        return print_json(&stats);
    }

    println!(
        "{} last {} days{}",
        style("OCR performance,").bold(),
        days,
        engine.map(|e| format!(" ({})", e)).unwrap_or_default()
    );
    println!("  Completed runs:  {}", stats.total_runs);
    println!("  Avg confidence:  {}", opt_f64(stats.avg_confidence));
    println!("  Avg latency ms:  {}", opt_f64(stats.avg_latency_ms));
    println!("  Avg pages:       {}", opt_f64(stats.avg_pages));
    println!("  Avg words:       {}", opt_f64(stats.avg_words));
    println!("  Total pages:     {}", stats.total_pages);
    println!("  Total words:     {}", stats.total_words);

    if !stats.engine_breakdown.is_empty() {
        println!("\n{:<12} {:>6} {:>8} {:>10}", "Engine", "Runs", "Conf", "Latency");
        for (name, engine_stats) in &stats.engine_breakdown {
            println!(
                "{:<12} {:>6} {:>8} {:>10}",
                name,
                engine_stats.run_count,
                opt_f64(engine_stats.avg_confidence),
                opt_f64(engine_stats.avg_latency_ms)
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_date_bounds_cover_whole_day() {
        let since = parse_since("2024-03-01").unwrap();
        let until = parse_until("2024-03-01").unwrap();
        assert_eq!((since.day(), since.hour()), (1, 0));
        assert_eq!((until.hour(), until.minute()), (23, 59));
        assert!(parse_since("2024-03-01T10:00:00+02:00").unwrap().hour() == 8);
        assert!(parse_since("March 1st").is_err());
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status("Completed"), Ok(ProcessingStatus::Completed));
        assert!(parse_status("done").is_err());
    }
}
