//! Dead-letter inspection commands.

use console::style;

use crate::cli::helpers::{db_context, print_json, truncate};
use ocrvault::config::Settings;
use ocrvault::error::AppError;

pub async fn cmd_list(settings: &Settings, limit: i64, json: bool) -> anyhow::Result<()> {
    let letters = db_context(settings)
        .dead_letters()
        .list(limit.max(0))
        .await
        .map_err(|e| AppError::database("list dead letters", e))?;

    if json {
        return print_json(&letters);
    }
    if letters.is_empty() {
        println!("{} No dead letters", style("✓").green());
        return Ok(());
    }

    println!("{:>6} {:<18} {:<24} {:<19} Message", "ID", "Operation", "Error", "Created");
    println!("{}", "-".repeat(100));
    for letter in &letters {
        let class = letter.error["error_class"].as_str().unwrap_or("-");
        let message = letter.error["message"].as_str().unwrap_or("");
        println!(
            "{:>6} {:<18} {:<24} {:<19} {}",
            letter.id,
            truncate(&letter.operation, 18),
            truncate(class, 24),
            letter.created_at.format("%Y-%m-%d %H:%M:%S"),
            truncate(message, 40)
        );
    }
    Ok(())
}

pub async fn cmd_show(settings: &Settings, id: i32) -> anyhow::Result<()> {
    let letter = db_context(settings)
        .dead_letters()
        .get(id)
        .await
        .map_err(|e| AppError::database("load dead letter", e))?
        .ok_or_else(|| AppError::not_found("dead letter", &id.to_string()))?;
    print_json(&letter)
}

pub async fn cmd_delete(settings: &Settings, id: i32) -> anyhow::Result<()> {
    let deleted = db_context(settings)
        .dead_letters()
        .delete(id)
        .await
        .map_err(|e| AppError::database("delete dead letter", e))?;
    if !deleted {
        return Err(AppError::not_found("dead letter", &id.to_string()).into());
    }
    println!("{} Deleted dead letter {}", style("✓").green(), id);
    Ok(())
}
