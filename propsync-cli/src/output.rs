//! Terminal rendering for a run: header before, summary table after.

use std::path::Path;

use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use propsync_core::RunConfig;
use propsync_reconcile::diff::display_value;
use propsync_reconcile::{PropertyResult, RunResult};

#[derive(Tabled)]
struct PropertyRow {
    #[tabled(rename = "property")]
    property: String,
    #[tabled(rename = "sources")]
    sources: String,
    #[tabled(rename = "updates")]
    updates: usize,
    #[tabled(rename = "errors")]
    errors: usize,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "time")]
    time: String,
}

pub fn print_header(config: &RunConfig) {
    let mode = if config.dry_run {
        "DRY-RUN (no changes)".yellow().bold()
    } else {
        "LIVE (will update)".green().bold()
    };
    println!("propsync v{}", env!("CARGO_PKG_VERSION"));
    println!("Organization: {}", config.org);
    println!("Source:       {}", config.source);
    println!("Property:     {}", config.property);
    println!("Mode:         {mode}");
    println!();
}

pub fn print_summary(result: &RunResult, report_path: &Path, verbose: bool) {
    if verbose {
        for property in &result.sources {
            print_details(property, result.dry_run);
        }
    }

    let separator = "═".repeat(60).bright_black().to_string();
    println!("{separator}");
    println!("{}", headline(result).bold());
    println!("{separator}");
    println!("Duration:      {:.2}s", result.duration_seconds);
    println!("Total updates: {}", result.total_updates);
    println!("Total errors:  {}", result.total_errors);
    if result.failed_properties > 0 {
        println!("Failed properties: {}", result.failed_properties.to_string().red());
    }

    if !result.sources.is_empty() {
        let rows: Vec<PropertyRow> = result.sources.iter().map(row).collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }

    if result.dry_run {
        println!();
        println!("{}", "DRY-RUN MODE: no changes were made".yellow());
        println!("Run without --dry-run to apply changes.");
    }
    println!();
    println!("Detailed results written to: {}", report_path.display());
}

fn headline(result: &RunResult) -> &'static str {
    if result.cancelled {
        "SYNC INTERRUPTED"
    } else if result.is_clean() {
        "SYNC COMPLETE"
    } else {
        "SYNC COMPLETE WITH ERRORS"
    }
}

fn row(property: &PropertyResult) -> PropertyRow {
    let status = if property.is_failed() {
        "FAILED".red().bold().to_string()
    } else if property.errors_count > 0 {
        "ERRORS".yellow().bold().to_string()
    } else {
        "OK".green().bold().to_string()
    };
    PropertyRow {
        property: property.property.to_string(),
        sources: property.sources.join(", "),
        updates: property.updates_count,
        errors: property.errors_count,
        status,
        time: format!("{:.2}s", property.duration_seconds),
    }
}

fn print_details(property: &PropertyResult, dry_run: bool) {
    println!("{}", property.property.to_string().bold());
    if let Some(failure) = &property.failure {
        println!("  {} {failure}", "✗".red());
        return;
    }
    let marker = if dry_run { "~" } else { "✎" };
    for diff in &property.updates {
        println!(
            "  {marker}  {}: {} → {}",
            diff.entity_id,
            display_value(diff.old_value.as_deref()),
            display_value(diff.new_value.as_deref()),
        );
    }
    for error in &property.errors {
        println!("  {}  {}: {}", "✗".red(), error.entity_id, error.message);
    }
    if property.updates.is_empty() && property.errors.is_empty() {
        println!("  ·  nothing to do");
    }
}
