//! Result rendering: JSON or terminal tables.

use colored::Colorize;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use groupflow_core::{AggregationResult, GroupFooter, Lookup, VariableSnapshot, PLACEHOLDER};
use serde_json::Value;

/// Output format for `run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Default)]
pub enum OutputFormat {
    /// Terminal tables
    #[default]
    Table,
    /// One pretty-printed JSON document
    Json,
}

/// Prints a completed run.
pub fn print_result(
    result: &AggregationResult,
    footers: Option<&[GroupFooter]>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            let mut json = result.to_json();
            if let (Some(footers), Value::Object(map)) = (footers, &mut json) {
                map.insert("footers".to_string(), serde_json::to_value(footers)?);
            }
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Table => {
            if let Some(footers) = footers {
                print_footers(footers);
            }
            print_groups(result);
            print_variables(&result.variables_final);
            print_summary(result);
        }
    }
    Ok(())
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

fn new_table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            header
                .iter()
                .map(|c| Cell::new(c).fg(Color::Cyan))
                .collect::<Vec<_>>(),
        );
    table
}

/// Prints one row per group, aggregates as columns.
pub fn print_groups(result: &AggregationResult) {
    let facade = result.facade();
    if facade.is_empty() {
        println!("{}", "No groups.".dimmed());
        return;
    }

    let ids = result.table.program().ids().to_vec();
    let mut header = vec!["group", "level", "rows"];
    header.extend(ids.iter().map(String::as_str));
    let mut table = new_table(&header);

    for (key, lookup) in facade.iter() {
        let mut row = vec![Cell::new(key.to_string()), Cell::new(key.depth())];
        match lookup {
            Lookup::Found(acc) => {
                row.push(Cell::new(acc.count()));
                for id in &ids {
                    let value = acc.value(id).unwrap_or(Value::Null);
                    row.push(Cell::new(cell_text(&value)));
                }
            }
            Lookup::Failed(marker) => {
                row.push(Cell::new(format!("error: {}", marker.error)).fg(Color::Red));
                for _ in &ids {
                    row.push(Cell::new(PLACEHOLDER).fg(Color::DarkGrey));
                }
            }
            Lookup::NotFound => continue,
        }
        table.add_row(row);
    }

    println!("{table}");
}

/// Prints the final variable snapshot.
pub fn print_variables(snapshot: &VariableSnapshot) {
    if snapshot.is_empty() {
        return;
    }
    let mut table = new_table(&["variable", "value"]);
    for (name, value) in &snapshot.values {
        let text = match snapshot.failed.get(name) {
            Some(error) => format!("{PLACEHOLDER} ({error})"),
            None => cell_text(value),
        };
        table.add_row(vec![Cell::new(name), Cell::new(text)]);
    }
    println!("{table}");
}

/// Prints footers in emission order, indented by level.
pub fn print_footers(footers: &[GroupFooter]) {
    for footer in footers {
        let indent = "  ".repeat(footer.level.saturating_sub(1));
        let values: Vec<String> = footer
            .snapshot
            .values
            .iter()
            .map(|(name, value)| format!("{name}={}", cell_text(value)))
            .collect();
        println!(
            "{indent}{} {} [{}] {}",
            "end".dimmed(),
            footer.group.bold(),
            footer.key,
            values.join(" ")
        );
    }
}

fn print_summary(result: &AggregationResult) {
    for warning in &result.warnings {
        println!("{} {warning}", "warning:".yellow().bold());
    }
    println!(
        "{} records, {} groups ({} failed), {} batches",
        result.record_count,
        result.stats.groups,
        result.stats.failed_groups,
        result.stats.batches
    );
    if result.stats.revisited_groups > 0 {
        println!(
            "{} {} groups reappeared; input was not sorted on the group fields",
            "warning:".yellow().bold(),
            result.stats.revisited_groups
        );
    }
    if !result.sample.is_empty() {
        println!("{} ({} records)", "Sample".green().bold(), result.sample.len());
        for record in &result.sample {
            println!("  {record}");
        }
    }
}
