#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
//! `groupflow` CLI - run aggregation plans over JSON-lines input
//!
//! Usage:
//!   `groupflow run --plan plan.toml --input sales.jsonl`
//!   `groupflow run --plan plan.toml --input - --format json < sales.jsonl`
//!   `groupflow validate --plan plan.toml`
//!   `groupflow init --output plan.toml`

mod logging;
mod output;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use groupflow_core::{
    AggregationPlan, AggregatorOptions, GroupFooter, GroupflowConfig, JsonLinesSource,
    StreamAggregator,
};
use output::OutputFormat;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "groupflow")]
#[command(author, version, about = "groupflow - streaming group aggregation")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ./groupflow.toml when present)
    #[arg(short, long, global = true, value_name = "FILE", env = "GROUPFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a plan over a JSON-lines file
    Run {
        /// Plan file (TOML, or JSON with a .json extension)
        #[arg(short, long, value_name = "FILE")]
        plan: PathBuf,

        /// Input file, one JSON object per line ("-" reads stdin)
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,

        /// Also print group footers
        #[arg(long)]
        footers: bool,

        /// Records per batch (overrides the configuration)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Fail once the table holds more groups than this
        #[arg(long)]
        max_groups: Option<usize>,

        /// Keep a reservoir sample; the size defaults to the plan's, then the configured one
        #[arg(long, value_name = "N", num_args = 0..=1)]
        sample: Option<Option<usize>>,
    },

    /// Validate a plan file
    Validate {
        /// Plan file
        #[arg(short, long, value_name = "FILE")]
        plan: PathBuf,
    },

    /// Write an example plan
    Init {
        /// Output file path
        #[arg(short, long, default_value = "plan.toml")]
        output: PathBuf,

        /// Also write a default groupflow.toml next to the plan
        #[arg(long)]
        with_config: bool,

        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },
}

const EXAMPLE_PLAN: &str = r#"# groupflow aggregation plan
#
# Input records must be sorted on the group fields, outermost level first.
cumulative = true

[[groups]]
name = "region"
level = 1
field_paths = ["region"]

[[groups]]
name = "store"
level = 2
field_paths = ["store"]
expected_cardinality = 100

[[aggregates]]
kind = "count"

[[aggregates]]
kind = "sum"
field = "amount"

[[aggregates]]
kind = "avg"
field = "amount"

[[aggregates]]
id = "refunds"
kind = "count_where"
condition = { type = "eq", field = "kind", value = "refund" }

[[variables]]
name = "region_amount"
kind = "sum"
source = { field = "amount" }
reset_scope = "group"
reset_group_level = 1

[[variables]]
name = "row_count"
kind = "count"
"#;

fn load_config(path: Option<&Path>) -> anyhow::Result<GroupflowConfig> {
    let config = match path {
        Some(path) => GroupflowConfig::load_required(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => GroupflowConfig::load().context("Failed to load groupflow.toml")?,
    };
    config.validate()?;
    Ok(config)
}

fn load_plan(path: &Path) -> anyhow::Result<AggregationPlan> {
    AggregationPlan::from_path(path).with_context(|| format!("Failed to read plan {}", path.display()))
}

#[allow(clippy::too_many_arguments)]
fn run(
    config: &GroupflowConfig,
    plan: &Path,
    input: &Path,
    format: OutputFormat,
    footers: bool,
    batch_size: Option<usize>,
    max_groups: Option<usize>,
    sample: Option<Option<usize>>,
) -> anyhow::Result<()> {
    let mut plan = load_plan(plan)?;
    if let Some(size) = sample {
        plan = plan.sampled();
        if size.is_some() {
            plan.sample.sample_size = size;
        }
    }

    let mut options = AggregatorOptions::from_config(config);
    if let Some(batch_size) = batch_size {
        options = options.with_batch_size(batch_size);
    }
    if let Some(max_groups) = max_groups {
        options = options.with_max_groups(max_groups);
    }

    let mut aggregator = StreamAggregator::with_options(plan, options)?;
    let mut collected: Vec<GroupFooter> = Vec::new();

    let result = if input.as_os_str() == "-" {
        info!("Reading records from stdin");
        let mut source = JsonLinesSource::new(std::io::stdin().lock());
        if footers {
            aggregator.run_with_footers(&mut source, &mut collected)?
        } else {
            aggregator.run(&mut source)?
        }
    } else {
        let file = std::fs::File::open(input)
            .with_context(|| format!("Failed to open input {}", input.display()))?;
        let mut source = JsonLinesSource::new(BufReader::new(file));
        if footers {
            aggregator.run_with_footers(&mut source, &mut collected)?
        } else {
            aggregator.run(&mut source)?
        }
    };

    output::print_result(&result, footers.then_some(collected.as_slice()), format)
}

fn validate(config: &GroupflowConfig, path: &Path) -> anyhow::Result<()> {
    let plan = load_plan(path)?;
    plan.validate()?;

    println!(
        "{} {} group levels, {} aggregates, {} variables{}",
        "Plan OK:".green().bold(),
        plan.depth(),
        plan.aggregates.len(),
        plan.variables.len(),
        if plan.cumulative { ", cumulative" } else { "" }
    );
    if let Some(warning) = plan.check_cardinality(config.engine.cardinality_ceiling) {
        println!("{} {warning}", "warning:".yellow().bold());
    }
    Ok(())
}

fn write_new(path: &Path, contents: &str, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    std::fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
    println!("{} {}", "Wrote".green(), path.display());
    Ok(())
}

fn init(output: &Path, with_config: bool, force: bool) -> anyhow::Result<()> {
    write_new(output, EXAMPLE_PLAN, force)?;
    if with_config {
        let dir = output.parent().unwrap_or_else(|| Path::new("."));
        let config = GroupflowConfig::default().to_toml()?;
        write_new(&dir.join("groupflow.toml"), &config, force)?;
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    logging::init(&config.logging, cli.verbose)?;

    match cli.command {
        Commands::Run {
            plan,
            input,
            format,
            footers,
            batch_size,
            max_groups,
            sample,
        } => run(
            &config, &plan, &input, format, footers, batch_size, max_groups, sample,
        )?,
        Commands::Validate { plan } => validate(&config, &plan)?,
        Commands::Init {
            output,
            with_config,
            force,
        } => init(&output, with_config, force)?,
    }

    Ok(())
}
