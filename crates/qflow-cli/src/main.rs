//! Batch driver for the queue flow reconstruction core (spec §6: "a
//! collaborator, not core"). Reads two CSV files of timestamps, runs
//! `estimate_queue`, and writes the corrected minute series (and optionally
//! a debug table) back out as CSV.

mod config;
mod dataset;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use config::CliConfig;
use qflow_core::{estimate_queue, estimate_queue_with_debug, EstimateQueueOptions};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "qflow")]
#[command(about = "Batch driver for queue occupancy/flow reconstruction")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconstruct a queue series from a single pair of timestamp CSVs.
    Run {
        /// CSV of entry timestamps.
        #[arg(long)]
        in_csv: PathBuf,
        /// CSV of exit timestamps.
        #[arg(long)]
        out_csv: PathBuf,
        /// Column name carrying the timestamp in both files.
        #[arg(long, default_value = "timestamp")]
        timestamp_column: String,
        /// Where to write the corrected minute series.
        #[arg(long)]
        output: PathBuf,
        /// Also write the debug table (measured + episode columns) here.
        #[arg(long)]
        debug_output: Option<PathBuf>,
        /// Disable episode splitting (spec §4.5 step 3: reconcile the whole grid).
        #[arg(long)]
        no_episode_splitting: bool,
        /// Skip FIFO wait reconstruction.
        #[arg(long)]
        no_fifo_wait: bool,
        /// Inflow fidelity weight (spec §4.3 `w_in`).
        #[arg(long, default_value_t = 1.0)]
        w_in: f64,
        /// Outflow fidelity weight (spec §4.3 `w_out`).
        #[arg(long, default_value_t = 4.0)]
        w_out: f64,
        /// First-difference smoothing on entries.
        #[arg(long, default_value_t = 0.0)]
        smooth_in: f64,
        /// First-difference smoothing on exits.
        #[arg(long, default_value_t = 0.0)]
        smooth_out: f64,
        /// Enable the adaptive inflow prior (spec §4.3).
        #[arg(long)]
        adaptive_inflow_prior: bool,
    },

    /// Run reconciliation over one named dataset under the fixed on-disk
    /// layout (`<dataset_root>/<key>/<variant>/{in,out}_timestamps.csv`).
    Dataset {
        /// Dataset key (a subdirectory of the dataset root).
        #[arg(long)]
        key: String,
        /// A single variant under the key; mutually exclusive with `--all`.
        #[arg(long)]
        variant: Option<String>,
        /// Process every variant under the key.
        #[arg(long)]
        all: bool,
        /// Directory to write `<variant>/reconciled.csv` files under.
        #[arg(long)]
        output_dir: PathBuf,
    },
}

#[derive(Debug, Deserialize)]
struct TimestampRow {
    #[serde(flatten)]
    rest: std::collections::HashMap<String, String>,
}

#[derive(Debug, Serialize)]
struct OutputRow {
    #[serde(rename = "Tid")]
    tid: String,
    #[serde(rename = "Pax i kö")]
    occupancy: f64,
    #[serde(rename = "Pax in i kö")]
    entries: f64,
    #[serde(rename = "Pax ur kö")]
    exits: f64,
    #[serde(rename = "Väntetid")]
    wait_minutes: Option<f64>,
}

#[derive(Debug, Serialize)]
struct DebugRow {
    #[serde(rename = "Tid")]
    tid: String,
    in_count_measured: f64,
    out_count_measured: f64,
    #[serde(rename = "Pax i kö")]
    occupancy: f64,
    #[serde(rename = "Pax in i kö")]
    entries: f64,
    #[serde(rename = "Pax ur kö")]
    exits: f64,
    episode_id: Option<u32>,
    in_episode: bool,
    #[serde(rename = "Väntetid")]
    wait_minutes: Option<f64>,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("{},qflow=debug", Level::INFO))),
        )
        .init();

    let cli = Cli::parse();
    let cli_config = CliConfig::from_env();

    match cli.command {
        Commands::Run {
            in_csv,
            out_csv,
            timestamp_column,
            output,
            debug_output,
            no_episode_splitting,
            no_fifo_wait,
            w_in,
            w_out,
            smooth_in,
            smooth_out,
            adaptive_inflow_prior,
        } => {
            let mut options = EstimateQueueOptions {
                in_timestamp_column: timestamp_column.clone(),
                out_timestamp_column: timestamp_column,
                use_episode_splitting: !no_episode_splitting,
                include_fifo_wait: !no_fifo_wait,
                ..Default::default()
            };
            options.reconcile.w_in = w_in;
            options.reconcile.w_out = w_out;
            options.reconcile.smooth_in = smooth_in;
            options.reconcile.smooth_out = smooth_out;
            options.reconcile.adaptive_inflow_prior = adaptive_inflow_prior;
            apply_solver_overrides(&mut options, &cli_config);

            run_one(&in_csv, &out_csv, &output, debug_output.as_deref(), &options)
        }
        Commands::Dataset {
            key,
            variant,
            all,
            output_dir,
        } => {
            if variant.is_some() && all {
                bail!("--variant and --all are mutually exclusive");
            }
            let mut options = EstimateQueueOptions::default();
            apply_solver_overrides(&mut options, &cli_config);

            let variants = dataset::resolve_variants(&cli_config.dataset_root, &key, variant.as_deref(), all)?;
            std::fs::create_dir_all(&output_dir)
                .with_context(|| format!("creating output dir {}", output_dir.display()))?;

            for variant_name in variants {
                let variant_dir = cli_config.dataset_root.join(&key).join(&variant_name);
                let in_csv = variant_dir.join("in_timestamps.csv");
                let out_csv = variant_dir.join("out_timestamps.csv");
                let out_path = output_dir.join(format!("{variant_name}_reconciled.csv"));
                info!(variant = %variant_name, "processing dataset variant");
                run_one(&in_csv, &out_csv, &out_path, None, &options)?;
            }
            Ok(())
        }
    }
}

fn apply_solver_overrides(options: &mut EstimateQueueOptions, cli_config: &CliConfig) {
    if let Some(eps) = cli_config.solver_eps {
        options.reconcile.solver_tolerances.eps_abs = eps;
        options.reconcile.solver_tolerances.eps_rel = eps;
    }
    if let Some(max_iter) = cli_config.solver_max_iter {
        options.reconcile.solver_tolerances.max_iter = max_iter;
    }
}

fn read_timestamp_column(path: &std::path::Path, column: &str) -> Result<Vec<String>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let mut out = Vec::new();
    for record in reader.deserialize::<TimestampRow>() {
        let row = record.with_context(|| format!("reading row from {}", path.display()))?;
        if let Some(value) = row.rest.get(column) {
            out.push(value.clone());
        }
    }
    Ok(out)
}

fn run_one(
    in_csv: &std::path::Path,
    out_csv: &std::path::Path,
    output: &std::path::Path,
    debug_output: Option<&std::path::Path>,
    options: &EstimateQueueOptions,
) -> Result<()> {
    let in_timestamps = read_timestamp_column(in_csv, &options.in_timestamp_column)?;
    let out_timestamps = read_timestamp_column(out_csv, &options.out_timestamp_column)?;

    info!(
        in_rows = in_timestamps.len(),
        out_rows = out_timestamps.len(),
        "loaded timestamp streams"
    );

    if let Some(debug_path) = debug_output {
        let (table, debug) = estimate_queue_with_debug(&in_timestamps, &out_timestamps, options)
            .context("reconstructing queue series")?;
        write_output(output, &table)?;
        write_debug(debug_path, &debug)?;
    } else {
        let table =
            estimate_queue(&in_timestamps, &out_timestamps, options).context("reconstructing queue series")?;
        write_output(output, &table)?;
    }
    Ok(())
}

fn write_output(path: &std::path::Path, table: &qflow_core::QueueTable) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    for k in 0..table.len() {
        writer.serialize(OutputRow {
            tid: table.timestamps[k].to_rfc3339(),
            occupancy: table.occupancy[k],
            entries: table.entries[k],
            exits: table.exits[k],
            wait_minutes: table.wait_minutes.as_ref().and_then(|w| w[k]),
        })?;
    }
    writer.flush()?;
    info!(rows = table.len(), path = %path.display(), "wrote queue table");
    Ok(())
}

fn write_debug(path: &std::path::Path, debug: &qflow_core::DebugTable) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    for k in 0..debug.timestamps.len() {
        writer.serialize(DebugRow {
            tid: debug.timestamps[k].to_rfc3339(),
            in_count_measured: debug.in_count_measured[k],
            out_count_measured: debug.out_count_measured[k],
            occupancy: debug.occupancy[k],
            entries: debug.entries[k],
            exits: debug.exits[k],
            episode_id: debug.episode_id[k],
            in_episode: debug.in_episode[k],
            wait_minutes: debug.wait_minutes.as_ref().and_then(|w| w[k]),
        })?;
    }
    writer.flush()?;
    Ok(())
}
