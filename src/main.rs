//! nqmp-bench CLI
//!
//! Runs minimal-pair datasets against an LLM client and aggregates metrics.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nqmp_bench::{
    aggregate, load_pairs, load_predictions, load_skip_set, run_dataset, write_metrics,
    CancelFlag, ClientSettings, PredictionWriter, RetryConfig, RunConfig, RunError, RunInfo,
    METRICS_FILE, PREDICTIONS_FILE, RUN_INFO_FILE,
};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use tabled::{Table, Tabled};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nqmp-bench")]
#[command(author, version, about = "Minimal-pair question benchmark harness", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run predictions over a dataset with per-call logs and resume
    Run {
        /// Dataset JSONL path
        #[arg(long = "in")]
        input: PathBuf,

        /// LLM client to use
        #[arg(long, default_value = "echo")]
        client: String,

        /// Model name (OpenRouter)
        #[arg(long)]
        model: Option<String>,

        /// Sampling temperature
        #[arg(long, default_value_t = 0.0)]
        temperature: f64,

        /// Output directory (auto-named under results/ if omitted)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Skip already-predicted items and append to predictions.jsonl
        #[arg(long)]
        resume: bool,

        /// Disable per-call event logs
        #[arg(long)]
        quiet: bool,

        /// Seed for the offline echo client
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },

    /// Aggregate metrics from a results directory
    Report {
        /// Results directory containing predictions.jsonl
        #[arg(long = "in")]
        input: PathBuf,

        /// Output directory (defaults to the input directory)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

/// Row of the per-operator console summary
#[derive(Tabled)]
struct OperatorRow {
    #[tabled(rename = "Operator")]
    operator: String,
    #[tabled(rename = "Item accuracy")]
    item_accuracy: String,
}

/// Make a filesystem-safe name from a model or client string.
fn safe_name(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

fn timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

#[allow(clippy::too_many_arguments)]
fn cmd_run(
    input: PathBuf,
    client: String,
    model: Option<String>,
    temperature: f64,
    out: Option<PathBuf>,
    resume: bool,
    quiet: bool,
    seed: u64,
) -> Result<()> {
    let pairs = load_pairs(&input)
        .with_context(|| format!("failed to load dataset from {}", input.display()))?;

    let out_dir = out.unwrap_or_else(|| {
        let base = format!(
            "{}-{}-pairs{}-{}",
            safe_name(&client),
            safe_name(model.as_deref().unwrap_or("unknown")),
            pairs.len(),
            timestamp()
        );
        PathBuf::from("results").join(base)
    });
    fs::create_dir_all(&out_dir)?;

    let preds_path = out_dir.join(PREDICTIONS_FILE);
    let skip: HashSet<String> = if resume {
        load_skip_set(&preds_path)?
    } else {
        HashSet::new()
    };

    let append = resume && preds_path.exists();
    let mut writer = PredictionWriter::open(&preds_path, append)?;

    let cancel = CancelFlag::new();
    let handler_flag = cancel.clone();
    ctrlc::set_handler(move || handler_flag.cancel())
        .context("failed to install interrupt handler")?;

    let cfg = RunConfig {
        client_name: client.clone(),
        model_name: model.clone(),
        temperature,
        out_dir: Some(out_dir.clone()),
        resume,
        verbose: !quiet,
        retry: RetryConfig::default(),
        seed,
    };
    let settings = ClientSettings::from_env();

    let result = run_dataset(
        &pairs,
        &cfg,
        &settings,
        &skip,
        &mut |p| writer.write(p),
        &cancel,
    );
    let preds = match result {
        Ok(preds) => {
            writer.close()?;
            preds
        }
        Err(RunError::Interrupted) => {
            eprintln!("Interrupted; completed items are preserved in {}", preds_path.display());
            std::process::exit(130);
        }
        Err(e) => return Err(e.into()),
    };

    let model_label = model.unwrap_or_else(|| {
        if client == "echo" {
            "echo".to_string()
        } else {
            settings.default_model.clone()
        }
    });
    RunInfo {
        client,
        model: model_label,
        pairs: pairs.len(),
        seed: Some(seed),
        timestamp: timestamp(),
        resumed: resume,
    }
    .merge_into(&out_dir.join(RUN_INFO_FILE))?;

    tracing::info!(items = preds.len(), "run complete");
    println!("Wrote {}", preds_path.display());
    Ok(())
}

fn cmd_report(input: PathBuf, out: Option<PathBuf>) -> Result<()> {
    let preds_path = input.join(PREDICTIONS_FILE);
    let preds = load_predictions(&preds_path)
        .with_context(|| format!("failed to load {}", preds_path.display()))?;
    let metrics = aggregate(&preds);

    let out_dir = out.unwrap_or(input);
    fs::create_dir_all(&out_dir)?;
    let metrics_path = out_dir.join(METRICS_FILE);
    write_metrics(&metrics, &metrics_path)?;

    println!("Predictions: {}", preds.len());
    println!("Item accuracy:       {:.3}", metrics.item_accuracy);
    println!("Pair joint accuracy: {:.3}", metrics.pair_joint_accuracy);
    let rows: Vec<OperatorRow> = metrics
        .by_operator
        .iter()
        .map(|(op, m)| OperatorRow {
            operator: op.clone(),
            item_accuracy: format!("{:.3}", m.item_accuracy),
        })
        .collect();
    if !rows.is_empty() {
        println!("{}", Table::new(rows));
    }
    println!("Wrote {}", metrics_path.display());
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run {
            input,
            client,
            model,
            temperature,
            out,
            resume,
            quiet,
            seed,
        } => cmd_run(input, client, model, temperature, out, resume, quiet, seed),
        Commands::Report { input, out } => cmd_report(input, out),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
