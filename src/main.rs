use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod budget;
mod canon;
mod cli;
mod config;
mod enrich;
mod error;
mod inference;
mod model;
mod pipeline;
mod sources;
mod trust;
mod util;

use budget::BudgetManager;
use canon::CanonRegistry;
use cli::{Command, ConfigArgs, RootArgs, RunArgs, StatusArgs, VerifyArgs, WorkListArgs};
use config::{
    config_stub, default_config, default_output_dir, load_config, resolve_lm_command,
    validate_config, write_config, Config,
};
use inference::backend::build_backend;
use inference::log::{load_inference_log, InferenceLog, InferenceOutcome, INFERENCE_LOG_FILE};
use inference::ValidatedInference;
use pipeline::checkpoint::{CheckpointStore, AUDIT_LOG_FILE};
use pipeline::resume::{scan_completed, ResumeState};
use pipeline::{work_list, BatchOrchestrator, RunOptions, RunReport};
use trust::TrustChainTrace;

fn main() -> Result<()> {
    let args = RootArgs::parse();
    init_tracing(args.command.verbose());

    match args.command {
        Command::Run(args) => cmd_run(args),
        Command::Status(args) => cmd_status(args),
        Command::Verify(args) => cmd_verify(args),
        Command::Config(args) => cmd_config(args),
    }
}

/// `RUST_LOG` wins; otherwise `info`, or `debug` with `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn cmd_run(args: RunArgs) -> Result<()> {
    let mut config = load_run_config(args.config.as_deref())?;
    if let Some(batch_size) = args.batch_size {
        config.pipeline.batch_size = batch_size;
    }
    if let Some(workers) = args.workers {
        config.pipeline.workers = workers;
    }
    if args.budget.is_some() {
        config.pipeline.budget = args.budget;
    }
    if args.fixtures.is_some() {
        config.sources.fixtures_dir = args.fixtures.clone();
    }
    if args.no_scrape {
        config.sources.scraping = false;
    }
    if args.no_enrich {
        config.pipeline.enrichment = false;
    }
    resolve_lm_command(&mut config, args.lm.as_deref())?;
    validate_config(&config)?;

    let names = read_work_list(&args.work)?;
    let output = output_dir(args.output.as_deref(), &config);
    let store = CheckpointStore::open(&output)?;
    let sources = sources::build_sources(&config.sources)?;
    let backend = build_backend(
        &config.inference.backend,
        config.inference.request_timeout(),
    )?;
    let budget = Arc::new(BudgetManager::new(config.pipeline.budget));
    let inference = Arc::new(
        ValidatedInference::new(backend, budget, config.inference.settings())
            .with_log(Arc::new(InferenceLog::new(&output))),
    );
    let canon = Arc::new(CanonRegistry::from_seeds(&config.canon));
    if canon.is_empty() {
        tracing::warn!("canon registry has no sources; every record will be refused");
    }
    tracing::info!(
        sources = canon.len(),
        version = canon.version(),
        "canon registry ready"
    );
    for event in canon.audit_trail() {
        tracing::debug!(event = event.as_str(), "canon registration");
    }

    let mut options = RunOptions::from_config(&config.pipeline);
    options.skip = args.skip;
    options.force_restart = args.force_restart;
    let orchestrator = BatchOrchestrator::new(options, sources, inference, canon, store);
    let report = orchestrator.run(&names)?;

    if args.json {
        let text = serde_json::to_string_pretty(&report).context("serialize run report")?;
        println!("{text}");
    } else {
        print_report(&report, &output);
    }
    Ok(())
}

fn cmd_status(args: StatusArgs) -> Result<()> {
    let config = load_run_config(args.config.as_deref())?;
    let output = output_dir(args.output.as_deref(), &config);
    let names = read_work_list(&args.work)?;
    let work = work_list(&names, &[]);
    let state = ResumeState::compute(&work.names, &scan_completed(&output)?);
    let entries = load_inference_log(&output.join(INFERENCE_LOG_FILE))?;
    let validated = entries
        .iter()
        .filter(|entry| entry.outcome == InferenceOutcome::Validated)
        .count();
    let spend: f64 = entries.iter().map(|entry| entry.cost).sum();

    if args.json {
        let value = serde_json::json!({
            "output": output,
            "total": state.total,
            "processed": state.processed,
            "remaining": state.remaining,
            "inference_calls": entries.len(),
            "inference_validated": validated,
            "inference_spend": spend,
        });
        let text = serde_json::to_string_pretty(&value).context("serialize status")?;
        println!("{text}");
        return Ok(());
    }

    println!("output: {}", output.display());
    println!("processed: {}/{}", state.processed, state.total);
    if state.is_complete() {
        println!("remaining: none");
    } else {
        println!(
            "remaining ({}): {}",
            state.remaining.len(),
            state.remaining.join(", ")
        );
    }
    println!(
        "inference: {} calls, {} validated, spend {:.4}",
        entries.len(),
        validated,
        spend
    );
    Ok(())
}

#[derive(Deserialize)]
struct AuditLine {
    execution_id: String,
    chain: TrustChainTrace,
}

fn cmd_verify(args: VerifyArgs) -> Result<()> {
    let config = load_run_config(args.config.as_deref())?;
    let path = output_dir(args.output.as_deref(), &config).join(AUDIT_LOG_FILE);
    let text =
        fs::read_to_string(&path).with_context(|| format!("read audit log {}", path.display()))?;

    let mut verified = 0usize;
    let mut corrupt = Vec::new();
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry: AuditLine = match serde_json::from_str(line) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(line = index + 1, %err, "unparsable audit line");
                corrupt.push(format!("line {}", index + 1));
                continue;
            }
        };
        if entry.execution_id == entry.chain.execution_id && entry.chain.verify_integrity() {
            verified += 1;
        } else {
            corrupt.push(entry.execution_id);
        }
    }

    println!("audit log: {}", path.display());
    println!("verified: {verified}");
    if corrupt.is_empty() {
        return Ok(());
    }
    for id in &corrupt {
        println!("corrupt: {id}");
    }
    Err(anyhow!("{} corrupt audit entries", corrupt.len()))
}

fn cmd_config(args: ConfigArgs) -> Result<()> {
    let Some(out) = args.out else {
        println!("{}", config_stub()?);
        return Ok(());
    };
    if out.exists() && !args.force {
        return Err(anyhow!(
            "{} already exists (use --force to overwrite)",
            out.display()
        ));
    }
    write_config(&out, &default_config())?;
    println!("wrote {}", out.display());
    Ok(())
}

fn load_run_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            let config = load_config(path)?;
            validate_config(&config).with_context(|| format!("invalid config {}", path.display()))?;
            Ok(config)
        }
        None => Ok(default_config()),
    }
}

/// Flag, then config, then the per-user data directory.
fn output_dir(flag: Option<&Path>, config: &Config) -> PathBuf {
    flag.map(Path::to_path_buf)
        .or_else(|| config.pipeline.output_dir.clone())
        .unwrap_or_else(default_output_dir)
}

fn read_work_list(args: &WorkListArgs) -> Result<Vec<String>> {
    let mut names = args.crates.clone();
    if let Some(path) = &args.crates_file {
        let text = fs::read_to_string(path)
            .with_context(|| format!("read crates file {}", path.display()))?;
        names.extend(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        );
    }
    if names.is_empty() {
        return Err(anyhow!("no crates given; pass names or --crates-file"));
    }
    Ok(names)
}

fn print_report(report: &RunReport, output: &Path) {
    println!(
        "crates: {} ({} already processed, {} skipped)",
        report.total, report.already_processed, report.skipped
    );
    println!("succeeded: {}", report.succeeded);
    println!("failed: {}", report.failed);
    if report.unprocessed > 0 {
        println!("unprocessed: {}", report.unprocessed);
    }
    println!("stop: {}", report.stop_reason.as_str());
    println!(
        "inference: {} calls, spend {:.4}",
        report.inference_calls, report.total_cost
    );
    if !report.audit.verdicts.is_empty() {
        let verdicts: Vec<String> = report
            .audit
            .verdicts
            .iter()
            .map(|(verdict, count)| format!("{verdict}={count}"))
            .collect();
        println!(
            "verdicts: {} (average confidence {:.2})",
            verdicts.join(" "),
            report.audit.average_confidence
        );
    }
    println!("output: {}", output.display());
    if let Some(outputs) = &report.outputs {
        println!("summary: {}", outputs.summary_report.display());
    }
}
