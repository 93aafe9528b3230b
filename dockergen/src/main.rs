//! Dockerfile generator CLI.
//!
//! Analyzes a single script, generates a Dockerfile for it, builds and probes
//! the image, and refines the Dockerfile until it passes or a bound is hit.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use dockergen::core::budget::Cost;
use dockergen::core::error::ErrorTag;
use dockergen::exit_codes;
use dockergen::io::config::{GeneratorConfig, load_config};
use dockergen::io::generation::OpenAiService;
use dockergen::io::sandbox::DockerSandbox;
use dockergen::logging;
use dockergen::looping::{RunOptions, RunSummary, Workflow};
use dockergen::step::RunRequest;
use tracing::warn;

/// Budgets above this need `--allow-high-budget`.
const HIGH_BUDGET_USD: f64 = 5.0;

#[derive(Parser, Debug)]
#[command(
    name = "dockergen",
    version,
    about = "Generate, build and validate a Dockerfile for a single script"
)]
struct Cli {
    /// API key for the generation service.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: String,
    /// Script to containerize.
    #[arg(long)]
    script_path: PathBuf,
    /// Example invocation arguments, checked inside the container.
    #[arg(long = "example", visible_alias = "example-usage", allow_hyphen_values = true)]
    example: Option<String>,
    /// Directory for the Dockerfile and run reports.
    #[arg(long = "output", visible_alias = "output-dir", default_value = "./docker_output")]
    output: PathBuf,
    /// Spend cap in USD for generation calls.
    #[arg(long, default_value_t = 0.10, value_parser = parse_budget)]
    budget: f64,
    /// Accept a budget above $5.00.
    #[arg(long)]
    allow_high_budget: bool,
    /// TOML config file; defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the configured model.
    #[arg(long)]
    model: Option<String>,
    /// Override the configured refinement cap.
    #[arg(long)]
    max_refinements: Option<u32>,
    /// Keep the validated image after a successful run.
    #[arg(long)]
    keep_image: bool,
    /// Debug-level diagnostics on stderr.
    #[arg(short, long)]
    verbose: bool,
}

fn parse_budget(raw: &str) -> Result<f64, String> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("invalid budget: {raw}"))?;
    if !value.is_finite() || value <= 0.0 {
        return Err("budget must be greater than 0".to_string());
    }
    Ok(value)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            exit_codes::FAILURE
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    check_budget(cli.budget, cli.allow_high_budget)?;
    let config = resolve_config(&cli)?;
    let request = RunRequest::load(&cli.script_path, cli.example.as_deref(), &cli.output)?;
    let api_key = check_api_key(&cli.api_key)?;

    let sandbox = DockerSandbox::new(
        config.sandbox.docker_bin.clone(),
        config.build_timeout(),
        config.sandbox.output_limit_bytes,
    );
    sandbox
        .check_available()
        .await
        .context("docker is not available")?;
    let service = OpenAiService::new(
        api_key,
        config.api_base_url.clone(),
        config.model.clone(),
        config.generation_timeout(),
    );
    let options = RunOptions {
        budget: Cost::from_usd(cli.budget),
        keep_image: cli.keep_image,
    };
    let workflow = Workflow::new(service, sandbox, &config, &options);

    println!("Generating Dockerfile for {}", request.script_path.display());
    let outcome = workflow
        .run_until(request, interrupt_signal(), |message| println!("  {message}"))
        .await;

    print_report(&outcome.summary, &cli.output);
    Ok(match (outcome.summary.success, outcome.summary.error_kind) {
        (true, _) => exit_codes::OK,
        (false, Some(ErrorTag::Interrupted)) => exit_codes::INTERRUPTED,
        (false, _) => exit_codes::FAILURE,
    })
}

/// Resolves on Ctrl-C. Never resolves when the handler cannot be installed.
async fn interrupt_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(err = %err, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    eprintln!("Interrupted, cleaning up");
}

fn check_budget(budget: f64, allow_high: bool) -> Result<()> {
    if budget > HIGH_BUDGET_USD && !allow_high {
        bail!(
            "budget ${budget:.2} is unusually high; pass --allow-high-budget to use it anyway"
        );
    }
    Ok(())
}

/// Trimmed key; rejects values that cannot be an OpenAI secret key.
fn check_api_key(raw: &str) -> Result<&str> {
    let key = raw.trim();
    if key.is_empty() {
        bail!("--api-key must be non-empty");
    }
    if !key.starts_with("sk-") {
        bail!("invalid API key format: expected a key starting with \"sk-\"");
    }
    Ok(key)
}

/// File config (or defaults) with CLI overrides applied, then validated.
fn resolve_config(cli: &Cli) -> Result<GeneratorConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GeneratorConfig::default(),
    };
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    if let Some(max) = cli.max_refinements {
        config.max_refinements = max;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn print_report(summary: &RunSummary, output_dir: &Path) {
    println!();
    if summary.success {
        println!("Dockerfile generated and validated");
    } else {
        println!("Dockerfile generation failed");
    }
    if let Some(path) = &summary.dockerfile_path {
        println!("Dockerfile: {}", path.display());
    }
    if let Some(image) = &summary.artifact_id {
        println!("Image kept: {image}");
    }
    println!(
        "Refinements: {}/{}",
        summary.refinement_count, summary.max_refinements
    );
    for probe in &summary.probes {
        let mark = if probe.passed { "PASS" } else { "FAIL" };
        println!("  [{mark}] {}", probe.probe.name());
    }
    println!(
        "Cost: ${:.4} of ${:.2}",
        summary.total_cost_usd, summary.budget_usd
    );
    if let Some(error) = &summary.error {
        println!("Error: {error}");
    }
    println!("Reports: {}", output_dir.display());
}
