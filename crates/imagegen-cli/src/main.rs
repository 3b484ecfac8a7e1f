use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use imagegen_contracts::providers::Operation;
use imagegen_engine::{
    default_diagnostic_names, default_provider_registry, run_diagnostics, DiagnosticOutcome,
    DiagnosticsReport, EngineConfig,
};
use serde_json::json;
use tracing::Level;

#[derive(Debug, Parser)]
#[command(name = "imagegen", version, about = "Image generation provider toolkit")]
struct Cli {
    /// Log request handling at debug level (stderr).
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a small generation against every configured provider.
    Check(CheckArgs),
    /// Show which providers suit a prompt.
    Recommend(RecommendArgs),
}

#[derive(Debug, Parser)]
struct CheckArgs {
    /// Comma-separated provider names; defaults to all of them.
    #[arg(long, value_delimiter = ',')]
    providers: Vec<String>,
}

#[derive(Debug, Parser)]
struct RecommendArgs {
    #[arg(required = true, num_args = 1..)]
    prompt: Vec<String>,
    #[arg(long)]
    json: bool,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("imagegen error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = EngineConfig::from_env();
    match cli.command {
        Command::Check(args) => run_check(args, &config),
        Command::Recommend(args) => run_recommend(args, &config),
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_check(args: CheckArgs, config: &EngineConfig) -> Result<i32> {
    let registry = default_provider_registry(config);
    let names = if args.providers.is_empty() {
        default_diagnostic_names()
    } else {
        args.providers
            .iter()
            .map(|name| name.trim().to_ascii_lowercase())
            .filter(|name| !name.is_empty())
            .collect()
    };
    let report = run_diagnostics(&registry, &names).context("provider diagnostics failed")?;
    print_report(&report);
    Ok(if report.any_succeeded() { 0 } else { 1 })
}

fn print_report(report: &DiagnosticsReport) {
    println!("{:<10} {:<8} {:>9}  DETAIL", "PROVIDER", "STATUS", "LATENCY");
    for entry in &report.entries {
        let (status, detail) = match &entry.outcome {
            DiagnosticOutcome::Succeeded { images, bytes } => {
                ("ok", format!("{images} image(s), {bytes} bytes"))
            }
            DiagnosticOutcome::Failed { error } => ("failed", error.clone()),
            DiagnosticOutcome::Skipped { reason } => ("skipped", reason.clone()),
        };
        let latency = if entry.latency.is_zero() {
            "-".to_string()
        } else {
            format!("{:.2}s", entry.latency.as_secs_f64())
        };
        println!("{:<10} {:<8} {:>9}  {}", entry.provider, status, latency, detail);
    }
    println!(
        "\n{} succeeded, {} failed, {} skipped",
        report.succeeded, report.failed, report.skipped
    );
    if !report.any_succeeded() {
        println!("no provider produced an image; check the API keys listed above");
    }
}

fn run_recommend(args: RecommendArgs, config: &EngineConfig) -> Result<i32> {
    let prompt = args.prompt.join(" ");
    let registry = default_provider_registry(config);
    let recommendations = registry.selector().recommendations(&prompt);
    let selected = registry
        .select(&prompt, Operation::Generate, None)
        .map(|provider| provider.name().to_string());

    if args.json {
        let payload = json!({
            "prompt": prompt,
            "recommendations": recommendations,
            "configured": registry.configured_names(),
            "selected": selected,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&payload).context("failed to encode recommendations")?
        );
        return Ok(0);
    }

    println!("{}", recommendations.reason);
    println!("primary:   {}", recommendations.primary.join(", "));
    println!("secondary: {}", recommendations.secondary.join(", "));
    match selected {
        Some(name) => println!("selected:  {name} (among configured providers)"),
        None => println!("selected:  none (no provider is configured)"),
    }
    Ok(0)
}
