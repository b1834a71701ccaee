use anyhow::Result;
use clap::Parser;
use covgen::config::Config;
use covgen::deficiency::{discover_sources, select};
use covgen::lcov;
use covgen::ollama::OllamaClient;
use covgen::runloop::{self, FileOutcome, RunConfig, RunContext, RunResult, RunStatus};
use covgen::toolchain::NgToolchain;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "covgen",
    about = "Close per-file coverage gaps by generating unit tests with a local LLM",
    version
)]
struct Args {
    /// Path to the project under test (defaults to current directory)
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Minimum required percentage for lines and branches
    #[arg(long, default_value = "90")]
    min: f64,

    /// Maximum synthesis attempts across the whole run
    #[arg(long, default_value = "10")]
    max_iters: u32,

    /// Ollama model tag (overrides config)
    #[arg(long)]
    model: Option<String>,

    /// Ollama host URL (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Synthesis attempts per file before giving up (overrides config)
    #[arg(long)]
    retries: Option<u32>,

    /// Seconds to wait for one model response (overrides config)
    #[arg(long)]
    gen_timeout: Option<u64>,

    /// Seconds to wait for one test run (overrides config)
    #[arg(long)]
    test_timeout: Option<u64>,

    /// Parse the existing coverage report and list deficient files, without
    /// running tests or the model
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let code = match run_cli(args).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            2
        }
    };
    std::process::exit(code);
}

async fn run_cli(args: Args) -> Result<i32> {
    let project_root = args.path.canonicalize()?;
    let config = Config::load();

    if args.check {
        return check_only(&project_root, args.min);
    }

    let run_config = RunConfig {
        min_pct: args.min,
        max_iters: args.max_iters,
        retries_per_file: args.retries.unwrap_or(config.retries_per_file),
    };
    let model = args.model.unwrap_or_else(|| config.model.clone());
    let host = args.host.unwrap_or_else(|| config.host.clone());
    let gen_timeout = Duration::from_secs(args.gen_timeout.unwrap_or(config.gen_timeout_secs));
    let test_timeout = Duration::from_secs(args.test_timeout.unwrap_or(config.test_timeout_secs));

    eprintln!("🧪 covgen: target >= {:.0}% lines and branches", args.min);
    eprintln!("  project: {}", project_root.display());
    eprintln!("  model: {} @ {}", model, host);

    let generator = OllamaClient::new(&host, &model, gen_timeout);
    let toolchain = NgToolchain::new(project_root.clone(), test_timeout);
    let ctx = RunContext::new(project_root, run_config);

    // First ctrl-c requests a graceful stop between attempts; the run loop
    // checks the flag before starting new work.
    let interrupted = ctx.interrupted.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n  interrupt received; finishing current attempt, then stopping");
            interrupted.store(true, Ordering::Relaxed);
        }
    });

    eprintln!("\n  measuring current coverage...");
    let result = runloop::run(&ctx, &generator, &toolchain).await?;
    print_summary(&result, args.min);
    Ok(result.exit_code())
}

/// --check: report-only mode. Reads the lcov file the last test run left
/// behind and lists what a full run would queue.
fn check_only(project_root: &std::path::Path, min_pct: f64) -> Result<i32> {
    let report = lcov::load_report(project_root)?;
    let sources = discover_sources(project_root);
    let queue = select(&report, min_pct, &sources);

    if queue.is_empty() {
        println!("OK: all files meet >= {:.0}% lines and branches", min_pct);
        return Ok(0);
    }

    println!("{} file(s) below {:.0}%:", queue.len(), min_pct);
    for d in &queue {
        if d.unmeasured {
            println!("  - {}: no coverage entry (no spec yet)", d.path);
        } else {
            println!(
                "  - {}: lines {:.2}%, branches {:.2}%",
                d.path,
                d.record.line_pct(),
                d.record.branch_pct()
            );
        }
    }
    Ok(1)
}

fn print_summary(result: &RunResult, min_pct: f64) {
    println!();
    println!("── run summary ──────────────────────────────");
    for file in &result.files {
        match &file.outcome {
            FileOutcome::Fixed { attempts } => {
                println!("  ✔ {} ({} attempt(s))", file.path, attempts);
            }
            FileOutcome::AlreadyCovered => {
                println!("  ✔ {} (already covered)", file.path);
            }
            FileOutcome::Abandoned { reason, attempts } => {
                println!(
                    "  ✘ {} (abandoned after {} attempt(s): {})",
                    file.path, attempts, reason
                );
            }
        }
    }
    if result.files.is_empty() {
        println!("  nothing to do");
    }

    println!(
        "  attempts used: {} | aggregate before: {:.2}% lines / {:.2}% branches",
        result.attempts_used,
        result.aggregate_before.line_pct(),
        result.aggregate_before.branch_pct()
    );
    if let Some(after) = &result.aggregate_after {
        println!(
            "  aggregate after: {:.2}% lines / {:.2}% branches",
            after.line_pct(),
            after.branch_pct()
        );
    }

    match &result.status {
        RunStatus::Success => {
            println!("  OK: all files meet >= {:.0}% lines and branches", min_pct);
        }
        RunStatus::Shortfall => {
            println!("  FAIL: coverage goal not met");
        }
        RunStatus::Fatal(reason) => {
            println!("  FATAL: {}", reason);
        }
    }
}
