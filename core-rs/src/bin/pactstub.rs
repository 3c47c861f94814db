//! pactstub - manage pact mock services from the command line
//!
//! Starts, inspects and stops the same stubs the test harness uses, so a
//! developer can keep them warm between test runs or clean up after one.

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pact_harness::stub::is_process_running;
use pact_harness::{
    split_bulk_file, HarnessConfig, PactHarness, RetryPolicy, StopOutcome, StubSupervisor,
};

#[derive(Parser)]
#[command(name = "pactstub")]
#[command(version)]
#[command(about = "Pact mock service supervisor", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start (or reuse) the mock service for a provider/consumer pair
    Start {
        provider: String,
        consumer: String,
    },
    /// Stop the mock service for a provider/consumer pair
    Stop {
        provider: String,
        consumer: String,
    },
    /// Stop every mock service recorded in the pid directory
    StopAll,
    /// Show recorded mock services and whether they still answer
    Status,
    /// Verify that all interactions registered on a stub were exercised
    Verify {
        provider: String,
        consumer: String,
        /// Maximum verification attempts
        #[arg(long, default_value_t = 1)]
        attempts: u32,
        /// Delay between attempts in milliseconds
        #[arg(long, default_value_t = 200)]
        delay_ms: u64,
        /// Overall timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Split bulk contract files into one file per interaction
    Split {
        /// Bulk contract files
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Output directory
        #[arg(long, short)]
        out: PathBuf,
    },
    /// Serve stubs for the given contracts until Ctrl-C
    Serve {
        /// Contract names relative to the contracts directory (default: all)
        contracts: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let config = HarnessConfig::from_env().context("loading harness configuration")?;

    match cli.command {
        Commands::Start { provider, consumer } => {
            let supervisor = StubSupervisor::new(config)?;
            let url = supervisor.ensure_running(&provider, &consumer).await?;

            println!("\n✓ Mock service for {}/{} running at {}", provider, consumer, url);
        }

        Commands::Stop { provider, consumer } => {
            let supervisor = StubSupervisor::new(config)?;

            match supervisor.stop(&provider, &consumer).await? {
                StopOutcome::NotRunning => {
                    println!("Mock service for {}/{} was not running", provider, consumer)
                }
                outcome => println!(
                    "✓ Mock service for {}/{} stopped ({})",
                    provider,
                    consumer,
                    describe(outcome)
                ),
            }
        }

        Commands::StopAll => {
            let supervisor = StubSupervisor::new(config)?;
            let adopted = supervisor.adopt_persisted().await?;

            if adopted.is_empty() {
                println!("No running mock services found.");
                return Ok(());
            }

            for (key, outcome) in supervisor.stop_all().await? {
                println!("✓ {} stopped ({})", key, describe(outcome));
            }
        }

        Commands::Status => {
            handle_status(config).await?;
        }

        Commands::Verify {
            provider,
            consumer,
            attempts,
            delay_ms,
            timeout_secs,
        } => {
            let supervisor = StubSupervisor::new(config)?;
            supervisor.adopt_persisted().await?;

            let mut policy = RetryPolicy::new(attempts, Duration::from_millis(delay_ms));
            if let Some(secs) = timeout_secs {
                policy = policy.with_timeout(Duration::from_secs(secs));
            }

            match supervisor
                .verify_interactions(&provider, &consumer, policy)
                .await
            {
                Ok(()) => println!("✓ All interactions for {}/{} matched", provider, consumer),
                Err(e) => {
                    eprintln!("{} {}", "✗".red(), e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Split { files, out } => {
            let mut total = 0;
            for file in &files {
                let written = split_bulk_file(file, &out, &[])
                    .with_context(|| format!("splitting {}", file.display()))?;
                println!("{} → {} file(s)", file.display(), written.len());
                total += written.len();
            }
            println!("\n✓ Wrote {} contract(s) to {}", total, out.display());
        }

        Commands::Serve { contracts } => {
            handle_serve(config, contracts).await?;
        }
    }

    Ok(())
}

/// Handle `pactstub status`
async fn handle_status(config: HarnessConfig) -> anyhow::Result<()> {
    let supervisor = StubSupervisor::new(config)?;
    let records = supervisor.identity().list()?;

    if records.is_empty() {
        println!("No mock services recorded in {}", supervisor.identity().dir().display());
        return Ok(());
    }

    println!(
        "{:<24} {:<16} {:<8} {:<8} {:<32} {}",
        "PROVIDER", "CONSUMER", "PID", "PORT", "BASE URL", "STATE"
    );

    for record in records {
        let state = if !is_process_running(record.pid) {
            "dead".red()
        } else if supervisor.client().ping(&record.base_url).await.is_ok() {
            "running".green()
        } else {
            "unresponsive".yellow()
        };

        println!(
            "{:<24} {:<16} {:<8} {:<8} {:<32} {}",
            record.provider, record.consumer, record.pid, record.port, record.base_url, state
        );
    }

    Ok(())
}

/// Handle `pactstub serve`
async fn handle_serve(config: HarnessConfig, contracts: Vec<String>) -> anyhow::Result<()> {
    let supervisor = StubSupervisor::new(config)?;
    let harness = PactHarness::new(&supervisor);

    let names = if contracts.is_empty() {
        harness.loader().discover_names()?
    } else {
        contracts
    };
    if names.is_empty() {
        anyhow::bail!("no contracts found in {}", harness.loader().dir().display());
    }

    for name in &names {
        harness
            .add_pact(name)
            .await
            .with_context(|| format!("serving contract {}", name))?;
    }

    for descriptor in supervisor.running() {
        println!(
            "✓ {} → {}",
            descriptor.key(),
            descriptor.base_url().bold()
        );
    }
    println!("\nServing {} contract(s), press Ctrl-C to stop", names.len());

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        eprintln!("[pactstub] Received SIGTERM/SIGINT, shutting down...");
        shutdown_clone.store(true, Ordering::SeqCst);
    })?;

    while !shutdown.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let stopped = harness.teardown().await?;
    if stopped.is_empty() && supervisor.config().keep_alive {
        println!("Keep-alive set, mock services left running");
    } else {
        println!("✓ Stopped {} mock service(s)", stopped.len());
    }

    Ok(())
}

fn describe(outcome: StopOutcome) -> &'static str {
    match outcome {
        StopOutcome::Graceful => "graceful",
        StopOutcome::Escalated => "killed after SIGTERM timeout",
        StopOutcome::AlreadyExited => "already exited",
        StopOutcome::NotRunning => "not running",
    }
}
