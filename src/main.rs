use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mend::cache::ReviewCache;
use mend::config::Config;
use mend::error::EngineError;
use mend::intent::{IntentClassifier, RequestRouter};
use mend::llm::client::HttpBackend;
use mend::review::{RepairController, ReviewVerdict};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "mend",
    about = "Review, repair, and rework source files with a model backend",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Review a file and attempt to repair any blocking issues
    Review {
        file: PathBuf,

        /// Report issues without requesting fixes
        #[arg(long)]
        no_fix: bool,

        /// Skip the verdict cache
        #[arg(long)]
        no_cache: bool,

        /// Write an accepted fix back to the file
        #[arg(long)]
        write: bool,
    },
    /// Classify an instruction and route it against a file
    Run {
        /// What to do, in plain language
        instruction: String,

        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(err) = run(args).await {
        eprintln!("Error: {:#}", err);
        let code = err
            .downcast_ref::<EngineError>()
            .map(EngineError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load();
    let api_key = config.get_api_key().ok_or_else(|| {
        anyhow::anyhow!(
            "No API key configured. Set MEND_API_KEY or add \"api_key\" to {}.",
            Config::config_location()
        )
    })?;
    let backend = Arc::new(HttpBackend::new(config.backend_url.clone(), api_key));

    match args.command {
        Command::Review {
            file,
            no_fix,
            no_cache,
            write,
        } => {
            let artifact = std::fs::read_to_string(&file)
                .with_context(|| format!("could not read {}", file.display()))?;

            let mut config = config;
            if no_fix {
                config.enable_auto_fix = false;
            }

            let mut controller = RepairController::new(backend, config);
            if !no_cache {
                controller = controller.with_cache(ReviewCache::new("."));
            }

            eprintln!("Reviewing {}...", file.display());
            let verdict = controller.validate_and_improve(&artifact).await?;
            print_verdict(&verdict);

            if write {
                if let (true, Some(code)) = (verdict.improved_accepted, &verdict.improved_code) {
                    std::fs::write(&file, code)
                        .with_context(|| format!("could not write {}", file.display()))?;
                    eprintln!("Wrote accepted fix to {}", file.display());
                } else {
                    eprintln!("No accepted fix to write.");
                }
            }

            if !verdict.valid {
                std::process::exit(1);
            }
        }
        Command::Run { instruction, file } => {
            let artifact = std::fs::read_to_string(&file)
                .with_context(|| format!("could not read {}", file.display()))?;

            let classifier = IntentClassifier::new(backend.clone(), config.clone());
            let router = RequestRouter::new(backend, config);

            let classified = classifier.classify(&instruction).await;
            eprintln!(
                "Intent: {} (via {:?}, confidence {:.2})",
                classified.intent.label(),
                classified.source,
                classified.confidence
            );

            let result = router.route(&classified, &artifact).await?;

            match &result.code {
                Some(code) => println!("{}", code),
                None => println!("{}", result.text),
            }
        }
    }

    Ok(())
}

fn print_verdict(verdict: &ReviewVerdict) {
    if verdict.valid && verdict.issues.is_empty() {
        println!("Clean: no issues found.");
    } else if verdict.valid {
        println!("Valid, with {} non-blocking issue(s):", verdict.issues.len());
    } else {
        println!("Invalid: {} issue(s) found:", verdict.issues.len());
    }

    for issue in &verdict.issues {
        let location = issue
            .location
            .as_deref()
            .map(|l| format!(" ({})", l))
            .unwrap_or_default();
        println!(
            "  [{}] [{}] {}{}",
            issue.severity.label(),
            issue.category.label(),
            issue.message,
            location
        );
    }

    if !verdict.suggestions.is_empty() {
        println!("\nSuggestions:");
        for suggestion in &verdict.suggestions {
            println!("  - {}", suggestion);
        }
    }

    if verdict.low_confidence {
        println!("\nNote: review output was salvaged from unstructured text; treat with care.");
    }

    if let Some(code) = &verdict.improved_code {
        if verdict.improved_accepted {
            println!("\nAccepted fix:\n{}", code);
        } else {
            println!("\nLast attempted (unaccepted) fix:\n{}", code);
        }
    }
}
