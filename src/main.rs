mod cli;
mod crawl;

use std::process::ExitCode;

use clap::Parser;
use tracing::error;

// mimalloc releases memory back to the OS more aggressively than glibc's
// allocator under the sustained allocation churn of a long crawl.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use sitecrawler_core::config::{apply_env_overrides, AppConfig};

use crate::cli::Cli;

fn main() -> ExitCode {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start tokio runtime: {e}");
            return ExitCode::from(1);
        }
    };
    runtime.block_on(async_main())
}

async fn async_main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(msg) = cli.validate() {
        eprintln!("error: {msg}");
        return ExitCode::from(2);
    }

    let filter = if cli.quiet {
        "warn"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let mut config = match std::fs::read_to_string(&cli.config) {
        Ok(raw) => match toml::from_str::<AppConfig>(&raw) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("error: failed to parse {}: {e}", cli.config);
                return ExitCode::from(2);
            }
        },
        Err(_) => AppConfig::default(),
    };

    apply_env_overrides(&mut config);
    crawl::apply_cli_overrides(&mut config, &cli);

    let result = crawl::run(config, cli.seeds).await;

    match result {
        Ok(summary) => {
            summary.print();
            if summary.interrupted {
                ExitCode::from(130)
            } else {
                ExitCode::from(0)
            }
        }
        Err(e) => {
            error!(error = %e, "crawl aborted");
            ExitCode::from(1)
        }
    }
}
