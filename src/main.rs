// Copyright (c) 2025-2026 the specforge contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use specforge::utils::error::{ForgeError, format_error};
use specforge::{cli, run};

#[tokio::main]
async fn main() {
    // Config is not parsed yet when early errors happen.
    let verbose = std::env::args().any(|arg| arg == "-v" || arg.starts_with("-vv"));

    if let Err(e) = run_main().await {
        display_error(&e, verbose);
        std::process::exit(1);
    }
}

/// Display an error with contextual formatting.
///
/// Tries to downcast to `ForgeError` for rich formatting, falls back to
/// anyhow's error chain display for other errors.
fn display_error(error: &anyhow::Error, verbose: bool) {
    if let Some(clap_error) = error.downcast_ref::<clap::Error>() {
        // Help and version requests also arrive here.
        let _ = clap_error.print();
        if !clap_error.use_stderr() {
            std::process::exit(0);
        }
        return;
    }

    if let Some(forge_error) = error.downcast_ref::<ForgeError>() {
        if !error.to_string().eq(&forge_error.to_string()) {
            eprintln!("\n{}", error);
        }
        eprintln!("{}", format_error(forge_error, verbose));
    } else {
        eprintln!("\n\u{26a0} Error: {}", error);

        let causes: Vec<_> = error.chain().skip(1).collect();
        if !causes.is_empty() {
            eprintln!("\nCaused by:");
            for (i, cause) in causes.iter().enumerate() {
                let prefix = if i == causes.len() - 1 {
                    "\u{2514}\u{2500}"
                } else {
                    "\u{251c}\u{2500}"
                };
                eprintln!("{} {}", prefix, cause);
            }
        }

        if verbose {
            let backtrace = error.backtrace();
            if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
                eprintln!("\nBacktrace:\n{}", backtrace);
            }
        }
    }
    eprintln!();
}

async fn run_main() -> Result<()> {
    // Parse CLI arguments (includes env vars) and track which flags were explicitly provided
    let (args, presence) = cli::args::parse()?;

    // Initialize logging first so config discovery is visible with -v
    specforge::init_logging(args.verbose, args.quiet);

    let config = cli::config::load(&args)?;

    // CLI args override config files only when explicitly provided
    let merged_config = cli::config::merge_config(&args, config, &presence);

    run(merged_config).await
}
