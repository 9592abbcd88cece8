//! SCC - sandboxed agent launcher.
//!
//! Errors carry a machine-readable kind that maps to the stable exit-code
//! contract; rendering (message plus suggested action) happens here, at the
//! edge.

use clap::Parser;

use scc_cli::cli::{Cli, ColorMode, dispatch_command};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // SAFETY: environment mutation happens before any threads are spawned
    // by the commands themselves.
    match cli.color {
        ColorMode::Never => unsafe { std::env::set_var("NO_COLOR", "1") },
        ColorMode::Always => unsafe { std::env::remove_var("NO_COLOR") },
        ColorMode::Auto => {}
    }

    init_logging(&cli);

    match dispatch_command(cli).await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            if let Some(suggestion) = &err.suggestion {
                eprintln!("  hint: {suggestion}");
            }
            std::process::exit(err.exit_code());
        }
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    let filter = std::env::var("RUST_LOG")
        .or_else(|_| std::env::var("SCC_LOG_LEVEL"))
        .unwrap_or_else(|_| {
            format!(
                "warn,scc_common={level},scc_config={level},scc_policy={level},\
                 scc_marketplace={level},scc_workspace={level},scc_storage={level},\
                 scc_sandbox={level},scc_cli={level}"
            )
        });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
