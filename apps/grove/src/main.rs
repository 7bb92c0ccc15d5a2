//! # Grove - Graph Object Store
//!
//! The command line front end of grove-core.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │            apps/grove (THE BINARY)        │
//! │                                           │
//! │   ┌────────────┐      ┌───────────────┐   │
//! │   │    CLI     │      │  TOML config  │   │
//! │   │   (clap)   │      │ (engine spec) │   │
//! │   └─────┬──────┘      └───────┬───────┘   │
//! │         └──────────┬──────────┘           │
//! │                    ▼                      │
//! │            ┌───────────────┐              │
//! │            │  grove-core   │              │
//! │            │  (THE STORE)  │              │
//! │            └───────────────┘              │
//! └───────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! grove status
//! grove build -p plan.json
//! grove inspect -t Item
//! grove edges -p lists -s catalog/books
//! grove publish items-by-price -w price=12
//! grove -B volatile -D catalog.grvx export -o copy.grvx
//! ```

use clap::Parser;
use grove::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // GROVE_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("GROVE_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let cli = cli::Cli::parse();

    let default_filter = if cli.verbose {
        "grove=debug,grove_core=debug"
    } else {
        "grove=info,grove_core=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the Grove startup banner.
fn print_banner() {
    println!(
        r#"
   ____ ____   _____     _______
  / ___|  _ \ / _ \ \   / / ____|
 | |  _| |_) | | | \ \ / /|  _|
 | |_| |  _ <| |_| |\ V / | |___
  \____|_| \_\\___/  \_/  |_____|

  Graph Object Store v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
