//! Punchcard CLI - identity diagnostics.
//!
//! # Usage
//!
//! ```bash
//! # Resolve the identity behind a token and show the gate decision
//! punchcard-cli whoami --token "$TOKEN"
//!
//! # Check what the onboarding route would do
//! punchcard-cli whoami --token "$TOKEN" --route /onboarding --api http://localhost:4000
//! ```
//!
//! # Commands
//!
//! - `whoami` - Resolve (and on first contact provision) an identity

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use url::Url;

mod commands;

#[derive(Parser)]
#[command(name = "punchcard-cli")]
#[command(author, version, about = "Punchcard CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the identity for a bearer token and print the gate decision
    Whoami {
        /// Bearer token issued by the identity provider
        #[arg(short, long, env = "PUNCHCARD_TOKEN", hide_env_values = true)]
        token: String,

        /// Route to evaluate the gate for
        #[arg(short, long, default_value = "/dashboard")]
        route: String,

        /// Punchcard backend base URL
        #[arg(long, env = "PUNCHCARD_API_BASE_URL")]
        api: Url,

        /// Display name used if the identity has to be provisioned
        #[arg(long)]
        display_name: Option<String>,

        /// Development-only customer ID fallback
        #[arg(long, env = "CONSOLE_FALLBACK_CUSTOMER_ID")]
        fallback_customer_id: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "warn".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Whoami {
            token,
            route,
            api,
            display_name,
            fallback_customer_id,
        } => {
            let args = commands::whoami::WhoamiArgs {
                token,
                route,
                api,
                display_name,
                fallback_customer_id,
            };
            commands::whoami::run(args).await?;
        }
    }
    Ok(())
}
