//! Token utility for Corkboard.
//!
//! `corkctl token <bucket>` mints a connection token for a bucket using the
//! same secret resolution as the server, so a token minted on the host that
//! runs `corkboardd` is accepted by it.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use corkboard_core::config::AppConfig;
use corkboard_core::{Bucket, TokenSigner};
use figment::Figment;
use figment::providers::{Env, Format, Toml};

#[derive(Parser)]
#[command(name = "corkctl")]
#[command(about = "Token utility for Corkboard")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "CORKBOARD_CONFIG", default_value = "config/corkboard.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mint a signed connection token for a bucket
    Token {
        /// Bucket the token grants access to; prints nothing when omitted
        bucket: Option<String>,
    },
}

fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if std::path::Path::new(path).exists() {
        figment = figment.merge(Toml::file(path));
    }
    let mut config: AppConfig = figment
        .merge(Env::prefixed("CORKBOARD_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .apply_env_overrides()
        .context("invalid environment override")?;
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Token { bucket: None } => Ok(()),
        Commands::Token {
            bucket: Some(bucket),
        } => {
            let bucket = Bucket::parse(&bucket).context("invalid bucket name")?;
            let config = load_config(&cli.config)?;
            let signer = TokenSigner::new(config.auth.token_secret.as_bytes());

            println!("{bucket}");
            println!("{}", signer.mint(&bucket));
            Ok(())
        }
    }
}
