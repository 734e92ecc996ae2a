use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "pulsewatch")]
#[command(version, about = "Track review builds, trigger CI hooks and supervise the resulting tasks")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = pulsewatch::config::CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the pipeline until interrupted
    Run {
        /// Address the webhook server binds to
        #[arg(long)]
        bind: Option<String>,

        /// Port the webhook server listens on
        #[arg(short, long)]
        port: Option<u16>,

        /// Do not start the webhook server
        #[arg(long)]
        no_web: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default pulsewatch.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run { bind, port, no_web } => {
            cmd::cmd_run(&cli, bind.clone(), *port, *no_web).await?;
        }
        Commands::Config { command } => cmd::cmd_config(&cli.config, command.clone())?,
    }

    Ok(())
}
