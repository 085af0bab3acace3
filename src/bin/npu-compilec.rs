//! CLI front-end over the compiler library.

use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use npu_compile::capabilities::Capabilities;
use npu_compile::config::CompilationOptions;

#[derive(Parser)]
#[command(name = "npu-compilec", about = "NPU graph compiler", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a capabilities TOML file and print it back out as JSON.
    InspectCapabilities {
        #[arg(long)]
        capabilities: PathBuf,
    },
    /// Validate a compilation-options TOML file.
    InspectOptions {
        #[arg(long)]
        options: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::InspectCapabilities { capabilities } => {
            let text = fs::read_to_string(&capabilities)?;
            let caps = Capabilities::from_toml_str(&text)?;
            println!("{}", serde_json::to_string_pretty(&caps)?);
        }
        Command::InspectOptions { options } => {
            let text = fs::read_to_string(&options)?;
            let opts = CompilationOptions::from_toml_str(&text)?;
            println!("{}", serde_json::to_string_pretty(&opts)?);
        }
    }
    Ok(())
}
