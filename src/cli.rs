//! CLI argument parsing.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "relay", version, about = "Multi-provider LLM reverse proxy")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.yaml", env = "RELAY_CONFIG")]
    pub config: String,

    /// Listen host
    #[arg(long, env = "RELAY_HOST")]
    pub host: Option<String>,

    /// Listen port
    #[arg(long, env = "RELAY_PORT")]
    pub port: Option<u16>,

    /// Log level
    #[arg(long, default_value = "info", env = "RELAY_LOG_LEVEL")]
    pub log_level: String,
}
