//! CLI argument definitions for shellgate

use clap::{Args, Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

/// shellgate - egress gateway for AI agents
///
/// Holds agent credentials, injects them into outbound calls and keeps an
/// audit trail of everything agents reach.
#[derive(Parser, Debug)]
#[command(name = "shellgate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the gateway until interrupted
    #[command(after_help = "ENVIRONMENT:
    SHELLGATE_MASTER_KEY   64 hex characters; encrypts stored credentials
    SHELLGATE_ADMIN_KEY    admin API key and session signing secret
    SHELLGATE_CONFIG       config file used when --config is absent
    RUST_LOG               log filter (default: info)

EXAMPLES:
    # Listen on the default 0.0.0.0:3000
    shellgate serve

    # Local only, custom port
    shellgate serve --bind 127.0.0.1 --port 8080
")]
    Serve(ServeArgs),

    /// Print a fresh master key
    Keygen,

    /// Validate configuration and key material without binding
    CheckConfig(ConfigArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Path to a JSON config file
    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Address to bind (overrides the config file)
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<IpAddr>,

    /// Port to bind (overrides the config file)
    #[arg(long, short = 'p', value_name = "PORT")]
    pub port: Option<u16>,
}
