//! shellgate CLI - egress gateway for AI agents
//!
//! Loads configuration, wires the in-memory store into the gateway and runs
//! it until interrupted.

mod cli;
mod config;
mod error;

use clap::Parser;
use cli::{Cli, Commands, ConfigArgs, ServeArgs};
use error::{CliError, Result};
use shellgate::auth::AdminAuth;
use shellgate::vault::{generate_master_key, Vault};
use shellgate::MemoryStore;
use shellgate_proxy::config::{ADMIN_KEY_ENV, MASTER_KEY_ENV};
use shellgate_proxy::{GatewayConfig, GatewaySecrets, GatewayState};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    if let Err(e) = run(cli) {
        error!("{}", e);
        eprintln!("shellgate: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve(args) => run_serve(args),
        Commands::Keygen => run_keygen(),
        Commands::CheckConfig(args) => run_check_config(&args),
    }
}

/// Configuration with command line overrides applied.
fn effective_config(args: &ServeArgs) -> Result<GatewayConfig> {
    let (mut config, source) = config::load(args.config.config.as_deref())?;
    info!("Configuration: {}", source);
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    Ok(config)
}

/// Run the gateway until Ctrl-C
fn run_serve(args: ServeArgs) -> Result<()> {
    let config = effective_config(&args)?;
    let secrets = GatewaySecrets::from_env();
    let state = GatewayState::new(config, secrets, Arc::new(MemoryStore::new()))?.shared();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(async move {
        let handle = shellgate_proxy::start(state).await?;
        info!("shellgate {} ready on {}", env!("CARGO_PKG_VERSION"), handle.addr);

        tokio::signal::ctrl_c().await?;
        info!("Shutting down");
        handle.shutdown();
        Ok::<_, CliError>(())
    })
}

/// Print a fresh master key for `SHELLGATE_MASTER_KEY`
fn run_keygen() -> Result<()> {
    let key = generate_master_key()?;
    println!("{}", key.as_str());
    Ok(())
}

/// Validate everything `serve` would need, without binding.
fn run_check_config(args: &ConfigArgs) -> Result<()> {
    let (config, source) = config::load(args.config.as_deref())?;
    let secrets = GatewaySecrets::from_env();

    println!("config:      {}", source);
    println!("listen:      {}", config.bind_socket());
    println!(
        "timeouts:    connect {}s, execute {}s, model {}s",
        config.connect_timeout_secs, config.execute_timeout_secs, config.model_timeout_secs
    );
    println!("rate limit:  {}/min per agent", config.rate_limit_per_minute);

    let mut problems = check_secrets(&secrets)?;
    if config.connect_timeout_secs == 0 {
        problems.push("connect_timeout_secs must be greater than 0".to_string());
    }

    if problems.is_empty() {
        println!("status:      ok");
        Ok(())
    } else {
        for problem in &problems {
            println!("problem:     {}", problem);
        }
        Err(CliError::Config(format!(
            "{} configuration problem(s) found",
            problems.len()
        )))
    }
}

fn check_secrets(secrets: &GatewaySecrets) -> Result<Vec<String>> {
    let mut problems = Vec::new();
    match &secrets.master_key {
        None => problems.push(format!("{} is not set", MASTER_KEY_ENV)),
        Some(key) if !Vault::new(Some(key.clone())).is_configured() => problems.push(format!(
            "{} must be 64 hex characters (run `shellgate keygen`)",
            MASTER_KEY_ENV
        )),
        Some(_) => {}
    }
    if !AdminAuth::new(secrets.admin_key.clone())?.is_configured() {
        problems.push(format!("{} is not set", ADMIN_KEY_ENV));
    }
    Ok(problems)
}
