//! Runhost CLI

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use runhost_config::{load_config, HostConfig};
use runhost_core::Value;
use runhost_engine::ExecutionService;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "runhost")]
#[command(about = "Embedded Rhai scripting host", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script file, inline script or command
    Run(RunArgs),

    /// List resolvable commands and their parameters
    Functions {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Validate configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "runhost.yaml")]
        config: PathBuf,
    },

    /// Show version information
    Version,
}

#[derive(Args)]
#[command(group(clap::ArgGroup::new("target").required(true)))]
struct RunArgs {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Script file to run
    #[arg(short, long, group = "target")]
    script: Option<PathBuf>,

    /// Inline script text
    #[arg(short, long, group = "target")]
    eval: Option<String>,

    /// Command to invoke
    #[arg(long, group = "target")]
    command: Option<String>,

    /// Command parameter as name=value (value parsed as JSON, else string)
    #[arg(short, long = "param", value_parser = parse_param)]
    params: Vec<(String, Value)>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", env = "RUNHOST_LOG")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            init_tracing(&args.log_level)?;
            run(args).await
        }

        Commands::Functions { config } => {
            init_tracing("warn")?;
            let service = ExecutionService::new(host_config(config)?)?;
            let context = service.get_execution_context_async(None).await?;

            let context = context.lock().await;
            for (name, signature) in context.functions()? {
                println!("{name}{signature}");
            }
            drop(context);

            service.shutdown().await;
            Ok(())
        }

        Commands::Validate { config } => {
            tracing_subscriber::fmt().with_target(false).init();

            tracing::info!("Validating configuration: {}", config.display());

            match load_config(&config) {
                Ok(cfg) => {
                    tracing::info!("✓ Configuration is valid");
                    tracing::info!("  Script sources: {}", cfg.scripts.len());
                    tracing::info!("  Max concurrency: {}", cfg.max_concurrency);
                    tracing::info!("  Log mode: {:?}", cfg.log_mode);
                    tracing::info!("  Execution policy: {:?}", cfg.execution_policy);
                    Ok(())
                }
                Err(e) => {
                    tracing::error!("✗ Configuration validation failed: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Version => {
            println!("Runhost scripting host");
            println!("Version: {}", env!("CARGO_PKG_VERSION"));
            println!("Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));
            Ok(())
        }
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let service = ExecutionService::new(host_config(args.config)?)?;
    let context = service.get_execution_context_async(None).await?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received Ctrl+C, stopping run");
                on_interrupt.cancel();
            }
            Err(err) => tracing::error!("Failed to listen for Ctrl+C: {}", err),
        }
    });

    let result = {
        let mut context = context.lock().await;
        if let Some(script) = args.script {
            context.run_script_from_file_async(script, None, &cancel).await
        } else if let Some(text) = args.eval {
            context.run_script_async(text, &cancel).await
        } else if let Some(command) = args.command {
            let params: HashMap<String, Value> = args.params.into_iter().collect();
            context
                .run_command_async(&command, Some(&params), &cancel)
                .await
        } else {
            anyhow::bail!("one of --script, --eval or --command is required");
        }
    };

    service.shutdown().await;

    match result {
        Ok(output) => {
            for value in output {
                println!("{}", serde_json::to_string(&value)?);
            }
            Ok(())
        }
        Err(e) if e.is_cancelled() => {
            tracing::warn!("Run cancelled");
            std::process::exit(130);
        }
        Err(e) => Err(e.into()),
    }
}

fn host_config(path: Option<PathBuf>) -> Result<HostConfig> {
    match path {
        Some(path) => load_config(&path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Ok(HostConfig::default()),
    }
}

fn parse_param(raw: &str) -> std::result::Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.trim().to_string(), value))
}

fn init_tracing(level: &str) -> Result<()> {
    let filter = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_writer(std::io::stderr),
        )
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(filter.into()))
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_param() {
        assert_eq!(parse_param("count=3").unwrap(), ("count".to_string(), json!(3)));
        assert_eq!(
            parse_param("name=web").unwrap(),
            ("name".to_string(), json!("web"))
        );
        assert_eq!(
            parse_param("opts={\"a\":1}").unwrap(),
            ("opts".to_string(), json!({"a": 1}))
        );
        assert!(parse_param("missing").is_err());
    }

    #[test]
    fn test_cli_requires_run_target() {
        assert!(Cli::try_parse_from(["runhost", "run"]).is_err());
        assert!(Cli::try_parse_from(["runhost", "run", "--eval", "1", "--command", "x"]).is_err());
        assert!(Cli::try_parse_from(["runhost", "run", "--command", "x", "-p", "a=1"]).is_ok());
    }
}
