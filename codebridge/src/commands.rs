//! CLI command handlers.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use codebridge_privacy::TokenizationService;
use serde_json::{json, Value};

use crate::catalog::registry_from_catalog;
use crate::cli::{Cli, Commands};
use crate::{Orchestrator, OrchestratorConfig};

/// Session id used by `tokenize`; the vault lives only for this command.
const CLI_SESSION: &str = "cli";

/// Parse arguments and dispatch.
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            user,
            language,
            catalog,
            timeout,
            max_memory,
            cpu,
            backend,
        } => {
            let code = read_arg_or_stdin(&file, true)?;
            let mut config = OrchestratorConfig::from_env()?;
            config.limits = config.limits.with_cli_overrides(max_memory, timeout, cpu);
            if let Some(b) = backend {
                config.backend = b.parse().map_err(anyhow::Error::msg)?;
            }
            if let Some(l) = language {
                config.language = l.parse().map_err(anyhow::Error::msg)?;
            }
            let catalog = catalog.map(PathBuf::from).or_else(|| config.paths.catalog.clone());
            let registry = registry_from_catalog(catalog.as_deref())?;

            let orchestrator = Orchestrator::start(config, registry)?;
            let outcome = orchestrator.execute(&user, Some(&code), None).await;
            orchestrator.shutdown().await;
            let result = outcome?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Capabilities { catalog } => {
            let catalog = catalog
                .map(PathBuf::from)
                .or_else(|| codebridge_core::config::PathsConfig::from_env().catalog);
            let registry = registry_from_catalog(catalog.as_deref())?;
            let descriptors: Vec<_> = registry.descriptors().collect();
            println!("{}", serde_json::to_string_pretty(&descriptors)?);
        }
        Commands::Tokenize { input } => {
            let raw = read_arg_or_stdin(&input, false)?;
            let value: Value = serde_json::from_str(&raw).context("input is not valid JSON")?;
            println!("{}", serde_json::to_string_pretty(&tokenize_with_mapping(&value)?)?);
        }
    }
    Ok(())
}

/// `{tokenized, mapping}` for a one-off vault.
fn tokenize_with_mapping(value: &Value) -> Result<Value> {
    let service = TokenizationService::default();
    service.open(CLI_SESSION);
    let tokenized = service.tokenize(CLI_SESSION, value)?;
    let mapping = service.mapping_snapshot(CLI_SESSION).unwrap_or_default();
    service.close(CLI_SESSION);
    Ok(json!({ "tokenized": tokenized, "mapping": mapping }))
}

/// `-` reads stdin; otherwise the argument is a path (`is_path`) or the
/// literal value.
fn read_arg_or_stdin(arg: &str, is_path: bool) -> Result<String> {
    if arg == "-" {
        let mut s = String::new();
        std::io::stdin()
            .read_to_string(&mut s)
            .context("Failed to read stdin")?;
        return Ok(s);
    }
    if is_path {
        return std::fs::read_to_string(arg).with_context(|| format!("Failed to read {}", arg));
    }
    Ok(arg.to_string())
}
