// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands, KeyCommands};
use relaygate_config::{Config, CredentialStore};
use relaygate_core::{ContextCache, Dispatcher, Orchestrator, ToolOutputCache};
use relaygate_mcp::ToolServerPool;
use relaygate_model::{catalog, UpstreamClient};
use relaygate_tools::BuiltinTools;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let runtime = if cli.threads == 0 {
        tokio::runtime::Builder::new_current_thread().enable_all().build()?
    } else {
        tokio::runtime::Builder::new_multi_thread().worker_threads(cli.threads).enable_all().build()?
    };
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = &cli.command {
        match cmd {
            Commands::Completions { shell } => {
                cli::print_completions(*shell);
                return Ok(());
            }
            Commands::ShowConfig => {
                let config = relaygate_config::load(cli.config.as_deref())?;
                println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
                return Ok(());
            }
            Commands::ListModels { json } => {
                return list_models_cmd(*json);
            }
            Commands::Keys { command } => {
                return run_keys_command(command);
            }
            Commands::Serve { host, port } => {
                let config = relaygate_config::load(cli.config.as_deref())?;
                return serve(config, host.clone(), *port).await;
            }
        }
    }

    let config = relaygate_config::load(cli.config.as_deref())?;
    serve(config, None, None).await
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::registry().with(fmt::layer().with_target(true)).with(filter).try_init();
}

fn list_models_cmd(as_json: bool) -> anyhow::Result<()> {
    let models = catalog::known_models();
    if as_json {
        println!("{}", serde_json::to_string_pretty(&models)?);
    } else {
        for id in models {
            println!("{id}");
        }
    }
    Ok(())
}

fn run_keys_command(cmd: &KeyCommands) -> anyhow::Result<()> {
    let store = CredentialStore::open(credentials_path())?;
    match cmd {
        KeyCommands::Add { id, secret } => {
            store.add_or_update(id, secret)?;
            println!("key {id:?} saved");
        }
        KeyCommands::Remove { id } => {
            store.delete(id)?;
            println!("key {id:?} removed");
        }
        KeyCommands::Activate { id } => {
            store.set_active(id)?;
            println!("key {id:?} is now active");
        }
        KeyCommands::Show => match store.active_key_id() {
            Some(id) => println!("{id}"),
            None => println!("(no active key)"),
        },
    }
    Ok(())
}

fn credentials_path() -> PathBuf {
    relaygate_config::default_config_dir().join("api_keys.json")
}

fn profiles_path() -> PathBuf {
    relaygate_config::default_config_dir().join("prompt.json")
}

/// Assembles every long-lived component exactly once — credentials, upstream
/// client, tool dispatcher, context cache, prompt profiles, orchestrator —
/// then hands the stack to `relaygate_http::serve`.
async fn serve(config: Config, host_override: Option<String>, port_override: Option<u16>) -> anyhow::Result<()> {
    if config.upstream.url.is_empty() {
        anyhow::bail!("upstream.url is not configured (set UPSTREAM_URL or upstream.url in config)");
    }

    let credentials = Arc::new(CredentialStore::open(credentials_path()).context("opening credential store")?);
    let upstream_client = Arc::new(UpstreamClient::new(config.upstream.url.clone(), String::new()));

    let builtin = Arc::new(BuiltinTools::standard());
    let tool_pool = Arc::new(ToolServerPool::new());
    if let Some(mcp_path) = &config.tools.mcp_config_path {
        let path = PathBuf::from(mcp_path);
        match relaygate_mcp::config::load(&path) {
            Ok(file) => tool_pool.reload(file.servers, &builtin).await,
            Err(e) => warn!(error = %e, path = %path.display(), "failed to load external tool server config"),
        }
    } else {
        tool_pool.reload(Default::default(), &builtin).await;
    }

    let dispatcher = Arc::new(Dispatcher::new(builtin, tool_pool, Arc::new(ToolOutputCache::new())));
    let context_cache = Arc::new(ContextCache::new());
    let profiles = relaygate_core::load_profiles(&profiles_path()).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load prompt profiles, continuing with none");
        Vec::new()
    });

    let orchestrator = Arc::new(Orchestrator::new(
        upstream_client.clone() as Arc<dyn relaygate_model::Upstream>,
        dispatcher,
        context_cache,
        profiles,
        config.upstream.clone(),
        config.context.clone(),
    ));

    let allowed_roots: Vec<PathBuf> = config.tools.allowed_code_paths.iter().map(PathBuf::from).collect();

    let state = relaygate_http::AppState {
        orchestrator,
        upstream_client,
        credentials,
        project_root: std::env::current_dir().context("resolving current directory")?,
        allowed_roots,
        max_code_injection_bytes: config.tools.max_code_injection_kb * 1024,
    };

    let host = host_override.unwrap_or(config.server.host);
    let port = port_override.unwrap_or(config.server.port);
    info!(%host, port, "starting relaygate");
    relaygate_http::serve(state, &host, port).await
}
