// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};

/// `relaygate keys` subcommands — manage the named credential store (§4.8).
#[derive(Subcommand, Debug)]
pub enum KeyCommands {
    /// Register or update a named API key.
    Add {
        /// Name used to refer to this key (e.g. "prod", "personal").
        id: String,
        /// The secret value. Read from the KEY_SECRET env var if omitted.
        #[arg(long, env = "KEY_SECRET", hide_env_values = true)]
        secret: String,
    },
    /// Remove a named key. Clears the active key if it pointed at this id.
    Remove { id: String },
    /// Make a registered key the active one used for upstream requests.
    Activate { id: String },
    /// Print the currently active key id (if any).
    Show,
}

#[derive(Parser, Debug)]
#[command(
    name = "relaygate",
    about = "Translating reverse proxy: OpenAI-compatible chat completions in front of an upstream generative-model service",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to config file (overrides auto-discovery)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Number of worker threads for the Tokio runtime. 0 keeps the default
    /// cooperative single-event-loop scheduling; a positive value switches
    /// to `tokio::runtime::Builder::new_multi_thread` with that many
    /// worker threads (§5 "parallel threads mode as a fallback").
    #[arg(long, default_value_t = 0)]
    pub threads: usize,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP/SSE server (default action when no subcommand is given).
    Serve {
        /// Override the configured listen host.
        #[arg(long)]
        host: Option<String>,
        /// Override the configured listen port.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Manage named upstream API keys.
    Keys {
        #[command(subcommand)]
        command: KeyCommands,
    },
    /// Print the effective configuration and exit.
    ShowConfig,
    /// List the model ids this proxy has catalog entries for.
    ListModels {
        /// Output as JSON instead of a formatted table.
        #[arg(long)]
        json: bool,
    },
    /// Generate a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "relaygate", &mut std::io::stdout());
}
