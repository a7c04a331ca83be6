// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};

/// The `clade` multi-agent orchestration host.
///
/// Running with no subcommand is equivalent to `clade serve`: it loads
/// `config.json`, wires the store/registry/session manager/IPC
/// server/task queue/cron scheduler together, and runs until SIGTERM/SIGINT.
#[derive(Parser, Debug)]
#[command(name = "clade", version, about, long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). Overridden by RUST_LOG.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to an explicit config.json, merged on top of $HOME_DIR/config.json.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the host loop: serve IPC, drive cron and the task queue, until
    /// a shutdown signal is received. This is the default when no
    /// subcommand is given.
    Serve,

    /// Print the resolved config (after layering and defaults) as JSON and exit.
    ShowConfig,

    /// Generate shell completions for this binary.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Agent registry operations (§4.4).
    Agents {
        #[command(subcommand)]
        command: AgentsCommands,
    },

    /// Cron scheduler operations (§4.10).
    Cron {
        #[command(subcommand)]
        command: CronCommands,
    },

    /// Deferred task queue operations (§4.9).
    Tasks {
        #[command(subcommand)]
        command: TasksCommands,
    },

    /// Internal: runs one built-in tool server's MCP-over-stdio bridge
    /// (§4.6). Invoked by the host itself as a child process — re-invokes
    /// this same binary with the agent id and IPC socket path read from
    /// the `AGENT_ID`/`IPC_SOCKET_PATH` environment variables. Not meant
    /// for interactive use.
    ToolBridge {
        /// Built-in server name: memory, sessions, messaging, skills, admin, browser.
        #[arg(long)]
        server: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum AgentsCommands {
    /// List every registered agent.
    List,
    /// Register a new agent, or replace an existing one's config.
    Add {
        /// Agent id, must match `[a-z0-9_-]+`.
        id: String,
        /// Display name.
        #[arg(long)]
        name: String,
        /// Model identifier string passed to the external CLI.
        #[arg(long)]
        model: String,
        /// Tool preset: potato, coding, messaging, full, custom.
        #[arg(long, default_value = "coding")]
        preset: String,
    },
    /// Remove an agent from the config map. Document files are left on disk.
    Remove {
        id: String,
    },
    /// Reindex an agent's markdown documents into the memory full-text
    /// index (§3 "reindexed on file change"): SOUL.md, MEMORY.md, TOOLS.md,
    /// and every `memory/*.md` daily activity log.
    Reindex {
        id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum CronCommands {
    /// List every cron job.
    List,
    /// Create a new cron job.
    Add {
        /// Unique job name.
        name: String,
        /// Cron expression, standard 5-field or cron-crate 6/7-field.
        #[arg(long)]
        schedule: String,
        /// Agent id to invoke.
        #[arg(long)]
        agent: String,
        /// Prompt to send on each fire.
        #[arg(long)]
        prompt: String,
        /// Optional `<channel>:<target>` delivery sink for the result text.
        #[arg(long)]
        deliver_to: Option<String>,
    },
    /// Delete a cron job by id.
    Remove {
        id: String,
    },
    /// Enable a disabled cron job.
    Enable {
        id: String,
    },
    /// Disable an enabled cron job without deleting it.
    Disable {
        id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum TasksCommands {
    /// List deferred tasks, optionally filtered by agent.
    List {
        #[arg(long)]
        agent: Option<String>,
    },
    /// Cancel a pending deferred task.
    Cancel {
        id: String,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut std::io::stdout());
}
