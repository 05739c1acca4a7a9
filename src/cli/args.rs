//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! # Global Flags
//!
//! These flags are available on all commands:
//! - `--help` / `-h`: Show help
//! - `--version`: Show version
//! - `--config <path>`: Read configuration from this file
//! - `--connect <endpoint>`: Override the coordination endpoint
//! - `--root <namespace>`: Override the root namespace
//! - `--debug` / `-v`: More logging
//! - `--quiet` / `-q`: Minimal output
//! - `--json`: Machine-readable results

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// refcoord - shared ref coordination for multi-site servers
#[derive(Parser, Debug)]
#[command(name = "refcoord")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Read configuration from this file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Coordination endpoint, e.g. `fs:/var/lib/refcoord` or `memory:`
    #[arg(long, global = true, value_name = "ENDPOINT")]
    pub connect: Option<String>,

    /// Root namespace inside the coordination service
    #[arg(long, global = true, value_name = "NAMESPACE")]
    pub root: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Increase logging (repeatable)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Minimal output
    #[arg(short, long, global = true, conflicts_with = "debug")]
    pub quiet: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }

    /// Whether debug output was requested by either flag.
    pub fn debug_enabled(&self) -> bool {
        self.debug || self.verbose > 1
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check whether a ref exists in the shared store
    #[command(
        name = "exists",
        long_about = "Check whether a ref exists in the shared store.\n\n\
            A ref that was deleted through the store still exists: it holds the \
            tombstone id. Exits 0 when the path exists and 1 otherwise."
    )]
    Exists {
        /// Project name
        project: String,
        /// Ref name, e.g. refs/heads/main
        ref_name: String,
    },

    /// Check whether a local ref value agrees with the shared store
    #[command(
        name = "check",
        long_about = "Check whether a local ref value agrees with the shared store.\n\n\
            Refs never written to the store are up to date. Refs whose shared value \
            was cleared never are. Exits 0 when up to date and 1 otherwise.",
        after_help = "\
WORKFLOW EXAMPLES:
    # Is our main branch current?
    refcoord check proj1 refs/heads/main 1f2e3d4c5b6a79881f2e3d4c5b6a79881f2e3d4c

    # A ref we do not have locally
    refcoord check proj1 refs/heads/topic"
    )]
    Check {
        /// Project name
        project: String,
        /// Ref name
        ref_name: String,
        /// Local object id; omit when the ref does not exist locally
        oid: Option<String>,
    },

    /// Atomically move a ref from an expected id to a new one
    #[command(
        name = "cas",
        long_about = "Atomically move a ref from an expected id to a new one.\n\n\
            The update succeeds only if the shared value still equals --expected. \
            Omit --expected (or pass the zero id) to create a ref. Exits 1 when \
            the shared value moved on; refresh and retry in that case.",
        after_help = "\
WORKFLOW EXAMPLES:
    # Create a ref
    refcoord cas proj1 refs/heads/main --new aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa

    # Fast-forward it
    refcoord cas proj1 refs/heads/main \\
        --expected aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa \\
        --new bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb

    # Delete it (stores the tombstone id)
    refcoord cas proj1 refs/heads/main --expected bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb --delete"
    )]
    Cas {
        /// Project name
        project: String,
        /// Ref name
        ref_name: String,
        /// Object id the shared value must currently hold
        #[arg(long, value_name = "OID")]
        expected: Option<String>,
        /// New object id
        #[arg(long = "new", value_name = "OID", required_unless_present = "delete")]
        new_value: Option<String>,
        /// Store the tombstone id instead of a new value
        #[arg(long, conflicts_with = "new_value")]
        delete: bool,
    },

    /// Read a typed value from the shared store
    #[command(name = "get")]
    Get {
        /// Project name
        project: String,
        /// Key or ref name
        key: String,
        /// Value type
        #[arg(long = "type", value_enum, default_value_t = ValueType::Text)]
        value_type: ValueType,
    },

    /// Compare-and-put a typed value
    #[command(
        name = "put",
        long_about = "Compare-and-put a typed value.\n\n\
            Without --expected the key is created if absent. With --expected the \
            stored value must match exactly. Exits 1 when the update was refused.",
        after_help = "\
WORKFLOW EXAMPLES:
    # Create a counter, then bump it
    refcoord put proj1 counter 1 --type int
    refcoord put proj1 counter 2 --expected 1 --type int"
    )]
    Put {
        /// Project name
        project: String,
        /// Key or ref name
        key: String,
        /// New value
        value: String,
        /// Value the key must currently hold
        #[arg(long, value_name = "VALUE")]
        expected: Option<String>,
        /// Value type
        #[arg(long = "type", value_enum, default_value_t = ValueType::Text)]
        value_type: ValueType,
    },

    /// Remove every shared value of a project
    #[command(name = "remove")]
    Remove {
        /// Project name
        project: String,
    },

    /// Take a ref lock, optionally running a command while it is held
    #[command(
        name = "lock",
        long_about = "Take a ref lock, optionally running a command while it is held.\n\n\
            Without a command the lock is acquired and released immediately, which \
            probes whether it is free. With a command the lock is held until the \
            command exits, and its exit status is reported.",
        after_help = "\
WORKFLOW EXAMPLES:
    # Is anyone holding the lock?
    refcoord lock proj1 refs/heads/main

    # Serialize a multi-step update
    refcoord lock proj1 refs/heads/main --timeout-ms 5000 -- ./update-main.sh"
    )]
    Lock {
        /// Project name
        project: String,
        /// Ref name
        ref_name: String,
        /// Wait bound, overriding the configured lock timeout
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,
        /// Command to run while holding the lock
        #[arg(last = true, value_name = "COMMAND")]
        command: Vec<String>,
    },

    /// Inspect or initialize configuration
    #[command(
        name = "config",
        long_about = "Inspect or initialize configuration.\n\n\
            Configuration is read from --config, $REFCOORD_CONFIG, \
            $XDG_CONFIG_HOME/refcoord/config.toml or ~/.refcoord/config.toml.",
        after_help = "\
WORKFLOW EXAMPLES:
    # Show effective settings with defaults filled in
    refcoord config show

    # Where was configuration loaded from?
    refcoord config path

    # Write a starter file to ~/.refcoord/config.toml
    refcoord config init"
    )]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completion scripts
    #[command(
        name = "completion",
        after_help = "\
WORKFLOW EXAMPLES:
    # Bash (add to ~/.bashrc)
    refcoord completion bash >> ~/.bashrc

    # Zsh (add to ~/.zshrc)
    refcoord completion zsh >> ~/.zshrc"
    )]
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Config subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Print effective settings as TOML
    Show,
    /// Print the path configuration was loaded from
    Path,
    /// Write the effective settings to a config file
    Init {
        /// Destination (default: ~/.refcoord/config.toml)
        #[arg(long)]
        path: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Types accepted by `get` and `put`
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// Raw text
    Text,
    /// 32-bit integer
    Int,
    /// 64-bit integer
    Long,
    /// 40-hex object id
    Oid,
}

/// Supported shells for completion
#[derive(ValueEnum, Debug, Clone, Copy)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn cas_requires_new_or_delete() {
        let result = Cli::try_parse_from(["refcoord", "cas", "p", "refs/heads/main"]);
        assert!(result.is_err());

        let cli =
            Cli::try_parse_from(["refcoord", "cas", "p", "refs/heads/main", "--delete"]).unwrap();
        assert!(matches!(cli.command, Command::Cas { delete: true, .. }));
    }

    #[test]
    fn lock_collects_trailing_command() {
        let cli = Cli::try_parse_from([
            "refcoord", "lock", "p", "refs/heads/main", "--", "echo", "hi",
        ])
        .unwrap();
        match cli.command {
            Command::Lock { command, .. } => assert_eq!(command, vec!["echo", "hi"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "refcoord",
            "get",
            "p",
            "counter",
            "--type",
            "int",
            "--connect",
            "memory:",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.connect.as_deref(), Some("memory:"));
        assert!(cli.debug_enabled());
        assert!(matches!(
            cli.command,
            Command::Get {
                value_type: ValueType::Int,
                ..
            }
        ));
    }
}
