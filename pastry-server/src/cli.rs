use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Run a pastry overlay node headlessly, or drive one manually for local
/// testing: one binary, a config-file flag, and an optional subcommand.
#[derive(Debug, Parser)]
#[command(name = "pastry-server", version, about)]
pub struct Cli {
    /// Path to a YAML config file; missing files are silently skipped and
    /// compiled-in defaults apply.
    #[arg(short, long, value_name = "FILE", default_value = "pastry.yaml")]
    pub config: PathBuf,

    /// Override `listen_port` from the config file.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Override `region` from the config file.
    #[arg(long)]
    pub region: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the node headlessly: listen, join any configured bootstrap
    /// seeds, and block until Ctrl-C.
    Run,
    /// Run the node with an interactive stdin command loop
    /// (`join <addr>`, `send <hex-key> <text>`, `leave`, `quit`).
    Interactive,
    /// Start, send one message to `key`, then exit — useful for scripted
    /// smoke tests against an already-running seed.
    Send {
        /// Address of a node already in the ring.
        seed: String,
        /// Hex-encoded 128-bit destination key.
        key: String,
        /// Payload text.
        message: String,
    },
}
