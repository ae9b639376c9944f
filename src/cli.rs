use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// TOML configuration file (SHM_RELAY_* environment variables still apply).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the shared buffer and serve it to relay clients.
    Host(HostArgs),
    /// Attach to a host's buffer and follow its changes.
    Connect(RemoteArgs),
    /// Print the host's buffer once.
    Read(RemoteArgs),
    /// Replace the host's buffer once.
    Write(WriteArgs),
}

#[derive(Args, Debug, Clone)]
pub struct HostArgs {
    /// Buffer name; generated when omitted.
    #[arg(long)]
    pub name: Option<String>,

    /// Address for the relay listener. Port 0 picks an ephemeral port.
    #[arg(long)]
    pub bind: Option<SocketAddr>,
}

#[derive(Args, Debug, Clone)]
pub struct RemoteArgs {
    /// Host relay address, `ip:port`.
    #[arg(long)]
    pub addr: String,

    /// Buffer name announced by the host.
    #[arg(long)]
    pub name: String,
}

#[derive(Args, Debug, Clone)]
pub struct WriteArgs {
    #[command(flatten)]
    pub remote: RemoteArgs,

    /// New buffer content.
    pub text: String,
}
