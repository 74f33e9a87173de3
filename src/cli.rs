use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "wg-admin", version, about = "WireGuard tunnel configuration manager")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage the server row and its config.
    #[command(subcommand)]
    Server(ServerCommand),
    /// Manage peers.
    #[command(subcommand)]
    Peer(PeerCommand),
    /// Rewrite the server config and every peer config from stored state.
    Regenerate,
    /// Compare on-disk configs with stored state without writing.
    Check,
    /// Control the tunnel unit.
    #[command(subcommand)]
    Service(ServiceCommand),
    /// Print the uplink interface carrying the default route.
    DetectInterface,
    /// Print a fresh key pair.
    Genkey,
}

#[derive(Subcommand)]
pub enum ServerCommand {
    Init(ServerInit),
    Update(ServerUpdate),
    Show,
}

#[derive(Args)]
pub struct ServerInit {
    #[arg(long)]
    pub public_address: String,
    #[arg(long, default_value_t = 51820)]
    pub port: u16,
    #[arg(long, default_value = "10.8.0.1/24")]
    pub subnet_v4: String,
    #[arg(long, default_value = "")]
    pub subnet_v6: String,
    #[arg(long)]
    pub ipv6: bool,
}

#[derive(Args)]
pub struct ServerUpdate {
    #[arg(long)]
    pub public_address: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long)]
    pub subnet_v4: Option<String>,
    #[arg(long)]
    pub subnet_v6: Option<String>,
    #[arg(long)]
    pub ipv6: Option<bool>,
}

#[derive(Subcommand)]
pub enum PeerCommand {
    Add {
        #[arg(long)]
        name: Option<String>,
    },
    Rename {
        id: Uuid,
        name: String,
    },
    Remove {
        id: Uuid,
    },
    /// Write the peer config and print it.
    Config {
        id: Uuid,
    },
    List,
}

#[derive(Subcommand)]
pub enum ServiceCommand {
    Start,
    Stop,
    Restart,
    Status,
    /// Live state from the tunnel driver.
    Show,
}
