//! Clap CLI definitions for PeerChat.

use clap::Parser;
use peerchat_types::ChatConfig;
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mCommands (typed on stdin):\x1b[0m
  /connect <peer>          Dial a peer from the config file
  /auth <peer>             Announce our name to a connected peer
  /msg <peer> <text>       Send a text message
  /img <peer> <file>       Send a file as an image
  /disconnect <peer>       Close the connection to a peer
  /peers                   List connected peers
  /quit                    Disconnect everyone and exit

\x1b[1;36mConfig:\x1b[0m
  ~/.peerchat/config.toml unless --config is given";

/// PeerChat: peer-to-peer text and image messaging.
#[derive(Parser, Debug)]
#[command(name = "peerchat", version, about, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Name announced to peers (overrides the config file).
    #[arg(long)]
    pub name: Option<String>,

    /// Port to listen on (overrides the config file).
    #[arg(long)]
    pub port: Option<u16>,

    /// Print incoming events as JSON lines.
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded config.
    pub fn apply(&self, config: &mut ChatConfig) {
        if let Some(name) = &self.name {
            config.name = name.clone();
        }
        if let Some(port) = self.port {
            config.listen_port = port;
        }
    }
}
