//! Stdin command parsing and execution.

use peerchat_types::ChatConfig;
use peerchat_wire::{Message, PeerNode};
use std::path::PathBuf;
use tracing::warn;

/// One line typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect(String),
    Auth(String),
    Msg { peer: String, text: String },
    Img { peer: String, path: PathBuf },
    Disconnect(String),
    Peers,
    Help,
    Quit,
}

/// What the input loop should do after a command.
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Parse a line of input. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Err("commands start with '/', try /help".to_string());
    };

    let (verb, args) = match rest.split_once(char::is_whitespace) {
        Some((verb, args)) => (verb, args.trim()),
        None => (rest, ""),
    };

    let one_peer = |usage: &str| -> Result<String, String> {
        match args.split_whitespace().collect::<Vec<_>>().as_slice() {
            [peer] => Ok(peer.to_string()),
            _ => Err(format!("usage: {usage}")),
        }
    };
    let peer_and_rest = |usage: &str| -> Result<(String, String), String> {
        match args.split_once(char::is_whitespace) {
            Some((peer, rest)) if !rest.trim().is_empty() => {
                Ok((peer.to_string(), rest.trim().to_string()))
            }
            _ => Err(format!("usage: {usage}")),
        }
    };

    let command = match verb {
        "connect" => Command::Connect(one_peer("/connect <peer>")?),
        "auth" => Command::Auth(one_peer("/auth <peer>")?),
        "msg" => {
            let (peer, text) = peer_and_rest("/msg <peer> <text>")?;
            Command::Msg { peer, text }
        }
        "img" => {
            let (peer, path) = peer_and_rest("/img <peer> <file>")?;
            Command::Img {
                peer,
                path: PathBuf::from(path),
            }
        }
        "disconnect" => Command::Disconnect(one_peer("/disconnect <peer>")?),
        "peers" => Command::Peers,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command '/{other}', try /help")),
    };
    Ok(Some(command))
}

/// Run a command against the node. Feedback for the user goes to stderr so
/// stdout carries only incoming events.
pub async fn execute(node: &PeerNode, config: &ChatConfig, command: Command) -> Flow {
    let result = match command {
        Command::Connect(name) => match config.peer(&name) {
            Some(peer) => node
                .connect_peer(&peer)
                .await
                .map(|id| format!("connected to {peer} ({id})"))
                .map_err(|e| e.to_string()),
            None => Err(format!("'{name}' is not in the peer list")),
        },
        Command::Auth(name) => node
            .send_message(&name, &Message::auth(&config.name))
            .await
            .map(|()| format!("introduced ourselves to {name} as {}", config.name))
            .map_err(|e| e.to_string()),
        Command::Msg { peer, text } => node
            .send_message(&peer, &Message::text(text))
            .await
            .map(|()| String::new())
            .map_err(|e| e.to_string()),
        Command::Img { peer, path } => match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let size = bytes.len();
                node.send_message(&peer, &Message::image(bytes))
                    .await
                    .map(|()| format!("sent {} ({size} bytes) to {peer}", path.display()))
                    .map_err(|e| e.to_string())
            }
            Err(e) => Err(format!("cannot read {}: {e}", path.display())),
        },
        Command::Disconnect(name) => {
            if node.disconnect_name(&name) {
                Ok(format!("disconnected from {name}"))
            } else {
                Err(format!("not connected to {name}"))
            }
        }
        Command::Peers => {
            let peers = node.connected_peers();
            if peers.is_empty() {
                Ok("no connected peers".to_string())
            } else {
                Ok(peers.join("\n"))
            }
        }
        Command::Help => Ok(crate::cli::AFTER_HELP.to_string()),
        Command::Quit => return Flow::Quit,
    };

    match result {
        Ok(reply) if reply.is_empty() => {}
        Ok(reply) => eprintln!("{reply}"),
        Err(e) => eprintln!("error: {e}"),
    }
    Flow::Continue
}

/// Connect to every `autoconnect` peer and introduce ourselves.
///
/// Failures are logged and skipped; the peer can be retried with /connect.
pub async fn autoconnect(node: &PeerNode, config: &ChatConfig) {
    for entry in config.peers.iter().filter(|p| p.autoconnect) {
        let peer = entry.to_peer();
        if let Err(e) = node.connect_peer(&peer).await {
            warn!(peer = %peer.name, error = %e, "autoconnect failed");
            continue;
        }
        if let Err(e) = node
            .send_message(&peer.name, &Message::auth(&config.name))
            .await
        {
            warn!(peer = %peer.name, error = %e, "AUTH after autoconnect failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse_command("/peers").unwrap(), Some(Command::Peers));
        assert_eq!(parse_command("  /quit  ").unwrap(), Some(Command::Quit));
        assert_eq!(
            parse_command("/connect bob").unwrap(),
            Some(Command::Connect("bob".into()))
        );
        assert_eq!(
            parse_command("/disconnect   bob").unwrap(),
            Some(Command::Disconnect("bob".into()))
        );
        assert_eq!(parse_command("   ").unwrap(), None);
    }

    #[test]
    fn test_parse_msg_keeps_spacing_in_text() {
        assert_eq!(
            parse_command("/msg bob hello  there, bob").unwrap(),
            Some(Command::Msg {
                peer: "bob".into(),
                text: "hello  there, bob".into()
            })
        );
        assert_eq!(
            parse_command("/img carol /tmp/cat.png").unwrap(),
            Some(Command::Img {
                peer: "carol".into(),
                path: PathBuf::from("/tmp/cat.png")
            })
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_command("hello").unwrap_err().contains("start with '/'"));
        assert!(parse_command("/msg bob").unwrap_err().starts_with("usage"));
        assert!(parse_command("/connect").unwrap_err().starts_with("usage"));
        assert!(parse_command("/auth a b").unwrap_err().starts_with("usage"));
        assert!(parse_command("/frobnicate").unwrap_err().contains("unknown command"));
    }

    #[tokio::test]
    async fn test_autoconnect_sends_auth() {
        let (sink, mut rx) = peerchat_wire::ChannelSink::new();
        let remote = PeerNode::start(
            peerchat_wire::NodeConfig {
                listen_addr: "127.0.0.1:0".parse().unwrap(),
            },
            std::sync::Arc::new(sink),
        )
        .await
        .unwrap();
        let (local_sink, _local_rx) = peerchat_wire::ChannelSink::new();
        let local = PeerNode::start(
            peerchat_wire::NodeConfig {
                listen_addr: "127.0.0.1:0".parse().unwrap(),
            },
            std::sync::Arc::new(local_sink),
        )
        .await
        .unwrap();

        let config = ChatConfig::from_toml_str(&format!(
            r#"
            name = "alice"

            [[peers]]
            name = "bob"
            address = "127.0.0.1"
            port = {}
            autoconnect = true

            [[peers]]
            name = "carol"
            address = "127.0.0.1"
            port = 1
            "#,
            remote.local_addr().port()
        ))
        .unwrap();

        autoconnect(&local, &config).await;
        assert_eq!(local.connected_peers(), vec!["bob".to_string()]);

        let mut authenticated = None;
        while let Ok(Some(event)) =
            tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv()).await
        {
            if let peerchat_wire::PeerEvent::Authenticated(name) = event {
                authenticated = Some(name);
                break;
            }
        }
        assert_eq!(authenticated.as_deref(), Some("alice"));

        assert_eq!(execute(&local, &config, Command::Quit).await, Flow::Quit);
        local.stop().await;
        remote.stop().await;
    }
}
