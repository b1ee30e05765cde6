//! Printing incoming events to stdout.

use peerchat_wire::{EventSink, PeerEvent};
use std::net::SocketAddr;

/// Bytes of an image shown in the hex preview.
const PREVIEW_LEN: usize = 32;

/// Event sink that prints every event as one line on stdout.
pub struct Printer {
    json: bool,
}

impl Printer {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    fn print(&self, event: PeerEvent) {
        println!("{}", format_event(&event, self.json));
    }
}

impl EventSink for Printer {
    fn on_bind_succeeded(&self, local_addr: SocketAddr) {
        self.print(PeerEvent::BindSucceeded(local_addr));
    }

    fn on_peer_authenticated(&self, peer_name: &str) {
        self.print(PeerEvent::Authenticated(peer_name.to_string()));
    }

    fn on_text_received(&self, peer_name: &str, text: &str) {
        self.print(PeerEvent::Text {
            peer: peer_name.to_string(),
            text: text.to_string(),
        });
    }

    fn on_image_received(&self, peer_name: &str, bytes: &[u8]) {
        self.print(PeerEvent::Image {
            peer: peer_name.to_string(),
            bytes: bytes.to_vec(),
        });
    }

    fn on_peer_disconnected(&self, peer_name: &str) {
        self.print(PeerEvent::Disconnected(peer_name.to_string()));
    }
}

fn preview(bytes: &[u8]) -> String {
    let shown = &bytes[..bytes.len().min(PREVIEW_LEN)];
    let mut out = hex::encode(shown);
    if bytes.len() > PREVIEW_LEN {
        out.push_str("...");
    }
    out
}

/// Render one event, either for humans or as a JSON object.
pub fn format_event(event: &PeerEvent, json: bool) -> String {
    if json {
        let value = match event {
            PeerEvent::BindSucceeded(addr) => serde_json::json!({
                "event": "listening",
                "addr": addr.to_string(),
            }),
            PeerEvent::Authenticated(peer) => serde_json::json!({
                "event": "authenticated",
                "peer": peer,
            }),
            PeerEvent::Text { peer, text } => serde_json::json!({
                "event": "text",
                "peer": peer,
                "text": text,
            }),
            PeerEvent::Image { peer, bytes } => serde_json::json!({
                "event": "image",
                "peer": peer,
                "size": bytes.len(),
                "preview": preview(bytes),
            }),
            PeerEvent::Disconnected(peer) => serde_json::json!({
                "event": "disconnected",
                "peer": peer,
            }),
        };
        return value.to_string();
    }

    match event {
        PeerEvent::BindSucceeded(addr) => format!("* listening on {addr}"),
        PeerEvent::Authenticated(peer) => format!("* {peer} joined"),
        PeerEvent::Text { peer, text } => format!("[{peer}] {text}"),
        PeerEvent::Image { peer, bytes } => {
            format!("[{peer}] <image, {} bytes> {}", bytes.len(), preview(bytes))
        }
        PeerEvent::Disconnected(peer) => format!("* {peer} left"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text() {
        let event = PeerEvent::Text {
            peer: "bob".into(),
            text: "hi there".into(),
        };
        assert_eq!(format_event(&event, false), "[bob] hi there");
    }

    #[test]
    fn test_plain_image_preview_truncates() {
        let event = PeerEvent::Image {
            peer: "bob".into(),
            bytes: vec![0xab; 40],
        };
        let line = format_event(&event, false);
        assert!(line.starts_with("[bob] <image, 40 bytes> abab"));
        assert!(line.ends_with("..."));
    }

    #[test]
    fn test_json_lines() {
        let event = PeerEvent::Image {
            peer: "carol".into(),
            bytes: vec![1, 2, 255],
        };
        let value: serde_json::Value =
            serde_json::from_str(&format_event(&event, true)).unwrap();
        assert_eq!(value["event"], "image");
        assert_eq!(value["peer"], "carol");
        assert_eq!(value["size"], 3);
        assert_eq!(value["preview"], "0102ff");

        let line = format_event(&PeerEvent::Disconnected("dave".into()), true);
        assert!(!line.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["event"], "disconnected");
    }
}
