//! Wire protocol message types and frame codec.
//!
//! Every frame is a fixed 8-byte header followed by a MessagePack body:
//!
//! ```text
//! 0..4  u32 BE  message type tag
//! 4..8  u32 BE  total frame length (header + body) + LENGTH_BIAS
//! 8..   body
//! ```
//!
//! Because the header carries the *total* length, a reader that has only
//! seen the header knows exactly how many more bytes to pull off the socket.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Size of the fixed frame header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Constant added to the total frame length before it is written.
pub const LENGTH_BIAS: u32 = 1_000_000_000;

/// Maximum total frame size (16 MB).
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Errors from encoding or decoding frames.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Encoding error: {0}")]
    Encoding(#[from] rmp_serde::encode::Error),
    #[error("Malformed header: {0}")]
    MalformedHeader(String),
    #[error("Malformed {kind} body: {reason}")]
    MalformedBody { kind: MessageType, reason: String },
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: u32 },
}

/// Message type carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Reserved tag; never produced by the encoder and never a valid body.
    Invalid,
    Auth,
    Text,
    Image,
}

impl MessageType {
    /// The on-wire tag.
    pub fn tag(self) -> u32 {
        match self {
            MessageType::Invalid => 0,
            MessageType::Auth => 1,
            MessageType::Text => 2,
            MessageType::Image => 3,
        }
    }

    /// Map an on-wire tag back to a type; `None` for unrecognized tags.
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(MessageType::Invalid),
            1 => Some(MessageType::Auth),
            2 => Some(MessageType::Text),
            3 => Some(MessageType::Image),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Invalid => write!(f, "INVALID"),
            MessageType::Auth => write!(f, "AUTH"),
            MessageType::Text => write!(f, "TEXT"),
            MessageType::Image => write!(f, "IMAGE"),
        }
    }
}

/// A decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_type: MessageType,
    /// Total frame length, header included. Always greater than [`HEADER_SIZE`].
    pub length: usize,
}

impl MessageHeader {
    /// Number of body bytes following the header.
    pub fn body_len(&self) -> usize {
        self.length - HEADER_SIZE
    }
}

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Unauthenticated handshake: the sender announces its name.
    Auth { name: String },
    /// A chat line.
    Text { text: String },
    /// An opaque image payload.
    Image { bytes: Vec<u8> },
}

impl Message {
    pub fn auth(name: impl Into<String>) -> Self {
        Message::Auth { name: name.into() }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Message::Text { text: text.into() }
    }

    pub fn image(bytes: impl Into<Vec<u8>>) -> Self {
        Message::Image {
            bytes: bytes.into(),
        }
    }

    /// The header type this message is framed with.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Auth { .. } => MessageType::Auth,
            Message::Text { .. } => MessageType::Text,
            Message::Image { .. } => MessageType::Image,
        }
    }
}

// Body schemas. Field names are part of the wire format.

#[derive(Serialize, Deserialize)]
struct AuthBody<S> {
    name: S,
}

#[derive(Serialize, Deserialize)]
struct TextBody<S> {
    text: S,
}

#[derive(Serialize)]
struct ImageBodyRef<'a> {
    #[serde(serialize_with = "bin::serialize")]
    image: &'a [u8],
}

#[derive(Deserialize)]
struct ImageBody {
    #[serde(deserialize_with = "bin::deserialize")]
    image: Vec<u8>,
}

/// Serialize byte slices as MessagePack `bin` rather than an integer array.
mod bin {
    use serde::de::{self, Deserializer, SeqAccess, Visitor};
    use serde::Serializer;
    use std::fmt;

    pub fn serialize<S: Serializer>(bytes: &&[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        struct BytesVisitor;

        impl<'de> Visitor<'de> for BytesVisitor {
            type Value = Vec<u8>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a byte array")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                Ok(v.to_vec())
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
                Ok(v)
            }

            // Peers that encode bytes as a plain array of integers.
            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(b) = seq.next_element::<u8>()? {
                    out.push(b);
                }
                Ok(out)
            }
        }

        deserializer.deserialize_bytes(BytesVisitor)
    }
}

/// Encode a message into one complete frame (header + body).
pub fn encode_message(msg: &Message) -> Result<Vec<u8>, CodecError> {
    let body = match msg {
        Message::Auth { name } => rmp_serde::to_vec_named(&AuthBody { name: name.as_str() })?,
        Message::Text { text } => rmp_serde::to_vec_named(&TextBody { text: text.as_str() })?,
        Message::Image { bytes } => rmp_serde::to_vec_named(&ImageBodyRef { image: bytes })?,
    };

    let total = HEADER_SIZE + body.len();
    if total > MAX_FRAME_SIZE as usize {
        return Err(CodecError::FrameTooLarge {
            size: total,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut frame = Vec::with_capacity(total);
    frame.extend_from_slice(&msg.message_type().tag().to_be_bytes());
    frame.extend_from_slice(&(total as u32 + LENGTH_BIAS).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode the fixed-size header at the front of a frame.
pub fn decode_header(header: &[u8; HEADER_SIZE]) -> Result<MessageHeader, CodecError> {
    let tag = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let raw_len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);

    let message_type = MessageType::from_tag(tag)
        .ok_or_else(|| CodecError::MalformedHeader(format!("unknown message type tag {tag}")))?;

    let length = raw_len.checked_sub(LENGTH_BIAS).ok_or_else(|| {
        CodecError::MalformedHeader(format!("length field {raw_len} is below the bias"))
    })? as usize;
    if length <= HEADER_SIZE {
        return Err(CodecError::MalformedHeader(format!(
            "frame length {length} does not exceed header size {HEADER_SIZE}"
        )));
    }
    if length > MAX_FRAME_SIZE as usize {
        return Err(CodecError::FrameTooLarge {
            size: length,
            max: MAX_FRAME_SIZE,
        });
    }

    Ok(MessageHeader {
        message_type,
        length,
    })
}

/// Decode a body according to the type announced in its header.
pub fn decode_body(message_type: MessageType, body: &[u8]) -> Result<Message, CodecError> {
    let malformed = |e: rmp_serde::decode::Error| CodecError::MalformedBody {
        kind: message_type,
        reason: e.to_string(),
    };
    match message_type {
        MessageType::Auth => {
            let b: AuthBody<String> = rmp_serde::from_slice(body).map_err(malformed)?;
            Ok(Message::Auth { name: b.name })
        }
        MessageType::Text => {
            let b: TextBody<String> = rmp_serde::from_slice(body).map_err(malformed)?;
            Ok(Message::Text { text: b.text })
        }
        MessageType::Image => {
            let b: ImageBody = rmp_serde::from_slice(body).map_err(malformed)?;
            Ok(Message::Image { bytes: b.image })
        }
        MessageType::Invalid => Err(CodecError::MalformedBody {
            kind: message_type,
            reason: "message type carries no body schema".to_string(),
        }),
    }
}
