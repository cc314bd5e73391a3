//! Engine.IO v4 / Socket.IO v5 text framing.
//!
//! Every WebSocket text frame is one Engine.IO packet: a type digit followed
//! by its data. Socket.IO packets travel inside Engine.IO `message` packets:
//!
//! ```text
//! <type>[<namespace>,][<ack id>][<json>]
//! ```
//!
//! Only the default namespace and text events are needed here; binary
//! attachments are rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("empty frame")]
    Empty,
    #[error("unknown packet type {0:?}")]
    UnknownType(char),
    #[error("malformed packet: {0}")]
    Malformed(String),
    #[error("unsupported packet: {0}")]
    Unsupported(&'static str),
}

/// Parameters the server sends in the Engine.IO `open` packet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds between server pings.
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong.
    pub ping_timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

impl Handshake {
    /// How long the connection may stay silent before it is considered dead.
    pub fn liveness(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(frame: &str) -> Result<Self, PacketError> {
        let mut chars = frame.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        let data = chars.as_str();
        match kind {
            '0' => serde_json::from_str(data)
                .map(Self::Open)
                .map_err(|e| PacketError::Malformed(format!("open payload: {e}"))),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping(data.to_string())),
            '3' => Ok(Self::Pong(data.to_string())),
            '4' => Ok(Self::Message(data.to_string())),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            'b' => Err(PacketError::Unsupported("base64 binary frame")),
            other => Err(PacketError::UnknownType(other)),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Self::Open(handshake) => {
                format!("0{}", serde_json::to_string(handshake).unwrap_or_default())
            }
            Self::Close => "1".to_string(),
            Self::Ping(data) => format!("2{data}"),
            Self::Pong(data) => format!("3{data}"),
            Self::Message(data) => format!("4{data}"),
            Self::Upgrade => "5".to_string(),
            Self::Noop => "6".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SocketPacket {
    Connect(Option<Value>),
    Disconnect,
    Event {
        name: String,
        args: Vec<Value>,
        ack: Option<u64>,
    },
    Ack {
        id: u64,
        args: Vec<Value>,
    },
    ConnectError(Value),
}

impl SocketPacket {
    /// Decode the data of an Engine.IO `message` packet.
    pub fn decode(body: &str) -> Result<Self, PacketError> {
        let mut chars = body.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        if matches!(kind, '5' | '6') {
            return Err(PacketError::Unsupported("binary attachment"));
        }
        let mut rest = chars.as_str();

        if rest.starts_with('/') {
            // Non-default namespace: `/<nsp>,`. Only "/" is spoken here.
            let (nsp, tail) = rest.split_once(',').unwrap_or((rest, ""));
            if nsp != "/" {
                return Err(PacketError::Unsupported("namespace"));
            }
            rest = tail;
        }

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let ack = if digits > 0 {
            let id = rest[..digits]
                .parse()
                .map_err(|_| PacketError::Malformed("ack id".into()))?;
            rest = &rest[digits..];
            Some(id)
        } else {
            None
        };

        let data = if rest.is_empty() {
            None
        } else {
            Some(
                serde_json::from_str::<Value>(rest)
                    .map_err(|e| PacketError::Malformed(e.to_string()))?,
            )
        };

        match kind {
            '0' => Ok(Self::Connect(data)),
            '1' => Ok(Self::Disconnect),
            '2' => {
                let mut args = match data {
                    Some(Value::Array(args)) => args,
                    _ => return Err(PacketError::Malformed("event without array".into())),
                };
                if args.is_empty() {
                    return Err(PacketError::Malformed("event without name".into()));
                }
                let name = match args.remove(0) {
                    Value::String(name) => name,
                    _ => return Err(PacketError::Malformed("event name is not a string".into())),
                };
                Ok(Self::Event { name, args, ack })
            }
            '3' => {
                let id = ack.ok_or_else(|| PacketError::Malformed("ack without id".into()))?;
                let args = match data {
                    Some(Value::Array(args)) => args,
                    Some(other) => vec![other],
                    None => Vec::new(),
                };
                Ok(Self::Ack { id, args })
            }
            '4' => Ok(Self::ConnectError(data.unwrap_or(Value::Null))),
            other => Err(PacketError::UnknownType(other)),
        }
    }

    /// Encode as Socket.IO data (without the Engine.IO prefix).
    pub fn encode(&self) -> String {
        match self {
            Self::Connect(None) => "0".to_string(),
            Self::Connect(Some(auth)) => format!("0{auth}"),
            Self::Disconnect => "1".to_string(),
            Self::Event { name, args, ack } => {
                let mut items = Vec::with_capacity(args.len() + 1);
                items.push(Value::String(name.clone()));
                items.extend(args.iter().cloned());
                let ack = ack.map(|id| id.to_string()).unwrap_or_default();
                format!("2{ack}{}", Value::Array(items))
            }
            Self::Ack { id, args } => format!("3{id}{}", Value::Array(args.clone())),
            Self::ConnectError(data) => format!("4{data}"),
        }
    }

    /// Full WebSocket frame: Engine.IO `message` wrapping this packet.
    pub fn to_frame(&self) -> String {
        EnginePacket::Message(self.encode()).encode()
    }

    /// Human-readable reason carried by a `CONNECT_ERROR`.
    pub fn connect_error_message(data: &Value) -> String {
        data.get("message")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| data.to_string())
    }
}

/// Frame for emitting `name` with a single payload argument.
pub fn event_frame(name: &str, payload: &Value) -> String {
    SocketPacket::Event {
        name: name.to_string(),
        args: vec![payload.clone()],
        ack: None,
    }
    .to_frame()
}
