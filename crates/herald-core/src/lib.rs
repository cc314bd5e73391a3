//! Shared model for the herald session client: identifiers, the conversation
//! log, connection status, wire payloads and the error taxonomy.

pub mod errors;
pub mod ids;
pub mod messages;
pub mod session;
pub mod wire;

pub use errors::{ClientError, GatewayError, ProtocolPayloadError, TransportError, ValidationError};
pub use ids::{MessageId, SessionId};
pub use messages::{ConversationLog, Message, Reference, Role};
pub use session::{ConnectionStatus, SessionSnapshot};
pub use wire::{BotReply, SendMessagePayload};
