#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub mod conversation;
pub mod message;
pub mod timestamp;
pub mod topic;

pub use conversation::{Conversation, ConversationDirectory, ConversationStatus};
pub use message::{ChatMessage, ConfirmedMessage, MessageId, SendChatPayload, SenderRole, StaffNotification};
pub use topic::{ConversationTopic, Destination, Topic};

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

/// Backend ids are numeric today but are kept opaque; JSON numbers and strings are both accepted.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
	Int(i64),
	UInt(u64),
	Str(String),
}

impl RawId {
	fn into_string(self) -> String {
		match self {
			RawId::Int(v) => v.to_string(),
			RawId::UInt(v) => v.to_string(),
			RawId::Str(s) => s,
		}
	}
}

fn serialize_opaque_id<S: Serializer>(id: &str, serializer: S) -> Result<S::Ok, S::Error> {
	// Only canonical integers go out as numbers; "007" or "+5" must keep their spelling.
	match id.parse::<i64>() {
		Ok(n) if n.to_string() == id => serializer.serialize_i64(n),
		_ => serializer.serialize_str(id),
	}
}

fn deserialize_opaque_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
	let raw = RawId::deserialize(deserializer)?.into_string();
	if raw.trim().is_empty() {
		return Err(serde::de::Error::custom("empty id"));
	}
	Ok(raw)
}

/// Backend conversation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationId(String);

impl ConversationId {
	/// Create a non-empty `ConversationId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for ConversationId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for ConversationId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		ConversationId::new(s.trim().to_string())
	}
}

impl Serialize for ConversationId {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serialize_opaque_id(&self.0, serializer)
	}
}

impl<'de> Deserialize<'de> for ConversationId {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		deserialize_opaque_id(deserializer).map(Self)
	}
}

/// Server-assigned message identifier. Stable once issued.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerMessageId(String);

impl ServerMessageId {
	/// Create a non-empty server message id.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ServerMessageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl Serialize for ServerMessageId {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serialize_opaque_id(&self.0, serializer)
	}
}

impl<'de> Deserialize<'de> for ServerMessageId {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		deserialize_opaque_id(deserializer).map(Self)
	}
}

/// Client-assigned id of a message the server has not acknowledged yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalMessageId(pub uuid::Uuid);

impl LocalMessageId {
	/// Create a new random local id.
	pub fn new_v4() -> Self {
		Self(uuid::Uuid::new_v4())
	}
}

impl fmt::Display for LocalMessageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "local-{}", self.0)
	}
}
