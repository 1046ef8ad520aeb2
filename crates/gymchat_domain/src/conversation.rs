#![forbid(unsafe_code)]

use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ConversationId;

/// Backend conversation status. Codes this client does not know are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum ConversationStatus {
	#[default]
	New,
	Assigned,
	Other(String),
}

impl ConversationStatus {
	/// Wire code as sent by the backend.
	pub fn as_code(&self) -> &str {
		match self {
			ConversationStatus::New => "NEW",
			ConversationStatus::Assigned => "ASSIGNED",
			ConversationStatus::Other(code) => code,
		}
	}

	pub fn from_code(code: &str) -> Self {
		match code.trim() {
			"NEW" => ConversationStatus::New,
			"ASSIGNED" => ConversationStatus::Assigned,
			_ => ConversationStatus::Other(code.to_string()),
		}
	}
}

impl fmt::Display for ConversationStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_code())
	}
}

impl Serialize for ConversationStatus {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(self.as_code())
	}
}

impl<'de> Deserialize<'de> for ConversationStatus {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let code = String::deserialize(deserializer)?;
		Ok(Self::from_code(&code))
	}
}

/// Conversation summary as listed by the backend. The client only reads and re-sorts these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
	pub id: ConversationId,
	#[serde(default)]
	pub customer_name: String,
	#[serde(default)]
	pub status: ConversationStatus,
	#[serde(default, deserialize_with = "crate::timestamp::deserialize_option")]
	pub last_message_at: Option<DateTime<Utc>>,
	#[serde(default, deserialize_with = "crate::timestamp::deserialize_option")]
	pub created_at: Option<DateTime<Utc>>,
	#[serde(default)]
	pub assigned_to_me: bool,
}

impl Conversation {
	/// Most recent activity: `max(last_message_at, created_at)`.
	pub fn last_activity(&self) -> Option<DateTime<Utc>> {
		match (self.last_message_at, self.created_at) {
			(Some(a), Some(b)) => Some(a.max(b)),
			(a, b) => a.or(b),
		}
	}
}

/// Ordering and labelling for the staff inbox.
pub struct ConversationDirectory;

impl ConversationDirectory {
	/// Most recently active first. Conversations without any timestamp sink to the end.
	pub fn order(conversations: &[Conversation]) -> Vec<Conversation> {
		let mut out = conversations.to_vec();
		// Option<DateTime> orders None first, so reversing puts it last.
		out.sort_by(|a, b| b.last_activity().cmp(&a.last_activity()));
		out
	}

	/// Human-facing status label.
	pub fn label(conversation: &Conversation) -> &str {
		match &conversation.status {
			ConversationStatus::New => "New",
			ConversationStatus::Assigned if conversation.assigned_to_me => "Assigned to me",
			ConversationStatus::Assigned => "Assigned",
			ConversationStatus::Other(code) => code,
		}
	}
}
