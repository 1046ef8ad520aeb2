#![forbid(unsafe_code)]

use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ConversationId, LocalMessageId, ServerMessageId};

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SenderRole {
	Customer,
	Staff,
}

impl SenderRole {
	/// Stable wire identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			SenderRole::Customer => "CUSTOMER",
			SenderRole::Staff => "STAFF",
		}
	}
}

impl fmt::Display for SenderRole {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Identity of a visible message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageId {
	/// Created locally, not yet acknowledged by the server.
	Pending(LocalMessageId),
	/// Assigned by the server.
	Confirmed(ServerMessageId),
}

impl MessageId {
	pub fn is_pending(&self) -> bool {
		matches!(self, MessageId::Pending(_))
	}

	pub fn server_id(&self) -> Option<&ServerMessageId> {
		match self {
			MessageId::Confirmed(id) => Some(id),
			MessageId::Pending(_) => None,
		}
	}

	pub fn local_id(&self) -> Option<LocalMessageId> {
		match self {
			MessageId::Pending(id) => Some(*id),
			MessageId::Confirmed(_) => None,
		}
	}
}

impl fmt::Display for MessageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			MessageId::Pending(id) => write!(f, "{id}"),
			MessageId::Confirmed(id) => write!(f, "{id}"),
		}
	}
}

/// A server-confirmed message, as pushed on `/topic/conversation/{id}` or returned by the history endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmedMessage {
	pub id: ServerMessageId,
	#[serde(default)]
	pub conversation_id: Option<ConversationId>,
	#[serde(alias = "senderType", alias = "sender")]
	pub sender_role: SenderRole,
	#[serde(default)]
	pub sender_name: Option<String>,
	pub content: String,
	#[serde(default = "Utc::now", deserialize_with = "crate::timestamp::deserialize")]
	pub created_at: DateTime<Utc>,
}

/// One entry of a conversation's visible message sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
	pub id: MessageId,
	pub conversation_id: Option<ConversationId>,
	pub sender_role: SenderRole,
	pub sender_name: Option<String>,
	pub content: String,
	pub created_at: DateTime<Utc>,
}

impl ChatMessage {
	/// New pending message stamped with the local clock.
	pub fn pending(conversation_id: Option<ConversationId>, content: impl Into<String>, sender_role: SenderRole) -> Self {
		Self {
			id: MessageId::Pending(LocalMessageId::new_v4()),
			conversation_id,
			sender_role,
			sender_name: None,
			content: content.into(),
			created_at: Utc::now(),
		}
	}

	pub fn is_pending(&self) -> bool {
		self.id.is_pending()
	}
}

impl From<ConfirmedMessage> for ChatMessage {
	fn from(m: ConfirmedMessage) -> Self {
		Self {
			id: MessageId::Confirmed(m.id),
			conversation_id: m.conversation_id,
			sender_role: m.sender_role,
			sender_name: m.sender_name,
			content: m.content,
			created_at: m.created_at,
		}
	}
}

/// Body published to `/app/chat.customer.send` and `/app/chat.staff.send`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendChatPayload {
	/// `None` lets the backend create the customer's conversation on first send.
	pub conversation_id: Option<ConversationId>,
	pub content: String,
}

/// Event pushed on `/topic/staff/new-messages`. The topic carries both new-message events and whole new
/// conversations, so every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffNotification {
	#[serde(default)]
	pub conversation_id: Option<ConversationId>,
	#[serde(default)]
	pub customer_name: Option<String>,
	#[serde(default)]
	pub content: Option<String>,
	#[serde(default, alias = "senderType")]
	pub sender_role: Option<SenderRole>,
	#[serde(default, deserialize_with = "crate::timestamp::deserialize_option")]
	pub created_at: Option<DateTime<Utc>>,
}
