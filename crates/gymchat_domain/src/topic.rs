#![forbid(unsafe_code)]

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::{ConversationId, ParseIdError};

/// Inbound channel name. Identity is exact string match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
	/// Staff-wide broadcast of new conversations and new messages.
	pub const STAFF_NEW_MESSAGES: &'static str = "/topic/staff/new-messages";

	pub fn new(topic: impl Into<String>) -> Result<Self, ParseIdError> {
		let topic = topic.into();
		if topic.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(topic))
	}

	/// `/topic/staff/new-messages`.
	pub fn staff_new_messages() -> Self {
		Self(Self::STAFF_NEW_MESSAGES.to_string())
	}

	/// `/topic/conversation/{id}`.
	pub fn conversation(id: &ConversationId) -> Self {
		Self(ConversationTopic::format(id))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for Topic {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Topic helpers for per-conversation delivery.
pub struct ConversationTopic;

impl ConversationTopic {
	/// Prefix for conversation topics.
	pub const PREFIX: &'static str = "/topic/conversation/";

	/// Format a conversation topic (e.g. `/topic/conversation/42`).
	pub fn format(id: &ConversationId) -> String {
		format!("{}{}", Self::PREFIX, id.as_str())
	}

	/// Parse a topic of the form `/topic/conversation/<id>`.
	pub fn parse(s: &str) -> Result<ConversationId, ParseIdError> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		let rest = s
			.strip_prefix(Self::PREFIX)
			.ok_or_else(|| ParseIdError::InvalidFormat("expected /topic/conversation/<id>".into()))?;

		if rest.contains('/') {
			return Err(ParseIdError::InvalidFormat("expected /topic/conversation/<id>".into()));
		}

		ConversationId::new(rest.to_string())
	}
}

/// Outbound channel name for client-originated events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
	/// `/app/chat.customer.send`
	CustomerSend,
	/// `/app/chat.staff.send`
	StaffSend,
}

impl Destination {
	/// Stable wire path.
	pub const fn as_str(self) -> &'static str {
		match self {
			Destination::CustomerSend => "/app/chat.customer.send",
			Destination::StaffSend => "/app/chat.staff.send",
		}
	}
}

impl fmt::Display for Destination {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
