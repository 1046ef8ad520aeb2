#![forbid(unsafe_code)]

use gymchat_domain::Destination;
use gymchat_protocol::Frame;
use serde::Serialize;

use crate::ChatError;

/// A client-originated event, serialized and ready to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
	pub destination: Destination,
	pub body: String,
}

impl OutboundMessage {
	/// Serialize `payload` as JSON for `destination`.
	pub fn encode<P: Serialize + ?Sized>(destination: Destination, payload: &P) -> Result<Self, ChatError> {
		let body = serde_json::to_string(payload).map_err(|e| ChatError::SendFailure(format!("serialize payload: {e}")))?;
		Ok(Self { destination, body })
	}

	pub fn to_frame(&self) -> Frame {
		Frame::send_json(self.destination.as_str(), self.body.clone())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use gymchat_domain::{ConversationId, SendChatPayload};
	use gymchat_protocol::{Command, header};

	#[test]
	fn customer_payload_with_null_conversation() {
		let msg = OutboundMessage::encode(
			Destination::CustomerSend,
			&SendChatPayload {
				conversation_id: None,
				content: "Hello".to_string(),
			},
		)
		.unwrap();
		assert_eq!(msg.body, r#"{"conversationId":null,"content":"Hello"}"#);

		let frame = msg.to_frame();
		assert_eq!(frame.command, Command::Send);
		assert_eq!(frame.header(header::DESTINATION), Some("/app/chat.customer.send"));
		assert_eq!(frame.header(header::CONTENT_TYPE), Some("application/json"));
	}

	#[test]
	fn staff_payload_keeps_numeric_id() {
		let msg = OutboundMessage::encode(
			Destination::StaffSend,
			&SendChatPayload {
				conversation_id: Some(ConversationId::new("42").unwrap()),
				content: "On it".to_string(),
			},
		)
		.unwrap();
		assert_eq!(msg.body, r#"{"conversationId":42,"content":"On it"}"#);
		assert_eq!(msg.to_frame().header(header::DESTINATION), Some("/app/chat.staff.send"));
	}
}
