#![forbid(unsafe_code)]

use gymchat_protocol::FramingError;

/// Errors surfaced by the chat client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
	/// Connection establishment failed or the transport dropped.
	#[error("connection error: {0}")]
	Connection(String),

	/// The operation needs a live connection.
	#[error("not connected")]
	NotConnected,

	/// An inbound frame or payload could not be understood.
	#[error("protocol error: {0}")]
	Protocol(String),

	/// The transport refused an outbound frame.
	#[error("send failed: {0}")]
	SendFailure(String),

	/// REST collaborator failure.
	#[error("api error: {0}")]
	Api(String),
}

impl ChatError {
	/// True for errors that leave the transport unusable.
	pub fn is_connection_loss(&self) -> bool {
		matches!(self, ChatError::Connection(_))
	}
}

impl From<FramingError> for ChatError {
	fn from(e: FramingError) -> Self {
		ChatError::Protocol(e.to_string())
	}
}

impl From<serde_json::Error> for ChatError {
	fn from(e: serde_json::Error) -> Self {
		ChatError::Protocol(format!("invalid json payload: {e}"))
	}
}

impl From<anyhow::Error> for ChatError {
	fn from(e: anyhow::Error) -> Self {
		ChatError::Api(format!("{e:#}"))
	}
}
