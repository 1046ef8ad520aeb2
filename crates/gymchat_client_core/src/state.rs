#![forbid(unsafe_code)]

use core::fmt;

use gymchat_domain::Topic;
use gymchat_protocol::NegotiatedHeartBeat;

/// Lifecycle of the single realtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
	#[default]
	Disconnected,
	Connecting,
	Connected,
	Errored,
}

impl ConnectionState {
	pub const fn is_connected(self) -> bool {
		matches!(self, ConnectionState::Connected)
	}

	pub const fn as_str(self) -> &'static str {
		match self {
			ConnectionState::Disconnected => "disconnected",
			ConnectionState::Connecting => "connecting",
			ConnectionState::Connected => "connected",
			ConnectionState::Errored => "errored",
		}
	}
}

impl fmt::Display for ConnectionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Events emitted by the network task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
	StateChanged(ConnectionState),
	Connected {
		heart_beat: NegotiatedHeartBeat,
	},
	Disconnected {
		reason: String,
	},
	Reconnecting {
		attempt: u32,
		next_retry_in_ms: u64,
	},
	/// Automatic reconnection gave up; an explicit `connect` is required.
	ReconnectExhausted {
		attempts: u32,
	},
	/// The server sent an ERROR frame.
	ServerError {
		message: String,
	},
	/// An inbound frame was dropped without reaching any callback.
	FrameDropped {
		topic: Option<Topic>,
		reason: String,
	},
}
