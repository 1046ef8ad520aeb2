#![forbid(unsafe_code)]

use std::time::Duration;

use gymchat_protocol::{DEFAULT_MAX_FRAME_SIZE, HeartBeat};
use gymchat_util::endpoint::BackendEndpoint;

use crate::ChatError;

/// Backend base URL override.
pub const API_BASE_URL_ENV: &str = "GYMCHAT_API_BASE_URL";

/// Bearer token used by the command-line client.
pub const AUTH_TOKEN_ENV: &str = "GYMCHAT_AUTH_TOKEN";

/// Local dev default.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
	/// REST base URL; the chat socket lives on the same host.
	pub api_base_url: String,

	/// Heart-beat offered in CONNECT (milliseconds each direction).
	pub heart_beat: HeartBeat,

	/// The connection is considered dead after `expected inbound interval * tolerance` of silence.
	pub heartbeat_tolerance: u32,

	/// Fixed delay before each automatic reconnect attempt.
	pub reconnect_delay: Duration,

	/// Automatic reconnect attempts after an unexpected drop. Zero disables reconnection.
	pub max_reconnect_attempts: u32,

	/// Timeout for transport connect + STOMP handshake.
	pub connect_timeout: Duration,

	/// Maximum inbound/outbound frame size.
	pub max_frame_bytes: usize,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			api_base_url: DEFAULT_API_BASE_URL.to_string(),
			heart_beat: HeartBeat::new(4000, 4000),
			heartbeat_tolerance: 2,
			reconnect_delay: Duration::from_millis(5000),
			max_reconnect_attempts: 5,
			connect_timeout: Duration::from_secs(15),
			max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
		}
	}
}

impl ClientConfig {
	/// Defaults, with the base URL taken from `GYMCHAT_API_BASE_URL` when set.
	pub fn from_env() -> Result<Self, ChatError> {
		let mut cfg = Self::default();
		if let Ok(url) = std::env::var(API_BASE_URL_ENV)
			&& !url.trim().is_empty()
		{
			cfg.api_base_url = url.trim().to_string();
		}
		cfg.endpoint()?;
		Ok(cfg)
	}

	pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
		self.api_base_url = url.into();
		self
	}

	/// Parsed backend endpoint.
	pub fn endpoint(&self) -> Result<BackendEndpoint, ChatError> {
		BackendEndpoint::parse(&self.api_base_url).map_err(ChatError::Connection)
	}
}
