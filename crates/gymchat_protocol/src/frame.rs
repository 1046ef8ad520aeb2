#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use bytes::Bytes;

use crate::framing::FramingError;

/// Well-known header names.
pub mod header {
	pub const ACCEPT_VERSION: &str = "accept-version";
	pub const AUTHORIZATION: &str = "Authorization";
	pub const CONTENT_LENGTH: &str = "content-length";
	pub const CONTENT_TYPE: &str = "content-type";
	pub const DESTINATION: &str = "destination";
	pub const HEART_BEAT: &str = "heart-beat";
	pub const HOST: &str = "host";
	pub const ID: &str = "id";
	pub const MESSAGE: &str = "message";
	pub const MESSAGE_ID: &str = "message-id";
	pub const RECEIPT: &str = "receipt";
	pub const RECEIPT_ID: &str = "receipt-id";
	pub const SUBSCRIPTION: &str = "subscription";
	pub const VERSION: &str = "version";
}

/// STOMP frame commands (client and server).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
	Connect,
	Stomp,
	Send,
	Subscribe,
	Unsubscribe,
	Ack,
	Nack,
	Begin,
	Commit,
	Abort,
	Disconnect,
	Connected,
	Message,
	Receipt,
	Error,
}

impl Command {
	pub const fn as_str(self) -> &'static str {
		match self {
			Command::Connect => "CONNECT",
			Command::Stomp => "STOMP",
			Command::Send => "SEND",
			Command::Subscribe => "SUBSCRIBE",
			Command::Unsubscribe => "UNSUBSCRIBE",
			Command::Ack => "ACK",
			Command::Nack => "NACK",
			Command::Begin => "BEGIN",
			Command::Commit => "COMMIT",
			Command::Abort => "ABORT",
			Command::Disconnect => "DISCONNECT",
			Command::Connected => "CONNECTED",
			Command::Message => "MESSAGE",
			Command::Receipt => "RECEIPT",
			Command::Error => "ERROR",
		}
	}

	/// CONNECT and CONNECTED headers are never escaped.
	pub const fn escapes_headers(self) -> bool {
		!matches!(self, Command::Connect | Command::Stomp | Command::Connected)
	}
}

impl fmt::Display for Command {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Command {
	type Err = FramingError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(match s {
			"CONNECT" => Command::Connect,
			"STOMP" => Command::Stomp,
			"SEND" => Command::Send,
			"SUBSCRIBE" => Command::Subscribe,
			"UNSUBSCRIBE" => Command::Unsubscribe,
			"ACK" => Command::Ack,
			"NACK" => Command::Nack,
			"BEGIN" => Command::Begin,
			"COMMIT" => Command::Commit,
			"ABORT" => Command::Abort,
			"DISCONNECT" => Command::Disconnect,
			"CONNECTED" => Command::Connected,
			"MESSAGE" => Command::Message,
			"RECEIPT" => Command::Receipt,
			"ERROR" => Command::Error,
			other => return Err(FramingError::UnknownCommand(other.to_string())),
		})
	}
}

/// A single STOMP frame. Headers keep wire order; repeated names resolve to the first occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
	pub command: Command,
	pub headers: Vec<(String, String)>,
	pub body: Bytes,
}

impl Frame {
	pub fn new(command: Command) -> Self {
		Self {
			command,
			headers: Vec::new(),
			body: Bytes::new(),
		}
	}

	/// Builder-style header append.
	pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((name.into(), value.into()));
		self
	}

	/// Builder-style body.
	pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
		self.body = body.into();
		self
	}

	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(k, _)| k == name)
			.map(|(_, v)| v.as_str())
	}

	/// Body as UTF-8 text.
	pub fn body_str(&self) -> Result<&str, FramingError> {
		core::str::from_utf8(&self.body).map_err(|_| FramingError::InvalidUtf8)
	}

	/// `CONNECT` with bearer auth and heart-beat.
	pub fn connect(host: &str, bearer_token: Option<&str>, heart_beat: &str) -> Self {
		let mut frame = Frame::new(Command::Connect)
			.with_header(header::ACCEPT_VERSION, crate::version::ACCEPT_VERSION)
			.with_header(header::HOST, host)
			.with_header(header::HEART_BEAT, heart_beat);
		if let Some(token) = bearer_token {
			frame = frame.with_header(header::AUTHORIZATION, format!("Bearer {token}"));
		}
		frame
	}

	pub fn subscribe(id: &str, destination: &str) -> Self {
		Frame::new(Command::Subscribe)
			.with_header(header::ID, id)
			.with_header(header::DESTINATION, destination)
	}

	pub fn unsubscribe(id: &str) -> Self {
		Frame::new(Command::Unsubscribe).with_header(header::ID, id)
	}

	/// `SEND` with a JSON body.
	pub fn send_json(destination: &str, body: impl Into<Bytes>) -> Self {
		Frame::new(Command::Send)
			.with_header(header::DESTINATION, destination)
			.with_header(header::CONTENT_TYPE, "application/json")
			.with_body(body)
	}

	pub fn disconnect() -> Self {
		Frame::new(Command::Disconnect)
	}
}
