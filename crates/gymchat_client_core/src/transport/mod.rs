#![forbid(unsafe_code)]

use std::future::Future;
use std::pin::Pin;

use bytes::BytesMut;
use gymchat_protocol::{Decoded, Frame, try_decode_frame_from_buffer};
use url::Url;

use crate::ChatError;

pub mod memory;
pub mod ws;

pub use memory::{MemoryConnector, MemoryPeer, MemoryServer, memory_transport};
pub use ws::WsConnector;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type BoxedTransport = Box<dyn Transport>;

/// A connected byte pipe carrying STOMP frames.
pub trait Transport: Send {
	/// Encode and write a frame. Encoding problems are `Protocol`, write failures are `Connection`.
	fn send_frame<'a>(&'a mut self, frame: &'a Frame) -> BoxFuture<'a, Result<(), ChatError>>;

	/// Write a heart-beat EOL.
	fn send_heartbeat<'a>(&'a mut self) -> BoxFuture<'a, Result<(), ChatError>>;

	/// Next inbound item. `None` once the peer closed the connection.
	///
	/// `Some(Err(ChatError::Protocol))` reports a skipped malformed frame; the transport stays usable.
	fn recv<'a>(&'a mut self) -> BoxFuture<'a, Option<Result<Decoded, ChatError>>>;

	/// Best-effort close.
	fn close<'a>(&'a mut self) -> BoxFuture<'a, ()>;
}

/// Opens transports to the chat socket.
pub trait Connector: Send + Sync {
	fn connect<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<BoxedTransport, ChatError>>;
}

/// Incremental inbound decoder shared by the transports.
#[derive(Debug)]
pub(crate) struct InboundBuffer {
	buf: BytesMut,
	max_frame_bytes: usize,
}

impl InboundBuffer {
	pub(crate) fn new(max_frame_bytes: usize) -> Self {
		Self {
			buf: BytesMut::with_capacity(8 * 1024),
			max_frame_bytes,
		}
	}

	pub(crate) fn extend(&mut self, bytes: &[u8]) {
		self.buf.extend_from_slice(bytes);
	}

	pub(crate) fn next_decoded(&mut self) -> Option<Result<Decoded, ChatError>> {
		match try_decode_frame_from_buffer(&mut self.buf, self.max_frame_bytes) {
			Ok(Some(decoded)) => Some(Ok(decoded)),
			Ok(None) => None,
			Err(e) if e.is_fatal() => {
				self.buf.clear();
				Some(Err(ChatError::Connection(format!("inbound stream unreadable: {e}"))))
			}
			Err(e) => Some(Err(ChatError::Protocol(format!("malformed frame: {e}")))),
		}
	}
}
