#![forbid(unsafe_code)]

//! In-process transport: a connector/server pair joined by channels. Bytes still go through the STOMP codec.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use bytes::Bytes;
use gymchat_protocol::{Command, Decoded, Frame, encode_frame, framing::HEARTBEAT_EOL, header, version};
use tokio::sync::mpsc;
use url::Url;

use super::{BoxFuture, BoxedTransport, Connector, InboundBuffer, Transport};
use crate::ChatError;

struct MemoryShared {
	accept_tx: mpsc::UnboundedSender<MemoryPeer>,
	refusing: AtomicBool,
	attempts: AtomicU32,
	max_frame_bytes: usize,
}

/// Create a connected connector/server pair.
pub fn memory_transport(max_frame_bytes: usize) -> (MemoryConnector, MemoryServer) {
	let (accept_tx, accept_rx) = mpsc::unbounded_channel();
	let shared = Arc::new(MemoryShared {
		accept_tx,
		refusing: AtomicBool::new(false),
		attempts: AtomicU32::new(0),
		max_frame_bytes,
	});

	(
		MemoryConnector {
			shared: Arc::clone(&shared),
		},
		MemoryServer { accept_rx, shared },
	)
}

#[derive(Clone)]
pub struct MemoryConnector {
	shared: Arc<MemoryShared>,
}

impl Connector for MemoryConnector {
	fn connect<'a>(&'a self, _url: &'a Url) -> BoxFuture<'a, Result<BoxedTransport, ChatError>> {
		Box::pin(async move {
			self.shared.attempts.fetch_add(1, Ordering::SeqCst);
			if self.shared.refusing.load(Ordering::SeqCst) {
				return Err(ChatError::Connection("connection refused".to_string()));
			}

			let (to_server_tx, to_server_rx) = mpsc::unbounded_channel();
			let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
			let max = self.shared.max_frame_bytes;

			let peer = MemoryPeer {
				rx: to_server_rx,
				tx: to_client_tx,
				inbound: InboundBuffer::new(max),
				max_frame_bytes: max,
			};
			self.shared
				.accept_tx
				.send(peer)
				.map_err(|_| ChatError::Connection("no memory server listening".to_string()))?;

			Ok(Box::new(MemoryTransport {
				tx: Some(to_server_tx),
				rx: to_client_rx,
				inbound: InboundBuffer::new(max),
				max_frame_bytes: max,
			}) as BoxedTransport)
		})
	}
}

struct MemoryTransport {
	tx: Option<mpsc::UnboundedSender<Bytes>>,
	rx: mpsc::UnboundedReceiver<Bytes>,
	inbound: InboundBuffer,
	max_frame_bytes: usize,
}

impl MemoryTransport {
	fn write(&self, bytes: Bytes) -> Result<(), ChatError> {
		let tx = self
			.tx
			.as_ref()
			.ok_or_else(|| ChatError::Connection("transport closed".to_string()))?;
		tx.send(bytes)
			.map_err(|_| ChatError::Connection("peer closed".to_string()))
	}
}

impl Transport for MemoryTransport {
	fn send_frame<'a>(&'a mut self, frame: &'a Frame) -> BoxFuture<'a, Result<(), ChatError>> {
		Box::pin(async move {
			let bytes = encode_frame(frame, self.max_frame_bytes)?;
			self.write(Bytes::from(bytes))
		})
	}

	fn send_heartbeat<'a>(&'a mut self) -> BoxFuture<'a, Result<(), ChatError>> {
		Box::pin(async move { self.write(Bytes::from_static(HEARTBEAT_EOL)) })
	}

	fn recv<'a>(&'a mut self) -> BoxFuture<'a, Option<Result<Decoded, ChatError>>> {
		Box::pin(async move {
			loop {
				if let Some(item) = self.inbound.next_decoded() {
					return Some(item);
				}
				let bytes = self.rx.recv().await?;
				self.inbound.extend(&bytes);
			}
		})
	}

	fn close<'a>(&'a mut self) -> BoxFuture<'a, ()> {
		Box::pin(async move {
			self.tx = None;
			self.rx.close();
		})
	}
}

/// Accept side of [`memory_transport`].
pub struct MemoryServer {
	accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
	shared: Arc<MemoryShared>,
}

impl MemoryServer {
	/// Next client connection.
	pub async fn accept(&mut self) -> Option<MemoryPeer> {
		self.accept_rx.recv().await
	}

	/// Refuse (or accept again) subsequent connection attempts.
	pub fn set_refusing(&self, refusing: bool) {
		self.shared.refusing.store(refusing, Ordering::SeqCst);
	}

	/// Connection attempts seen so far, refused ones included.
	pub fn connect_attempts(&self) -> u32 {
		self.shared.attempts.load(Ordering::SeqCst)
	}
}

/// Server end of one memory connection. Dropping it closes the connection.
pub struct MemoryPeer {
	rx: mpsc::UnboundedReceiver<Bytes>,
	tx: mpsc::UnboundedSender<Bytes>,
	inbound: InboundBuffer,
	max_frame_bytes: usize,
}

impl MemoryPeer {
	/// Next decoded item from the client. `None` once the client closed.
	pub async fn recv(&mut self) -> Option<Decoded> {
		loop {
			match self.inbound.next_decoded() {
				Some(Ok(decoded)) => return Some(decoded),
				Some(Err(_)) => continue,
				None => {}
			}
			let bytes = self.rx.recv().await?;
			self.inbound.extend(&bytes);
		}
	}

	/// Next frame from the client, skipping heart-beats.
	pub async fn recv_frame(&mut self) -> Option<Frame> {
		loop {
			if let Decoded::Frame(frame) = self.recv().await? {
				return Some(frame);
			}
		}
	}

	/// Wait for CONNECT and answer CONNECTED with the given `heart-beat` value. Returns the CONNECT frame.
	pub async fn handshake(&mut self, heart_beat: &str) -> Option<Frame> {
		let connect = self.recv_frame().await?;
		if !matches!(connect.command, Command::Connect | Command::Stomp) {
			return None;
		}
		let connected = Frame::new(Command::Connected)
			.with_header(header::VERSION, version::STOMP_VERSION)
			.with_header(header::HEART_BEAT, heart_beat);
		self.send_frame(&connected).then_some(connect)
	}

	pub fn send_frame(&self, frame: &Frame) -> bool {
		match encode_frame(frame, self.max_frame_bytes) {
			Ok(bytes) => self.send_raw(&bytes),
			Err(_) => false,
		}
	}

	pub fn send_raw(&self, bytes: &[u8]) -> bool {
		self.tx.send(Bytes::copy_from_slice(bytes)).is_ok()
	}

	/// Push a MESSAGE frame with a JSON body.
	pub fn deliver(&self, subscription: &str, destination: &str, body: &str) -> bool {
		let frame = Frame::new(Command::Message)
			.with_header(header::SUBSCRIPTION, subscription)
			.with_header(header::DESTINATION, destination)
			.with_header(header::CONTENT_TYPE, "application/json")
			.with_body(body.to_string());
		self.send_frame(&frame)
	}
}
