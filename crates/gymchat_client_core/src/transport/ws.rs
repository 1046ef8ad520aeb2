#![forbid(unsafe_code)]

use futures::{SinkExt, StreamExt};
use gymchat_protocol::{Decoded, Frame, encode_frame, framing::HEARTBEAT_EOL};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};
use url::Url;

use super::{BoxFuture, BoxedTransport, Connector, InboundBuffer, Transport};
use crate::ChatError;

type ChatWs = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Connects to the raw websocket leg of the chat endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
	max_frame_bytes: usize,
}

impl WsConnector {
	pub fn new(max_frame_bytes: usize) -> Self {
		Self { max_frame_bytes }
	}
}

impl Connector for WsConnector {
	fn connect<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<BoxedTransport, ChatError>> {
		Box::pin(async move {
			info!(url = %url, "connecting chat websocket");
			let (ws, _resp) = tokio_tungstenite::connect_async(url.as_str())
				.await
				.map_err(|e| ChatError::Connection(format!("websocket connect {url}: {e}")))?;

			Ok(Box::new(WsTransport {
				ws,
				inbound: InboundBuffer::new(self.max_frame_bytes),
				max_frame_bytes: self.max_frame_bytes,
			}) as BoxedTransport)
		})
	}
}

struct WsTransport {
	ws: ChatWs,
	inbound: InboundBuffer,
	max_frame_bytes: usize,
}

impl WsTransport {
	async fn write(&mut self, msg: Message) -> Result<(), ChatError> {
		self.ws
			.send(msg)
			.await
			.map_err(|e| ChatError::Connection(format!("websocket write: {e}")))
	}
}

impl Transport for WsTransport {
	fn send_frame<'a>(&'a mut self, frame: &'a Frame) -> BoxFuture<'a, Result<(), ChatError>> {
		Box::pin(async move {
			let bytes = encode_frame(frame, self.max_frame_bytes)?;
			// STOMP over websocket is text unless the body is binary.
			let msg = match String::from_utf8(bytes) {
				Ok(text) => Message::Text(text.into()),
				Err(e) => Message::Binary(e.into_bytes().into()),
			};
			self.write(msg).await
		})
	}

	fn send_heartbeat<'a>(&'a mut self) -> BoxFuture<'a, Result<(), ChatError>> {
		Box::pin(async move {
			let eol = String::from_utf8_lossy(HEARTBEAT_EOL).into_owned();
			self.write(Message::Text(eol.into())).await
		})
	}

	fn recv<'a>(&'a mut self) -> BoxFuture<'a, Option<Result<Decoded, ChatError>>> {
		Box::pin(async move {
			loop {
				if let Some(item) = self.inbound.next_decoded() {
					return Some(item);
				}

				let msg = match self.ws.next().await {
					Some(Ok(msg)) => msg,
					Some(Err(e)) => return Some(Err(ChatError::Connection(format!("websocket read: {e}")))),
					None => return None,
				};

				match msg {
					Message::Text(text) => self.inbound.extend(text.as_str().as_bytes()),
					Message::Binary(bytes) => self.inbound.extend(&bytes),
					// tungstenite queues the pong itself and flushes it with the next write.
					Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
					Message::Close(frame) => {
						debug!(?frame, "chat websocket closed by server");
						return None;
					}
				}
			}
		})
	}

	fn close<'a>(&'a mut self) -> BoxFuture<'a, ()> {
		Box::pin(async move {
			let _ = self.ws.close(None).await;
		})
	}
}
