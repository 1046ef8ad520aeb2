#![forbid(unsafe_code)]

use std::sync::Arc;

use gymchat_domain::{Destination, Topic};
use gymchat_protocol::Frame;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::backend::run_client_task;
use crate::credential::{CredentialSource, SharedCredentialSource};
use crate::dispatcher::OutboundMessage;
use crate::subscriptions::{MessageHandler, SubscriptionHandle};
use crate::transport::{Connector, WsConnector};
use crate::{ChatError, ChatEvent, ClientConfig, ConnectionState};

pub(crate) enum ChatCommand {
	Connect {
		credentials: SharedCredentialSource,
		reply: oneshot::Sender<Result<(), ChatError>>,
	},
	Disconnect {
		reason: String,
		reply: oneshot::Sender<()>,
	},
	Subscribe {
		topic: Topic,
		handler: MessageHandler,
		reply: oneshot::Sender<Result<SubscriptionHandle, ChatError>>,
	},
	Unsubscribe {
		topic: Topic,
		reply: oneshot::Sender<()>,
	},
	UnsubscribeHandle {
		handle: SubscriptionHandle,
		reply: oneshot::Sender<()>,
	},
	IsActive {
		handle: SubscriptionHandle,
		reply: oneshot::Sender<bool>,
	},
	Send {
		message: OutboundMessage,
		reply: oneshot::Sender<Result<(), ChatError>>,
	},
}

/// Cheap, cloneable handle to the network task. Every clone talks to the same connection.
#[derive(Clone)]
pub struct ChatClient {
	cmd_tx: mpsc::Sender<ChatCommand>,
	state_rx: watch::Receiver<ConnectionState>,
	events_tx: broadcast::Sender<ChatEvent>,
}

/// Stops the network task. Dropping it without calling [`ShutdownHandle::shutdown`] leaves the task running until
/// every [`ChatClient`] is gone.
pub struct ShutdownHandle {
	shutdown_tx: oneshot::Sender<()>,
	join_handle: JoinHandle<()>,
}

impl ShutdownHandle {
	pub async fn shutdown(self) {
		let _ = self.shutdown_tx.send(());
		let _ = self.join_handle.await;
	}
}

impl ChatClient {
	/// Spawn the network task on the current tokio runtime, speaking STOMP over WebSocket.
	pub fn spawn(cfg: ClientConfig) -> (Self, ShutdownHandle) {
		let connector = Arc::new(WsConnector::new(cfg.max_frame_bytes));
		Self::spawn_with_connector(cfg, connector)
	}

	pub fn spawn_with_connector(cfg: ClientConfig, connector: Arc<dyn Connector>) -> (Self, ShutdownHandle) {
		let (cmd_tx, cmd_rx) = mpsc::channel(128);
		let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
		let (events_tx, _) = broadcast::channel(256);
		let (shutdown_tx, shutdown_rx) = oneshot::channel();

		let join_handle = tokio::spawn(run_client_task(
			cfg,
			connector,
			cmd_rx,
			state_tx,
			events_tx.clone(),
			shutdown_rx,
		));

		(
			Self {
				cmd_tx,
				state_rx,
				events_tx,
			},
			ShutdownHandle {
				shutdown_tx,
				join_handle,
			},
		)
	}

	/// `None` once the network task has stopped.
	async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> ChatCommand) -> Option<T> {
		let (reply, rx) = oneshot::channel();
		self.cmd_tx.send(make(reply)).await.ok()?;
		rx.await.ok()
	}

	/// Open the connection. Resolves once CONNECTED arrives; a no-op when already connected.
	pub async fn connect(&self, credentials: impl CredentialSource + 'static) -> Result<(), ChatError> {
		self.connect_shared(Arc::new(credentials)).await
	}

	pub async fn connect_shared(&self, credentials: SharedCredentialSource) -> Result<(), ChatError> {
		self.request(|reply| ChatCommand::Connect { credentials, reply })
			.await
			.unwrap_or_else(|| Err(ChatError::Connection("chat client task stopped".to_string())))
	}

	/// Release every subscription and close the connection. Idempotent.
	pub async fn disconnect(&self) {
		let _ = self
			.request(|reply| ChatCommand::Disconnect {
				reason: "disconnect requested".to_string(),
				reply,
			})
			.await;
	}

	pub fn is_connected(&self) -> bool {
		self.state().is_connected()
	}

	pub fn state(&self) -> ConnectionState {
		*self.state_rx.borrow()
	}

	pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
		self.state_rx.clone()
	}

	pub fn events(&self) -> broadcast::Receiver<ChatEvent> {
		self.events_tx.subscribe()
	}

	/// Subscribe with a typed callback. Payloads that fail to decode as `T` are dropped and reported as
	/// [`ChatEvent::FrameDropped`]; the subscription stays live.
	pub async fn subscribe<T, F>(&self, topic: Topic, mut on_message: F) -> Result<SubscriptionHandle, ChatError>
	where
		T: DeserializeOwned,
		F: FnMut(T) + Send + 'static,
	{
		let handler: MessageHandler = Box::new(move |frame: &Frame| -> Result<(), ChatError> {
			let value: T = serde_json::from_str(frame.body_str()?)?;
			on_message(value);
			Ok(())
		});
		self.subscribe_raw(topic, handler).await
	}

	/// Subscribe with a frame-level handler. Replaces any existing subscription on `topic`.
	pub async fn subscribe_raw(&self, topic: Topic, handler: MessageHandler) -> Result<SubscriptionHandle, ChatError> {
		if !self.is_connected() {
			return Err(ChatError::NotConnected);
		}
		self.request(|reply| ChatCommand::Subscribe { topic, handler, reply })
			.await
			.unwrap_or(Err(ChatError::NotConnected))
	}

	pub async fn unsubscribe(&self, topic: &Topic) {
		let topic = topic.clone();
		let _ = self
			.request(|reply| ChatCommand::Unsubscribe { topic, reply })
			.await;
	}

	/// Unsubscribe only if `handle` is still the live subscription for its topic.
	pub async fn unsubscribe_handle(&self, handle: &SubscriptionHandle) {
		let handle = handle.clone();
		let _ = self
			.request(|reply| ChatCommand::UnsubscribeHandle { handle, reply })
			.await;
	}

	pub async fn is_active(&self, handle: &SubscriptionHandle) -> bool {
		let handle = handle.clone();
		self.request(|reply| ChatCommand::IsActive { handle, reply })
			.await
			.unwrap_or(false)
	}

	/// Publish `payload` as JSON. Fails fast with [`ChatError::NotConnected`] while not connected.
	pub async fn send<P: Serialize + ?Sized>(&self, destination: Destination, payload: &P) -> Result<(), ChatError> {
		if !self.is_connected() {
			metrics::counter!("gymchat_client_send_failures_total").increment(1);
			return Err(ChatError::NotConnected);
		}
		let message = OutboundMessage::encode(destination, payload)?;
		self.request(|reply| ChatCommand::Send { message, reply })
			.await
			.unwrap_or(Err(ChatError::NotConnected))
	}
}
