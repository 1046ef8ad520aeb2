#![forbid(unsafe_code)]

use std::sync::Arc;

use gymchat_domain::Topic;
use gymchat_protocol::{Command, Decoded, Frame, HeartBeat, NegotiatedHeartBeat, header};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::controller::ChatCommand;
use crate::credential::{SecretString, SharedCredentialSource};
use crate::dispatcher::OutboundMessage;
use crate::reconnect::ReconnectPolicy;
use crate::subscriptions::{MessageHandler, SubscriptionHandle, SubscriptionId, SubscriptionRegistry};
use crate::transport::{BoxedTransport, Connector};
use crate::{ChatError, ChatEvent, ClientConfig, ConnectionState};

struct Session {
	transport: BoxedTransport,
	heart_beat: NegotiatedHeartBeat,
	last_inbound: Instant,
}

/// State owned by the network task. Nothing else touches the transport or the registry.
struct ClientTask {
	cfg: ClientConfig,
	policy: ReconnectPolicy,
	connector: Arc<dyn Connector>,
	state_tx: watch::Sender<ConnectionState>,
	events_tx: broadcast::Sender<ChatEvent>,
	registry: SubscriptionRegistry,
	session: Option<Session>,
	heartbeat: Option<Interval>,
	/// Set while the consumer wants to be connected; drives automatic reconnects.
	credentials: Option<SharedCredentialSource>,
	reconnect_attempt: u32,
	reconnect_deadline: Option<Instant>,
}

pub(crate) async fn run_client_task(
	cfg: ClientConfig,
	connector: Arc<dyn Connector>,
	mut cmd_rx: mpsc::Receiver<ChatCommand>,
	state_tx: watch::Sender<ConnectionState>,
	events_tx: broadcast::Sender<ChatEvent>,
	mut shutdown_rx: oneshot::Receiver<()>,
) {
	let mut task = ClientTask {
		policy: ReconnectPolicy::new(cfg.reconnect_delay, cfg.max_reconnect_attempts),
		cfg,
		connector,
		state_tx,
		events_tx,
		registry: SubscriptionRegistry::default(),
		session: None,
		heartbeat: None,
		credentials: None,
		reconnect_attempt: 0,
		reconnect_deadline: None,
	};
	// A dropped ShutdownHandle disarms the branch instead of stopping the task.
	let mut shutdown_armed = true;

	loop {
		tokio::select! {
			res = &mut shutdown_rx, if shutdown_armed => {
				if res.is_ok() {
					task.teardown("shutdown").await;
					break;
				}
				shutdown_armed = false;
			}

			cmd = cmd_rx.recv() => {
				let Some(cmd) = cmd else {
					task.teardown("all client handles dropped").await;
					break;
				};
				task.handle_command(cmd).await;
			}

			inbound = next_inbound(&mut task.session) => {
				task.handle_inbound(inbound).await;
			}

			_ = next_tick(&mut task.heartbeat) => {
				task.on_heartbeat_tick().await;
			}

			_ = sleep_until_deadline(task.reconnect_deadline), if task.reconnect_deadline.is_some() => {
				task.try_reconnect().await;
			}
		}
	}

	debug!("chat client task stopped");
}

async fn next_inbound(session: &mut Option<Session>) -> Option<Result<Decoded, ChatError>> {
	match session {
		Some(s) => s.transport.recv().await,
		None => std::future::pending().await,
	}
}

async fn next_tick(heartbeat: &mut Option<Interval>) {
	match heartbeat {
		Some(interval) => {
			interval.tick().await;
		}
		None => std::future::pending().await,
	}
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
	if let Some(deadline) = deadline {
		tokio::time::sleep_until(deadline).await;
	}
}

/// Connect the transport and run the STOMP handshake, bounded by `connect_timeout`. Every failure is reported as
/// [`ChatError::Connection`].
async fn open_session(
	cfg: &ClientConfig,
	connector: &dyn Connector,
	credentials: &SharedCredentialSource,
) -> Result<Session, ChatError> {
	let endpoint = cfg.endpoint()?;
	let url = endpoint.chat_socket_url();
	let connect_frame = {
		let token = credentials.bearer_token();
		Frame::connect(
			&endpoint.hostport(),
			token.as_ref().map(SecretString::expose),
			&cfg.heart_beat.to_header(),
		)
	};

	info!(url = %url, "opening chat session");

	let handshake = async {
		let mut transport = connector.connect(&url).await?;
		transport.send_frame(&connect_frame).await?;
		loop {
			match transport.recv().await {
				None => {
					return Err(ChatError::Connection("closed during STOMP handshake".to_string()));
				}
				Some(Ok(Decoded::HeartBeat)) => continue,
				Some(Ok(Decoded::Frame(frame))) => return finish_handshake(cfg, transport, frame),
				Some(Err(e)) => return Err(e),
			}
		}
	};

	match tokio::time::timeout(cfg.connect_timeout, handshake).await {
		Ok(Ok(session)) => Ok(session),
		Ok(Err(ChatError::Connection(msg))) => Err(ChatError::Connection(msg)),
		Ok(Err(e)) => Err(ChatError::Connection(e.to_string())),
		Err(_) => Err(ChatError::Connection(format!(
			"timed out after {:?} connecting to {url}",
			cfg.connect_timeout
		))),
	}
}

fn finish_handshake(cfg: &ClientConfig, transport: BoxedTransport, frame: Frame) -> Result<Session, ChatError> {
	match frame.command {
		Command::Connected => {
			let server = frame
				.header(header::HEART_BEAT)
				.map(str::parse::<HeartBeat>)
				.transpose()?
				.unwrap_or_default();
			let heart_beat = cfg.heart_beat.negotiate(server);
			debug!(
				version = frame.header(header::VERSION).unwrap_or("1.0"),
				?heart_beat,
				"received CONNECTED"
			);
			Ok(Session {
				transport,
				heart_beat,
				last_inbound: Instant::now(),
			})
		}
		Command::Error => Err(ChatError::Connection(format!(
			"server rejected CONNECT: {}",
			error_message(&frame)
		))),
		other => Err(ChatError::Protocol(format!("expected CONNECTED, got {other}"))),
	}
}

fn error_message(frame: &Frame) -> String {
	match frame.header(header::MESSAGE) {
		Some(message) if !message.is_empty() => message.to_string(),
		_ => frame.body_str().unwrap_or("").trim().to_string(),
	}
}

impl ClientTask {
	fn state(&self) -> ConnectionState {
		*self.state_tx.borrow()
	}

	fn set_state(&self, state: ConnectionState) {
		if self.state() != state {
			debug!(state = %state, "connection state changed");
			self.state_tx.send_replace(state);
			self.emit(ChatEvent::StateChanged(state));
		}
	}

	fn emit(&self, event: ChatEvent) {
		// No receivers is fine.
		let _ = self.events_tx.send(event);
	}

	async fn handle_command(&mut self, cmd: ChatCommand) {
		match cmd {
			ChatCommand::Connect { credentials, reply } => {
				let res = self.connect(credentials).await;
				let _ = reply.send(res);
			}
			ChatCommand::Disconnect { reason, reply } => {
				self.teardown(&reason).await;
				let _ = reply.send(());
			}
			ChatCommand::Subscribe { topic, handler, reply } => {
				let res = self.subscribe(topic, handler).await;
				let _ = reply.send(res);
			}
			ChatCommand::Unsubscribe { topic, reply } => {
				if let Some(id) = self.registry.remove(&topic) {
					debug!(topic = %topic, subscription = %id, "unsubscribing");
					self.send_unsubscribe(id).await;
				}
				let _ = reply.send(());
			}
			ChatCommand::UnsubscribeHandle { handle, reply } => {
				if let Some(id) = self.registry.remove_handle(&handle) {
					debug!(topic = %handle.topic(), subscription = %id, "unsubscribing handle");
					self.send_unsubscribe(id).await;
				}
				let _ = reply.send(());
			}
			ChatCommand::IsActive { handle, reply } => {
				let _ = reply.send(self.registry.is_live(&handle));
			}
			ChatCommand::Send { message, reply } => {
				let res = self.send(message).await;
				let _ = reply.send(res);
			}
		}
	}

	async fn connect(&mut self, credentials: SharedCredentialSource) -> Result<(), ChatError> {
		if self.session.is_some() {
			debug!("connect while connected; nothing to do");
			return Ok(());
		}

		self.reconnect_deadline = None;
		self.reconnect_attempt = 0;
		self.set_state(ConnectionState::Connecting);

		match open_session(&self.cfg, self.connector.as_ref(), &credentials).await {
			Ok(session) => {
				self.credentials = Some(credentials);
				self.install_session(session);
				// Topics kept across an abandoned reconnect cycle come back too.
				if let Err(e) = self.resubscribe_all().await {
					self.on_transport_lost(format!("resubscribe failed: {e}")).await;
				}
				Ok(())
			}
			Err(e) => {
				warn!(error = %e, "chat connect failed");
				self.credentials = None;
				self.registry.clear();
				self.set_state(ConnectionState::Errored);
				self.emit(ChatEvent::Disconnected { reason: e.to_string() });
				Err(e)
			}
		}
	}

	fn install_session(&mut self, session: Session) {
		let heart_beat = session.heart_beat;
		self.heartbeat = [heart_beat.send_every, heart_beat.expect_every]
			.into_iter()
			.flatten()
			.min()
			.map(|period| {
				let mut interval = tokio::time::interval_at(Instant::now() + period, period);
				interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
				interval
			});
		self.session = Some(session);
		info!("chat connected");
		self.set_state(ConnectionState::Connected);
		self.emit(ChatEvent::Connected { heart_beat });
	}

	async fn resubscribe_all(&mut self) -> Result<(), ChatError> {
		let Some(session) = self.session.as_mut() else {
			return Ok(());
		};
		for (topic, id) in self.registry.active() {
			debug!(topic = %topic, subscription = %id, "resubscribing");
			session
				.transport
				.send_frame(&Frame::subscribe(&id.to_string(), topic.as_str()))
				.await?;
		}
		Ok(())
	}

	async fn teardown(&mut self, reason: &str) {
		let released = self.registry.clear();
		if let Some(mut session) = self.session.take() {
			for id in released {
				let _ = session.transport.send_frame(&Frame::unsubscribe(&id.to_string())).await;
			}
			let _ = session.transport.send_frame(&Frame::disconnect()).await;
			session.transport.close().await;
		}

		self.heartbeat = None;
		self.credentials = None;
		self.reconnect_attempt = 0;
		self.reconnect_deadline = None;

		if self.state() != ConnectionState::Disconnected {
			info!(reason, "chat disconnected");
			self.set_state(ConnectionState::Disconnected);
			self.emit(ChatEvent::Disconnected {
				reason: reason.to_string(),
			});
		}
	}

	async fn subscribe(&mut self, topic: Topic, handler: MessageHandler) -> Result<SubscriptionHandle, ChatError> {
		let Some(session) = self.session.as_mut() else {
			return Err(ChatError::NotConnected);
		};

		let (handle, replaced) = self.registry.insert(topic.clone(), handler);
		let result = async {
			if let Some(old) = replaced {
				debug!(topic = %topic, old = %old, "replacing existing subscription");
				session
					.transport
					.send_frame(&Frame::unsubscribe(&old.to_string()))
					.await?;
			}
			session
				.transport
				.send_frame(&Frame::subscribe(&handle.id().to_string(), topic.as_str()))
				.await
		}
		.await;

		match result {
			Ok(()) => {
				debug!(topic = %topic, subscription = %handle.id(), "subscribed");
				Ok(handle)
			}
			Err(e) => {
				warn!(topic = %topic, error = %e, "subscribe failed");
				self.registry.remove_handle(&handle);
				if e.is_connection_loss() {
					self.on_transport_lost(e.to_string()).await;
				}
				Err(ChatError::SendFailure(e.to_string()))
			}
		}
	}

	async fn send_unsubscribe(&mut self, id: SubscriptionId) {
		let frame = Frame::unsubscribe(&id.to_string());
		let result = match self.session.as_mut() {
			Some(session) => session.transport.send_frame(&frame).await,
			None => return,
		};
		if let Err(e) = result {
			warn!(subscription = %id, error = %e, "unsubscribe failed");
			if e.is_connection_loss() {
				self.on_transport_lost(e.to_string()).await;
			}
		}
	}

	async fn send(&mut self, message: OutboundMessage) -> Result<(), ChatError> {
		let frame = message.to_frame();
		let result = match self.session.as_mut() {
			Some(session) => session.transport.send_frame(&frame).await,
			None => {
				metrics::counter!("gymchat_client_send_failures_total").increment(1);
				return Err(ChatError::NotConnected);
			}
		};

		match result {
			Ok(()) => {
				metrics::counter!("gymchat_client_sends_total").increment(1);
				debug!(destination = %message.destination, "published");
				Ok(())
			}
			Err(e) => {
				metrics::counter!("gymchat_client_send_failures_total").increment(1);
				warn!(destination = %message.destination, error = %e, "send failed");
				if e.is_connection_loss() {
					self.on_transport_lost(e.to_string()).await;
				}
				Err(ChatError::SendFailure(e.to_string()))
			}
		}
	}

	async fn handle_inbound(&mut self, inbound: Option<Result<Decoded, ChatError>>) {
		match inbound {
			None => self.on_transport_lost("connection closed by server".to_string()).await,
			Some(Err(ChatError::Protocol(reason))) => self.drop_frame(None, reason),
			Some(Err(e)) => self.on_transport_lost(e.to_string()).await,
			Some(Ok(decoded)) => {
				if let Some(session) = self.session.as_mut() {
					session.last_inbound = Instant::now();
				}
				if let Decoded::Frame(frame) = decoded {
					self.handle_frame(frame).await;
				}
			}
		}
	}

	async fn handle_frame(&mut self, frame: Frame) {
		match frame.command {
			Command::Message => self.deliver(&frame),
			Command::Error => {
				let message = error_message(&frame);
				warn!(message = %message, "server sent ERROR frame");
				self.emit(ChatEvent::ServerError {
					message: message.clone(),
				});
				self.on_transport_lost(format!("server error: {message}")).await;
			}
			Command::Receipt => {
				debug!(receipt = ?frame.header(header::RECEIPT_ID), "receipt");
			}
			other => warn!(command = %other, "unexpected frame from server"),
		}
	}

	fn deliver(&mut self, frame: &Frame) {
		let Some(subscription) = frame.header(header::SUBSCRIPTION) else {
			self.drop_frame(None, "MESSAGE without subscription header".to_string());
			return;
		};

		let Some((topic, handler)) = self.registry.route(subscription) else {
			// Late frames after unsubscribe or replacement land here.
			metrics::counter!("gymchat_client_frames_dropped_total").increment(1);
			debug!(subscription, "message for inactive subscription dropped");
			return;
		};

		if let Err(e) = handler(frame) {
			let topic = topic.clone();
			self.drop_frame(Some(topic), e.to_string());
		}
	}

	fn drop_frame(&self, topic: Option<Topic>, reason: String) {
		metrics::counter!("gymchat_client_frames_dropped_total").increment(1);
		warn!(topic = ?topic.as_ref().map(Topic::as_str), reason = %reason, "inbound frame dropped");
		self.emit(ChatEvent::FrameDropped { topic, reason });
	}

	async fn on_heartbeat_tick(&mut self) {
		let tolerance = self.cfg.heartbeat_tolerance.max(1);
		let Some(session) = self.session.as_mut() else {
			return;
		};

		let silent_for = session.last_inbound.elapsed();
		let timed_out = session
			.heart_beat
			.expect_every
			.is_some_and(|expect| silent_for > expect * tolerance);
		if timed_out {
			warn!(silent_ms = silent_for.as_millis() as u64, "no inbound traffic within heart-beat window");
			self.on_transport_lost("heart-beat timeout".to_string()).await;
			return;
		}

		if session.heart_beat.send_every.is_none() {
			return;
		}
		let result = session.transport.send_heartbeat().await;
		if let Err(e) = result {
			self.on_transport_lost(e.to_string()).await;
		}
	}

	async fn on_transport_lost(&mut self, reason: String) {
		if let Some(mut session) = self.session.take() {
			session.transport.close().await;
		}
		self.heartbeat = None;

		warn!(reason = %reason, "chat connection lost");
		self.set_state(ConnectionState::Errored);
		self.emit(ChatEvent::Disconnected { reason });

		if self.credentials.is_none() {
			self.registry.clear();
			return;
		}
		self.schedule_reconnect(1);
	}

	fn schedule_reconnect(&mut self, attempt: u32) {
		match self.policy.schedule(attempt) {
			Some((deadline, next_retry_in_ms)) => {
				self.reconnect_attempt = attempt;
				self.reconnect_deadline = Some(deadline);
				metrics::counter!("gymchat_client_reconnect_attempts_total").increment(1);
				info!(attempt, next_retry_in_ms, "scheduling reconnect");
				self.emit(ChatEvent::Reconnecting {
					attempt,
					next_retry_in_ms,
				});
			}
			None => self.give_up(),
		}
	}

	fn give_up(&mut self) {
		let attempts = self.reconnect_attempt;
		warn!(attempts, "reconnect attempts exhausted");
		self.reconnect_attempt = 0;
		self.reconnect_deadline = None;
		self.credentials = None;
		self.registry.clear();
		self.set_state(ConnectionState::Errored);
		self.emit(ChatEvent::ReconnectExhausted { attempts });
	}

	async fn try_reconnect(&mut self) {
		self.reconnect_deadline = None;
		let Some(credentials) = self.credentials.clone() else {
			return;
		};
		let attempt = self.reconnect_attempt;

		self.set_state(ConnectionState::Connecting);
		match open_session(&self.cfg, self.connector.as_ref(), &credentials).await {
			Ok(session) => {
				info!(attempt, "reconnected");
				self.reconnect_attempt = 0;
				self.install_session(session);
				if let Err(e) = self.resubscribe_all().await {
					self.on_transport_lost(format!("resubscribe failed: {e}")).await;
				}
			}
			Err(e) => {
				warn!(attempt, error = %e, "reconnect attempt failed");
				self.set_state(ConnectionState::Errored);
				self.schedule_reconnect(attempt + 1);
			}
		}
	}
}
