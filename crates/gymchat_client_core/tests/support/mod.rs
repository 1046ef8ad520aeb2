#![forbid(unsafe_code)]
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use gymchat_client_core::transport::{MemoryPeer, MemoryServer, memory_transport};
use gymchat_client_core::{ChatApi, ChatClient, ChatError, ChatEvent, ClientConfig, ShutdownHandle, StaticCredential};
use gymchat_domain::{ConfirmedMessage, Conversation, ConversationId};
use gymchat_protocol::{Command, DEFAULT_MAX_FRAME_SIZE, Frame, HeartBeat, header};
use parking_lot::Mutex;
use tokio::sync::broadcast;

static LOG_INIT: OnceLock<()> = OnceLock::new();

pub fn init_test_logging() {
	LOG_INIT.get_or_init(|| {
		if std::env::var_os("GYMCHAT_TEST_LOG").is_none() {
			return;
		}

		let _ = tracing_subscriber::fmt()
			.with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "debug".to_string()))
			.with_target(false)
			.try_init();
	});
}

pub fn test_config() -> ClientConfig {
	ClientConfig {
		heart_beat: HeartBeat::disabled(),
		reconnect_delay: Duration::from_millis(20),
		connect_timeout: Duration::from_secs(2),
		..ClientConfig::default()
	}
}

pub struct Harness {
	pub client: ChatClient,
	pub shutdown: ShutdownHandle,
	pub server: MemoryServer,
}

pub fn harness(cfg: ClientConfig) -> Harness {
	init_test_logging();
	let (connector, server) = memory_transport(DEFAULT_MAX_FRAME_SIZE);
	let (client, shutdown) = ChatClient::spawn_with_connector(cfg, Arc::new(connector));
	Harness {
		client,
		shutdown,
		server,
	}
}

impl Harness {
	/// Connect the client and complete the STOMP handshake. Returns the server side and the CONNECT frame.
	pub async fn connect(&mut self, server_heart_beat: &str) -> (MemoryPeer, Frame) {
		let client = &self.client;
		let server = &mut self.server;
		let (res, peer) = tokio::join!(client.connect(StaticCredential::new("tok")), async {
			let mut peer = server.accept().await.expect("client connection");
			let connect = peer.handshake(server_heart_beat).await.expect("CONNECT");
			(peer, connect)
		});
		res.expect("connect");
		peer
	}
}

/// Next SUBSCRIBE from the client as `(id, destination)`.
pub async fn expect_subscribe(peer: &mut MemoryPeer) -> (String, String) {
	let frame = next_frame(peer).await;
	assert_eq!(frame.command, Command::Subscribe, "{frame:?}");
	(
		frame.header(header::ID).expect("id").to_string(),
		frame.header(header::DESTINATION).expect("destination").to_string(),
	)
}

pub async fn next_frame(peer: &mut MemoryPeer) -> Frame {
	tokio::time::timeout(Duration::from_secs(2), peer.recv_frame())
		.await
		.expect("frame within 2s")
		.expect("connection open")
}

/// Assert the client sends nothing for `ms` milliseconds.
pub async fn expect_silence(peer: &mut MemoryPeer, ms: u64) {
	if let Ok(Some(frame)) = tokio::time::timeout(Duration::from_millis(ms), peer.recv_frame()).await {
		panic!("unexpected frame: {frame:?}");
	}
}

pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
	for _ in 0..300 {
		if check() {
			return;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	panic!("timed out waiting for {what}");
}

/// Wait for the first event matching `pred`.
pub async fn wait_event(events: &mut broadcast::Receiver<ChatEvent>, mut pred: impl FnMut(&ChatEvent) -> bool) -> ChatEvent {
	tokio::time::timeout(Duration::from_secs(5), async {
		loop {
			match events.recv().await {
				Ok(ev) if pred(&ev) => return ev,
				Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
				Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
			}
		}
	})
	.await
	.expect("event within 5s")
}

pub fn message_json(id: u64, conversation: u64, role: &str, content: &str) -> String {
	serde_json::json!({
		"id": id,
		"conversationId": conversation,
		"senderRole": role,
		"content": content,
		"createdAt": "2025-03-01T10:00:00Z",
	})
	.to_string()
}

pub fn conversation(id: &str, name: &str, status: &str, last_message_at: Option<&str>) -> Conversation {
	serde_json::from_value(serde_json::json!({
		"id": id,
		"customerName": name,
		"status": status,
		"lastMessageAt": last_message_at,
		"createdAt": "2025-03-01T08:00:00Z",
	}))
	.expect("conversation json")
}

/// In-memory REST backend.
#[derive(Default)]
pub struct FakeApi {
	pub my_conversation: Mutex<Option<Conversation>>,
	pub history: Mutex<HashMap<String, Vec<ConfirmedMessage>>>,
	pub conversations: Mutex<Vec<Conversation>>,
	pub assigned: Mutex<Vec<ConversationId>>,
	pub list_calls: AtomicU32,
	/// Number of upcoming history fetches that fail.
	pub history_failures: AtomicU32,
}

impl FakeApi {
	pub fn list_calls(&self) -> u32 {
		self.list_calls.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl ChatApi for FakeApi {
	async fn fetch_my_conversation(&self) -> Result<Option<Conversation>, ChatError> {
		Ok(self.my_conversation.lock().clone())
	}

	async fn fetch_messages(&self, conversation_id: &ConversationId) -> Result<Vec<ConfirmedMessage>, ChatError> {
		if self
			.history_failures
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok()
		{
			return Err(ChatError::Api("503 Service Unavailable".to_string()));
		}
		Ok(self
			.history
			.lock()
			.get(conversation_id.as_str())
			.cloned()
			.unwrap_or_default())
	}

	async fn list_conversations(&self) -> Result<Vec<Conversation>, ChatError> {
		self.list_calls.fetch_add(1, Ordering::SeqCst);
		Ok(self.conversations.lock().clone())
	}

	async fn assign_conversation(&self, conversation_id: &ConversationId) -> Result<(), ChatError> {
		self.assigned.lock().push(conversation_id.clone());
		Ok(())
	}
}
