#![forbid(unsafe_code)]

use std::sync::Arc;

use gymchat_domain::{ChatMessage, ConfirmedMessage, ConversationId, Destination, SendChatPayload, SenderRole, Topic};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::controller::ChatClient;
use crate::reconciler::{Admission, MessageReconciler};
use crate::rest::ChatApi;
use crate::subscriptions::SubscriptionHandle;
use crate::ChatError;

#[derive(Default)]
struct ViewState {
	conversation: Option<ConversationId>,
	subscription: Option<SubscriptionHandle>,
	reconciler: MessageReconciler,
	/// Bumped on every switch or detach; an attach whose generation is stale leaves the state alone.
	generation: u64,
	attaching: bool,
	history_loaded: bool,
}

impl ViewState {
	fn is_current(&self, generation: u64) -> bool {
		self.generation == generation
	}
}

struct ViewInner {
	state: Mutex<ViewState>,
	revision: watch::Sender<u64>,
}

impl ViewInner {
	fn bump(&self) {
		self.revision.send_modify(|r| *r = r.wrapping_add(1));
	}
}

/// Message list of the conversation currently on screen: live topic subscription, loaded history and the
/// optimistic echoes of outgoing messages.
#[derive(Clone)]
pub struct ConversationView {
	inner: Arc<ViewInner>,
}

impl Default for ConversationView {
	fn default() -> Self {
		Self::new()
	}
}

impl ConversationView {
	pub fn new() -> Self {
		let (revision, _) = watch::channel(0);
		Self {
			inner: Arc::new(ViewInner {
				state: Mutex::new(ViewState::default()),
				revision,
			}),
		}
	}

	pub fn conversation_id(&self) -> Option<ConversationId> {
		self.inner.state.lock().conversation.clone()
	}

	pub fn messages(&self) -> Vec<ChatMessage> {
		self.inner.state.lock().reconciler.messages().to_vec()
	}

	pub fn pending_count(&self) -> usize {
		self.inner.state.lock().reconciler.pending_count()
	}

	pub fn confirmed_count(&self) -> usize {
		self.inner.state.lock().reconciler.confirmed_count()
	}

	/// Ticks whenever the message list changes.
	pub fn changes(&self) -> watch::Receiver<u64> {
		self.inner.revision.subscribe()
	}

	/// Show `conversation_id`: subscribe to its topic, then load its history. Switching from another conversation
	/// drops that one's messages; pending echoes from before the conversation existed are kept. A call for the
	/// conversation that is already loaded or loading returns immediately. After a failed history load, calling
	/// again keeps the live subscription and retries the load.
	pub async fn attach(
		&self,
		client: &ChatClient,
		api: &dyn ChatApi,
		conversation_id: ConversationId,
	) -> Result<(), ChatError> {
		let (generation, previous, needs_subscription) = {
			let mut state = self.inner.state.lock();
			let same = state.conversation.as_ref() == Some(&conversation_id);
			if same && (state.attaching || state.history_loaded) {
				debug!(conversation = %conversation_id, "conversation already attached");
				return Ok(());
			}
			state.attaching = true;
			state.history_loaded = false;
			state.generation = state.generation.wrapping_add(1);
			let previous = if same {
				None
			} else {
				if state.conversation.is_some() {
					state.reconciler.clear();
				}
				state.conversation = Some(conversation_id.clone());
				state.subscription.take()
			};
			(state.generation, previous, state.subscription.is_none())
		};
		if let Some(handle) = previous {
			client.unsubscribe_handle(&handle).await;
		}
		self.inner.bump();

		if needs_subscription {
			let topic = Topic::conversation(&conversation_id);
			let inner = Arc::clone(&self.inner);
			let expected = conversation_id.clone();
			let subscribed = client
				.subscribe(topic, move |message: ConfirmedMessage| {
					let mut state = inner.state.lock();
					if state.conversation.as_ref() != Some(&expected) {
						return;
					}
					if state.reconciler.admit_confirmed(message) == Admission::Duplicate {
						debug!(conversation = %expected, "duplicate confirmation ignored");
					}
					drop(state);
					inner.bump();
				})
				.await;
			let handle = match subscribed {
				Ok(handle) => handle,
				Err(e) => {
					self.finish_attach(generation);
					return Err(e);
				}
			};

			let stale = {
				let mut state = self.inner.state.lock();
				if state.is_current(generation) {
					state.subscription = Some(handle);
					None
				} else {
					Some(handle)
				}
			};
			if let Some(handle) = stale {
				// Switched away while subscribing.
				client.unsubscribe_handle(&handle).await;
				return Ok(());
			}
		}

		let history = match api.fetch_messages(&conversation_id).await {
			Ok(history) => history,
			Err(e) => {
				warn!(conversation = %conversation_id, error = %e, "history load failed");
				self.finish_attach(generation);
				return Err(e);
			}
		};
		{
			let mut state = self.inner.state.lock();
			if !state.is_current(generation) {
				// Switched away while the history was loading.
				return Ok(());
			}
			debug!(conversation = %conversation_id, count = history.len(), "history loaded");
			state.reconciler.load_history(history);
			state.attaching = false;
			state.history_loaded = true;
		}
		self.inner.bump();
		Ok(())
	}

	fn finish_attach(&self, generation: u64) {
		let mut state = self.inner.state.lock();
		if state.is_current(generation) {
			state.attaching = false;
		}
	}

	/// Stop showing the current conversation.
	pub async fn detach(&self, client: &ChatClient) {
		let handle = {
			let mut state = self.inner.state.lock();
			state.conversation = None;
			state.generation = state.generation.wrapping_add(1);
			state.attaching = false;
			state.history_loaded = false;
			state.reconciler.clear();
			state.subscription.take()
		};
		if let Some(handle) = handle {
			client.unsubscribe_handle(&handle).await;
		}
		self.inner.bump();
	}

	/// Drop pending echoes, for when history already holds what they stood for.
	pub fn settle_pending(&self) {
		let dropped = self.inner.state.lock().reconciler.clear_pending();
		if dropped > 0 {
			self.inner.bump();
		}
	}

	/// Echo `content` immediately, then publish it. On failure the echo is rolled back and the error returned.
	pub async fn send(
		&self,
		client: &ChatClient,
		sender_role: SenderRole,
		destination: Destination,
		content: &str,
	) -> Result<ChatMessage, ChatError> {
		let content = content.trim();
		if content.is_empty() {
			return Err(ChatError::SendFailure("message is empty".to_string()));
		}

		let pending = {
			let mut state = self.inner.state.lock();
			let conversation_id = state.conversation.clone();
			state.reconciler.append_optimistic(conversation_id, content, sender_role)
		};
		self.inner.bump();

		let payload = SendChatPayload {
			conversation_id: pending.conversation_id.clone(),
			content: content.to_string(),
		};
		if let Err(e) = client.send(destination, &payload).await {
			warn!(destination = %destination, error = %e, "send failed; rolling back");
			if let Some(local_id) = pending.id.local_id() {
				self.inner.state.lock().reconciler.discard_optimistic(local_id);
			}
			self.inner.bump();
			return Err(e);
		}
		Ok(pending)
	}
}
