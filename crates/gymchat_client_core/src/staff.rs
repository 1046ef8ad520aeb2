#![forbid(unsafe_code)]

use std::sync::Arc;

use gymchat_domain::{ChatMessage, Conversation, ConversationDirectory, ConversationId, Destination, SenderRole, StaffNotification, Topic};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::controller::ChatClient;
use crate::rest::ChatApi;
use crate::subscriptions::SubscriptionHandle;
use crate::view::ConversationView;
use crate::ChatError;

struct Inbox {
	conversations: Mutex<Vec<Conversation>>,
	revision: watch::Sender<u64>,
}

impl Inbox {
	fn replace(&self, conversations: &[Conversation]) {
		*self.conversations.lock() = ConversationDirectory::order(conversations);
		self.revision.send_modify(|r| *r = r.wrapping_add(1));
	}
}

async fn reload(api: &dyn ChatApi, inbox: &Inbox) -> Result<(), ChatError> {
	let conversations = api.list_conversations().await?;
	debug!(count = conversations.len(), "conversation list refreshed");
	inbox.replace(&conversations);
	Ok(())
}

/// Staff console: every conversation, most recently active first, refreshed on each staff notification.
pub struct StaffInbox {
	client: ChatClient,
	api: Arc<dyn ChatApi>,
	inbox: Arc<Inbox>,
	view: ConversationView,
	notifications: Option<SubscriptionHandle>,
	refresher: Option<JoinHandle<()>>,
}

impl StaffInbox {
	pub fn new(client: ChatClient, api: Arc<dyn ChatApi>) -> Self {
		let (revision, _) = watch::channel(0);
		Self {
			client,
			api,
			inbox: Arc::new(Inbox {
				conversations: Mutex::new(Vec::new()),
				revision,
			}),
			view: ConversationView::new(),
			notifications: None,
			refresher: None,
		}
	}

	/// Load the list and follow `/topic/staff/new-messages`. Requires a connected client.
	pub async fn start(&mut self) -> Result<(), ChatError> {
		self.stop_refresher();

		let (tx, mut rx) = mpsc::unbounded_channel::<StaffNotification>();
		let handle = self
			.client
			.subscribe(Topic::staff_new_messages(), move |notification: StaffNotification| {
				let _ = tx.send(notification);
			})
			.await?;
		self.notifications = Some(handle);

		let api = Arc::clone(&self.api);
		let inbox = Arc::clone(&self.inbox);
		// Ends when the subscription is released, since that drops the sender.
		self.refresher = Some(tokio::spawn(async move {
			while let Some(notification) = rx.recv().await {
				match &notification.conversation_id {
					Some(id) => debug!(conversation = %id, "staff notification"),
					None => debug!(customer = ?notification.customer_name, "staff notification"),
				}
				while rx.try_recv().is_ok() {}
				if let Err(e) = reload(api.as_ref(), &inbox).await {
					warn!(error = %e, "conversation refresh failed");
				}
			}
		}));

		self.refresh().await
	}

	pub async fn refresh(&self) -> Result<(), ChatError> {
		reload(self.api.as_ref(), &self.inbox).await
	}

	/// Current list, most recently active first.
	pub fn conversations(&self) -> Vec<Conversation> {
		self.inbox.conversations.lock().clone()
	}

	/// Ticks whenever the list changes.
	pub fn changes(&self) -> watch::Receiver<u64> {
		self.inbox.revision.subscribe()
	}

	pub async fn open_conversation(&self, conversation_id: ConversationId) -> Result<(), ChatError> {
		self.view.attach(&self.client, self.api.as_ref(), conversation_id).await
	}

	pub fn open_conversation_id(&self) -> Option<ConversationId> {
		self.view.conversation_id()
	}

	pub fn messages(&self) -> Vec<ChatMessage> {
		self.view.messages()
	}

	pub fn view(&self) -> &ConversationView {
		&self.view
	}

	/// Reply in the open conversation.
	pub async fn send(&self, content: &str) -> Result<ChatMessage, ChatError> {
		if self.view.conversation_id().is_none() {
			return Err(ChatError::SendFailure("no conversation open".to_string()));
		}
		self.view
			.send(&self.client, SenderRole::Staff, Destination::StaffSend, content)
			.await
	}

	/// Take a conversation and refresh the list.
	pub async fn assign(&self, conversation_id: &ConversationId) -> Result<(), ChatError> {
		self.api.assign_conversation(conversation_id).await?;
		info!(conversation = %conversation_id, "conversation assigned");
		self.refresh().await
	}

	/// Stop following notifications and close the open conversation.
	pub async fn stop(&mut self) {
		if let Some(handle) = self.notifications.take() {
			self.client.unsubscribe_handle(&handle).await;
		}
		self.stop_refresher();
		self.view.detach(&self.client).await;
	}

	fn stop_refresher(&mut self) {
		if let Some(task) = self.refresher.take() {
			task.abort();
		}
	}
}

impl Drop for StaffInbox {
	fn drop(&mut self) {
		self.stop_refresher();
	}
}
