#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use gymchat_domain::{ChatMessage, ConversationId, Destination, SenderRole};
use tracing::{debug, info, warn};

use crate::controller::ChatClient;
use crate::credential::SharedCredentialSource;
use crate::rest::ChatApi;
use crate::view::ConversationView;
use crate::ChatError;

/// Lookups of the conversation the backend creates on a customer's first message.
const DISCOVERY_ATTEMPTS: u32 = 3;
const DISCOVERY_DELAY: Duration = Duration::from_millis(500);

/// Customer support widget: one conversation, created by the backend on the first message.
pub struct CustomerChat {
	client: ChatClient,
	api: Arc<dyn ChatApi>,
	view: ConversationView,
	discovery_delay: Duration,
}

impl CustomerChat {
	pub fn new(client: ChatClient, api: Arc<dyn ChatApi>) -> Self {
		Self {
			client,
			api,
			view: ConversationView::new(),
			discovery_delay: DISCOVERY_DELAY,
		}
	}

	/// Override the pause between conversation lookups after a first message.
	pub fn with_discovery_delay(mut self, delay: Duration) -> Self {
		self.discovery_delay = delay;
		self
	}

	/// Connect the shared client. A failure leaves the widget offline.
	pub async fn connect(&self, credentials: SharedCredentialSource) -> Result<(), ChatError> {
		if let Err(e) = self.client.connect_shared(credentials).await {
			warn!(error = %e, "support chat offline");
			return Err(e);
		}
		Ok(())
	}

	pub fn is_online(&self) -> bool {
		self.client.is_connected()
	}

	/// Load the customer's existing conversation, if any, and start following it.
	pub async fn open(&self) -> Result<Option<ConversationId>, ChatError> {
		let Some(conversation) = self.api.fetch_my_conversation().await? else {
			debug!("no conversation yet; the first message will create one");
			return Ok(None);
		};
		let id = conversation.id;
		self.view.attach(&self.client, self.api.as_ref(), id.clone()).await?;
		info!(conversation = %id, "support conversation opened");
		Ok(Some(id))
	}

	/// Send a message. The first message of a new customer carries no conversation id; the conversation the
	/// backend creates for it is looked up and followed afterwards.
	pub async fn send(&self, content: &str) -> Result<ChatMessage, ChatError> {
		let message = self
			.view
			.send(&self.client, SenderRole::Customer, Destination::CustomerSend, content)
			.await?;
		if self.view.conversation_id().is_none() {
			self.discover_conversation().await;
		}
		Ok(message)
	}

	async fn discover_conversation(&self) {
		for attempt in 1..=DISCOVERY_ATTEMPTS {
			match self.api.fetch_my_conversation().await {
				Ok(Some(conversation)) => {
					let id = conversation.id;
					if let Err(e) = self.view.attach(&self.client, self.api.as_ref(), id.clone()).await {
						warn!(conversation = %id, error = %e, "failed to follow new conversation");
						return;
					}
					// History already holds the message that created the conversation.
					if self.view.confirmed_count() > 0 {
						self.view.settle_pending();
					}
					info!(conversation = %id, "support conversation created");
					return;
				}
				Ok(None) => debug!(attempt, "conversation not created yet"),
				Err(e) => warn!(attempt, error = %e, "conversation lookup failed"),
			}
			if attempt < DISCOVERY_ATTEMPTS {
				tokio::time::sleep(self.discovery_delay).await;
			}
		}
	}

	pub fn conversation_id(&self) -> Option<ConversationId> {
		self.view.conversation_id()
	}

	pub fn messages(&self) -> Vec<ChatMessage> {
		self.view.messages()
	}

	pub fn view(&self) -> &ConversationView {
		&self.view
	}

	/// Stop following the conversation. The shared connection stays up.
	pub async fn close(&self) {
		self.view.detach(&self.client).await;
	}
}
