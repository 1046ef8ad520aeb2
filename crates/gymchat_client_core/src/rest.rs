#![forbid(unsafe_code)]

//! REST collaborator: conversations and message history.

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use gymchat_domain::{ConfirmedMessage, Conversation, ConversationId};
use gymchat_util::endpoint::BackendEndpoint;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::ChatError;
use crate::credential::SharedCredentialSource;

#[async_trait]
pub trait ChatApi: Send + Sync {
	/// The signed-in customer's conversation. `None` until the first message creates one.
	async fn fetch_my_conversation(&self) -> Result<Option<Conversation>, ChatError>;

	/// Confirmed history of a conversation, oldest first.
	async fn fetch_messages(&self, conversation_id: &ConversationId) -> Result<Vec<ConfirmedMessage>, ChatError>;

	/// Every conversation visible to the signed-in staff member.
	async fn list_conversations(&self) -> Result<Vec<Conversation>, ChatError>;

	/// Assign a conversation to the signed-in staff member.
	async fn assign_conversation(&self, conversation_id: &ConversationId) -> Result<(), ChatError>;
}

/// [`ChatApi`] over HTTP with `reqwest`.
#[derive(Clone)]
pub struct HttpChatApi {
	endpoint: BackendEndpoint,
	credentials: SharedCredentialSource,
	client: reqwest::Client,
}

impl HttpChatApi {
	pub fn new(endpoint: BackendEndpoint, credentials: SharedCredentialSource) -> Self {
		Self {
			endpoint,
			credentials,
			client: reqwest::Client::new(),
		}
	}

	fn url(&self, path: &str) -> anyhow::Result<Url> {
		self.endpoint.api_url(path).map_err(|e| anyhow!(e))
	}

	fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
		let request = self.client.request(method, url);
		match self.credentials.bearer_token() {
			Some(token) => request.bearer_auth(token.expose()),
			None => request,
		}
	}

	async fn get_json<T: DeserializeOwned>(&self, path: &str, what: &str) -> anyhow::Result<T> {
		let resp = self
			.request(reqwest::Method::GET, self.url(path)?)
			.send()
			.await
			.with_context(|| format!("{what} request"))?;

		let status = resp.status();
		if !status.is_success() {
			return Err(anyhow!("{what} failed: status={status}"));
		}
		resp.json::<T>().await.with_context(|| format!("{what} decode"))
	}

	async fn my_conversation(&self) -> anyhow::Result<Option<Conversation>> {
		let resp = self
			.request(reqwest::Method::GET, self.url("chat/conversations/my")?)
			.send()
			.await
			.context("fetch my conversation request")?;

		// The backend answers 404, or 500 on some deployments, before the first message.
		match resp.status() {
			StatusCode::NOT_FOUND | StatusCode::INTERNAL_SERVER_ERROR | StatusCode::NO_CONTENT => {
				debug!(status = %resp.status(), "no conversation yet");
				return Ok(None);
			}
			status if !status.is_success() => {
				return Err(anyhow!("fetch my conversation failed: status={status}"));
			}
			_ => {}
		}

		let body = resp.text().await.context("fetch my conversation body")?;
		let body = body.trim();
		if body.is_empty() || body == "null" {
			return Ok(None);
		}
		let conversation = serde_json::from_str(body).context("fetch my conversation decode")?;
		Ok(Some(conversation))
	}

	async fn assign(&self, conversation_id: &ConversationId) -> anyhow::Result<()> {
		let url = self.url(&format!("chat/conversations/{conversation_id}/assign"))?;
		let resp = self
			.request(reqwest::Method::POST, url)
			.send()
			.await
			.context("assign conversation request")?;

		match resp.status() {
			StatusCode::OK | StatusCode::CREATED | StatusCode::NO_CONTENT => Ok(()),
			status => Err(anyhow!("assign conversation failed: status={status}")),
		}
	}
}

#[async_trait]
impl ChatApi for HttpChatApi {
	async fn fetch_my_conversation(&self) -> Result<Option<Conversation>, ChatError> {
		Ok(self.my_conversation().await?)
	}

	async fn fetch_messages(&self, conversation_id: &ConversationId) -> Result<Vec<ConfirmedMessage>, ChatError> {
		let path = format!("chat/conversations/{conversation_id}/messages");
		Ok(self.get_json(&path, "fetch messages").await?)
	}

	async fn list_conversations(&self) -> Result<Vec<Conversation>, ChatError> {
		Ok(self.get_json("chat/conversations", "list conversations").await?)
	}

	async fn assign_conversation(&self, conversation_id: &ConversationId) -> Result<(), ChatError> {
		Ok(self.assign(conversation_id).await?)
	}
}
