#![forbid(unsafe_code)]

use core::fmt;
use std::collections::HashMap;

use gymchat_domain::Topic;
use gymchat_protocol::Frame;

use crate::ChatError;

/// Callback for one topic. Runs on the network task and must not block.
pub type MessageHandler = Box<dyn FnMut(&Frame) -> Result<(), ChatError> + Send>;

/// STOMP subscription id (`sub-N`). Unique for the lifetime of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
	/// Parse the `subscription` header of a MESSAGE frame.
	pub fn parse(s: &str) -> Option<Self> {
		s.strip_prefix("sub-")?.parse().ok().map(Self)
	}
}

impl fmt::Display for SubscriptionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "sub-{}", self.0)
	}
}

/// Opaque token for a live subscription. Invalidated by unsubscribe, by a later subscribe on the same topic and by
/// disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
	topic: Topic,
	id: SubscriptionId,
}

impl SubscriptionHandle {
	pub fn topic(&self) -> &Topic {
		&self.topic
	}

	pub fn id(&self) -> SubscriptionId {
		self.id
	}
}

struct Entry {
	id: SubscriptionId,
	handler: MessageHandler,
}

/// Topic → subscription map. At most one subscription per topic; subscribing again replaces.
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
	next_id: u64,
	by_topic: HashMap<Topic, Entry>,
	topic_by_id: HashMap<SubscriptionId, Topic>,
}

impl SubscriptionRegistry {
	/// Register `handler` for `topic`. Returns the new handle and the id it replaced, if any.
	pub(crate) fn insert(&mut self, topic: Topic, handler: MessageHandler) -> (SubscriptionHandle, Option<SubscriptionId>) {
		let id = SubscriptionId(self.next_id);
		self.next_id += 1;

		let replaced = self.by_topic.insert(topic.clone(), Entry { id, handler }).map(|old| old.id);
		if let Some(old) = replaced {
			self.topic_by_id.remove(&old);
		}
		self.topic_by_id.insert(id, topic.clone());

		(SubscriptionHandle { topic, id }, replaced)
	}

	/// Remove the subscription on `topic`, if present.
	pub(crate) fn remove(&mut self, topic: &Topic) -> Option<SubscriptionId> {
		let entry = self.by_topic.remove(topic)?;
		self.topic_by_id.remove(&entry.id);
		Some(entry.id)
	}

	/// Remove the subscription only if `handle` is still the live one for its topic.
	pub(crate) fn remove_handle(&mut self, handle: &SubscriptionHandle) -> Option<SubscriptionId> {
		if !self.is_live(handle) {
			return None;
		}
		self.remove(&handle.topic)
	}

	pub(crate) fn is_live(&self, handle: &SubscriptionHandle) -> bool {
		self.by_topic.get(&handle.topic).is_some_and(|e| e.id == handle.id)
	}

	/// Look up the callback for a MESSAGE frame's `subscription` header.
	pub(crate) fn route(&mut self, subscription: &str) -> Option<(&Topic, &mut MessageHandler)> {
		let id = SubscriptionId::parse(subscription)?;
		let topic = self.topic_by_id.get(&id)?;
		let entry = self.by_topic.get_mut(topic)?;
		Some((topic, &mut entry.handler))
	}

	/// Live `(topic, id)` pairs, for resubscribing after a reconnect.
	pub(crate) fn active(&self) -> Vec<(Topic, SubscriptionId)> {
		self.by_topic.iter().map(|(t, e)| (t.clone(), e.id)).collect()
	}

	/// Drop every subscription. Returns the released ids.
	pub(crate) fn clear(&mut self) -> Vec<SubscriptionId> {
		self.topic_by_id.clear();
		self.by_topic.drain().map(|(_, e)| e.id).collect()
	}

	pub(crate) fn len(&self) -> usize {
		self.by_topic.len()
	}
}
