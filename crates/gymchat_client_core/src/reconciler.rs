#![forbid(unsafe_code)]

use std::collections::HashSet;

use gymchat_domain::{ChatMessage, ConfirmedMessage, ConversationId, LocalMessageId, SenderRole, ServerMessageId};

/// Outcome of [`MessageReconciler::admit_confirmed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
	Appended,
	/// Already present by server id; nothing changed.
	Duplicate,
}

/// Merges optimistic local echoes with server-confirmed messages for one conversation view.
///
/// Confirmed entries are unique by server id. Any confirmed arrival clears every pending entry, since the backend
/// does not echo a client correlation id and the confirmation is taken to cover them.
#[derive(Debug, Default)]
pub struct MessageReconciler {
	messages: Vec<ChatMessage>,
	seen: HashSet<ServerMessageId>,
}

impl MessageReconciler {
	pub fn new() -> Self {
		Self::default()
	}

	/// Visible sequence, in insertion order.
	pub fn messages(&self) -> &[ChatMessage] {
		&self.messages
	}

	pub fn len(&self) -> usize {
		self.messages.len()
	}

	pub fn is_empty(&self) -> bool {
		self.messages.is_empty()
	}

	pub fn pending_count(&self) -> usize {
		self.messages.iter().filter(|m| m.is_pending()).count()
	}

	/// Append a pending echo of a message the user is about to send. Returns the entry, whose local id is needed
	/// for [`Self::discard_optimistic`].
	pub fn append_optimistic(
		&mut self,
		conversation_id: Option<ConversationId>,
		content: impl Into<String>,
		sender_role: SenderRole,
	) -> ChatMessage {
		let message = ChatMessage::pending(conversation_id, content, sender_role);
		self.messages.push(message.clone());
		message
	}

	/// Admit a server-confirmed message: drop all pending entries, then append unless already present.
	pub fn admit_confirmed(&mut self, message: ConfirmedMessage) -> Admission {
		self.messages.retain(|m| !m.is_pending());
		if !self.seen.insert(message.id.clone()) {
			return Admission::Duplicate;
		}
		self.messages.push(message.into());
		Admission::Appended
	}

	/// Remove one pending entry, e.g. after its send failed. Returns whether it was present.
	pub fn discard_optimistic(&mut self, local_id: LocalMessageId) -> bool {
		let before = self.messages.len();
		self.messages.retain(|m| m.id.local_id() != Some(local_id));
		self.messages.len() != before
	}

	/// Seed confirmed history (oldest first). Live confirmations already admitted and absent from `history` stay after
	/// it; pending entries stay last. Duplicates collapse by server id.
	pub fn load_history(&mut self, history: Vec<ConfirmedMessage>) {
		let (pending, live): (Vec<ChatMessage>, Vec<ChatMessage>) =
			self.messages.drain(..).partition(ChatMessage::is_pending);
		self.seen.clear();

		for message in history {
			if self.seen.insert(message.id.clone()) {
				self.messages.push(message.into());
			}
		}
		for message in live {
			if let Some(id) = message.id.server_id()
				&& self.seen.insert(id.clone())
			{
				self.messages.push(message);
			}
		}
		self.messages.extend(pending);
	}

	/// Drop every pending entry.
	pub fn clear_pending(&mut self) -> usize {
		let before = self.messages.len();
		self.messages.retain(|m| !m.is_pending());
		before - self.messages.len()
	}

	pub fn confirmed_count(&self) -> usize {
		self.seen.len()
	}

	pub fn clear(&mut self) {
		self.messages.clear();
		self.seen.clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::{TimeZone, Utc};
	use gymchat_domain::MessageId;
	use proptest::prelude::*;

	fn confirmed(id: &str, content: &str) -> ConfirmedMessage {
		ConfirmedMessage {
			id: ServerMessageId::new(id).unwrap(),
			conversation_id: Some(ConversationId::new("42").unwrap()),
			sender_role: SenderRole::Customer,
			sender_name: None,
			content: content.to_string(),
			created_at: Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap(),
		}
	}

	#[test]
	fn confirmation_replaces_pending_echo() {
		let mut r = MessageReconciler::new();
		let pending = r.append_optimistic(None, "Hello", SenderRole::Customer);
		assert!(pending.is_pending());
		assert_eq!(r.pending_count(), 1);

		assert_eq!(r.admit_confirmed(confirmed("1", "Hello")), Admission::Appended);
		assert_eq!(r.len(), 1);
		assert_eq!(r.pending_count(), 0);
		assert_eq!(r.messages()[0].id, MessageId::Confirmed(ServerMessageId::new("1").unwrap()));
	}

	#[test]
	fn duplicate_confirmation_is_ignored() {
		let mut r = MessageReconciler::new();
		assert_eq!(r.admit_confirmed(confirmed("7", "a")), Admission::Appended);
		assert_eq!(r.admit_confirmed(confirmed("7", "a")), Admission::Duplicate);
		assert_eq!(r.len(), 1);
	}

	#[test]
	fn any_confirmation_clears_all_pending() {
		let mut r = MessageReconciler::new();
		r.append_optimistic(None, "one", SenderRole::Customer);
		r.append_optimistic(None, "two", SenderRole::Customer);
		assert_eq!(r.pending_count(), 2);

		r.admit_confirmed(confirmed("9", "staff reply"));
		assert_eq!(r.pending_count(), 0);
		assert_eq!(r.len(), 1);
	}

	#[test]
	fn duplicate_still_clears_pending() {
		let mut r = MessageReconciler::new();
		r.admit_confirmed(confirmed("1", "Hello"));
		r.append_optimistic(None, "again", SenderRole::Customer);
		assert_eq!(r.admit_confirmed(confirmed("1", "Hello")), Admission::Duplicate);
		assert_eq!(r.pending_count(), 0);
	}

	#[test]
	fn discard_rolls_back_only_that_entry() {
		let mut r = MessageReconciler::new();
		let a = r.append_optimistic(None, "a", SenderRole::Staff);
		let b = r.append_optimistic(None, "b", SenderRole::Staff);

		assert!(r.discard_optimistic(a.id.local_id().unwrap()));
		assert!(!r.discard_optimistic(a.id.local_id().unwrap()));
		assert_eq!(r.len(), 1);
		assert_eq!(r.messages()[0].id, b.id);
	}

	#[test]
	fn history_merges_with_live_and_keeps_pending() {
		let mut r = MessageReconciler::new();
		r.admit_confirmed(confirmed("3", "live"));
		r.append_optimistic(None, "typing", SenderRole::Customer);

		r.load_history(vec![confirmed("1", "a"), confirmed("2", "b"), confirmed("1", "a")]);

		let contents: Vec<_> = r.messages().iter().map(|m| m.content.as_str()).collect();
		assert_eq!(contents, ["a", "b", "live", "typing"]);
		assert_eq!(r.pending_count(), 1);
		assert_eq!(r.confirmed_count(), 3);
		assert_eq!(r.admit_confirmed(confirmed("2", "b")), Admission::Duplicate);
	}

	#[test]
	fn history_already_holding_live_message_does_not_duplicate() {
		let mut r = MessageReconciler::new();
		r.admit_confirmed(confirmed("2", "b"));
		r.load_history(vec![confirmed("1", "a"), confirmed("2", "b")]);
		assert_eq!(r.len(), 2);

		r.append_optimistic(None, "x", SenderRole::Customer);
		assert_eq!(r.clear_pending(), 1);
		assert_eq!(r.len(), 2);
	}

	#[derive(Debug, Clone)]
	enum Op {
		Append,
		Discard(usize),
		Admit(u8),
	}

	fn op() -> impl Strategy<Value = Op> {
		prop_oneof![Just(Op::Append), (0usize..4).prop_map(Op::Discard), (0u8..6).prop_map(Op::Admit)]
	}

	proptest! {
		#[test]
		fn interleaved_operations_keep_server_ids_unique(ops in proptest::collection::vec(op(), 0..64)) {
			let mut r = MessageReconciler::new();
			let mut echoes = Vec::new();
			let mut admitted: Vec<String> = Vec::new();

			for op in ops {
				match op {
					Op::Append => echoes.push(r.append_optimistic(None, "echo", SenderRole::Customer)),
					Op::Discard(i) => {
						if echoes.is_empty() {
							continue;
						}
						let echo = echoes.remove(i % echoes.len());
						let local = echo.id.local_id().unwrap();
						r.discard_optimistic(local);
						prop_assert!(r.messages().iter().all(|m| m.id.local_id() != Some(local)));
					}
					Op::Admit(n) => {
						let id = n.to_string();
						let expected = if admitted.contains(&id) {
							Admission::Duplicate
						} else {
							admitted.push(id.clone());
							Admission::Appended
						};
						prop_assert_eq!(r.admit_confirmed(confirmed(&id, "m")), expected);
						prop_assert_eq!(r.pending_count(), 0);
						echoes.clear();
					}
				}

				let confirmed_ids: Vec<String> = r
					.messages()
					.iter()
					.filter_map(|m| m.id.server_id().map(|s| s.as_str().to_string()))
					.collect();
				prop_assert_eq!(&confirmed_ids, &admitted);
				prop_assert_eq!(r.pending_count(), echoes.len());
			}
		}
	}
}
