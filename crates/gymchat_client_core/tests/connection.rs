#![forbid(unsafe_code)]

mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use gymchat_client_core::{ChatError, ChatEvent, ClientConfig, ConnectionState, StaticCredential};
use gymchat_domain::{ConfirmedMessage, ConversationId, Destination, SendChatPayload, Topic};
use gymchat_protocol::{Command, Decoded, Frame, HeartBeat, header};
use parking_lot::Mutex;

use support::{eventually, expect_subscribe, harness, message_json, next_frame, test_config, wait_event};

fn counter() -> (Arc<AtomicU32>, impl FnMut(ConfirmedMessage) + Send + 'static) {
	let count = Arc::new(AtomicU32::new(0));
	let c = Arc::clone(&count);
	(count, move |_m: ConfirmedMessage| {
		c.fetch_add(1, Ordering::SeqCst);
	})
}

#[tokio::test]
async fn connect_sends_credentials_and_reports_connected() {
	let mut h = harness(test_config());
	let mut states = h.client.watch_state();
	assert_eq!(*states.borrow_and_update(), ConnectionState::Disconnected);

	let (_peer, connect) = h.connect("0,0").await;
	assert_eq!(connect.command, Command::Connect);
	assert_eq!(connect.header(header::AUTHORIZATION), Some("Bearer tok"));
	assert_eq!(connect.header(header::ACCEPT_VERSION), Some("1.2,1.1"));
	assert_eq!(connect.header(header::HEART_BEAT), Some("0,0"));

	assert!(h.client.is_connected());
	assert_eq!(h.client.state(), ConnectionState::Connected);

	// A second connect reuses the live connection.
	h.client.connect(StaticCredential::new("tok")).await.unwrap();
	assert_eq!(h.server.connect_attempts(), 1);

	h.shutdown.shutdown().await;
}

#[tokio::test]
async fn failed_initial_connect_is_not_retried() {
	let h = harness(test_config());
	h.server.set_refusing(true);
	let mut events = h.client.events();

	let err = h.client.connect(StaticCredential::new("tok")).await.unwrap_err();
	assert!(matches!(err, ChatError::Connection(_)), "{err:?}");
	assert_eq!(h.client.state(), ConnectionState::Errored);
	wait_event(&mut events, |e| matches!(e, ChatEvent::Disconnected { .. })).await;

	tokio::time::sleep(Duration::from_millis(100)).await;
	assert_eq!(h.server.connect_attempts(), 1);
}

#[tokio::test]
async fn handshake_error_frame_rejects_connect() {
	let mut h = harness(test_config());
	let client = h.client.clone();
	let connect = tokio::spawn(async move { client.connect(StaticCredential::new("bad")).await });

	let mut peer = h.server.accept().await.unwrap();
	let frame = next_frame(&mut peer).await;
	assert_eq!(frame.command, Command::Connect);
	peer.send_frame(&Frame::new(Command::Error).with_header(header::MESSAGE, "Invalid token"));

	let err = connect.await.unwrap().unwrap_err();
	assert!(matches!(err, ChatError::Connection(ref m) if m.contains("Invalid token")), "{err:?}");
	assert_eq!(h.client.state(), ConnectionState::Errored);
}

#[tokio::test]
async fn subscribe_and_send_require_connection() {
	let h = harness(test_config());
	let topic = Topic::staff_new_messages();

	let err = h.client.subscribe(topic, |_m: serde_json::Value| {}).await.unwrap_err();
	assert_eq!(err, ChatError::NotConnected);

	let payload = SendChatPayload {
		conversation_id: None,
		content: "hi".to_string(),
	};
	let err = h.client.send(Destination::CustomerSend, &payload).await.unwrap_err();
	assert_eq!(err, ChatError::NotConnected);
}

#[tokio::test]
async fn send_publishes_json_frame() {
	let mut h = harness(test_config());
	let (mut peer, _) = h.connect("0,0").await;

	let payload = SendChatPayload {
		conversation_id: None,
		content: "Hello".to_string(),
	};
	h.client.send(Destination::CustomerSend, &payload).await.unwrap();

	let frame = next_frame(&mut peer).await;
	assert_eq!(frame.command, Command::Send);
	assert_eq!(frame.header(header::DESTINATION), Some("/app/chat.customer.send"));
	assert_eq!(frame.body_str().unwrap(), r#"{"conversationId":null,"content":"Hello"}"#);
}

#[tokio::test]
async fn resubscribing_a_topic_replaces_the_callback() {
	let mut h = harness(test_config());
	let (mut peer, _) = h.connect("0,0").await;
	let topic = Topic::conversation(&ConversationId::new("42").unwrap());

	let (first_count, first) = counter();
	let (second_count, second) = counter();

	let old = h.client.subscribe::<ConfirmedMessage, _>(topic.clone(), first).await.unwrap();
	let (old_id, dest) = expect_subscribe(&mut peer).await;
	assert_eq!(dest, "/topic/conversation/42");

	let new = h.client.subscribe::<ConfirmedMessage, _>(topic.clone(), second).await.unwrap();
	let unsub = next_frame(&mut peer).await;
	assert_eq!(unsub.command, Command::Unsubscribe);
	assert_eq!(unsub.header(header::ID), Some(old_id.as_str()));
	let (new_id, _) = expect_subscribe(&mut peer).await;
	assert_ne!(old_id, new_id);

	assert!(!h.client.is_active(&old).await);
	assert!(h.client.is_active(&new).await);

	// A late frame for the replaced subscription reaches nobody.
	peer.deliver(&old_id, topic.as_str(), &message_json(1, 42, "STAFF", "late"));
	peer.deliver(&new_id, topic.as_str(), &message_json(2, 42, "STAFF", "hello"));

	eventually("second callback", || second_count.load(Ordering::SeqCst) == 1).await;
	tokio::time::sleep(Duration::from_millis(30)).await;
	assert_eq!(first_count.load(Ordering::SeqCst), 0);
	assert_eq!(second_count.load(Ordering::SeqCst), 1);

	// Unsubscribing through the stale handle leaves the replacement alone.
	h.client.unsubscribe_handle(&old).await;
	assert!(h.client.is_active(&new).await);
}

#[tokio::test]
async fn messages_only_reach_their_topic() {
	let mut h = harness(test_config());
	let (mut peer, _) = h.connect("0,0").await;

	let a = Topic::conversation(&ConversationId::new("1").unwrap());
	let b = Topic::conversation(&ConversationId::new("2").unwrap());
	let (a_count, on_a) = counter();
	let (b_count, on_b) = counter();

	h.client.subscribe::<ConfirmedMessage, _>(a.clone(), on_a).await.unwrap();
	let (a_id, _) = expect_subscribe(&mut peer).await;
	h.client.subscribe::<ConfirmedMessage, _>(b.clone(), on_b).await.unwrap();
	let (_b_id, _) = expect_subscribe(&mut peer).await;

	peer.deliver(&a_id, a.as_str(), &message_json(1, 1, "CUSTOMER", "for a"));
	peer.deliver(&a_id, a.as_str(), &message_json(2, 1, "CUSTOMER", "for a again"));

	eventually("both frames on a", || a_count.load(Ordering::SeqCst) == 2).await;
	assert_eq!(b_count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn malformed_payload_is_dropped_and_subscription_survives() {
	let mut h = harness(test_config());
	let (mut peer, _) = h.connect("0,0").await;
	let mut events = h.client.events();

	let topic = Topic::conversation(&ConversationId::new("42").unwrap());
	let received = Arc::new(Mutex::new(Vec::<ConfirmedMessage>::new()));
	let sink = Arc::clone(&received);
	let handle = h
		.client
		.subscribe(topic.clone(), move |m: ConfirmedMessage| sink.lock().push(m))
		.await
		.unwrap();
	let (id, _) = expect_subscribe(&mut peer).await;

	peer.deliver(&id, topic.as_str(), "{not json");
	peer.deliver(&id, topic.as_str(), &message_json(5, 42, "STAFF", "valid"));

	let dropped = wait_event(&mut events, |e| matches!(e, ChatEvent::FrameDropped { .. })).await;
	let ChatEvent::FrameDropped { topic: Some(t), .. } = &dropped else {
		panic!("expected topic on dropped frame: {dropped:?}");
	};
	assert_eq!(t, &topic);

	eventually("valid message", || received.lock().len() == 1).await;
	assert_eq!(received.lock()[0].content, "valid");
	assert!(h.client.is_active(&handle).await);
	assert!(h.client.is_connected());
}

#[tokio::test]
async fn unsubscribe_and_disconnect_are_idempotent() {
	let mut h = harness(test_config());
	let (mut peer, _) = h.connect("0,0").await;
	let topic = Topic::staff_new_messages();

	let handle = h.client.subscribe(topic.clone(), |_m: serde_json::Value| {}).await.unwrap();
	let (id, _) = expect_subscribe(&mut peer).await;

	h.client.unsubscribe(&topic).await;
	h.client.unsubscribe(&topic).await;
	let frame = next_frame(&mut peer).await;
	assert_eq!(frame.command, Command::Unsubscribe);
	assert_eq!(frame.header(header::ID), Some(id.as_str()));
	assert!(!h.client.is_active(&handle).await);

	h.client.subscribe(topic.clone(), |_m: serde_json::Value| {}).await.unwrap();
	let (live_id, _) = expect_subscribe(&mut peer).await;

	h.client.disconnect().await;
	h.client.disconnect().await;
	assert_eq!(h.client.state(), ConnectionState::Disconnected);

	// Teardown releases the live subscription, then says goodbye.
	let frame = next_frame(&mut peer).await;
	assert_eq!(frame.command, Command::Unsubscribe);
	assert_eq!(frame.header(header::ID), Some(live_id.as_str()));
	assert_eq!(next_frame(&mut peer).await.command, Command::Disconnect);
	assert!(peer.recv().await.is_none());

	let payload = SendChatPayload {
		conversation_id: None,
		content: "after".to_string(),
	};
	assert_eq!(
		h.client.send(Destination::CustomerSend, &payload).await,
		Err(ChatError::NotConnected)
	);
}

#[tokio::test]
async fn dropped_connection_reconnects_and_resubscribes() {
	let mut h = harness(test_config());
	let (mut peer, _) = h.connect("0,0").await;
	let mut events = h.client.events();

	let topic = Topic::conversation(&ConversationId::new("42").unwrap());
	let (count, on_message) = counter();
	let handle = h.client.subscribe::<ConfirmedMessage, _>(topic.clone(), on_message).await.unwrap();
	let (id, _) = expect_subscribe(&mut peer).await;

	drop(peer);
	let ev = wait_event(&mut events, |e| matches!(e, ChatEvent::Reconnecting { .. })).await;
	assert_eq!(
		ev,
		ChatEvent::Reconnecting {
			attempt: 1,
			next_retry_in_ms: 20
		}
	);

	let mut peer = h.server.accept().await.unwrap();
	peer.handshake("0,0").await.unwrap();
	let (resub_id, dest) = expect_subscribe(&mut peer).await;
	assert_eq!(resub_id, id);
	assert_eq!(dest, topic.as_str());

	eventually("reconnected", || h.client.is_connected()).await;
	assert!(h.client.is_active(&handle).await);

	peer.deliver(&id, topic.as_str(), &message_json(1, 42, "STAFF", "back"));
	eventually("delivery after reconnect", || count.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn reconnect_gives_up_after_bounded_attempts() {
	let mut h = harness(test_config());
	let (mut peer, _) = h.connect("0,0").await;
	let mut events = h.client.events();

	let topic = Topic::staff_new_messages();
	let handle = h.client.subscribe(topic.clone(), |_m: serde_json::Value| {}).await.unwrap();
	expect_subscribe(&mut peer).await;

	h.server.set_refusing(true);
	drop(peer);

	let mut attempts = Vec::new();
	let exhausted = wait_event(&mut events, |e| {
		if let ChatEvent::Reconnecting { attempt, .. } = e {
			attempts.push(*attempt);
		}
		matches!(e, ChatEvent::ReconnectExhausted { .. })
	})
	.await;

	assert_eq!(exhausted, ChatEvent::ReconnectExhausted { attempts: 5 });
	assert_eq!(attempts, vec![1, 2, 3, 4, 5]);
	// The initial connection plus five retries.
	assert_eq!(h.server.connect_attempts(), 6);
	assert_eq!(h.client.state(), ConnectionState::Errored);
	assert!(!h.client.is_active(&handle).await);

	assert_eq!(
		h.client.subscribe(topic, |_m: serde_json::Value| {}).await.unwrap_err(),
		ChatError::NotConnected
	);
	let payload = SendChatPayload {
		conversation_id: None,
		content: "hi".to_string(),
	};
	assert_eq!(
		h.client.send(Destination::CustomerSend, &payload).await,
		Err(ChatError::NotConnected)
	);

	// No further attempts once exhausted.
	tokio::time::sleep(Duration::from_millis(100)).await;
	assert_eq!(h.server.connect_attempts(), 6);

	// An explicit connect starts over.
	h.server.set_refusing(false);
	h.connect("0,0").await;
	assert!(h.client.is_connected());
}

#[tokio::test]
async fn heart_beats_are_sent_and_silence_drops_the_connection() {
	let cfg = ClientConfig {
		heart_beat: HeartBeat::new(50, 50),
		heartbeat_tolerance: 2,
		max_reconnect_attempts: 0,
		..test_config()
	};
	let mut h = harness(cfg);
	let mut events = h.client.events();
	let (mut peer, connect) = h.connect("50,50").await;
	assert_eq!(connect.header(header::HEART_BEAT), Some("50,50"));

	let ev = wait_event(&mut events, |e| matches!(e, ChatEvent::Connected { .. })).await;
	let ChatEvent::Connected { heart_beat } = ev else { unreachable!() };
	assert_eq!(heart_beat.send_every, Some(Duration::from_millis(50)));
	assert_eq!(heart_beat.expect_every, Some(Duration::from_millis(50)));

	// The client keeps the line warm.
	let first = tokio::time::timeout(Duration::from_secs(1), peer.recv()).await.unwrap();
	assert_eq!(first, Some(Decoded::HeartBeat));

	// The server never answers, so the client declares the connection dead.
	let ev = wait_event(&mut events, |e| matches!(e, ChatEvent::Disconnected { .. })).await;
	assert_eq!(
		ev,
		ChatEvent::Disconnected {
			reason: "heart-beat timeout".to_string()
		}
	);
	wait_event(&mut events, |e| matches!(e, ChatEvent::ReconnectExhausted { attempts: 0 })).await;
	assert!(!h.client.is_connected());
}

#[tokio::test]
async fn server_error_frame_drops_the_connection() {
	let cfg = ClientConfig {
		max_reconnect_attempts: 0,
		..test_config()
	};
	let mut h = harness(cfg);
	let (peer, _) = h.connect("0,0").await;
	let mut events = h.client.events();

	peer.send_frame(&Frame::new(Command::Error).with_header(header::MESSAGE, "session expired"));

	let ev = wait_event(&mut events, |e| matches!(e, ChatEvent::ServerError { .. })).await;
	assert_eq!(
		ev,
		ChatEvent::ServerError {
			message: "session expired".to_string()
		}
	);
	eventually("errored", || h.client.state() == ConnectionState::Errored).await;
}
