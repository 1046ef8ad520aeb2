#![forbid(unsafe_code)]

use std::sync::Arc;

use gymchat_client_core::{
	AUTH_TOKEN_ENV, ChatClient, ClientConfig, ConversationView, CustomerChat, EnvCredential, HttpChatApi,
	SharedCredentialSource, StaffInbox, StaticCredential,
};
use gymchat_domain::{ConversationDirectory, ConversationId};
use tracing::{info, warn};

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: gymchat_client [--api url] [--token token] [--staff] [--conversation id] [--send text]\n\
\n\
Options:\n\
	--api           Backend base URL (default: $GYMCHAT_API_BASE_URL or http://localhost:8080/api)\n\
	--token         Bearer token (default: $GYMCHAT_AUTH_TOKEN)\n\
	--staff         Staff console: list conversations and follow new-message notifications\n\
	--conversation  Conversation to open (staff only; customers always use their own)\n\
	--send          Send one message once connected\n\
	--help          Show this help\n\
\n\
Examples:\n\
	gymchat_client --send \"Is the sauna open today?\"\n\
	gymchat_client --staff --conversation 42 --send \"Yes, until 22:00\"\n"
	);
	std::process::exit(2)
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,gymchat_client_core=debug".to_string());
	tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

struct Args {
	api: Option<String>,
	token: Option<String>,
	staff: bool,
	conversation: Option<ConversationId>,
	send: Option<String>,
}

fn parse_args() -> Args {
	let mut args = Args {
		api: None,
		token: None,
		staff: false,
		conversation: None,
		send: None,
	};

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--api" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if let Err(e) = gymchat_util::endpoint::validate_backend_url(&v) {
					eprintln!("Invalid --api value: {e}");
					usage_and_exit();
				}
				args.api = Some(v);
			}
			"--token" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				args.token = Some(v);
			}
			"--staff" => args.staff = true,
			"--conversation" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				let id = ConversationId::new(v.trim()).unwrap_or_else(|e| {
					eprintln!("Invalid --conversation value: {e}");
					usage_and_exit()
				});
				args.conversation = Some(id);
			}
			"--send" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--send must be non-empty");
					usage_and_exit();
				}
				args.send = Some(v);
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	if args.conversation.is_some() && !args.staff {
		eprintln!("--conversation requires --staff");
		usage_and_exit();
	}

	args
}

/// Print confirmed messages of `view` as they arrive, until ctrl-c.
async fn follow(view: &ConversationView) {
	let mut changes = view.changes();
	let mut printed = 0usize;
	loop {
		let confirmed: Vec<_> = view.messages().into_iter().filter(|m| !m.is_pending()).collect();
		if confirmed.len() < printed {
			printed = 0;
		}
		for m in &confirmed[printed..] {
			let who = m.sender_name.as_deref().unwrap_or(m.sender_role.as_str());
			println!("[{}] {}: {}", m.created_at.format("%H:%M"), who, m.content);
		}
		printed = confirmed.len();

		tokio::select! {
			_ = tokio::signal::ctrl_c() => return,
			res = changes.changed() => {
				if res.is_err() {
					return;
				}
			}
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();
	let args = parse_args();

	let mut cfg = ClientConfig::from_env()?;
	if let Some(api) = args.api {
		cfg = cfg.with_api_base_url(api);
	}
	let endpoint = cfg.endpoint()?;

	let credentials: SharedCredentialSource = match args.token {
		Some(token) => Arc::new(StaticCredential::new(token)),
		None => Arc::new(EnvCredential::new(AUTH_TOKEN_ENV)),
	};
	let api = Arc::new(HttpChatApi::new(endpoint.clone(), Arc::clone(&credentials)));

	info!(backend = %endpoint.base_url(), socket = %endpoint.chat_socket_url(), "connecting");
	let (client, shutdown) = ChatClient::spawn(cfg);
	client.connect_shared(credentials).await?;

	if args.staff {
		let mut inbox = StaffInbox::new(client.clone(), api);
		inbox.start().await?;
		for c in inbox.conversations() {
			println!("#{:<6} {:<24} {}", c.id, c.customer_name, ConversationDirectory::label(&c));
		}

		if let Some(id) = args.conversation {
			inbox.open_conversation(id).await?;
			if let Some(text) = args.send.as_deref() {
				inbox.send(text).await?;
			}
			follow(inbox.view()).await;
		} else {
			let mut changes = inbox.changes();
			loop {
				tokio::select! {
					_ = tokio::signal::ctrl_c() => break,
					res = changes.changed() => {
						if res.is_err() {
							break;
						}
						if let Some(top) = inbox.conversations().first() {
							println!("latest: #{} {} ({})", top.id, top.customer_name, ConversationDirectory::label(top));
						}
					}
				}
			}
		}
		inbox.stop().await;
	} else {
		let chat = CustomerChat::new(client.clone(), api);
		match chat.open().await? {
			Some(id) => info!(conversation = %id, "following conversation"),
			None => info!("no conversation yet"),
		}
		if let Some(text) = args.send.as_deref()
			&& let Err(e) = chat.send(text).await
		{
			warn!(error = %e, "send failed");
		}
		follow(chat.view()).await;
		chat.close().await;
	}

	client.disconnect().await;
	shutdown.shutdown().await;
	Ok(())
}
