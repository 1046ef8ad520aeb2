#![forbid(unsafe_code)]

//! Realtime support-chat client: one STOMP-over-WebSocket connection owned by a network task, a topic registry,
//! optimistic message reconciliation and the customer/staff consumers built on top.

mod backend;
pub mod config;
pub mod controller;
pub mod credential;
pub mod customer;
pub mod dispatcher;
pub mod error;
pub mod reconciler;
pub mod reconnect;
pub mod rest;
pub mod staff;
pub mod state;
pub mod subscriptions;
pub mod transport;
pub mod view;

pub use config::{API_BASE_URL_ENV, AUTH_TOKEN_ENV, ClientConfig, DEFAULT_API_BASE_URL};
pub use controller::{ChatClient, ShutdownHandle};
pub use credential::{CredentialSource, EnvCredential, SecretString, SharedCredentialSource, StaticCredential};
pub use customer::CustomerChat;
pub use dispatcher::OutboundMessage;
pub use error::ChatError;
pub use reconciler::{Admission, MessageReconciler};
pub use rest::{ChatApi, HttpChatApi};
pub use staff::StaffInbox;
pub use state::{ChatEvent, ConnectionState};
pub use subscriptions::{MessageHandler, SubscriptionHandle, SubscriptionId};
pub use view::ConversationView;
