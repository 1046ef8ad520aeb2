#![forbid(unsafe_code)]

use core::fmt;
use std::sync::Arc;

/// Wrapper that redacts in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

/// Where the bearer token comes from. Read once per connection attempt, so a refreshed token is picked up on
/// reconnect.
pub trait CredentialSource: Send + Sync {
	/// Current token. `None` connects anonymously.
	fn bearer_token(&self) -> Option<SecretString>;
}

pub type SharedCredentialSource = Arc<dyn CredentialSource>;

/// A fixed token.
#[derive(Debug, Clone)]
pub struct StaticCredential(Option<SecretString>);

impl StaticCredential {
	pub fn new(token: impl Into<String>) -> Self {
		Self(non_blank(token.into()))
	}

	pub fn anonymous() -> Self {
		Self(None)
	}
}

impl CredentialSource for StaticCredential {
	fn bearer_token(&self) -> Option<SecretString> {
		self.0.clone()
	}
}

/// Token read from an environment variable at every attempt.
#[derive(Debug, Clone)]
pub struct EnvCredential {
	var: String,
}

impl EnvCredential {
	pub fn new(var: impl Into<String>) -> Self {
		Self { var: var.into() }
	}
}

impl CredentialSource for EnvCredential {
	fn bearer_token(&self) -> Option<SecretString> {
		std::env::var(&self.var).ok().and_then(non_blank)
	}
}

impl<F> CredentialSource for F
where
	F: Fn() -> Option<SecretString> + Send + Sync,
{
	fn bearer_token(&self) -> Option<SecretString> {
		self().filter(|t| !t.expose().trim().is_empty())
	}
}

fn non_blank(token: String) -> Option<SecretString> {
	let token = token.trim();
	if token.is_empty() {
		None
	} else {
		Some(SecretString::new(token))
	}
}
