#![forbid(unsafe_code)]

pub mod endpoint {
	use url::Url;

	/// Path of the STOMP endpoint on the backend host.
	pub const CHAT_SOCKET_PATH: &str = "/ws-chat";

	/// Raw websocket leg of the SockJS endpoint.
	pub const CHAT_SOCKET_WEBSOCKET_SUFFIX: &str = "/websocket";

	/// Parsed backend base URL (`http(s)://host[:port][/prefix]`).
	#[derive(Debug, Clone, PartialEq, Eq)]
	pub struct BackendEndpoint {
		base: Url,
	}

	impl BackendEndpoint {
		/// Parse a backend base URL. Only `http` and `https` are accepted.
		pub fn parse(s: &str) -> Result<Self, String> {
			let s = s.trim();
			if s.is_empty() {
				return Err("backend url must be non-empty (expected http(s)://host[:port])".to_string());
			}

			let mut base = Url::parse(s).map_err(|e| format!("invalid backend url {s}: {e}"))?;

			match base.scheme() {
				"http" | "https" => {}
				other => {
					return Err(format!("unsupported backend url scheme {other} (expected http or https): {s}"));
				}
			}

			if base.host_str().map(str::is_empty).unwrap_or(true) {
				return Err(format!("backend url is missing a host: {s}"));
			}

			if base.query().is_some() || base.fragment().is_some() {
				return Err(format!("backend url must not carry a query or fragment: {s}"));
			}

			// Url::join replaces the last segment unless the path ends with '/'.
			if !base.path().ends_with('/') {
				let path = format!("{}/", base.path());
				base.set_path(&path);
			}

			Ok(Self { base })
		}

		/// Base URL with a trailing slash.
		pub fn base_url(&self) -> &Url {
			&self.base
		}

		/// `host[:port]` for logs.
		pub fn hostport(&self) -> String {
			match (self.base.host_str(), self.base.port()) {
				(Some(host), Some(port)) => format!("{host}:{port}"),
				(Some(host), None) => host.to_string(),
				_ => String::new(),
			}
		}

		/// Resolve a REST path below the base URL.
		pub fn api_url(&self, path: &str) -> Result<Url, String> {
			self.base
				.join(path.trim_start_matches('/'))
				.map_err(|e| format!("invalid api path {path}: {e}"))
		}

		/// Websocket URL of the chat endpoint on the backend host (`ws(s)://host/ws-chat/websocket`).
		pub fn chat_socket_url(&self) -> Url {
			let mut url = self.base.clone();
			let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
			// http <-> ws are both special schemes, so this cannot fail.
			let _ = url.set_scheme(scheme);
			url.set_path(&format!("{CHAT_SOCKET_PATH}{CHAT_SOCKET_WEBSOCKET_SUFFIX}"));
			url.set_query(None);
			url.set_fragment(None);
			url
		}
	}

	/// Validate a backend base URL.
	pub fn validate_backend_url(s: &str) -> Result<(), String> {
		let _ = BackendEndpoint::parse(s)?;
		Ok(())
	}

}
