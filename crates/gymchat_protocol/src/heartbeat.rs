#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;
use std::time::Duration;

use crate::framing::FramingError;

/// A `heart-beat` header value: `outgoing,incoming` in milliseconds. Zero means "cannot" / "do not want".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
	pub outgoing_ms: u64,
	pub incoming_ms: u64,
}

/// Effective intervals after both sides have advertised their heart-beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NegotiatedHeartBeat {
	/// How often this side must send something.
	pub send_every: Option<Duration>,
	/// How often the peer promised to send something.
	pub expect_every: Option<Duration>,
}

impl HeartBeat {
	pub const fn new(outgoing_ms: u64, incoming_ms: u64) -> Self {
		Self {
			outgoing_ms,
			incoming_ms,
		}
	}

	pub const fn disabled() -> Self {
		Self::new(0, 0)
	}

	pub fn to_header(self) -> String {
		format!("{},{}", self.outgoing_ms, self.incoming_ms)
	}

	/// Negotiate this (client) side against the server's advertised value.
	pub fn negotiate(self, server: HeartBeat) -> NegotiatedHeartBeat {
		NegotiatedHeartBeat {
			send_every: interval(self.outgoing_ms, server.incoming_ms),
			expect_every: interval(server.outgoing_ms, self.incoming_ms),
		}
	}
}

fn interval(ours: u64, theirs: u64) -> Option<Duration> {
	if ours == 0 || theirs == 0 {
		return None;
	}
	Some(Duration::from_millis(ours.max(theirs)))
}

impl fmt::Display for HeartBeat {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{},{}", self.outgoing_ms, self.incoming_ms)
	}
}

impl FromStr for HeartBeat {
	type Err = FramingError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let bad = || FramingError::MalformedHeader(format!("heart-beat:{s}"));
		let (out, inc) = s.split_once(',').ok_or_else(bad)?;
		Ok(Self {
			outgoing_ms: out.trim().parse().map_err(|_| bad())?,
			incoming_ms: inc.trim().parse().map_err(|_| bad())?,
		})
	}
}
