#![forbid(unsafe_code)]

pub mod frame;
pub mod framing;
pub mod heartbeat;

pub use frame::{Command, Frame, header};
pub use framing::{
	DEFAULT_MAX_FRAME_SIZE, Decoded, FramingError, decode_frame, encode_frame, encode_frame_default, encode_frame_into,
	try_decode_frame_from_buffer,
};
pub use heartbeat::{HeartBeat, NegotiatedHeartBeat};

/// Protocol version constants.
pub mod version {
	/// Versions offered in the CONNECT frame.
	pub const ACCEPT_VERSION: &str = "1.2,1.1";

	/// Version whose header escaping rules the codec implements.
	pub const STOMP_VERSION: &str = "1.2";
}
