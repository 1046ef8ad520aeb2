#![forbid(unsafe_code)]

use std::borrow::Cow;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frame::{Command, Frame, header};

/// Default maximum frame size (headers and body each).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024; // 1 MiB

/// A single end-of-line sent as a heart-beat.
pub const HEARTBEAT_EOL: &[u8] = b"\n";

#[derive(Debug, Error)]
pub enum FramingError {
	#[error("frame exceeds maximum size: len={len} max={max}")]
	FrameTooLarge {
		len: usize,
		max: usize,
	},

	#[error("insufficient data: need={need} have={have}")]
	InsufficientData {
		need: usize,
		have: usize,
	},

	#[error("unknown command: {0}")]
	UnknownCommand(String),

	#[error("malformed header line: {0}")]
	MalformedHeader(String),

	#[error("invalid escape sequence in header: {0}")]
	InvalidEscape(String),

	#[error("invalid header for encoding: {0}")]
	InvalidHeader(String),

	#[error("invalid content-length: {0}")]
	InvalidContentLength(String),

	#[error("frame terminated before the end of its headers")]
	MissingHeaderTerminator,

	#[error("frame body is not followed by NUL")]
	MissingTerminator,

	#[error("frame is not valid utf-8")]
	InvalidUtf8,
}

impl FramingError {
	/// Fatal errors leave the stream position unknown; everything else skipped exactly one frame.
	pub fn is_fatal(&self) -> bool {
		matches!(self, FramingError::FrameTooLarge { .. })
	}
}

/// One item read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
	Frame(Frame),
	HeartBeat,
}

enum Step {
	Incomplete,
	Done(Decoded, usize),
	Malformed(FramingError, usize),
}

/// Encode a frame into bytes.
pub fn encode_frame(frame: &Frame, max_frame_size: usize) -> Result<Vec<u8>, FramingError> {
	let mut buf = BytesMut::new();
	encode_frame_into(&mut buf, frame, max_frame_size)?;
	Ok(buf.to_vec())
}

/// Encode a frame using `DEFAULT_MAX_FRAME_SIZE`.
pub fn encode_frame_default(frame: &Frame) -> Result<Vec<u8>, FramingError> {
	encode_frame(frame, DEFAULT_MAX_FRAME_SIZE)
}

/// Append an encoded frame into the provided buffer. A `content-length` header is added for non-empty bodies.
pub fn encode_frame_into(buf: &mut BytesMut, frame: &Frame, max_frame_size: usize) -> Result<(), FramingError> {
	if frame.body.len() > max_frame_size {
		return Err(FramingError::FrameTooLarge {
			len: frame.body.len(),
			max: max_frame_size,
		});
	}

	let escape_headers = frame.command.escapes_headers();
	let mut head = BytesMut::with_capacity(64);
	head.put_slice(frame.command.as_str().as_bytes());
	head.put_u8(b'\n');

	for (name, value) in &frame.headers {
		if name.contains('\0') || value.contains('\0') {
			return Err(FramingError::InvalidHeader(name.clone()));
		}
		if escape_headers {
			head.put_slice(escape(name).as_bytes());
			head.put_u8(b':');
			head.put_slice(escape(value).as_bytes());
		} else {
			if name.contains([':', '\n', '\r']) || value.contains(['\n', '\r']) {
				return Err(FramingError::InvalidHeader(name.clone()));
			}
			head.put_slice(name.as_bytes());
			head.put_u8(b':');
			head.put_slice(value.as_bytes());
		}
		head.put_u8(b'\n');
	}

	if !frame.body.is_empty() && frame.header(header::CONTENT_LENGTH).is_none() {
		head.put_slice(format!("{}:{}\n", header::CONTENT_LENGTH, frame.body.len()).as_bytes());
	}

	if head.len() > max_frame_size {
		return Err(FramingError::FrameTooLarge {
			len: head.len(),
			max: max_frame_size,
		});
	}

	buf.reserve(head.len() + 2 + frame.body.len());
	buf.put_slice(&head);
	buf.put_u8(b'\n');
	buf.put_slice(&frame.body);
	buf.put_u8(0);
	Ok(())
}

/// Decode a single item from the start of `src`.
pub fn decode_frame(src: &[u8], max_frame_size: usize) -> Result<(Decoded, usize), FramingError> {
	match step(src, max_frame_size)? {
		Step::Incomplete => Err(FramingError::InsufficientData {
			need: src.len() + 1,
			have: src.len(),
		}),
		Step::Done(decoded, consumed) => Ok((decoded, consumed)),
		Step::Malformed(e, _) => Err(e),
	}
}

/// Try to decode a single item from a growable buffer.
///
/// A malformed frame is consumed up to its NUL terminator before the error is returned, so
/// decoding can continue with the next frame unless the error `is_fatal()`.
pub fn try_decode_frame_from_buffer(buf: &mut BytesMut, max_frame_size: usize) -> Result<Option<Decoded>, FramingError> {
	match step(&buf[..], max_frame_size)? {
		Step::Incomplete => Ok(None),
		Step::Done(decoded, consumed) => {
			buf.advance(consumed);
			Ok(Some(decoded))
		}
		Step::Malformed(e, consumed) => {
			buf.advance(consumed);
			Err(e)
		}
	}
}

fn step(src: &[u8], max: usize) -> Result<Step, FramingError> {
	match src.first() {
		None => return Ok(Step::Incomplete),
		Some(b'\n') => return Ok(Step::Done(Decoded::HeartBeat, 1)),
		Some(b'\r') => match src.get(1) {
			None => return Ok(Step::Incomplete),
			Some(b'\n') => return Ok(Step::Done(Decoded::HeartBeat, 2)),
			Some(_) => {}
		},
		Some(_) => {}
	}

	let first_nul = find_nul(src, 0);
	let (head_len, body_start) = match (find_head_end(src), first_nul) {
		(Some((head_len, _)), Some(nul)) if nul < head_len => {
			return Ok(Step::Malformed(FramingError::MissingHeaderTerminator, nul + 1));
		}
		(Some(found), _) => found,
		(None, Some(nul)) => return Ok(Step::Malformed(FramingError::MissingHeaderTerminator, nul + 1)),
		(None, None) => return incomplete(src.len(), max),
	};

	if head_len > max {
		return Err(FramingError::FrameTooLarge { len: head_len, max });
	}

	let (command, headers) = match parse_head(&src[..head_len]) {
		Ok(parsed) => parsed,
		Err(e) => return skip_malformed(src, body_start, max, e),
	};

	let content_length = headers
		.iter()
		.find(|(k, _)| k == header::CONTENT_LENGTH)
		.map(|(_, v)| v.trim().parse::<usize>().map_err(|_| v.clone()));

	let (body_end, consumed) = match content_length {
		Some(Err(raw)) => return skip_malformed(src, body_start, max, FramingError::InvalidContentLength(raw)),
		Some(Ok(len)) => {
			if len > max {
				return Err(FramingError::FrameTooLarge { len, max });
			}
			let end = body_start + len;
			match src.get(end) {
				None => return Ok(Step::Incomplete),
				Some(0) => (end, end + 1),
				Some(_) => return skip_malformed(src, end, max, FramingError::MissingTerminator),
			}
		}
		None => match find_nul(src, body_start) {
			Some(nul) => (nul, nul + 1),
			None => return incomplete(src.len() - body_start, max),
		},
	};

	if body_end - body_start > max {
		return Err(FramingError::FrameTooLarge {
			len: body_end - body_start,
			max,
		});
	}

	let frame = Frame {
		command,
		headers,
		body: Bytes::copy_from_slice(&src[body_start..body_end]),
	};
	Ok(Step::Done(Decoded::Frame(frame), consumed))
}

fn incomplete(buffered: usize, max: usize) -> Result<Step, FramingError> {
	if buffered > max {
		return Err(FramingError::FrameTooLarge { len: buffered, max });
	}
	Ok(Step::Incomplete)
}

fn skip_malformed(src: &[u8], from: usize, max: usize, e: FramingError) -> Result<Step, FramingError> {
	match find_nul(src, from) {
		Some(nul) => Ok(Step::Malformed(e, nul + 1)),
		None => incomplete(src.len(), max),
	}
}

fn find_nul(src: &[u8], from: usize) -> Option<usize> {
	src.get(from..)?.iter().position(|b| *b == 0).map(|p| from + p)
}

/// Returns `(head_len, body_start)`; the head excludes the blank line.
fn find_head_end(src: &[u8]) -> Option<(usize, usize)> {
	let mut i = 0;
	while i < src.len() {
		if src[i] == b'\n' {
			match (src.get(i + 1), src.get(i + 2)) {
				(Some(b'\n'), _) => return Some((i, i + 2)),
				(Some(b'\r'), Some(b'\n')) => return Some((i, i + 3)),
				_ => {}
			}
		}
		i += 1;
	}
	None
}

fn parse_head(head: &[u8]) -> Result<(Command, Vec<(String, String)>), FramingError> {
	let text = core::str::from_utf8(head).map_err(|_| FramingError::InvalidUtf8)?;
	let mut lines = text.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

	let command: Command = lines.next().unwrap_or_default().parse()?;
	let unescape_headers = command.escapes_headers();

	let mut headers = Vec::new();
	for line in lines {
		let (name, value) = line
			.split_once(':')
			.ok_or_else(|| FramingError::MalformedHeader(line.to_string()))?;
		if unescape_headers {
			headers.push((unescape(name)?, unescape(value)?));
		} else {
			headers.push((name.to_string(), value.to_string()));
		}
	}

	Ok((command, headers))
}

fn escape(s: &str) -> Cow<'_, str> {
	if !s.contains(['\\', '\r', '\n', ':']) {
		return Cow::Borrowed(s);
	}
	let mut out = String::with_capacity(s.len() + 4);
	for c in s.chars() {
		match c {
			'\\' => out.push_str("\\\\"),
			'\r' => out.push_str("\\r"),
			'\n' => out.push_str("\\n"),
			':' => out.push_str("\\c"),
			other => out.push(other),
		}
	}
	Cow::Owned(out)
}

fn unescape(s: &str) -> Result<String, FramingError> {
	if !s.contains('\\') {
		return Ok(s.to_string());
	}
	let mut out = String::with_capacity(s.len());
	let mut chars = s.chars();
	while let Some(c) = chars.next() {
		if c != '\\' {
			out.push(c);
			continue;
		}
		match chars.next() {
			Some('r') => out.push('\r'),
			Some('n') => out.push('\n'),
			Some('c') => out.push(':'),
			Some('\\') => out.push('\\'),
			_ => return Err(FramingError::InvalidEscape(s.to_string())),
		}
	}
	Ok(out)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn message(destination: &str, body: &str) -> Frame {
		Frame::new(Command::Message)
			.with_header(header::SUBSCRIPTION, "sub-1")
			.with_header(header::DESTINATION, destination)
			.with_body(body.to_string())
	}

	#[test]
	fn encode_decode_roundtrip_slice() {
		let frame = message("/topic/conversation/42", r#"{"id":1}"#);
		let bytes = encode_frame_default(&frame).expect("encode");
		let (decoded, consumed) = decode_frame(&bytes, DEFAULT_MAX_FRAME_SIZE).expect("decode");
		assert_eq!(consumed, bytes.len());

		let Decoded::Frame(decoded) = decoded else {
			panic!("expected frame");
		};
		assert_eq!(decoded.command, Command::Message);
		assert_eq!(decoded.header(header::DESTINATION), Some("/topic/conversation/42"));
		assert_eq!(decoded.header(header::CONTENT_LENGTH), Some("8"));
		assert_eq!(decoded.body_str().unwrap(), r#"{"id":1}"#);
	}

	#[test]
	fn decode_requires_full_frame() {
		let bytes = encode_frame_default(&message("/topic/a", "hello")).expect("encode");
		let err = decode_frame(&bytes[..bytes.len() - 1], DEFAULT_MAX_FRAME_SIZE).unwrap_err();
		match err {
			FramingError::InsufficientData { need, have } => assert!(need > have),
			other => panic!("unexpected error: {other:?}"),
		}
	}

	#[test]
	fn decodes_frames_without_content_length() {
		let raw = b"MESSAGE\r\ndestination:/topic/a\r\n\r\nhi\0";
		let (decoded, consumed) = decode_frame(raw, DEFAULT_MAX_FRAME_SIZE).expect("decode");
		assert_eq!(consumed, raw.len());
		let Decoded::Frame(frame) = decoded else {
			panic!("expected frame");
		};
		assert_eq!(frame.header("destination"), Some("/topic/a"));
		assert_eq!(&frame.body[..], b"hi");
	}

	#[test]
	fn content_length_allows_nul_in_body() {
		let raw = b"MESSAGE\ncontent-length:3\n\na\0b\0";
		let (decoded, _) = decode_frame(raw, DEFAULT_MAX_FRAME_SIZE).expect("decode");
		let Decoded::Frame(frame) = decoded else {
			panic!("expected frame");
		};
		assert_eq!(&frame.body[..], b"a\0b");
	}

	#[test]
	fn eol_is_a_heartbeat() {
		let mut buf = BytesMut::from(&b"\n\r\n"[..]);
		assert_eq!(
			try_decode_frame_from_buffer(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap(),
			Some(Decoded::HeartBeat)
		);
		assert_eq!(
			try_decode_frame_from_buffer(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap(),
			Some(Decoded::HeartBeat)
		);
		assert!(buf.is_empty());
	}

	#[test]
	fn headers_are_escaped_except_on_connect() {
		let frame = Frame::new(Command::Send).with_header("note", "a:b\nc\\d");
		let bytes = encode_frame_default(&frame).unwrap();
		assert!(bytes.windows(12).any(|w| w == b"note:a\\cb\\nc"));
		let (Decoded::Frame(back), _) = decode_frame(&bytes, DEFAULT_MAX_FRAME_SIZE).unwrap() else {
			panic!("expected frame");
		};
		assert_eq!(back.header("note"), Some("a:b\nc\\d"));

		let connected = b"CONNECTED\nserver:x\\c\n\n\0";
		let (Decoded::Frame(f), _) = decode_frame(connected, DEFAULT_MAX_FRAME_SIZE).unwrap() else {
			panic!("expected frame");
		};
		assert_eq!(f.header("server"), Some("x\\c"));
	}

	#[test]
	fn malformed_frame_is_skipped() {
		let mut buf = BytesMut::new();
		buf.extend_from_slice(b"BOGUS\nx:y\n\nbody\0");
		buf.extend_from_slice(&encode_frame_default(&message("/topic/a", "ok")).unwrap());

		let err = try_decode_frame_from_buffer(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap_err();
		assert!(matches!(err, FramingError::UnknownCommand(_)));
		assert!(!err.is_fatal());

		let next = try_decode_frame_from_buffer(&mut buf, DEFAULT_MAX_FRAME_SIZE)
			.expect("ok")
			.expect("some");
		assert!(matches!(next, Decoded::Frame(f) if f.body_str().unwrap() == "ok"));
	}

	#[test]
	fn encode_rejects_too_large() {
		let frame = message("/topic/a", &"a".repeat(100));
		let err = encode_frame(&frame, 32).unwrap_err();
		assert!(matches!(err, FramingError::FrameTooLarge { .. }));
	}

	#[test]
	fn decode_rejects_oversized_content_length() {
		let mut buf = BytesMut::from(&b"MESSAGE\ncontent-length:99999\n\n"[..]);
		let err = try_decode_frame_from_buffer(&mut buf, 1024).unwrap_err();
		assert!(err.is_fatal());
	}

	#[test]
	fn connect_headers_reject_newlines() {
		let frame = Frame::new(Command::Connect).with_header("host", "a\nb");
		assert!(matches!(
			encode_frame_default(&frame).unwrap_err(),
			FramingError::InvalidHeader(_)
		));
	}
}
