#![forbid(unsafe_code)]

//! Lenient timestamp decoding for backend payloads.
//!
//! The backend emits either RFC 3339 strings, zone-less ISO local date-times
//! (interpreted as UTC) or epoch milliseconds.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};

const LOCAL_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
	Millis(i64),
	Text(String),
}

/// Parse a timestamp string in any of the accepted textual forms.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
	let s = s.trim();
	if s.is_empty() {
		return None;
	}

	if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
		return Some(dt.with_timezone(&Utc));
	}

	LOCAL_FORMATS
		.iter()
		.find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
		.map(|naive| Utc.from_utc_datetime(&naive))
}

fn from_raw<E: serde::de::Error>(raw: RawTimestamp) -> Result<DateTime<Utc>, E> {
	match raw {
		RawTimestamp::Millis(ms) => Utc
			.timestamp_millis_opt(ms)
			.single()
			.ok_or_else(|| E::custom(format!("timestamp out of range: {ms}"))),
		RawTimestamp::Text(s) => parse_timestamp(&s).ok_or_else(|| E::custom(format!("unrecognised timestamp: {s}"))),
	}
}

/// `deserialize_with` for required timestamps.
pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
	from_raw(RawTimestamp::deserialize(deserializer)?)
}

/// `deserialize_with` for optional timestamps; `null` maps to `None`.
pub fn deserialize_option<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error> {
	match Option::<RawTimestamp>::deserialize(deserializer)? {
		Some(raw) => from_raw(raw).map(Some),
		None => Ok(None),
	}
}
