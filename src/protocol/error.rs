//! Protocol error types

use std::fmt;

/// Protocol error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
	/// The leading token is not one of `want`, `have`, `nope`, `send`
	UnknownMsgType(String),
	/// Wrong field count, bad encoding or oversized line
	MalformedMessage(String),
	/// The object key carried by `want`/`send` does not parse
	MalformedObjectKey(String),
}

impl fmt::Display for ProtocolError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ProtocolError::UnknownMsgType(kind) => write!(f, "unknown message type: {:?}", kind),
			ProtocolError::MalformedMessage(msg) => write!(f, "malformed message: {}", msg),
			ProtocolError::MalformedObjectKey(key) => write!(f, "malformed object key: {}", key),
		}
	}
}

impl std::error::Error for ProtocolError {}

// vim: ts=4
