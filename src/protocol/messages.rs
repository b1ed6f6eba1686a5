//! Wire messages of the object replication protocol
//!
//! Every message is one ASCII line terminated by `\n`:
//!
//! ```text
//! want <repo> objects/<hex>
//! have
//! nope
//! send <repo> objects/<hex>
//! ```
//!
//! A `send` is answered with either a `nope` line or the raw packfile bytes,
//! after which the server closes the stream.

use std::path::{Component, Path};

use super::error::ProtocolError;
use crate::types::{ObjectHash, ObjectKey};

pub const WANT: &str = "want";
pub const HAVE: &str = "have";
pub const NOPE: &str = "nope";
pub const SEND: &str = "send";

/// Messages exchanged on an object stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
	/// Ask whether the peer holds an object
	Want { repo: String, key: ObjectKey },

	/// Positive answer to `Want`
	Have,

	/// Negative answer to `Want` or `Send`
	Nope,

	/// Ask the peer to stream a packfile holding the object
	Send { repo: String, key: ObjectKey },
}

impl Message {
	pub fn kind(&self) -> &'static str {
		match self {
			Message::Want { .. } => WANT,
			Message::Have => HAVE,
			Message::Nope => NOPE,
			Message::Send { .. } => SEND,
		}
	}

	pub fn encode(&self) -> Vec<u8> {
		let line = match self {
			Message::Want { repo, key } | Message::Send { repo, key } => {
				format!("{} {} {}\n", self.kind(), repo, key)
			}
			Message::Have | Message::Nope => format!("{}\n", self.kind()),
		};
		line.into_bytes()
	}
}

pub fn encode_want(repo: &str, hash: &ObjectHash) -> Vec<u8> {
	Message::Want { repo: repo.to_string(), key: ObjectKey::from_hash(hash) }.encode()
}

pub fn encode_have() -> Vec<u8> {
	Message::Have.encode()
}

pub fn encode_nope() -> Vec<u8> {
	Message::Nope.encode()
}

pub fn encode_send(repo: &str, hash: &ObjectHash) -> Vec<u8> {
	Message::Send { repo: repo.to_string(), key: ObjectKey::from_hash(hash) }.encode()
}

/// Repository names travel as a single token and name exactly one directory
/// under the repositories root
pub fn is_valid_repo_name(repo: &str) -> bool {
	if repo.is_empty() || repo.chars().any(|c| c.is_whitespace() || c.is_control()) {
		return false;
	}
	if repo.contains('/') || repo.contains('\\') {
		return false;
	}
	let mut components = Path::new(repo).components();
	matches!((components.next(), components.next()), (Some(Component::Normal(_)), None))
}

/// Decode one message line (with or without its trailing newline).
///
/// The leading token is matched as raw bytes, so anything that does not open
/// with one of the four message kinds is `UnknownMsgType`, whatever its
/// encoding.
pub fn parse_request(bytes: &[u8]) -> Result<Message, ProtocolError> {
	let line = bytes.strip_suffix(b"\n").unwrap_or(bytes);
	let line = line.strip_suffix(b"\r").unwrap_or(line);

	let (kind, rest) = match line.iter().position(|&b| b == b' ') {
		Some(at) => (&line[..at], Some(&line[at + 1..])),
		None => (line, None),
	};
	let kind = match kind {
		b"want" => WANT,
		b"have" => HAVE,
		b"nope" => NOPE,
		b"send" => SEND,
		other => return Err(ProtocolError::UnknownMsgType(String::from_utf8_lossy(other).into_owned())),
	};

	let has_args = rest.is_some();
	let rest = match rest {
		Some(rest) => std::str::from_utf8(rest).map_err(|_| {
			ProtocolError::MalformedMessage(format!("'{}' arguments are not valid UTF-8", kind))
		})?,
		None => "",
	};
	let fields: Vec<&str> = if rest.is_empty() { Vec::new() } else { rest.split(' ').collect() };

	match kind {
		WANT | SEND => {
			if fields.len() != 2 {
				return Err(ProtocolError::MalformedMessage(format!(
					"'{}' expects a repository and an object key, got {} field(s)",
					kind,
					fields.len()
				)));
			}
			let repo = fields[0];
			if !is_valid_repo_name(repo) {
				return Err(ProtocolError::MalformedMessage(format!(
					"invalid repository name {:?}",
					repo
				)));
			}
			let key = ObjectKey::parse(fields[1])
				.map_err(|_| ProtocolError::MalformedObjectKey(fields[1].to_string()))?;
			let repo = repo.to_string();
			if kind == WANT {
				Ok(Message::Want { repo, key })
			} else {
				Ok(Message::Send { repo, key })
			}
		}
		_ => {
			if has_args {
				return Err(ProtocolError::MalformedMessage(format!(
					"'{}' takes no arguments",
					kind
				)));
			}
			Ok(if kind == HAVE { Message::Have } else { Message::Nope })
		}
	}
}


// vim: ts=4
