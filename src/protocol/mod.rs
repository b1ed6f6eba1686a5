//! Object replication protocol
//!
//! Wire messages, their codec and the requesting side of an exchange. The
//! serving side lives on [`crate::streamer::ObjectStreamer`], which owns the
//! repository and Have-Cache state it needs.

pub mod error;
pub mod messages;
pub mod requester;

pub use error::ProtocolError;
pub use messages::{
	encode_have, encode_nope, encode_send, encode_want, is_valid_repo_name, parse_request, Message,
};

// vim: ts=4
