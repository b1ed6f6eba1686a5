//! Client side of one object exchange
//!
//! `want` is answered with `have` or `nope`; `send` is answered with `nope`
//! or the packfile bytes up to the point where the provider closes the stream.

use crate::error::StreamerError;
use crate::logging::*;
use crate::pack::{PackDecoder, PackResult, Packfile};
use crate::transport::PeerStream;
use crate::types::{ObjectHash, ObjectKey};

use super::messages::{is_valid_repo_name, parse_request, Message, NOPE};

/// Fetch the packfile holding `hash` over an open stream.
///
/// With `skip_want` the availability round-trip is skipped and `send` goes
/// out immediately.
pub async fn request(
	stream: &mut PeerStream,
	repo: &str,
	hash: &ObjectHash,
	skip_want: bool,
	decoder: &dyn PackDecoder,
	max_packfile_size: u64,
) -> Result<PackResult, StreamerError> {
	if !is_valid_repo_name(repo) {
		return Err(StreamerError::InvalidRequest(format!("invalid repository name {:?}", repo)));
	}
	let key = ObjectKey::from_hash(hash);

	if skip_want {
		debug!("{} already known at {}, skipping want", hash.short(), stream.remote());
	} else {
		want(stream, repo, key).await?;
	}

	let send = Message::Send { repo: repo.to_string(), key };
	stream
		.write_message(&send)
		.await
		.map_err(|source| StreamerError::WriteMessage { kind: send.kind(), source })?;

	let bytes = stream.read_to_end(max_packfile_size).await.map_err(|e| {
		if e.kind() == std::io::ErrorKind::InvalidData {
			StreamerError::PackfileTooLarge { limit: max_packfile_size }
		} else {
			StreamerError::ReadResponse(e)
		}
	})?;
	if let Err(e) = stream.close().await {
		debug!("Closing stream to {} failed: {}", stream.remote(), e);
	}

	if is_nope(&bytes) {
		return Err(StreamerError::ObjectNotFound(*hash));
	}
	if bytes.is_empty() {
		return Err(StreamerError::UnexpectedReply(
			"stream closed without a packfile".to_string(),
		));
	}

	let mut packfile = Packfile::from_bytes(bytes);
	let hashes = decoder
		.objects(&mut packfile)
		.map_err(StreamerError::DecodePackfile)?
		.iter()
		.map(|object| object.hash())
		.collect();
	packfile.rewind();
	debug!("Received {} byte packfile for {} from {}", packfile.len(), hash.short(), stream.remote());
	Ok(PackResult { packfile, hashes })
}

async fn want(stream: &mut PeerStream, repo: &str, key: ObjectKey) -> Result<(), StreamerError> {
	let want = Message::Want { repo: repo.to_string(), key };
	stream
		.write_message(&want)
		.await
		.map_err(|source| StreamerError::WriteMessage { kind: want.kind(), source })?;

	let reply = match stream.read_message().await.map_err(StreamerError::ReadResponse)? {
		Some(reply) => reply,
		None => {
			return Err(StreamerError::UnexpectedReply(
				"stream closed before 'want' was answered".to_string(),
			))
		}
	};

	match parse_request(&reply)? {
		Message::Have => Ok(()),
		Message::Nope => Err(StreamerError::ObjectNotFound(key.hash())),
		other => Err(StreamerError::UnexpectedReply(format!("'{}' in reply to 'want'", other.kind()))),
	}
}

fn is_nope(bytes: &[u8]) -> bool {
	bytes.len() <= NOPE.len() + 2 && matches!(parse_request(bytes), Ok(Message::Nope))
}


// vim: ts=4
