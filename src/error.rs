//! Error types for objsync operations

use std::error::Error;
use std::fmt;
use std::io;

use crate::protocol::ProtocolError;
use crate::types::{ObjectHash, ObjectKind, PeerId};

/// Boxed error returned by user callbacks
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Errors reported by the local repository
#[derive(Debug)]
pub enum RepoError {
	/// The object is not in the repository
	ObjectNotFound(ObjectHash),

	/// `is_ancestor` found no path between the two commits
	NotAnAncestor { ancestor: ObjectHash, descendant: ObjectHash },

	/// Object exists but has another kind than requested
	WrongKind { hash: ObjectHash, expected: ObjectKind, actual: ObjectKind },

	/// Repository could not be opened
	Open { path: String, message: String },

	/// Stored data could not be parsed
	Corrupted { message: String },

	/// I/O error
	Io(io::Error),
}

impl RepoError {
	pub fn is_not_found(&self) -> bool {
		matches!(self, RepoError::ObjectNotFound(_))
	}
}

impl fmt::Display for RepoError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RepoError::ObjectNotFound(hash) => write!(f, "object not found: {}", hash),
			RepoError::NotAnAncestor { ancestor, descendant } => {
				write!(f, "{} is not an ancestor of {}", ancestor, descendant)
			}
			RepoError::WrongKind { hash, expected, actual } => {
				write!(f, "object {} is a {}, expected a {}", hash, actual, expected)
			}
			RepoError::Open { path, message } => {
				write!(f, "failed to open repository at {}: {}", path, message)
			}
			RepoError::Corrupted { message } => write!(f, "repository corrupted: {}", message),
			RepoError::Io(e) => write!(f, "I/O error: {}", e),
		}
	}
}

impl Error for RepoError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self {
			RepoError::Io(e) => Some(e),
			_ => None,
		}
	}
}

impl From<io::Error> for RepoError {
	fn from(e: io::Error) -> Self {
		RepoError::Io(e)
	}
}

/// Errors from packing or decoding packfiles
#[derive(Debug)]
pub enum PackError {
	/// I/O error while reading or writing the pack stream
	Io(io::Error),

	/// The stream is not a well-formed packfile
	Format(String),

	/// An object's content does not match its hash
	HashMismatch { expected: ObjectHash, actual: ObjectHash },

	/// The repository could not supply an object to pack
	Repo(RepoError),
}

impl fmt::Display for PackError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			PackError::Io(e) => write!(f, "I/O error: {}", e),
			PackError::Format(msg) => write!(f, "invalid packfile: {}", msg),
			PackError::HashMismatch { expected, actual } => {
				write!(f, "Hash mismatch: expected {}, got {}", expected, actual)
			}
			PackError::Repo(e) => write!(f, "{}", e),
		}
	}
}

impl Error for PackError {}

impl From<io::Error> for PackError {
	fn from(e: io::Error) -> Self {
		PackError::Io(e)
	}
}

impl From<RepoError> for PackError {
	fn from(e: RepoError) -> Self {
		PackError::Repo(e)
	}
}

/// Errors from the DHT collaborator
#[derive(Debug)]
pub enum DhtError {
	Io(io::Error),
	Other(String),
}

impl fmt::Display for DhtError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DhtError::Io(e) => write!(f, "I/O error: {}", e),
			DhtError::Other(msg) => write!(f, "{}", msg),
		}
	}
}

impl Error for DhtError {}

impl From<io::Error> for DhtError {
	fn from(e: io::Error) -> Self {
		DhtError::Io(e)
	}
}

impl From<String> for DhtError {
	fn from(e: String) -> Self {
		DhtError::Other(e)
	}
}

/// Errors from the object streamer, inbound or outbound
#[derive(Debug)]
pub enum StreamerError {
	/// Reading the request line failed
	ReadRequest(io::Error),

	/// The peer sent something we cannot decode
	Protocol(ProtocolError),

	/// The repository named in a request could not be opened
	OpenRepo { repo: String, source: RepoError },

	/// The requested object does not exist (locally, or on the peer)
	ObjectNotFound(ObjectHash),

	/// Writing the `nope` reply failed
	WriteNope(io::Error),

	/// Writing a message other than `nope` failed
	WriteMessage { kind: &'static str, source: io::Error },

	/// Reading the reply to a request failed
	ReadResponse(io::Error),

	/// The peer replied with a message that does not fit the exchange
	UnexpectedReply(String),

	/// The packer failed
	PackGeneration(PackError),

	/// Writing the packfile to the stream failed
	WritePackfile(io::Error),

	/// The received packfile could not be decoded
	DecodePackfile(PackError),

	/// The packfile is larger than the configured limit
	PackfileTooLarge { limit: u64 },

	/// The DHT knows no provider for the object
	NoProviderFound(ObjectHash),

	/// Provider lookup failed
	ProviderLookup(DhtError),

	/// Announcing an object failed
	Announce(DhtError),

	/// Opening a stream to a provider failed
	Dial { peer: PeerId, source: io::Error },

	/// The packfile decoded fine but does not contain the requested object
	TargetNotFound { kind: ObjectKind },

	/// The packfile carried the requested hash as another object kind
	UnexpectedObjectKind { hash: ObjectHash, expected: ObjectKind, actual: ObjectKind },

	/// Invalid request arguments supplied by the local caller
	InvalidRequest(String),

	/// The exchange did not finish within the configured timeout
	Timeout,

	/// The caller cancelled the operation
	Cancelled,

	/// Local repository error
	Repo(RepoError),
}

impl StreamerError {
	/// Object or provider could not be found
	pub fn is_not_found(&self) -> bool {
		matches!(
			self,
			StreamerError::ObjectNotFound(_)
				| StreamerError::NoProviderFound(_)
				| StreamerError::TargetNotFound { .. }
		)
	}

	pub fn is_protocol_error(&self) -> bool {
		matches!(self, StreamerError::Protocol(_) | StreamerError::UnexpectedReply(_))
	}

	/// Whether an inbound stream that failed with this error must be reset
	/// rather than closed cleanly
	pub fn resets_stream(&self) -> bool {
		matches!(
			self,
			StreamerError::Protocol(_)
				| StreamerError::OpenRepo { .. }
				| StreamerError::ObjectNotFound(_)
				| StreamerError::PackGeneration(_)
				| StreamerError::Repo(_)
		)
	}

	/// Whether another provider may succeed where this one failed
	pub fn is_retryable(&self) -> bool {
		!matches!(self, StreamerError::Cancelled | StreamerError::InvalidRequest(_))
	}
}

impl fmt::Display for StreamerError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StreamerError::ReadRequest(e) => write!(f, "failed to read request: {}", e),
			StreamerError::Protocol(e) => write!(f, "{}", e),
			StreamerError::OpenRepo { repo, source } => {
				write!(f, "failed to open repository '{}': {}", repo, source)
			}
			StreamerError::ObjectNotFound(hash) => write!(f, "object not found: {}", hash),
			StreamerError::WriteNope(e) => write!(f, "failed to write 'nope' message: {}", e),
			StreamerError::WriteMessage { kind, source } => {
				write!(f, "failed to write '{}' message: {}", kind, source)
			}
			StreamerError::ReadResponse(e) => write!(f, "failed to read response: {}", e),
			StreamerError::UnexpectedReply(msg) => write!(f, "unexpected reply: {}", msg),
			StreamerError::PackGeneration(e) => {
				write!(f, "failed to generate commit packfile: {}", e)
			}
			StreamerError::WritePackfile(e) => write!(f, "failed to write packfile: {}", e),
			StreamerError::DecodePackfile(e) => write!(f, "failed to decode packfile: {}", e),
			StreamerError::PackfileTooLarge { limit } => {
				write!(f, "packfile exceeds the {} byte limit", limit)
			}
			StreamerError::NoProviderFound(hash) => write!(f, "no provider found for {}", hash),
			StreamerError::ProviderLookup(e) => write!(f, "failed to get providers: {}", e),
			StreamerError::Announce(e) => write!(f, "failed to announce object: {}", e),
			StreamerError::Dial { peer, source } => {
				write!(f, "failed to open stream to {}: {}", peer, source)
			}
			StreamerError::TargetNotFound { kind } => {
				write!(f, "target {} not found in the packfile", kind)
			}
			StreamerError::UnexpectedObjectKind { hash, expected, actual } => {
				write!(f, "object {} is a {}, expected a {}", hash, actual, expected)
			}
			StreamerError::InvalidRequest(msg) => write!(f, "invalid request: {}", msg),
			StreamerError::Timeout => write!(f, "request timed out"),
			StreamerError::Cancelled => write!(f, "operation cancelled"),
			StreamerError::Repo(e) => write!(f, "{}", e),
		}
	}
}

impl Error for StreamerError {}

impl From<ProtocolError> for StreamerError {
	fn from(e: ProtocolError) -> Self {
		StreamerError::Protocol(e)
	}
}

impl From<RepoError> for StreamerError {
	fn from(e: RepoError) -> Self {
		StreamerError::Repo(e)
	}
}

/// Errors from the ancestor resolver
#[derive(Debug)]
pub enum ResolveError {
	/// The local repository could not be opened
	GetRepo(RepoError),

	/// The end boundary of the walk is not present locally
	EndObjectMustExistLocally(ObjectHash),

	/// A local repository query failed
	Repo(RepoError),

	/// Fetching an object from the network failed
	Fetch { hash: ObjectHash, source: StreamerError },

	/// A tag points at an object that is neither a tag nor a commit
	InvalidTagTarget { tag: ObjectHash, kind: ObjectKind },

	/// The start object is neither a tag nor a commit
	NotATagOrCommit { hash: ObjectHash, kind: ObjectKind },

	/// Tag chain exceeds the supported depth
	TagChainTooDeep(ObjectHash),

	/// The result callback failed
	Callback(BoxError),

	/// The caller cancelled the walk
	Cancelled,
}

impl fmt::Display for ResolveError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ResolveError::GetRepo(e) => write!(f, "failed to get repo: {}", e),
			ResolveError::EndObjectMustExistLocally(hash) => {
				write!(f, "end object must already exist in the local repo: {}", hash)
			}
			ResolveError::Repo(e) => write!(f, "{}", e),
			ResolveError::Fetch { hash, source } => {
				write!(f, "failed to fetch object {}: {}", hash, source)
			}
			ResolveError::InvalidTagTarget { tag, kind } => {
				write!(f, "tag {} points to a {}, expected a tag or commit", tag, kind)
			}
			ResolveError::NotATagOrCommit { hash, kind } => {
				write!(f, "object {} is a {}, expected a tag or commit", hash, kind)
			}
			ResolveError::TagChainTooDeep(hash) => {
				write!(f, "tag chain starting at {} is too deep", hash)
			}
			ResolveError::Callback(e) => write!(f, "result callback failed: {}", e),
			ResolveError::Cancelled => write!(f, "operation cancelled"),
		}
	}
}

impl Error for ResolveError {}

impl From<RepoError> for ResolveError {
	fn from(e: RepoError) -> Self {
		ResolveError::Repo(e)
	}
}

// vim: ts=4
