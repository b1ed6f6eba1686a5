//! # objsync - peer-to-peer git object replication
//!
//! Nodes ask each other for git objects with a four-message line protocol
//! (`want`/`have`/`nope`/`send`) and find providers through a DHT. On top of
//! that, the ancestor resolver walks a commit's history (or a tag chain)
//! and fetches exactly the objects the local repository is missing.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use objsync::resolver::{get_commit_with_ancestors, GetAncestorArgs};
//!
//! let streamer = ObjectStreamer::new(dht, opener.clone(), "repos");
//! let args = GetAncestorArgs::new("repos", "my-repo", head).with_end(known, true);
//! let packfiles = get_commit_with_ancestors(&streamer, opener.as_ref(), args, &cancel).await?;
//! ```

pub mod config;
pub mod dht;
pub mod error;
pub mod have_cache;
pub mod logging;
pub mod pack;
pub mod protocol;
pub mod repo;
pub mod resolver;
pub mod serve;
pub mod store;
pub mod streamer;
pub mod sync;
pub mod testing;
pub mod transport;
pub mod types;

// Re-export commonly used types and functions
pub use config::{Config, StreamerConfig};
pub use error::{DhtError, PackError, RepoError, ResolveError, StreamerError};
pub use resolver::{
	get_commit_with_ancestors, get_tagged_commit_with_ancestors, Flow, GetAncestorArgs,
	ObjectFetcher, ResolveFailure,
};
pub use streamer::ObjectStreamer;
pub use types::{Commit, Object, ObjectHash, ObjectKey, ObjectKind, PeerAddress, PeerId, Tag};

// vim: ts=4
