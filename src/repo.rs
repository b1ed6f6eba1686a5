//! Local repository contract
//!
//! The replication core only issues read queries against the local
//! repository. Stores are expected to serialize their own internal state.

use std::path::Path;
use std::sync::Arc;

use crate::error::RepoError;
use crate::types::{Commit, Object, ObjectHash, ObjectKind, Tag};

/// Read access to a local git repository
pub trait Repository: Send + Sync {
	/// Cheap existence check, never reads the object body
	fn object_exists(&self, hash: &ObjectHash) -> bool;

	/// Read any object; `RepoError::ObjectNotFound` if absent
	fn get_object(&self, hash: &ObjectHash) -> Result<Object, RepoError>;

	/// Read a commit; `RepoError::ObjectNotFound` if absent
	fn commit_object(&self, hash: &ObjectHash) -> Result<Commit, RepoError> {
		match self.get_object(hash)? {
			Object::Commit(commit) => Ok(commit),
			other => Err(RepoError::WrongKind {
				hash: *hash,
				expected: ObjectKind::Commit,
				actual: other.kind(),
			}),
		}
	}

	/// Read a tag; `RepoError::ObjectNotFound` if absent
	fn tag_object(&self, hash: &ObjectHash) -> Result<Tag, RepoError> {
		match self.get_object(hash)? {
			Object::Tag(tag) => Ok(tag),
			other => Err(RepoError::WrongKind {
				hash: *hash,
				expected: ObjectKind::Tag,
				actual: other.kind(),
			}),
		}
	}

	/// `Ok(())` if `ancestor` is reachable from `descendant` through parent
	/// links (a commit counts as its own ancestor).
	///
	/// Returns `RepoError::NotAnAncestor` when the walk completes without a
	/// match and `RepoError::ObjectNotFound` when a commit on the way is
	/// missing locally.
	fn is_ancestor(&self, ancestor: &ObjectHash, descendant: &ObjectHash)
		-> Result<(), RepoError>;
}

/// Opens repositories by path
pub trait RepoOpener: Send + Sync {
	fn open(&self, git_bin_path: &Path, path: &Path) -> Result<Arc<dyn Repository>, RepoError>;
}

// vim: ts=4
