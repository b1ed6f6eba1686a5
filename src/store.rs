//! In-memory object store with JSON5 snapshots
//!
//! Each repository is a directory holding `objects.json5`. The whole object
//! set is loaded into memory on open and written back by `save`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{PackError, RepoError};
use crate::logging::*;
use crate::pack::{PackDecoder, Packfile};
use crate::repo::{RepoOpener, Repository};
use crate::types::{Object, ObjectHash};

/// File name of the snapshot inside a repository directory
pub const SNAPSHOT_FILE: &str = "objects.json5";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
	#[serde(default)]
	objects: Vec<Object>,
}

/// Thread-safe object map implementing [`Repository`]
#[derive(Debug, Default)]
pub struct MemoryRepository {
	objects: RwLock<BTreeMap<ObjectHash, Object>>,
}

impl MemoryRepository {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_objects<I, O>(objects: I) -> Self
	where
		I: IntoIterator<Item = O>,
		O: Into<Object>,
	{
		let repo = Self::new();
		for object in objects {
			repo.insert(object);
		}
		repo
	}

	/// Insert an object, returning its hash
	pub fn insert(&self, object: impl Into<Object>) -> ObjectHash {
		let object = object.into();
		let hash = object.hash();
		self.objects.write().unwrap_or_else(PoisonError::into_inner).insert(hash, object);
		hash
	}

	pub fn remove(&self, hash: &ObjectHash) -> Option<Object> {
		self.objects.write().unwrap_or_else(PoisonError::into_inner).remove(hash)
	}

	pub fn len(&self) -> usize {
		self.objects.read().unwrap_or_else(PoisonError::into_inner).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// All objects, ordered by hash
	pub fn objects(&self) -> Vec<Object> {
		self.objects.read().unwrap_or_else(PoisonError::into_inner).values().cloned().collect()
	}

	/// Load a repository directory; a missing snapshot file yields an empty repo
	pub fn load(dir: &Path) -> Result<Self, RepoError> {
		if !dir.is_dir() {
			return Err(RepoError::Open {
				path: dir.display().to_string(),
				message: "not a directory".to_string(),
			});
		}
		let file = dir.join(SNAPSHOT_FILE);
		if !file.exists() {
			debug!("No snapshot at {}, starting empty", file.display());
			return Ok(Self::new());
		}
		let contents = std::fs::read_to_string(&file)?;
		let snapshot: Snapshot = json5::from_str(&contents).map_err(|e| RepoError::Corrupted {
			message: format!("{}: {}", file.display(), e),
		})?;
		let repo = Self::with_objects(snapshot.objects);
		debug!("Loaded {} objects from {}", repo.len(), file.display());
		Ok(repo)
	}

	/// Write the snapshot, creating the directory if needed
	pub fn save(&self, dir: &Path) -> Result<(), RepoError> {
		std::fs::create_dir_all(dir)?;
		let snapshot = Snapshot { objects: self.objects() };
		let contents = json5::to_string(&snapshot)
			.map_err(|e| RepoError::Corrupted { message: e.to_string() })?;
		// Write then rename so readers never see a partial snapshot
		let tmp = dir.join(format!("{}.tmp", SNAPSHOT_FILE));
		std::fs::write(&tmp, contents)?;
		std::fs::rename(&tmp, dir.join(SNAPSHOT_FILE))?;
		Ok(())
	}

	/// Insert every object carried by a packfile
	pub fn apply_packfile(
		&self,
		decoder: &dyn PackDecoder,
		pack: &mut Packfile,
	) -> Result<Vec<ObjectHash>, PackError> {
		let objects = decoder.objects(pack)?;
		Ok(objects.into_iter().map(|object| self.insert(object)).collect())
	}
}

impl Repository for MemoryRepository {
	fn object_exists(&self, hash: &ObjectHash) -> bool {
		self.objects.read().unwrap_or_else(PoisonError::into_inner).contains_key(hash)
	}

	fn get_object(&self, hash: &ObjectHash) -> Result<Object, RepoError> {
		self.objects
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.get(hash)
			.cloned()
			.ok_or(RepoError::ObjectNotFound(*hash))
	}

	fn is_ancestor(
		&self,
		ancestor: &ObjectHash,
		descendant: &ObjectHash,
	) -> Result<(), RepoError> {
		let mut queue = VecDeque::from([*descendant]);
		let mut visited = BTreeSet::new();

		while let Some(hash) = queue.pop_front() {
			if hash == *ancestor {
				return Ok(());
			}
			if !visited.insert(hash) {
				continue;
			}
			let commit = self.commit_object(&hash)?;
			queue.extend(commit.parents);
		}

		Err(RepoError::NotAnAncestor { ancestor: *ancestor, descendant: *descendant })
	}
}

/// Opens repositories from JSON5 snapshots on disk
#[derive(Debug, Default, Clone)]
pub struct SnapshotOpener;

impl RepoOpener for SnapshotOpener {
	fn open(&self, _git_bin_path: &Path, path: &Path) -> Result<Arc<dyn Repository>, RepoError> {
		Ok(Arc::new(MemoryRepository::load(path)?))
	}
}

/// Hands out shared in-memory repositories registered by path
#[derive(Debug, Default)]
pub struct MemoryOpener {
	repos: RwLock<HashMap<PathBuf, Arc<MemoryRepository>>>,
}

impl MemoryOpener {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&self, path: impl Into<PathBuf>, repo: Arc<MemoryRepository>) {
		self.repos.write().unwrap_or_else(PoisonError::into_inner).insert(path.into(), repo);
	}

	pub fn get(&self, path: &Path) -> Option<Arc<MemoryRepository>> {
		self.repos.read().unwrap_or_else(PoisonError::into_inner).get(path).cloned()
	}
}

impl RepoOpener for MemoryOpener {
	fn open(&self, _git_bin_path: &Path, path: &Path) -> Result<Arc<dyn Repository>, RepoError> {
		match self.get(path) {
			Some(repo) => Ok(repo),
			None => Err(RepoError::Open {
				path: path.display().to_string(),
				message: "repository does not exist".to_string(),
			}),
		}
	}
}


// vim: ts=4
