//! Ancestor resolver
//!
//! Walks a commit's parent graph (or a tag's target chain) and fetches every
//! object the local repository is missing, stopping at an optional end commit
//! that must already be present locally.
//!
//! The commit walk drains a breadth-first wantlist, so output order is
//! deterministic: a commit's packfile precedes its parents', and parents
//! follow their declared order. Tag chains are followed by bounded recursion.
//!
//! Results go through a single output sequence: buffered into the returned
//! vector, or handed to the caller's callback, which can stop the walk early
//! by returning [`Flow::Stop`].

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{BoxError, RepoError, ResolveError, StreamerError};
use crate::logging::*;
use crate::pack::Packfile;
use crate::repo::{RepoOpener, Repository};
use crate::types::{Commit, Object, ObjectHash, ObjectKind, Tag};

/// Longest tag chain followed before giving up
pub const MAX_TAG_DEPTH: usize = 64;

/// Network side of the resolver
#[async_trait]
pub trait ObjectFetcher: Send + Sync {
	async fn get_commit(
		&self,
		cancel: &CancellationToken,
		repo: &str,
		hash: &ObjectHash,
	) -> Result<(Packfile, Commit), StreamerError>;

	async fn get_tag(
		&self,
		cancel: &CancellationToken,
		repo: &str,
		hash: &ObjectHash,
	) -> Result<(Packfile, Tag), StreamerError>;
}

/// Returned by result callbacks to continue or end the walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
	Continue,
	Stop,
}

/// Receives each fetched packfile with the hash it was fetched for
pub type ResultCallback = Box<dyn FnMut(Packfile, ObjectHash) -> Result<Flow, BoxError> + Send>;

pub struct GetAncestorArgs {
	pub repos_dir: PathBuf,
	pub repo_name: String,
	pub git_bin_path: PathBuf,
	pub start_hash: ObjectHash,
	/// Boundary commit (or tag); must exist locally
	pub end_hash: Option<ObjectHash>,
	/// Leave the end object out of the results even when it had to be fetched
	pub exclude_end_commit: bool,
	pub result_cb: Option<ResultCallback>,
}

impl GetAncestorArgs {
	pub fn new(repos_dir: impl Into<PathBuf>, repo_name: impl Into<String>, start_hash: ObjectHash) -> Self {
		GetAncestorArgs {
			repos_dir: repos_dir.into(),
			repo_name: repo_name.into(),
			git_bin_path: PathBuf::from("git"),
			start_hash,
			end_hash: None,
			exclude_end_commit: false,
			result_cb: None,
		}
	}

	pub fn with_end(mut self, end_hash: ObjectHash, exclude_end_commit: bool) -> Self {
		self.end_hash = Some(end_hash);
		self.exclude_end_commit = exclude_end_commit;
		self
	}

	pub fn with_git_bin_path(mut self, git_bin_path: impl Into<PathBuf>) -> Self {
		self.git_bin_path = git_bin_path.into();
		self
	}

	pub fn with_callback<F>(mut self, callback: F) -> Self
	where
		F: FnMut(Packfile, ObjectHash) -> Result<Flow, BoxError> + Send + 'static,
	{
		self.result_cb = Some(Box::new(callback));
		self
	}
}

impl fmt::Debug for GetAncestorArgs {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("GetAncestorArgs")
			.field("repos_dir", &self.repos_dir)
			.field("repo_name", &self.repo_name)
			.field("start_hash", &self.start_hash)
			.field("end_hash", &self.end_hash)
			.field("exclude_end_commit", &self.exclude_end_commit)
			.field("result_cb", &self.result_cb.is_some())
			.finish()
	}
}

/// A failed resolution: the first fatal error plus everything buffered
/// before it (always empty when a callback is used)
#[derive(Debug)]
pub struct ResolveFailure {
	pub error: ResolveError,
	pub packfiles: Vec<Packfile>,
}

impl fmt::Display for ResolveFailure {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} ({} packfile(s) resolved)", self.error, self.packfiles.len())
	}
}

impl std::error::Error for ResolveFailure {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		Some(&self.error)
	}
}

impl From<ResolveError> for ResolveFailure {
	fn from(error: ResolveError) -> Self {
		ResolveFailure { error, packfiles: Vec::new() }
	}
}

/// Fetch `start_hash` and every missing ancestor down to `end_hash`
pub async fn get_commit_with_ancestors(
	fetcher: &dyn ObjectFetcher,
	opener: &dyn RepoOpener,
	args: GetAncestorArgs,
	cancel: &CancellationToken,
) -> Result<Vec<Packfile>, ResolveFailure> {
	let start = args.start_hash;
	let mut walk = Walk::open(fetcher, opener, args, cancel)?;
	let result = walk.commits(start).await;
	walk.finish(result)
}

/// Like [`get_commit_with_ancestors`], with `start_hash` and `end_hash`
/// allowed to name tags
pub async fn get_tagged_commit_with_ancestors(
	fetcher: &dyn ObjectFetcher,
	opener: &dyn RepoOpener,
	args: GetAncestorArgs,
	cancel: &CancellationToken,
) -> Result<Vec<Packfile>, ResolveFailure> {
	let start = args.start_hash;
	let mut walk = Walk::open(fetcher, opener, args, cancel)?;
	if let Some(end) = walk.end_ref {
		walk.end = Some(walk.peel_local(end)?);
	}
	let result = walk.tagged(start, 0).await;
	walk.finish(result)
}

/// Where fetched packfiles go
struct Output {
	packfiles: Vec<Packfile>,
	callback: Option<ResultCallback>,
}

impl Output {
	fn deliver(&mut self, packfile: Packfile, hash: ObjectHash) -> Result<Flow, ResolveError> {
		match &mut self.callback {
			Some(callback) => callback(packfile, hash).map_err(ResolveError::Callback),
			None => {
				self.packfiles.push(packfile);
				Ok(Flow::Continue)
			}
		}
	}
}

struct Walk<'a> {
	fetcher: &'a dyn ObjectFetcher,
	cancel: &'a CancellationToken,
	repo: Arc<dyn Repository>,
	repo_name: String,
	/// Boundary as a commit hash
	end: Option<ObjectHash>,
	/// Boundary as given by the caller (a tag for tagged walks)
	end_ref: Option<ObjectHash>,
	exclude_end: bool,
	output: Output,
}

impl<'a> Walk<'a> {
	fn open(
		fetcher: &'a dyn ObjectFetcher,
		opener: &dyn RepoOpener,
		args: GetAncestorArgs,
		cancel: &'a CancellationToken,
	) -> Result<Self, ResolveError> {
		let path = args.repos_dir.join(&args.repo_name);
		let repo = opener.open(&args.git_bin_path, &path).map_err(ResolveError::GetRepo)?;

		if let Some(end) = args.end_hash {
			if !repo.object_exists(&end) {
				return Err(ResolveError::EndObjectMustExistLocally(end));
			}
		}

		Ok(Walk {
			fetcher,
			cancel,
			repo,
			repo_name: args.repo_name,
			end: args.end_hash,
			end_ref: args.end_hash,
			exclude_end: args.exclude_end_commit,
			output: Output { packfiles: Vec::new(), callback: args.result_cb },
		})
	}

	fn finish(self, result: Result<Flow, ResolveError>) -> Result<Vec<Packfile>, ResolveFailure> {
		match result {
			Ok(_) => Ok(self.output.packfiles),
			Err(error) => Err(ResolveFailure { error, packfiles: self.output.packfiles }),
		}
	}

	fn is_end(&self, hash: &ObjectHash) -> bool {
		self.end == Some(*hash) || self.end_ref == Some(*hash)
	}

	fn emit(&mut self, packfile: Packfile, hash: ObjectHash) -> Result<Flow, ResolveError> {
		if self.exclude_end && self.is_end(&hash) {
			debug!("Excluding end object {}", hash.short());
			return Ok(Flow::Continue);
		}
		self.output.deliver(packfile, hash)
	}

	/// Breadth-first walk from `start`; local commits are read, missing
	/// ones fetched and emitted
	async fn commits(&mut self, start: ObjectHash) -> Result<Flow, ResolveError> {
		let mut wantlist = VecDeque::from([start]);
		let mut seen = HashSet::from([start]);

		while let Some(hash) = wantlist.pop_front() {
			if self.cancel.is_cancelled() {
				return Err(ResolveError::Cancelled);
			}

			let local = self.repo.commit_object(&hash);
			let commit = match local {
				Ok(commit) => commit,
				Err(e) if e.is_not_found() => {
					let (packfile, commit) =
						fetch_commit(self.fetcher, self.cancel, &self.repo_name, &hash).await?;
					if self.emit(packfile, hash)? == Flow::Stop {
						return Ok(Flow::Stop);
					}
					commit
				}
				Err(e) => return Err(ResolveError::Repo(e)),
			};

			// History behind the boundary is already local
			if self.end == Some(hash) {
				continue;
			}

			for parent in &commit.parents {
				if *parent == hash || !seen.insert(*parent) {
					continue;
				}
				if self.wants_parent(parent)? {
					wantlist.push_back(*parent);
				}
			}
		}

		Ok(Flow::Continue)
	}

	fn wants_parent(&self, parent: &ObjectHash) -> Result<bool, ResolveError> {
		let exists = self.repo.object_exists(parent);
		if self.end == Some(*parent) {
			return Ok(!exists);
		}
		if !exists {
			return Ok(true);
		}
		let Some(end) = self.end else {
			return Ok(true);
		};

		match self.repo.is_ancestor(&end, parent) {
			Ok(()) => Ok(false),
			Err(RepoError::ObjectNotFound(missing)) => {
				debug!("Gap below {}: {} is missing", parent.short(), missing.short());
				Ok(true)
			}
			Err(RepoError::NotAnAncestor { .. }) => Ok(true),
			Err(e) => Err(ResolveError::Repo(e)),
		}
	}

	/// Follow `start` through tags down to a commit walk
	fn tagged(&mut self, start: ObjectHash, depth: usize) -> BoxFuture<'_, Result<Flow, ResolveError>> {
		async move {
			if depth > MAX_TAG_DEPTH {
				return Err(ResolveError::TagChainTooDeep(start));
			}
			if self.cancel.is_cancelled() {
				return Err(ResolveError::Cancelled);
			}

			let local = self.repo.get_object(&start);
			let (target, target_kind) = match local {
				Ok(Object::Commit(_)) => return self.commits(start).await,
				Ok(Object::Tag(tag)) => (tag.target, tag.target_kind),
				Ok(other) => {
					return Err(ResolveError::NotATagOrCommit { hash: start, kind: other.kind() })
				}
				Err(e) if e.is_not_found() => {
					let (packfile, tag) =
						fetch_tag(self.fetcher, self.cancel, &self.repo_name, &start).await?;
					if self.emit(packfile, start)? == Flow::Stop {
						return Ok(Flow::Stop);
					}
					(tag.target, tag.target_kind)
				}
				Err(e) => return Err(ResolveError::Repo(e)),
			};

			if self.end_ref == Some(start) {
				return Ok(Flow::Continue);
			}

			match target_kind {
				ObjectKind::Tag => self.tagged(target, depth + 1).await,
				ObjectKind::Commit => self.commits(target).await,
				kind => Err(ResolveError::InvalidTagTarget { tag: start, kind }),
			}
		}
		.boxed()
	}

	/// Resolve a local tag chain to the commit it ends in
	fn peel_local(&self, hash: ObjectHash) -> Result<ObjectHash, ResolveError> {
		let mut current = hash;
		let mut via: Option<ObjectHash> = None;
		for _ in 0..=MAX_TAG_DEPTH {
			match self.repo.get_object(&current)? {
				Object::Commit(_) => return Ok(current),
				Object::Tag(tag) => match tag.target_kind {
					ObjectKind::Tag | ObjectKind::Commit => {
						via = Some(current);
						current = tag.target;
					}
					kind => return Err(ResolveError::InvalidTagTarget { tag: current, kind }),
				},
				other => {
					return Err(match via {
						Some(tag) => ResolveError::InvalidTagTarget { tag, kind: other.kind() },
						None => ResolveError::NotATagOrCommit { hash: current, kind: other.kind() },
					})
				}
			}
		}
		Err(ResolveError::TagChainTooDeep(hash))
	}
}

async fn fetch_commit(
	fetcher: &dyn ObjectFetcher,
	cancel: &CancellationToken,
	repo_name: &str,
	hash: &ObjectHash,
) -> Result<(Packfile, Commit), ResolveError> {
	debug!("Fetching commit {}", hash.short());
	tokio::select! {
		biased;
		_ = cancel.cancelled() => Err(ResolveError::Cancelled),
		fetched = fetcher.get_commit(cancel, repo_name, hash) => {
			fetched.map_err(|source| fetch_error(*hash, source))
		}
	}
}

async fn fetch_tag(
	fetcher: &dyn ObjectFetcher,
	cancel: &CancellationToken,
	repo_name: &str,
	hash: &ObjectHash,
) -> Result<(Packfile, Tag), ResolveError> {
	debug!("Fetching tag {}", hash.short());
	tokio::select! {
		biased;
		_ = cancel.cancelled() => Err(ResolveError::Cancelled),
		fetched = fetcher.get_tag(cancel, repo_name, hash) => {
			fetched.map_err(|source| fetch_error(*hash, source))
		}
	}
}

fn fetch_error(hash: ObjectHash, source: StreamerError) -> ResolveError {
	match source {
		StreamerError::Cancelled => ResolveError::Cancelled,
		source => ResolveError::Fetch { hash, source },
	}
}

// vim: ts=4
