//! Ancestor resolver tests against scripted fetchers and repositories

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use objsync::error::{RepoError, ResolveError, StreamerError};
use objsync::pack::{LineDecoder, LinePacker, PackDecoder, Packfile};
use objsync::repo::{RepoOpener, Repository};
use objsync::resolver::{
	get_commit_with_ancestors, get_tagged_commit_with_ancestors, Flow, GetAncestorArgs,
	ObjectFetcher, ResolveFailure,
};
use objsync::store::{MemoryOpener, MemoryRepository};
use objsync::types::{Blob, Commit, Object, ObjectHash, ObjectKind, Tag};

// ===================================================================
// Test doubles
// ===================================================================

/// Serves objects from a "remote" repository and records every request
#[derive(Default)]
struct MockFetcher {
	remote: MemoryRepository,
	calls: Mutex<Vec<ObjectHash>>,
	failing: HashSet<ObjectHash>,
	hang_on: Option<ObjectHash>,
}

impl MockFetcher {
	fn with_objects<O: Into<Object>>(objects: impl IntoIterator<Item = O>) -> Self {
		MockFetcher { remote: MemoryRepository::with_objects(objects), ..Default::default() }
	}

	fn calls(&self) -> Vec<ObjectHash> {
		self.calls.lock().unwrap().clone()
	}

	async fn serve(&self, hash: &ObjectHash) -> Result<(Packfile, Object), StreamerError> {
		self.calls.lock().unwrap().push(*hash);
		if self.hang_on == Some(*hash) {
			futures::future::pending::<()>().await;
		}
		if self.failing.contains(hash) {
			return Err(StreamerError::NoProviderFound(*hash));
		}
		let object = self.remote.get_object(hash).map_err(|_| StreamerError::ObjectNotFound(*hash))?;
		let pack = LinePacker::encode(std::slice::from_ref(&object)).unwrap();
		Ok((pack, object))
	}
}

#[async_trait]
impl ObjectFetcher for MockFetcher {
	async fn get_commit(
		&self,
		_cancel: &CancellationToken,
		_repo: &str,
		hash: &ObjectHash,
	) -> Result<(Packfile, Commit), StreamerError> {
		match self.serve(hash).await? {
			(pack, Object::Commit(commit)) => Ok((pack, commit)),
			(_, other) => Err(StreamerError::UnexpectedObjectKind {
				hash: *hash,
				expected: ObjectKind::Commit,
				actual: other.kind(),
			}),
		}
	}

	async fn get_tag(
		&self,
		_cancel: &CancellationToken,
		_repo: &str,
		hash: &ObjectHash,
	) -> Result<(Packfile, Tag), StreamerError> {
		match self.serve(hash).await? {
			(pack, Object::Tag(tag)) => Ok((pack, tag)),
			(_, other) => Err(StreamerError::UnexpectedObjectKind {
				hash: *hash,
				expected: ObjectKind::Tag,
				actual: other.kind(),
			}),
		}
	}
}

/// Memory repository whose answers can be skewed per test
#[derive(Default)]
struct ScriptedRepo {
	inner: MemoryRepository,
	/// Reported by `object_exists` without being readable
	phantom: HashSet<ObjectHash>,
	broken_ancestry: bool,
}

impl Repository for ScriptedRepo {
	fn object_exists(&self, hash: &ObjectHash) -> bool {
		self.phantom.contains(hash) || self.inner.object_exists(hash)
	}

	fn get_object(&self, hash: &ObjectHash) -> Result<Object, RepoError> {
		self.inner.get_object(hash)
	}

	fn is_ancestor(&self, ancestor: &ObjectHash, descendant: &ObjectHash) -> Result<(), RepoError> {
		if self.broken_ancestry {
			return Err(RepoError::Corrupted { message: "commit graph unreadable".to_string() });
		}
		self.inner.is_ancestor(ancestor, descendant)
	}
}

struct FixedOpener(Arc<dyn Repository>);

impl RepoOpener for FixedOpener {
	fn open(&self, _git_bin_path: &Path, _path: &Path) -> Result<Arc<dyn Repository>, RepoError> {
		Ok(self.0.clone())
	}
}

fn opener<O: Into<Object>>(local: impl IntoIterator<Item = O>) -> FixedOpener {
	FixedOpener(Arc::new(MemoryRepository::with_objects(local)))
}

fn chain(len: usize) -> Vec<Commit> {
	let mut commits: Vec<Commit> = Vec::new();
	for i in 0..len {
		let parents = commits.last().map(|c| vec![c.hash]).unwrap_or_default();
		commits.push(Commit::new(parents, "alice", &format!("commit {}", i)));
	}
	commits
}

fn args(start: ObjectHash) -> GetAncestorArgs {
	GetAncestorArgs::new("/repos", "repo", start)
}

fn pack_hashes(packfiles: &[Packfile]) -> Vec<ObjectHash> {
	packfiles
		.iter()
		.flat_map(|pack| {
			let mut pack = pack.clone();
			LineDecoder.objects(&mut pack).unwrap().into_iter().map(|o| o.hash())
		})
		.collect()
}

async fn resolve(
	fetcher: &MockFetcher,
	opener: &dyn RepoOpener,
	args: GetAncestorArgs,
) -> Result<Vec<Packfile>, ResolveFailure> {
	get_commit_with_ancestors(fetcher, opener, args, &CancellationToken::new()).await
}

// ===================================================================
// Commit walk basics
// ===================================================================

#[tokio::test]
async fn test_local_root_commit_needs_nothing() {
	let root = Commit::new(vec![], "alice", "root");
	let fetcher = MockFetcher::default();
	let packs = resolve(&fetcher, &opener(vec![root.clone()]), args(root.hash)).await.unwrap();
	assert!(packs.is_empty());
	assert!(fetcher.calls().is_empty());
}

#[tokio::test]
async fn test_missing_root_commit_is_fetched() {
	let root = Commit::new(vec![], "alice", "root");
	let fetcher = MockFetcher::with_objects(vec![root.clone()]);
	let packs = resolve(&fetcher, &opener(Vec::<Commit>::new()), args(root.hash)).await.unwrap();
	assert_eq!(pack_hashes(&packs), vec![root.hash]);
	assert_eq!(fetcher.calls(), vec![root.hash]);
}

#[tokio::test]
async fn test_start_equals_end_in_coherent_repo() {
	let commit = Commit::new(vec![], "alice", "tip");
	let fetcher = MockFetcher::with_objects(vec![commit.clone()]);

	for exclude in [true, false] {
		let request = args(commit.hash).with_end(commit.hash, exclude);
		let packs = resolve(&fetcher, &opener(vec![commit.clone()]), request).await.unwrap();
		assert!(packs.is_empty());
	}
	assert!(fetcher.calls().is_empty());
}

// The end must exist locally, so with a coherent store start == end is
// read locally and needs nothing. The phantom below exists but cannot be
// read, which forces the fetch and exercises how the end itself is emitted.
#[tokio::test]
async fn test_start_equals_end_excluded() {
	let commit = Commit::new(vec![], "alice", "tip");
	let fetcher = MockFetcher::with_objects(vec![commit.clone()]);
	let repo = ScriptedRepo { phantom: HashSet::from([commit.hash]), ..Default::default() };
	let opener = FixedOpener(Arc::new(repo));

	let packs = resolve(&fetcher, &opener, args(commit.hash).with_end(commit.hash, true)).await.unwrap();
	assert!(packs.is_empty());
	// Fetched all the same
	assert_eq!(fetcher.calls(), vec![commit.hash]);
}

#[tokio::test]
async fn test_start_equals_end_included() {
	let commit = Commit::new(vec![], "alice", "tip");
	let fetcher = MockFetcher::with_objects(vec![commit.clone()]);
	let repo = ScriptedRepo { phantom: HashSet::from([commit.hash]), ..Default::default() };
	let opener = FixedOpener(Arc::new(repo));

	let packs = resolve(&fetcher, &opener, args(commit.hash).with_end(commit.hash, false)).await.unwrap();
	assert_eq!(pack_hashes(&packs), vec![commit.hash]);
}

#[tokio::test]
async fn test_two_missing_parents_in_declared_order() {
	let p1 = Commit::new(vec![], "alice", "left");
	let p2 = Commit::new(vec![], "bob", "right");
	let merge = Commit::new(vec![p1.hash, p2.hash], "alice", "merge");
	let fetcher = MockFetcher::with_objects(vec![merge.clone(), p1.clone(), p2.clone()]);

	let packs = resolve(&fetcher, &opener(Vec::<Commit>::new()), args(merge.hash)).await.unwrap();
	assert_eq!(pack_hashes(&packs), vec![merge.hash, p1.hash, p2.hash]);
	assert_eq!(fetcher.calls(), vec![merge.hash, p1.hash, p2.hash]);
}

#[tokio::test]
async fn test_shared_ancestor_fetched_once() {
	let base = Commit::new(vec![], "alice", "base");
	let left = Commit::new(vec![base.hash], "alice", "left");
	let right = Commit::new(vec![base.hash], "bob", "right");
	let merge = Commit::new(vec![left.hash, right.hash], "alice", "merge");
	let fetcher = MockFetcher::with_objects(vec![base.clone(), left.clone(), right.clone(), merge.clone()]);

	let packs = resolve(&fetcher, &opener(Vec::<Commit>::new()), args(merge.hash)).await.unwrap();
	assert_eq!(pack_hashes(&packs), vec![merge.hash, left.hash, right.hash, base.hash]);
	assert_eq!(fetcher.calls().len(), 4);
}

#[tokio::test]
async fn test_self_referencing_parent_is_ignored() {
	let mut odd = Commit::new(vec![], "mallory", "loop");
	odd.parents = vec![odd.hash];
	let fetcher = MockFetcher::with_objects(Vec::<Commit>::new());
	let opener = opener(vec![odd.clone()]);
	assert!(resolve(&fetcher, &opener, args(odd.hash)).await.unwrap().is_empty());
}

// ===================================================================
// End boundary and ancestor gaps
// ===================================================================

#[tokio::test]
async fn test_walk_stops_at_local_end() {
	let commits = chain(5);
	let fetcher = MockFetcher::with_objects(commits.clone());
	let opener = opener(commits[..2].to_vec());

	let packs =
		resolve(&fetcher, &opener, args(commits[4].hash).with_end(commits[1].hash, true)).await.unwrap();
	assert_eq!(pack_hashes(&packs), vec![commits[4].hash, commits[3].hash, commits[2].hash]);
	assert!(!fetcher.calls().contains(&commits[1].hash));
}

#[tokio::test]
async fn test_complete_local_history_is_skipped() {
	let commits = chain(4);
	let fetcher = MockFetcher::with_objects(commits.clone());
	let opener = opener(commits[..3].to_vec());

	let packs =
		resolve(&fetcher, &opener, args(commits[3].hash).with_end(commits[0].hash, false)).await.unwrap();
	assert_eq!(pack_hashes(&packs), vec![commits[3].hash]);
	assert_eq!(fetcher.calls(), vec![commits[3].hash]);
}

#[tokio::test]
async fn test_gap_below_local_parent_is_filled() {
	let commits = chain(4);
	let fetcher = MockFetcher::with_objects(commits.clone());
	// c1 is missing between the local c0 and c2
	let opener = opener(vec![commits[0].clone(), commits[2].clone()]);

	let packs =
		resolve(&fetcher, &opener, args(commits[3].hash).with_end(commits[0].hash, true)).await.unwrap();
	assert_eq!(pack_hashes(&packs), vec![commits[3].hash, commits[1].hash]);
	// The local c2 is read, never fetched
	assert_eq!(fetcher.calls(), vec![commits[3].hash, commits[1].hash]);
}

#[tokio::test]
async fn test_unrelated_local_line_is_traversed() {
	let end = Commit::new(vec![], "alice", "end");
	let other_root = Commit::new(vec![], "bob", "other root");
	let start = Commit::new(vec![other_root.hash], "bob", "start");
	let fetcher = MockFetcher::with_objects(vec![start.clone()]);
	let opener = opener(vec![end.clone(), other_root.clone()]);

	let packs = resolve(&fetcher, &opener, args(start.hash).with_end(end.hash, true)).await.unwrap();
	assert_eq!(pack_hashes(&packs), vec![start.hash]);
	assert_eq!(fetcher.calls(), vec![start.hash]);
}

#[tokio::test]
async fn test_local_parents_expanded_without_end() {
	let commits = chain(3);
	let fetcher = MockFetcher::with_objects(commits.clone());
	let opener = opener(vec![commits[1].clone()]);

	let packs = resolve(&fetcher, &opener, args(commits[2].hash)).await.unwrap();
	assert_eq!(pack_hashes(&packs), vec![commits[2].hash, commits[0].hash]);
}

#[tokio::test]
async fn test_end_must_exist_locally() {
	let commits = chain(2);
	let fetcher = MockFetcher::with_objects(commits.clone());
	let err = resolve(&fetcher, &opener(Vec::<Commit>::new()), args(commits[1].hash).with_end(commits[0].hash, true))
		.await
		.unwrap_err();
	assert!(matches!(err.error, ResolveError::EndObjectMustExistLocally(h) if h == commits[0].hash));
	assert!(fetcher.calls().is_empty());
}

#[tokio::test]
async fn test_unopenable_repo() {
	let fetcher = MockFetcher::default();
	let err = resolve(&fetcher, &MemoryOpener::new(), args(ObjectHash::digest(b"x"))).await.unwrap_err();
	assert!(matches!(err.error, ResolveError::GetRepo(_)));
	assert!(err.to_string().starts_with("failed to get repo: "));
}

// ===================================================================
// Partial results
// ===================================================================

#[tokio::test]
async fn test_ancestry_error_returns_partial_results() {
	let local_parent = Commit::new(vec![], "alice", "local");
	let start = Commit::new(vec![local_parent.hash], "alice", "start");
	let end = Commit::new(vec![], "alice", "end");
	let repo = ScriptedRepo {
		inner: MemoryRepository::with_objects(vec![local_parent.clone(), end.clone()]),
		broken_ancestry: true,
		..Default::default()
	};
	let fetcher = MockFetcher::with_objects(vec![start.clone()]);

	let failure = resolve(&fetcher, &FixedOpener(Arc::new(repo)), args(start.hash).with_end(end.hash, true))
		.await
		.unwrap_err();
	assert!(matches!(failure.error, ResolveError::Repo(RepoError::Corrupted { .. })));
	assert_eq!(pack_hashes(&failure.packfiles), vec![start.hash]);
}

#[tokio::test]
async fn test_fetch_error_returns_partial_results() {
	let commits = chain(3);
	let mut fetcher = MockFetcher::with_objects(commits.clone());
	fetcher.failing.insert(commits[1].hash);

	let failure = resolve(&fetcher, &opener(Vec::<Commit>::new()), args(commits[2].hash)).await.unwrap_err();
	match &failure.error {
		ResolveError::Fetch { hash, source } => {
			assert_eq!(*hash, commits[1].hash);
			assert!(source.is_not_found());
		}
		other => panic!("expected fetch error, got {:?}", other),
	}
	assert_eq!(pack_hashes(&failure.packfiles), vec![commits[2].hash]);
}

#[tokio::test]
async fn test_cancellation_mid_walk() {
	let commits = chain(3);
	let mut fetcher = MockFetcher::with_objects(commits.clone());
	fetcher.hang_on = Some(commits[1].hash);

	let cancel = CancellationToken::new();
	let trigger = cancel.clone();
	tokio::spawn(async move {
		tokio::time::sleep(Duration::from_millis(50)).await;
		trigger.cancel();
	});

	let failure = get_commit_with_ancestors(
		&fetcher,
		&opener(Vec::<Commit>::new()),
		args(commits[2].hash),
		&cancel,
	)
	.await
	.unwrap_err();
	assert!(matches!(failure.error, ResolveError::Cancelled));
	assert_eq!(pack_hashes(&failure.packfiles), vec![commits[2].hash]);
}

#[tokio::test]
async fn test_cancelled_before_start() {
	let commits = chain(2);
	let fetcher = MockFetcher::with_objects(commits.clone());
	let cancel = CancellationToken::new();
	cancel.cancel();

	let failure =
		get_commit_with_ancestors(&fetcher, &opener(Vec::<Commit>::new()), args(commits[1].hash), &cancel)
			.await
			.unwrap_err();
	assert!(matches!(failure.error, ResolveError::Cancelled));
	assert!(fetcher.calls().is_empty());
}

// ===================================================================
// Result callback
// ===================================================================

#[tokio::test]
async fn test_callback_receives_every_packfile_in_order() {
	let commits = chain(3);
	let fetcher = MockFetcher::with_objects(commits.clone());
	let seen = Arc::new(Mutex::new(Vec::new()));
	let sink = seen.clone();

	let args = args(commits[2].hash).with_callback(move |pack, hash| {
		assert_eq!(pack_hashes(std::slice::from_ref(&pack)), vec![hash]);
		sink.lock().unwrap().push(hash);
		Ok(Flow::Continue)
	});
	let packs = resolve(&fetcher, &opener(Vec::<Commit>::new()), args).await.unwrap();

	assert!(packs.is_empty());
	assert_eq!(*seen.lock().unwrap(), vec![commits[2].hash, commits[1].hash, commits[0].hash]);
}

#[tokio::test]
async fn test_callback_stop_ends_walk() {
	let commits = chain(3);
	let fetcher = MockFetcher::with_objects(commits.clone());
	let args = args(commits[2].hash).with_callback(|_, _| Ok(Flow::Stop));

	let packs = resolve(&fetcher, &opener(Vec::<Commit>::new()), args).await.unwrap();
	assert!(packs.is_empty());
	assert_eq!(fetcher.calls(), vec![commits[2].hash]);
}

#[tokio::test]
async fn test_callback_error_is_propagated() {
	let commits = chain(3);
	let fetcher = MockFetcher::with_objects(commits.clone());
	let mut delivered = 0;
	let args = args(commits[2].hash).with_callback(move |_, _| {
		delivered += 1;
		if delivered == 2 {
			return Err("disk full".into());
		}
		Ok(Flow::Continue)
	});

	let failure = resolve(&fetcher, &opener(Vec::<Commit>::new()), args).await.unwrap_err();
	assert!(matches!(&failure.error, ResolveError::Callback(e) if e.to_string() == "disk full"));
	assert!(failure.packfiles.is_empty());
	assert_eq!(fetcher.calls(), vec![commits[2].hash, commits[1].hash]);
}

// ===================================================================
// Tags
// ===================================================================

async fn resolve_tagged(
	fetcher: &MockFetcher,
	opener: &dyn RepoOpener,
	args: GetAncestorArgs,
) -> Result<Vec<Packfile>, ResolveFailure> {
	get_tagged_commit_with_ancestors(fetcher, opener, args, &CancellationToken::new()).await
}

#[tokio::test]
async fn test_tag_chain_is_followed_to_commits() {
	let commits = chain(2);
	let inner = Tag::new("v1-inner", commits[1].hash, ObjectKind::Commit, "");
	let outer = Tag::new("v1", inner.hash, ObjectKind::Tag, "release");
	let mut remote: Vec<Object> = commits.iter().cloned().map(Object::from).collect();
	remote.push(inner.clone().into());
	remote.push(outer.clone().into());
	let fetcher = MockFetcher::with_objects(remote);

	let packs = resolve_tagged(&fetcher, &opener(Vec::<Commit>::new()), args(outer.hash)).await.unwrap();
	assert_eq!(pack_hashes(&packs), vec![outer.hash, inner.hash, commits[1].hash, commits[0].hash]);
}

#[tokio::test]
async fn test_tagged_walk_with_commit_start_delegates() {
	let commits = chain(2);
	let fetcher = MockFetcher::with_objects(commits.clone());
	let opener = opener(vec![commits[1].clone()]);

	let packs = resolve_tagged(&fetcher, &opener, args(commits[1].hash)).await.unwrap();
	assert_eq!(pack_hashes(&packs), vec![commits[0].hash]);
}

#[tokio::test]
async fn test_tagged_end_is_peeled_to_commit() {
	let base = Commit::new(vec![], "alice", "base");
	let base_tag = Tag::new("v1", base.hash, ObjectKind::Commit, "");
	let next = Commit::new(vec![base.hash], "alice", "next");
	let next_tag = Tag::new("v2", next.hash, ObjectKind::Commit, "");
	let fetcher = MockFetcher::with_objects(vec![Object::from(next.clone()), next_tag.clone().into()]);
	let opener = opener(vec![Object::from(base.clone()), base_tag.clone().into()]);

	let packs = resolve_tagged(&fetcher, &opener, args(next_tag.hash).with_end(base_tag.hash, true))
		.await
		.unwrap();
	assert_eq!(pack_hashes(&packs), vec![next_tag.hash, next.hash]);
}

#[tokio::test]
async fn test_tag_pointing_at_blob_is_rejected() {
	let blob = Blob::new(b"not history");
	let tag = Tag::new("odd", blob.hash, ObjectKind::Blob, "");
	let fetcher = MockFetcher::default();
	let opener = opener(vec![Object::from(blob.clone()), tag.clone().into()]);

	let err = resolve_tagged(&fetcher, &opener, args(tag.hash)).await.unwrap_err();
	assert!(matches!(err.error, ResolveError::InvalidTagTarget { kind: ObjectKind::Blob, .. }));

	let err = resolve_tagged(&fetcher, &opener, args(blob.hash)).await.unwrap_err();
	assert!(matches!(err.error, ResolveError::NotATagOrCommit { .. }));

	let commits = chain(1);
	let err = resolve_tagged(&fetcher, &opener, args(commits[0].hash).with_end(tag.hash, true))
		.await
		.unwrap_err();
	assert!(matches!(err.error, ResolveError::InvalidTagTarget { .. }));
}

#[tokio::test]
async fn test_overlong_tag_chain_is_rejected() {
	let root = Commit::new(vec![], "alice", "root");
	let mut remote = vec![Object::from(root.clone())];
	let mut target = (root.hash, ObjectKind::Commit);
	for i in 0..80 {
		let tag = Tag::new(&format!("t{}", i), target.0, target.1, "");
		target = (tag.hash, ObjectKind::Tag);
		remote.push(tag.into());
	}
	let fetcher = MockFetcher::with_objects(remote);

	let failure = resolve_tagged(&fetcher, &opener(Vec::<Commit>::new()), args(target.0)).await.unwrap_err();
	assert!(matches!(failure.error, ResolveError::TagChainTooDeep(_)));
	assert!(!failure.packfiles.is_empty());
}

// vim: ts=4
