//! Object streamer: protocol server and client facade
//!
//! Inbound, every stream runs a small state machine: read a request, answer a
//! `want` with `have`/`nope` and keep listening, or answer a `send` with a
//! packfile and close. Outbound, `get_commit`/`get_tag` find a provider
//! through the DHT and run a requester exchange against it.
//!
//! The streamer owns its Have-Cache. Entries are written after objects have
//! actually been transferred: on the serving side under the requesting peer,
//! on the fetching side under the provider.

use async_trait::async_trait;
use futures::FutureExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::StreamerConfig;
use crate::dht::Dht;
use crate::error::StreamerError;
use crate::have_cache::HaveCache;
use crate::logging::*;
use crate::pack::{LineDecoder, LinePacker, PackDecoder, PackResult, Packer, Packfile};
use crate::protocol::{is_valid_repo_name, parse_request, requester, Message, ProtocolError};
use crate::repo::{RepoOpener, Repository};
use crate::resolver::ObjectFetcher;
use crate::transport::PeerStream;
use crate::types::{Commit, Object, ObjectHash, ObjectKey, ObjectKind, PeerAddress, Tag};

pub struct ObjectStreamer {
	dht: Arc<dyn Dht>,
	opener: Arc<dyn RepoOpener>,
	packer: Arc<dyn Packer>,
	decoder: Arc<dyn PackDecoder>,
	have_cache: HaveCache,
	repos_dir: PathBuf,
	git_bin_path: PathBuf,
	config: StreamerConfig,
}

impl ObjectStreamer {
	/// Streamer using the line packfile codec and default limits
	pub fn new(dht: Arc<dyn Dht>, opener: Arc<dyn RepoOpener>, repos_dir: impl Into<PathBuf>) -> Self {
		let config = StreamerConfig::default();
		ObjectStreamer {
			dht,
			opener,
			packer: Arc::new(LinePacker),
			decoder: Arc::new(LineDecoder),
			have_cache: config.have_cache(),
			repos_dir: repos_dir.into(),
			git_bin_path: PathBuf::from("git"),
			config,
		}
	}

	pub fn with_config(mut self, config: StreamerConfig) -> Self {
		self.have_cache = config.have_cache();
		self.config = config;
		self
	}

	pub fn with_packer(mut self, packer: Arc<dyn Packer>) -> Self {
		self.packer = packer;
		self
	}

	pub fn with_decoder(mut self, decoder: Arc<dyn PackDecoder>) -> Self {
		self.decoder = decoder;
		self
	}

	pub fn with_git_bin_path(mut self, git_bin_path: impl Into<PathBuf>) -> Self {
		self.git_bin_path = git_bin_path.into();
		self
	}

	pub fn have_cache(&self) -> &HaveCache {
		&self.have_cache
	}

	pub fn config(&self) -> &StreamerConfig {
		&self.config
	}

	pub fn dht(&self) -> &Arc<dyn Dht> {
		&self.dht
	}

	pub fn decoder(&self) -> &Arc<dyn PackDecoder> {
		&self.decoder
	}

	pub fn repos_dir(&self) -> &Path {
		&self.repos_dir
	}

	/// Open a repository named by a peer; the name must stay inside `repos_dir`
	fn open_repo(&self, repo: &str) -> Result<Arc<dyn Repository>, StreamerError> {
		if !is_valid_repo_name(repo) {
			return Err(ProtocolError::MalformedMessage(format!("invalid repository name {:?}", repo))
				.into());
		}
		self.opener
			.open(&self.git_bin_path, &self.repos_dir.join(repo))
			.map_err(|source| StreamerError::OpenRepo { repo: repo.to_string(), source })
	}

	// ========================================================================
	// INBOUND
	// ========================================================================

	/// Install the inbound handler on the DHT's host
	pub fn register(self: &Arc<Self>) {
		let streamer: Weak<Self> = Arc::downgrade(self);
		self.dht.host().set_stream_handler(Arc::new(move |stream: PeerStream| {
			let streamer = streamer.clone();
			async move {
				match streamer.upgrade() {
					Some(streamer) => streamer.serve_stream(stream).await,
					None => stream.reset(),
				}
			}
			.boxed()
		}));
		info!("Object streamer registered on {}", self.dht.host().local_id());
	}

	/// Run one inbound stream to completion and dispose of it
	pub async fn serve_stream(&self, mut stream: PeerStream) {
		let remote = stream.remote().clone();
		match self.handle_stream(&mut stream).await {
			Ok(()) => {
				if let Err(e) = stream.close().await {
					debug!("Closing stream from {} failed: {}", remote, e);
				}
			}
			Err(e) if e.resets_stream() => {
				if e.is_not_found() {
					debug!("Request from {}: {}", remote, e);
				} else {
					warn!("Request from {} failed: {}", remote, e);
				}
				stream.reset();
			}
			Err(e) => warn!("Stream from {} dropped: {}", remote, e),
		}
	}

	/// Serve requests until the exchange completes.
	///
	/// A `want` answered with `have` keeps the stream open for a following
	/// `send`; a `send` always ends the exchange.
	///
	/// The whole exchange runs under the configured request timeout; a peer
	/// that goes quiet gets `StreamerError::Timeout` and its stream dropped.
	pub async fn handle_stream(&self, stream: &mut PeerStream) -> Result<(), StreamerError> {
		tokio::time::timeout(self.config.request_timeout(), self.exchange(stream))
			.await
			.map_err(|_| StreamerError::Timeout)?
	}

	async fn exchange(&self, stream: &mut PeerStream) -> Result<(), StreamerError> {
		let mut served = 0usize;
		loop {
			let bytes = match stream.read_message().await.map_err(StreamerError::ReadRequest)? {
				Some(bytes) => bytes,
				None if served > 0 => return Ok(()),
				None => {
					return Err(StreamerError::ReadRequest(std::io::Error::new(
						std::io::ErrorKind::UnexpectedEof,
						"stream closed before a request was sent",
					)))
				}
			};
			served += 1;

			match parse_request(&bytes)? {
				Message::Want { repo, key } => self.on_want(stream, &repo, &key).await?,
				Message::Send { repo, key } => return self.on_send(stream, &repo, &key).await,
				other => {
					return Err(ProtocolError::MalformedMessage(format!(
						"'{}' is not a request",
						other.kind()
					))
					.into())
				}
			}
		}
	}

	/// Answer whether the object exists locally
	pub async fn on_want(
		&self,
		stream: &mut PeerStream,
		repo: &str,
		key: &ObjectKey,
	) -> Result<(), StreamerError> {
		let repository = self.open_repo(repo)?;
		let hash = key.hash();

		if !repository.object_exists(&hash) {
			stream.write_message(&Message::Nope).await.map_err(StreamerError::WriteNope)?;
			return Err(StreamerError::ObjectNotFound(hash));
		}

		debug!("{} wants {} from {}: have", stream.remote(), hash.short(), repo);
		stream
			.write_message(&Message::Have)
			.await
			.map_err(|source| StreamerError::WriteMessage { kind: Message::Have.kind(), source })
	}

	/// Stream a packfile holding the object, then close
	pub async fn on_send(
		&self,
		stream: &mut PeerStream,
		repo: &str,
		key: &ObjectKey,
	) -> Result<(), StreamerError> {
		let repository = self.open_repo(repo)?;
		let hash = key.hash();

		if !repository.object_exists(&hash) {
			stream.write_message(&Message::Nope).await.map_err(StreamerError::WriteNope)?;
			return Err(StreamerError::ObjectNotFound(hash));
		}

		let (packfile, hashes) =
			self.packer.pack_object(repository.as_ref(), &hash).map_err(StreamerError::PackGeneration)?;

		stream.write_all(packfile.as_bytes()).await.map_err(StreamerError::WritePackfile)?;
		info!(
			"Sent {} object(s) for {} in {} to {}",
			hashes.len(),
			hash.short(),
			repo,
			stream.remote()
		);

		// Before close: the requester treats EOF as completion
		self.have_cache
			.get_or_create(stream.remote())
			.await
			.add(hashes.into_iter().chain(std::iter::once(hash)))
			.await;
		stream.close().await.map_err(StreamerError::WritePackfile)
	}

	// ========================================================================
	// OUTBOUND
	// ========================================================================

	/// Announce the object in a background task; `done` receives the outcome
	pub fn announce<F>(&self, hash: ObjectHash, done: F) -> JoinHandle<()>
	where
		F: FnOnce(Result<(), StreamerError>) + Send + 'static,
	{
		let dht = self.dht.clone();
		tokio::spawn(async move {
			let key = ObjectKey::from_hash(&hash);
			let result = dht.announce(&key).await.map_err(StreamerError::Announce);
			if let Err(e) = &result {
				warn!("Failed to announce {}: {}", key, e);
			}
			done(result);
		})
	}

	pub async fn get_commit(
		&self,
		cancel: &CancellationToken,
		repo: &str,
		hash: &ObjectHash,
	) -> Result<(Packfile, Commit), StreamerError> {
		match self.fetch(cancel, repo, hash, ObjectKind::Commit).await? {
			(packfile, Object::Commit(commit)) => Ok((packfile, commit)),
			(_, other) => Err(StreamerError::UnexpectedObjectKind {
				hash: *hash,
				expected: ObjectKind::Commit,
				actual: other.kind(),
			}),
		}
	}

	pub async fn get_tag(
		&self,
		cancel: &CancellationToken,
		repo: &str,
		hash: &ObjectHash,
	) -> Result<(Packfile, Tag), StreamerError> {
		match self.fetch(cancel, repo, hash, ObjectKind::Tag).await? {
			(packfile, Object::Tag(tag)) => Ok((packfile, tag)),
			(_, other) => Err(StreamerError::UnexpectedObjectKind {
				hash: *hash,
				expected: ObjectKind::Tag,
				actual: other.kind(),
			}),
		}
	}

	async fn fetch(
		&self,
		cancel: &CancellationToken,
		repo: &str,
		hash: &ObjectHash,
		kind: ObjectKind,
	) -> Result<(Packfile, Object), StreamerError> {
		if !is_valid_repo_name(repo) {
			return Err(StreamerError::InvalidRequest(format!("invalid repository name {:?}", repo)));
		}
		let key = ObjectKey::from_hash(hash);

		let providers = tokio::select! {
			biased;
			_ = cancel.cancelled() => return Err(StreamerError::Cancelled),
			providers = self.dht.get_providers(&key) => {
				providers.map_err(StreamerError::ProviderLookup)?
			}
		};
		if providers.is_empty() {
			return Err(StreamerError::NoProviderFound(*hash));
		}

		let providers = self.order_providers(providers, hash).await;
		let attempts = self.config.max_provider_attempts.max(1);
		let mut last_error = None;

		for provider in providers.into_iter().take(attempts) {
			match self.fetch_from(cancel, &provider, repo, hash, kind).await {
				Ok(fetched) => return Ok(fetched),
				Err(e) if e.is_retryable() => {
					debug!("Fetching {} {} from {} failed: {}", kind, hash.short(), provider.id, e);
					last_error = Some(e);
				}
				Err(e) => return Err(e),
			}
		}

		Err(last_error.unwrap_or(StreamerError::NoProviderFound(*hash)))
	}

	/// Providers already known to hold the object come first
	async fn order_providers(&self, providers: Vec<PeerAddress>, hash: &ObjectHash) -> Vec<PeerAddress> {
		let mut known = Vec::new();
		let mut rest = Vec::new();
		for provider in providers {
			if self.have_cache.peer_has(&provider.id, hash).await {
				known.push(provider);
			} else {
				rest.push(provider);
			}
		}
		known.extend(rest);
		known
	}

	async fn fetch_from(
		&self,
		cancel: &CancellationToken,
		provider: &PeerAddress,
		repo: &str,
		hash: &ObjectHash,
		kind: ObjectKind,
	) -> Result<(Packfile, Object), StreamerError> {
		let skip_want = self.have_cache.peer_has(&provider.id, hash).await;
		let exchange = async {
			let mut stream = self
				.dht
				.host()
				.open_stream(provider)
				.await
				.map_err(|source| StreamerError::Dial { peer: provider.id.clone(), source })?;
			requester::request(
				&mut stream,
				repo,
				hash,
				skip_want,
				self.decoder.as_ref(),
				self.config.max_packfile_size,
			)
			.await
		};

		let PackResult { mut packfile, hashes } = tokio::select! {
			biased;
			_ = cancel.cancelled() => return Err(StreamerError::Cancelled),
			result = tokio::time::timeout(self.config.request_timeout(), exchange) => {
				result.map_err(|_| StreamerError::Timeout)??
			}
		};

		let object = self
			.decoder
			.decode(&mut packfile, hash)
			.map_err(StreamerError::DecodePackfile)?
			.ok_or(StreamerError::TargetNotFound { kind })?;
		packfile.rewind();

		debug!("Fetched {} {} from {}", kind, hash.short(), provider.id);
		self.have_cache.get_or_create(&provider.id).await.add(hashes).await;
		Ok((packfile, object))
	}
}

#[async_trait]
impl ObjectFetcher for ObjectStreamer {
	async fn get_commit(
		&self,
		cancel: &CancellationToken,
		repo: &str,
		hash: &ObjectHash,
	) -> Result<(Packfile, Commit), StreamerError> {
		ObjectStreamer::get_commit(self, cancel, repo, hash).await
	}

	async fn get_tag(
		&self,
		cancel: &CancellationToken,
		repo: &str,
		hash: &ObjectHash,
	) -> Result<(Packfile, Tag), StreamerError> {
		ObjectStreamer::get_tag(self, cancel, repo, hash).await
	}
}

// vim: ts=4
