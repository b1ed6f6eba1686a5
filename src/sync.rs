//! `fetch` mode: pull a commit (or tag) and its missing ancestors from the
//! seed peers into the local snapshot

use std::error::Error;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::dht::{Dht, StaticDht};
use crate::logging::*;
use crate::resolver::{get_commit_with_ancestors, get_tagged_commit_with_ancestors, GetAncestorArgs};
use crate::store::{MemoryRepository, SnapshotOpener};
use crate::streamer::ObjectStreamer;
use crate::transport::TcpHost;
use crate::types::{ObjectHash, PeerId};

#[derive(Debug, Clone)]
pub struct FetchRequest {
	pub repo: String,
	pub start: ObjectHash,
	pub end: Option<ObjectHash>,
	pub exclude_end: bool,
	/// Start and end may name tags
	pub tagged: bool,
}

#[derive(Debug, Default)]
pub struct FetchSummary {
	pub packfiles: usize,
	pub objects: usize,
}

/// Resolve the request against the seed peers and store what arrives.
///
/// Packfiles resolved before a failure are still applied and saved; the
/// failure is returned afterwards.
pub async fn fetch(
	config: &Config,
	request: &FetchRequest,
	cancel: &CancellationToken,
) -> Result<FetchSummary, Box<dyn Error>> {
	let host = Arc::new(
		TcpHost::new(PeerId::new(config.node_id.as_str()))
			.with_max_message_len(config.streamer.max_message_len),
	);
	let dht: Arc<dyn Dht> = Arc::new(StaticDht::new(host, config.seed_peers()?));
	let streamer = ObjectStreamer::new(dht, Arc::new(SnapshotOpener), &config.repos_dir)
		.with_config(config.streamer.clone())
		.with_git_bin_path(&config.git_bin_path);

	let repo_dir = config.repo_path(&request.repo);
	std::fs::create_dir_all(&repo_dir)?;

	let mut args = GetAncestorArgs::new(&config.repos_dir, request.repo.as_str(), request.start)
		.with_git_bin_path(&config.git_bin_path);
	if let Some(end) = request.end {
		args = args.with_end(end, request.exclude_end);
	}

	info!("Fetching {} into {}", request.start, request.repo);
	let result = if request.tagged {
		get_tagged_commit_with_ancestors(&streamer, &SnapshotOpener, args, cancel).await
	} else {
		get_commit_with_ancestors(&streamer, &SnapshotOpener, args, cancel).await
	};
	let (packfiles, failure) = match result {
		Ok(packfiles) => (packfiles, None),
		Err(failure) => (failure.packfiles, Some(failure.error)),
	};

	let local = MemoryRepository::load(&repo_dir)?;
	let mut summary = FetchSummary { packfiles: packfiles.len(), objects: 0 };
	for mut packfile in packfiles {
		summary.objects += local.apply_packfile(streamer.decoder().as_ref(), &mut packfile)?.len();
	}
	local.save(&repo_dir)?;
	info!(
		"Stored {} object(s) from {} packfile(s) in {}",
		summary.objects,
		summary.packfiles,
		repo_dir.display()
	);

	match failure {
		Some(error) => Err(error.into()),
		None => Ok(summary),
	}
}

// vim: ts=4
