//! `serve` mode: answer object requests from peers over TCP

use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::dht::{Dht, StaticDht};
use crate::logging::*;
use crate::store::{MemoryRepository, SnapshotOpener};
use crate::streamer::ObjectStreamer;
use crate::transport::TcpHost;
use crate::types::PeerId;

/// Bind the configured address and serve until `shutdown` fires
pub async fn serve(config: &Config, shutdown: CancellationToken) -> Result<(), Box<dyn Error>> {
	let listener = TcpListener::bind(&config.listen_addr).await?;
	serve_on(config, listener, shutdown).await
}

/// Serve on an already bound listener
pub async fn serve_on(
	config: &Config,
	listener: TcpListener,
	shutdown: CancellationToken,
) -> Result<(), Box<dyn Error>> {
	let host = Arc::new(
		TcpHost::new(PeerId::new(config.node_id.as_str()))
			.with_max_message_len(config.streamer.max_message_len)
			.with_handshake_timeout(config.streamer.request_timeout()),
	);
	let dht: Arc<dyn Dht> = Arc::new(StaticDht::new(host.clone(), config.seed_peers()?));
	let streamer = Arc::new(
		ObjectStreamer::new(dht, Arc::new(SnapshotOpener), &config.repos_dir)
			.with_config(config.streamer.clone())
			.with_git_bin_path(&config.git_bin_path),
	);
	streamer.register();

	let announced = announce_local_objects(&streamer, &config.repos_dir).await;
	info!("Announced {} local object(s)", announced);

	host.accept_loop(listener, shutdown).await?;
	info!("Server stopped");
	Ok(())
}

/// Announce every object of every repository under `repos_dir`
async fn announce_local_objects(streamer: &ObjectStreamer, repos_dir: &Path) -> usize {
	let entries = match std::fs::read_dir(repos_dir) {
		Ok(entries) => entries,
		Err(e) => {
			warn!("Cannot read {}: {}", repos_dir.display(), e);
			return 0;
		}
	};

	let mut tasks = Vec::new();
	for entry in entries.flatten() {
		let path = entry.path();
		if !path.is_dir() {
			continue;
		}
		let repo = match MemoryRepository::load(&path) {
			Ok(repo) => repo,
			Err(e) => {
				warn!("Skipping {}: {}", path.display(), e);
				continue;
			}
		};
		for object in repo.objects() {
			tasks.push(streamer.announce(object.hash(), |_| {}));
		}
	}

	let count = tasks.len();
	for task in tasks {
		if let Err(e) = task.await {
			error!("Announce task failed: {}", e);
		}
	}
	count
}

// vim: ts=4
