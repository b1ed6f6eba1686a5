//! Per-peer record of objects a peer is known to hold
//!
//! Entries are only added once objects have actually changed hands with that
//! peer. A bare `have` reply is a promise, not a transfer, and is never
//! recorded.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::types::{ObjectHash, PeerId};

#[derive(Debug, Default)]
struct PeerEntries {
	hashes: HashSet<ObjectHash>,
	/// Insertion order, used for eviction when bounded
	order: VecDeque<ObjectHash>,
}

/// Objects one peer is known to hold
#[derive(Debug, Clone)]
pub struct PeerCache {
	entries: Arc<Mutex<PeerEntries>>,
	max_entries: usize,
}

impl PeerCache {
	fn new(max_entries: usize) -> Self {
		PeerCache { entries: Arc::new(Mutex::new(PeerEntries::default())), max_entries }
	}

	pub async fn has(&self, hash: &ObjectHash) -> bool {
		self.entries.lock().await.hashes.contains(hash)
	}

	pub async fn add<I>(&self, hashes: I)
	where
		I: IntoIterator<Item = ObjectHash>,
	{
		let mut entries = self.entries.lock().await;
		for hash in hashes {
			if entries.hashes.insert(hash) {
				entries.order.push_back(hash);
			}
		}
		if self.max_entries > 0 {
			while entries.order.len() > self.max_entries {
				if let Some(oldest) = entries.order.pop_front() {
					entries.hashes.remove(&oldest);
				}
			}
		}
	}

	pub async fn len(&self) -> usize {
		self.entries.lock().await.hashes.len()
	}
}

#[derive(Debug, Default)]
struct PeerSlots {
	caches: BTreeMap<PeerId, (PeerCache, u64)>,
	/// Bumped on every write access, used to find the least recent peer
	clock: u64,
}

/// Have-cache for all peers, owned by one streamer
#[derive(Debug, Default)]
pub struct HaveCache {
	peers: Mutex<PeerSlots>,
	/// Per-peer bound; 0 = unbounded
	max_entries_per_peer: usize,
	/// Number of peers tracked; 0 = unbounded
	max_peers: usize,
}

impl HaveCache {
	pub fn new(max_entries_per_peer: usize) -> Self {
		HaveCache { peers: Mutex::new(PeerSlots::default()), max_entries_per_peer, max_peers: 0 }
	}

	/// Forget the least recently written peer once more than `max_peers` are tracked
	pub fn with_max_peers(mut self, max_peers: usize) -> Self {
		self.max_peers = max_peers;
		self
	}

	pub async fn get_or_create(&self, peer: &PeerId) -> PeerCache {
		let mut slots = self.peers.lock().await;
		slots.clock += 1;
		let now = slots.clock;

		if let Some((cache, used)) = slots.caches.get_mut(peer) {
			*used = now;
			return cache.clone();
		}

		let cache = PeerCache::new(self.max_entries_per_peer);
		slots.caches.insert(peer.clone(), (cache.clone(), now));
		if self.max_peers > 0 && slots.caches.len() > self.max_peers {
			let oldest = slots
				.caches
				.iter()
				.filter(|(id, _)| *id != peer)
				.min_by_key(|(_, (_, used))| *used)
				.map(|(id, _)| id.clone());
			if let Some(oldest) = oldest {
				slots.caches.remove(&oldest);
			}
		}
		cache
	}

	/// Lookup without creating an entry
	pub async fn get(&self, peer: &PeerId) -> Option<PeerCache> {
		self.peers.lock().await.caches.get(peer).map(|(cache, _)| cache.clone())
	}

	/// Convenience check used when ordering providers
	pub async fn peer_has(&self, peer: &PeerId, hash: &ObjectHash) -> bool {
		match self.get(peer).await {
			Some(cache) => cache.has(hash).await,
			None => false,
		}
	}

	pub async fn peer_count(&self) -> usize {
		self.peers.lock().await.caches.len()
	}
}


// vim: ts=4
