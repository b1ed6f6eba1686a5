//! In-process network for tests and local experiments
//!
//! Nodes registered on one [`MemoryNetwork`] reach each other through
//! `tokio::io::duplex` pipes. The DHT keeps a real provider table fed by
//! announcements, so provider lookup behaves as it would across a network.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, PoisonError, RwLock};

use crate::dht::Dht;
use crate::error::DhtError;
use crate::logging::*;
use crate::transport::{Host, PeerStream, StreamHandler};
use crate::types::{ObjectKey, PeerAddress, PeerId};

const PIPE_CAPACITY: usize = 64 * 1024;

#[derive(Default)]
struct NetworkState {
	handlers: RwLock<HashMap<PeerId, StreamHandler>>,
	providers: RwLock<HashMap<ObjectKey, Vec<PeerAddress>>>,
}

/// Shared switchboard for in-process nodes
#[derive(Clone, Default)]
pub struct MemoryNetwork {
	state: Arc<NetworkState>,
}

impl MemoryNetwork {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn host(&self, id: &str) -> Arc<MemoryHost> {
		Arc::new(MemoryHost { local: PeerId::new(id), network: self.clone() })
	}

	/// DHT node with its own host
	pub fn dht(&self, id: &str) -> Arc<MemoryDht> {
		Arc::new(MemoryDht { host: self.host(id), network: self.clone() })
	}

	/// Address peers use to reach `id`
	pub fn address(id: &str) -> PeerAddress {
		PeerAddress::new(id, format!("memory:{}", id))
	}

	/// Record `peer` as a provider of `key`, keeping insertion order
	pub fn add_provider(&self, key: &ObjectKey, peer: PeerAddress) {
		let mut providers = self.state.providers.write().unwrap_or_else(PoisonError::into_inner);
		let entry = providers.entry(*key).or_default();
		if !entry.contains(&peer) {
			entry.push(peer);
		}
	}

	pub fn providers(&self, key: &ObjectKey) -> Vec<PeerAddress> {
		self.state
			.providers
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.get(key)
			.cloned()
			.unwrap_or_default()
	}

	fn handler(&self, id: &PeerId) -> Option<StreamHandler> {
		self.state.handlers.read().unwrap_or_else(PoisonError::into_inner).get(id).cloned()
	}
}

pub struct MemoryHost {
	local: PeerId,
	network: MemoryNetwork,
}

#[async_trait]
impl Host for MemoryHost {
	fn local_id(&self) -> &PeerId {
		&self.local
	}

	async fn open_stream(&self, peer: &PeerAddress) -> io::Result<PeerStream> {
		let handler = self.network.handler(&peer.id).ok_or_else(|| {
			io::Error::new(io::ErrorKind::ConnectionRefused, format!("no node {} on the network", peer.id))
		})?;
		let (ours, theirs) = tokio::io::duplex(PIPE_CAPACITY);
		debug!("{} -> {}: opening memory stream", self.local, peer.id);
		tokio::spawn(handler(PeerStream::new(self.local.clone(), theirs)));
		Ok(PeerStream::new(peer.id.clone(), ours))
	}

	fn set_stream_handler(&self, handler: StreamHandler) {
		self.network
			.state
			.handlers
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(self.local.clone(), handler);
	}
}

pub struct MemoryDht {
	host: Arc<MemoryHost>,
	network: MemoryNetwork,
}

impl MemoryDht {
	pub fn local_address(&self) -> PeerAddress {
		MemoryNetwork::address(self.host.local.as_str())
	}
}

#[async_trait]
impl Dht for MemoryDht {
	async fn announce(&self, key: &ObjectKey) -> Result<(), DhtError> {
		self.network.add_provider(key, self.local_address());
		Ok(())
	}

	async fn get_providers(&self, key: &ObjectKey) -> Result<Vec<PeerAddress>, DhtError> {
		Ok(self.network.providers(key))
	}

	fn host(&self) -> Arc<dyn Host> {
		self.host.clone()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::protocol::Message;
	use crate::types::ObjectHash;
	use futures::FutureExt;

	#[tokio::test]
	async fn test_announce_feeds_provider_table() {
		let network = MemoryNetwork::new();
		let a = network.dht("a");
		let b = network.dht("b");
		let key = ObjectKey::from_hash(&ObjectHash::digest(b"obj"));

		assert!(b.get_providers(&key).await.unwrap().is_empty());
		a.announce(&key).await.unwrap();
		a.announce(&key).await.unwrap();
		assert_eq!(b.get_providers(&key).await.unwrap(), vec![MemoryNetwork::address("a")]);
	}

	#[tokio::test]
	async fn test_open_stream_reaches_handler() {
		let network = MemoryNetwork::new();
		let server = network.host("server");
		server.set_stream_handler(Arc::new(|mut stream: PeerStream| {
			async move {
				assert_eq!(stream.remote().as_str(), "client");
				let _ = stream.read_message().await;
				let _ = stream.write_message(&Message::Have).await;
			}
			.boxed()
		}));

		let client = network.host("client");
		let mut stream = client.open_stream(&MemoryNetwork::address("server")).await.unwrap();
		stream.write_message(&Message::Nope).await.unwrap();
		assert_eq!(stream.read_message().await.unwrap(), Some(b"have\n".to_vec()));

		let err = client.open_stream(&MemoryNetwork::address("ghost")).await.unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
	}
}

// vim: ts=4
