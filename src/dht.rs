//! DHT contract used for provider discovery
//!
//! Routing and key announcement internals live behind [`Dht`]; the streamer
//! only needs announce, provider lookup and the transport host.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::DhtError;
use crate::logging::*;
use crate::transport::Host;
use crate::types::{ObjectKey, PeerAddress};

#[async_trait]
pub trait Dht: Send + Sync {
	/// Advertise that this node provides `key`
	async fn announce(&self, key: &ObjectKey) -> Result<(), DhtError>;

	/// Peers advertising `key`, best candidates first
	async fn get_providers(&self, key: &ObjectKey) -> Result<Vec<PeerAddress>, DhtError>;

	/// Transport used to reach providers and receive inbound streams
	fn host(&self) -> Arc<dyn Host>;
}

/// DHT stand-in that treats a fixed seed list as providers of every key
pub struct StaticDht {
	host: Arc<dyn Host>,
	seeds: Vec<PeerAddress>,
	announced: Mutex<BTreeSet<ObjectKey>>,
}

impl StaticDht {
	pub fn new(host: Arc<dyn Host>, seeds: Vec<PeerAddress>) -> Self {
		StaticDht { host, seeds, announced: Mutex::new(BTreeSet::new()) }
	}

	/// Keys announced by this node so far
	pub async fn announced(&self) -> Vec<ObjectKey> {
		self.announced.lock().await.iter().copied().collect()
	}
}

#[async_trait]
impl Dht for StaticDht {
	async fn announce(&self, key: &ObjectKey) -> Result<(), DhtError> {
		debug!("Announcing {}", key);
		self.announced.lock().await.insert(*key);
		Ok(())
	}

	async fn get_providers(&self, key: &ObjectKey) -> Result<Vec<PeerAddress>, DhtError> {
		debug!("Providers for {}: {} seed(s)", key, self.seeds.len());
		Ok(self.seeds.clone())
	}

	fn host(&self) -> Arc<dyn Host> {
		self.host.clone()
	}
}


// vim: ts=4
