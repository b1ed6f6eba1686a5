//! Node configuration
//!
//! Priority chain:
//! 1. Built-in defaults (Config::default())
//! 2. Config file (`.toml`, `.json` or `.json5`)
//! 3. Environment variables (OBJSYNC_* prefix)
//! 4. CLI flags (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::have_cache::HaveCache;
use crate::transport::DEFAULT_MAX_MESSAGE_LEN;
use crate::types::PeerAddress;

// ============================================================================
// MAIN CONFIGURATION STRUCT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	/// Identity presented to peers
	pub node_id: String,

	/// Directory holding one subdirectory per repository
	pub repos_dir: PathBuf,

	/// Passed through to the repository opener
	pub git_bin_path: PathBuf,

	/// Address the `serve` command listens on
	pub listen_addr: String,

	/// Seed peers, `host:port` or `id@host:port`
	pub seeds: Vec<String>,

	/// Default tracing filter when RUST_LOG is unset
	pub log_level: String,

	pub streamer: StreamerConfig,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			node_id: "objsync".to_string(),
			repos_dir: PathBuf::from("repos"),
			git_bin_path: PathBuf::from("git"),
			listen_addr: "127.0.0.1:9419".to_string(),
			seeds: Vec::new(),
			log_level: "info".to_string(),
			streamer: StreamerConfig::default(),
		}
	}
}

// ============================================================================
// NESTED CONFIGURATION STRUCTS
// ============================================================================

/// Object streamer limits and provider policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StreamerConfig {
	/// Providers tried per fetch before giving up
	pub max_provider_attempts: usize,

	/// Timeout for one request/response exchange, in seconds
	pub request_timeout_secs: u64,

	/// Largest packfile accepted from a peer, in bytes
	pub max_packfile_size: u64,

	/// Longest request line accepted, in bytes
	pub max_message_len: usize,

	/// Have-cache bound per peer (0 = unbounded)
	pub have_cache_max_entries: usize,

	/// Number of peers the have-cache tracks (0 = unbounded)
	pub have_cache_max_peers: usize,
}

impl Default for StreamerConfig {
	fn default() -> Self {
		StreamerConfig {
			max_provider_attempts: 1,
			request_timeout_secs: 30,
			max_packfile_size: 64 * 1024 * 1024,
			max_message_len: DEFAULT_MAX_MESSAGE_LEN,
			have_cache_max_entries: 0,
			have_cache_max_peers: 1024,
		}
	}
}

impl StreamerConfig {
	pub fn request_timeout(&self) -> Duration {
		Duration::from_secs(self.request_timeout_secs)
	}

	pub fn have_cache(&self) -> HaveCache {
		HaveCache::new(self.have_cache_max_entries).with_max_peers(self.have_cache_max_peers)
	}
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
	/// Config file could not be read
	Io { path: PathBuf, source: std::io::Error },

	/// Config file or env value could not be parsed
	Parse { source: String, message: String },

	/// Values are inconsistent
	Invalid(String),
}

impl fmt::Display for ConfigError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConfigError::Io { path, source } => {
				write!(f, "Cannot read config {}: {}", path.display(), source)
			}
			ConfigError::Parse { source, message } => {
				write!(f, "Cannot parse {}: {}", source, message)
			}
			ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
		}
	}
}

impl std::error::Error for ConfigError {}

// ============================================================================
// LOADING
// ============================================================================

impl Config {
	/// Load a config file; the format is picked from the extension
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let contents = std::fs::read_to_string(path)
			.map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
		let is_toml = path.extension().and_then(|e| e.to_str()) == Some("toml");
		let parsed = if is_toml { Self::from_toml(&contents) } else { Self::from_json5(&contents) };
		parsed.map_err(|e| match e {
			ConfigError::Parse { message, .. } => {
				ConfigError::Parse { source: path.display().to_string(), message }
			}
			other => other,
		})
	}

	pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
		toml::from_str(contents)
			.map_err(|e| ConfigError::Parse { source: "TOML".to_string(), message: e.to_string() })
	}

	pub fn from_json5(contents: &str) -> Result<Self, ConfigError> {
		json5::from_str(contents)
			.map_err(|e| ConfigError::Parse { source: "JSON5".to_string(), message: e.to_string() })
	}

	/// Apply OBJSYNC_* overrides from the process environment
	pub fn apply_env(&mut self) -> Result<(), ConfigError> {
		self.apply_env_from(|key| std::env::var(key).ok())
	}

	/// Apply overrides using `lookup` as the environment
	pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		if let Some(v) = lookup("OBJSYNC_NODE_ID") {
			self.node_id = v;
		}
		if let Some(v) = lookup("OBJSYNC_REPOS_DIR") {
			self.repos_dir = PathBuf::from(v);
		}
		if let Some(v) = lookup("OBJSYNC_GIT_BIN") {
			self.git_bin_path = PathBuf::from(v);
		}
		if let Some(v) = lookup("OBJSYNC_LISTEN") {
			self.listen_addr = v;
		}
		if let Some(v) = lookup("OBJSYNC_SEEDS") {
			self.seeds =
				v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect();
		}
		if let Some(v) = lookup("OBJSYNC_LOG") {
			self.log_level = v;
		}
		if let Some(v) = lookup("OBJSYNC_MAX_PROVIDER_ATTEMPTS") {
			self.streamer.max_provider_attempts = parse_env("OBJSYNC_MAX_PROVIDER_ATTEMPTS", &v)?;
		}
		if let Some(v) = lookup("OBJSYNC_REQUEST_TIMEOUT_SECS") {
			self.streamer.request_timeout_secs = parse_env("OBJSYNC_REQUEST_TIMEOUT_SECS", &v)?;
		}
		Ok(())
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.node_id.trim().is_empty() {
			return Err(ConfigError::Invalid("nodeId must not be empty".to_string()));
		}
		if self.streamer.max_provider_attempts == 0 {
			return Err(ConfigError::Invalid("maxProviderAttempts must be at least 1".to_string()));
		}
		if self.streamer.request_timeout_secs == 0 {
			return Err(ConfigError::Invalid("requestTimeoutSecs must be at least 1".to_string()));
		}
		if self.streamer.max_message_len < 64 {
			return Err(ConfigError::Invalid("maxMessageLen must be at least 64".to_string()));
		}
		for seed in &self.seeds {
			parse_seed(seed)?;
		}
		Ok(())
	}

	pub fn seed_peers(&self) -> Result<Vec<PeerAddress>, ConfigError> {
		self.seeds.iter().map(|s| parse_seed(s)).collect()
	}

	/// Filesystem path of a repository
	pub fn repo_path(&self, repo: &str) -> PathBuf {
		self.repos_dir.join(repo)
	}
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
	T::Err: fmt::Display,
{
	value
		.trim()
		.parse()
		.map_err(|e: T::Err| ConfigError::Parse { source: key.to_string(), message: e.to_string() })
}

/// `id@host:port`, or `host:port` with the address doubling as the id
fn parse_seed(seed: &str) -> Result<PeerAddress, ConfigError> {
	let (id, addr) = match seed.split_once('@') {
		Some((id, addr)) => (id, addr),
		None => (seed, seed),
	};
	if id.is_empty() || addr.is_empty() || !addr.contains(':') {
		return Err(ConfigError::Invalid(format!("bad seed peer {:?}", seed)));
	}
	Ok(PeerAddress::new(id, addr))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_config_default() {
		let config = Config::default();
		assert_eq!(config.streamer.max_provider_attempts, 1);
		assert_eq!(config.streamer.request_timeout(), Duration::from_secs(30));
		assert!(config.validate().is_ok());
	}

	#[test]
	fn test_config_from_toml() {
		let config = Config::from_toml(
			r#"
			nodeId = "node-a"
			reposDir = "/srv/repos"
			seeds = ["peer-b@10.0.0.2:9419"]

			[streamer]
			maxProviderAttempts = 3
			"#,
		)
		.unwrap();
		assert_eq!(config.node_id, "node-a");
		assert_eq!(config.repo_path("r1"), PathBuf::from("/srv/repos/r1"));
		assert_eq!(config.streamer.max_provider_attempts, 3);
		// Unset nested fields keep their defaults
		assert_eq!(config.streamer.request_timeout_secs, 30);
		assert_eq!(config.seed_peers().unwrap(), vec![PeerAddress::new("peer-b", "10.0.0.2:9419")]);
	}

	#[test]
	fn test_config_from_json5() {
		let config = Config::from_json5(
			"{ listenAddr: '0.0.0.0:1234', streamer: { haveCacheMaxEntries: 10 }, }",
		)
		.unwrap();
		assert_eq!(config.listen_addr, "0.0.0.0:1234");
		assert_eq!(config.streamer.have_cache_max_entries, 10);
	}

	#[test]
	fn test_env_overrides() {
		let mut config = Config::default();
		config
			.apply_env_from(|key| match key {
				"OBJSYNC_SEEDS" => Some("127.0.0.1:1, b@127.0.0.1:2".to_string()),
				"OBJSYNC_MAX_PROVIDER_ATTEMPTS" => Some("2".to_string()),
				_ => None,
			})
			.unwrap();
		assert_eq!(config.streamer.max_provider_attempts, 2);
		let seeds = config.seed_peers().unwrap();
		assert_eq!(seeds[0], PeerAddress::new("127.0.0.1:1", "127.0.0.1:1"));
		assert_eq!(seeds[1], PeerAddress::new("b", "127.0.0.1:2"));

		let err = config
			.apply_env_from(|key| {
				(key == "OBJSYNC_REQUEST_TIMEOUT_SECS").then(|| "soon".to_string())
			})
			.unwrap_err();
		assert!(matches!(err, ConfigError::Parse { .. }));
	}

	#[test]
	fn test_validate_rejects_bad_values() {
		let mut config = Config::default();
		config.streamer.max_provider_attempts = 0;
		assert!(config.validate().is_err());

		let mut config = Config::default();
		config.seeds = vec!["not-an-address".to_string()];
		assert!(config.validate().is_err());
	}
}

// vim: ts=4
