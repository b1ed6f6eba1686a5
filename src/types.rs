//! Core value types: object hashes, DHT keys, peers and git objects

use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Length of an object hash in bytes
pub const HASH_LEN: usize = 20;

/// Prefix of every object key announced to the DHT
pub const OBJECT_KEY_PREFIX: &str = "objects/";

/// Error returned when a hash or key cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseHashError(pub String);

impl fmt::Display for ParseHashError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Invalid object hash: {}", self.0)
	}
}

impl std::error::Error for ParseHashError {}

/// 20-byte content address of a git object
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectHash([u8; HASH_LEN]);

impl ObjectHash {
	pub const fn new(bytes: [u8; HASH_LEN]) -> Self {
		ObjectHash(bytes)
	}

	/// Hash arbitrary content (BLAKE3, truncated to 20 bytes)
	pub fn digest(content: &[u8]) -> Self {
		let full = blake3::hash(content);
		let mut bytes = [0u8; HASH_LEN];
		bytes.copy_from_slice(&full.as_bytes()[..HASH_LEN]);
		ObjectHash(bytes)
	}

	pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
		&self.0
	}

	pub fn to_hex(&self) -> String {
		hex::encode(self.0)
	}

	/// Short form used in log lines
	pub fn short(&self) -> String {
		hex::encode(&self.0[..4])
	}
}

impl FromStr for ObjectHash {
	type Err = ParseHashError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s.len() != HASH_LEN * 2 {
			return Err(ParseHashError(s.to_string()));
		}
		let mut bytes = [0u8; HASH_LEN];
		hex::decode_to_slice(s, &mut bytes).map_err(|_| ParseHashError(s.to_string()))?;
		Ok(ObjectHash(bytes))
	}
}

impl fmt::Display for ObjectHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_hex())
	}
}

impl fmt::Debug for ObjectHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ObjectHash({})", self.to_hex())
	}
}

impl Serialize for ObjectHash {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.to_hex())
	}
}

impl<'de> Deserialize<'de> for ObjectHash {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(serde::de::Error::custom)
	}
}

/// DHT key of an object: `objects/<hex hash>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
	hash: ObjectHash,
}

impl ObjectKey {
	pub fn from_hash(hash: &ObjectHash) -> Self {
		ObjectKey { hash: *hash }
	}

	/// Parse a key received from the wire
	pub fn parse(s: &str) -> Result<Self, ParseHashError> {
		let hex_part =
			s.strip_prefix(OBJECT_KEY_PREFIX).ok_or_else(|| ParseHashError(s.to_string()))?;
		Ok(ObjectKey { hash: hex_part.parse()? })
	}

	pub fn hash(&self) -> ObjectHash {
		self.hash
	}
}

impl fmt::Display for ObjectKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}{}", OBJECT_KEY_PREFIX, self.hash.to_hex())
	}
}

/// Identity of a peer on the network
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
	pub fn new(id: impl Into<String>) -> Self {
		PeerId(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for PeerId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// A provider returned by the DHT: identity plus dialable address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddress {
	pub id: PeerId,
	pub addr: String,
}

impl PeerAddress {
	pub fn new(id: impl Into<String>, addr: impl Into<String>) -> Self {
		PeerAddress { id: PeerId::new(id), addr: addr.into() }
	}
}

/// Kind of a git object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
	Commit,
	Tag,
	Tree,
	Blob,
}

impl fmt::Display for ObjectKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			ObjectKind::Commit => "commit",
			ObjectKind::Tag => "tag",
			ObjectKind::Tree => "tree",
			ObjectKind::Blob => "blob",
		};
		f.write_str(s)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
	#[serde(rename = "hsh")]
	pub hash: ObjectHash,
	#[serde(rename = "par", default)]
	pub parents: Vec<ObjectHash>,
	#[serde(rename = "aut", default)]
	pub author: String,
	#[serde(rename = "msg", default)]
	pub message: String,
}

impl Commit {
	pub fn new(parents: Vec<ObjectHash>, author: &str, message: &str) -> Self {
		let hash = Self::content_hash(&parents, author, message);
		Commit { hash, parents, author: author.to_string(), message: message.to_string() }
	}

	fn content_hash(parents: &[ObjectHash], author: &str, message: &str) -> ObjectHash {
		let mut content = b"commit\0".to_vec();
		for parent in parents {
			content.extend_from_slice(b"parent ");
			content.extend_from_slice(parent.to_hex().as_bytes());
			content.push(b'\n');
		}
		content.extend_from_slice(b"author ");
		content.extend_from_slice(author.as_bytes());
		content.extend_from_slice(b"\n\n");
		content.extend_from_slice(message.as_bytes());
		ObjectHash::digest(&content)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
	#[serde(rename = "hsh")]
	pub hash: ObjectHash,
	#[serde(rename = "nam")]
	pub name: String,
	#[serde(rename = "tgt")]
	pub target: ObjectHash,
	#[serde(rename = "knd")]
	pub target_kind: ObjectKind,
	#[serde(rename = "msg", default)]
	pub message: String,
}

impl Tag {
	pub fn new(name: &str, target: ObjectHash, target_kind: ObjectKind, message: &str) -> Self {
		let hash = Self::content_hash(name, &target, target_kind, message);
		Tag {
			hash,
			name: name.to_string(),
			target,
			target_kind,
			message: message.to_string(),
		}
	}

	fn content_hash(
		name: &str,
		target: &ObjectHash,
		target_kind: ObjectKind,
		message: &str,
	) -> ObjectHash {
		let content = format!(
			"tag\0object {}\ntype {}\ntag {}\n\n{}",
			target.to_hex(),
			target_kind,
			name,
			message
		);
		ObjectHash::digest(content.as_bytes())
	}
}

/// Any object that is neither a commit nor a tag (trees and blobs)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
	#[serde(rename = "hsh")]
	pub hash: ObjectHash,
	#[serde(rename = "knd", default = "default_blob_kind")]
	pub kind: ObjectKind,
	#[serde(rename = "dat", with = "base64_bytes")]
	pub data: Vec<u8>,
}

fn default_blob_kind() -> ObjectKind {
	ObjectKind::Blob
}

impl Blob {
	pub fn new(data: &[u8]) -> Self {
		Self::with_kind(ObjectKind::Blob, data)
	}

	pub fn with_kind(kind: ObjectKind, data: &[u8]) -> Self {
		let mut content = format!("{}\0", kind).into_bytes();
		content.extend_from_slice(data);
		Blob { hash: ObjectHash::digest(&content), kind, data: data.to_vec() }
	}
}

/// A git object as stored locally or carried in a packfile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "typ", rename_all = "lowercase")]
pub enum Object {
	Commit(Commit),
	Tag(Tag),
	Blob(Blob),
}

impl Object {
	pub fn hash(&self) -> ObjectHash {
		match self {
			Object::Commit(c) => c.hash,
			Object::Tag(t) => t.hash,
			Object::Blob(b) => b.hash,
		}
	}

	pub fn kind(&self) -> ObjectKind {
		match self {
			Object::Commit(_) => ObjectKind::Commit,
			Object::Tag(_) => ObjectKind::Tag,
			Object::Blob(b) => b.kind,
		}
	}

	/// Recompute the content hash; used to reject tampered objects
	pub fn computed_hash(&self) -> ObjectHash {
		match self {
			Object::Commit(c) => Commit::content_hash(&c.parents, &c.author, &c.message),
			Object::Tag(t) => Tag::content_hash(&t.name, &t.target, t.target_kind, &t.message),
			Object::Blob(b) => Blob::with_kind(b.kind, &b.data).hash,
		}
	}
}

impl From<Commit> for Object {
	fn from(c: Commit) -> Self {
		Object::Commit(c)
	}
}

impl From<Tag> for Object {
	fn from(t: Tag) -> Self {
		Object::Tag(t)
	}
}

impl From<Blob> for Object {
	fn from(b: Blob) -> Self {
		Object::Blob(b)
	}
}

mod base64_bytes {
	use super::*;

	pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(data))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
		let s = String::deserialize(deserializer)?;
		base64::engine::general_purpose::STANDARD.decode(s).map_err(serde::de::Error::custom)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_hash_hex_roundtrip() {
		let hash = ObjectHash::digest(b"hello");
		let parsed: ObjectHash = hash.to_hex().parse().unwrap();
		assert_eq!(hash, parsed);
		assert_eq!(hash.to_hex().len(), 40);
	}

	#[test]
	fn test_hash_rejects_bad_input() {
		assert!("abc".parse::<ObjectHash>().is_err());
		assert!("zz".repeat(20).parse::<ObjectHash>().is_err());
	}

	#[test]
	fn test_object_key_format() {
		let hash = ObjectHash::digest(b"x");
		let key = ObjectKey::from_hash(&hash);
		assert_eq!(key.to_string(), format!("objects/{}", hash.to_hex()));
		assert_eq!(ObjectKey::parse(&key.to_string()).unwrap().hash(), hash);
		assert!(ObjectKey::parse(&hash.to_hex()).is_err());
		assert!(ObjectKey::parse("objects/1234").is_err());
	}

	#[test]
	fn test_commit_hash_depends_on_parents() {
		let root = Commit::new(vec![], "alice", "root");
		let a = Commit::new(vec![root.hash], "alice", "child");
		let b = Commit::new(vec![], "alice", "child");
		assert_ne!(a.hash, b.hash);
		assert_eq!(Object::from(a.clone()).computed_hash(), a.hash);
	}

	#[test]
	fn test_object_serde_tagged() {
		let tag = Tag::new("v1", ObjectHash::digest(b"c"), ObjectKind::Commit, "release");
		let json = serde_json::to_string(&Object::from(tag.clone())).unwrap();
		assert!(json.contains("\"typ\":\"tag\""));
		let back: Object = serde_json::from_str(&json).unwrap();
		assert_eq!(back, Object::Tag(tag));

		let blob = Blob::new(b"\x00\x01binary");
		let json = serde_json::to_string(&Object::from(blob.clone())).unwrap();
		let back: Object = serde_json::from_str(&json).unwrap();
		assert_eq!(back, Object::Blob(blob));
	}
}

// vim: ts=4
