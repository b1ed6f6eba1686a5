//! Packfile contracts and a line-oriented reference codec
//!
//! A packfile travels as an opaque byte stream. The [`Packer`] builds one for
//! a requested object and reports the hashes it bundled; the [`PackDecoder`]
//! extracts objects back out of it.
//!
//! The bundled codec writes a `PACK <count>` header line followed by one JSON
//! object per line.

use std::io::{self, Cursor, Read, Seek, SeekFrom};

use crate::error::PackError;
use crate::repo::Repository;
use crate::types::{Object, ObjectHash};

/// Magic token opening every line packfile
pub const PACK_MAGIC: &str = "PACK";

/// Seekable in-memory packfile stream
#[derive(Debug, Clone, Default)]
pub struct Packfile {
	inner: Cursor<Vec<u8>>,
}

impl Packfile {
	pub fn from_bytes(bytes: Vec<u8>) -> Self {
		Packfile { inner: Cursor::new(bytes) }
	}

	pub fn as_bytes(&self) -> &[u8] {
		self.inner.get_ref()
	}

	pub fn into_bytes(self) -> Vec<u8> {
		self.inner.into_inner()
	}

	pub fn len(&self) -> usize {
		self.inner.get_ref().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn rewind(&mut self) {
		self.inner.set_position(0);
	}
}

impl Read for Packfile {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		self.inner.read(buf)
	}
}

impl Seek for Packfile {
	fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
		self.inner.seek(pos)
	}
}

/// Outcome of a successful remote fetch
#[derive(Debug)]
pub struct PackResult {
	pub packfile: Packfile,
	/// Hashes of every object carried by `packfile`
	pub hashes: Vec<ObjectHash>,
}

/// Builds packfiles for objects of a local repository
pub trait Packer: Send + Sync {
	fn pack_object(
		&self,
		repo: &dyn Repository,
		hash: &ObjectHash,
	) -> Result<(Packfile, Vec<ObjectHash>), PackError>;
}

/// Extracts objects from packfiles
pub trait PackDecoder: Send + Sync {
	/// Every object in the packfile, in pack order
	fn objects(&self, pack: &mut Packfile) -> Result<Vec<Object>, PackError>;

	/// The object with `hash`, or `None` when the pack is well-formed but
	/// does not carry it
	fn decode(&self, pack: &mut Packfile, hash: &ObjectHash) -> Result<Option<Object>, PackError> {
		Ok(self.objects(pack)?.into_iter().find(|object| object.hash() == *hash))
	}
}

/// Packs the requested object on its own
#[derive(Debug, Default, Clone, Copy)]
pub struct LinePacker;

impl LinePacker {
	pub fn encode(objects: &[Object]) -> Result<Packfile, PackError> {
		let mut out = format!("{} {}\n", PACK_MAGIC, objects.len()).into_bytes();
		for object in objects {
			let line = serde_json::to_string(object).map_err(|e| PackError::Format(e.to_string()))?;
			out.extend_from_slice(line.as_bytes());
			out.push(b'\n');
		}
		Ok(Packfile::from_bytes(out))
	}
}

impl Packer for LinePacker {
	fn pack_object(
		&self,
		repo: &dyn Repository,
		hash: &ObjectHash,
	) -> Result<(Packfile, Vec<ObjectHash>), PackError> {
		let object = repo.get_object(hash)?;
		let pack = Self::encode(std::slice::from_ref(&object))?;
		Ok((pack, vec![object.hash()]))
	}
}

/// Decodes [`LinePacker`] output, verifying every object's hash
#[derive(Debug, Default, Clone, Copy)]
pub struct LineDecoder;

impl PackDecoder for LineDecoder {
	fn objects(&self, pack: &mut Packfile) -> Result<Vec<Object>, PackError> {
		pack.rewind();
		let mut contents = String::new();
		pack.read_to_string(&mut contents)
			.map_err(|e| PackError::Format(format!("packfile is not valid UTF-8: {}", e)))?;
		pack.rewind();

		let mut lines = contents.lines();
		let header = lines.next().ok_or_else(|| PackError::Format("empty packfile".to_string()))?;
		let count: usize = header
			.strip_prefix(PACK_MAGIC)
			.map(str::trim)
			.and_then(|n| n.parse().ok())
			.ok_or_else(|| PackError::Format(format!("bad header {:?}", header)))?;

		let mut objects = Vec::with_capacity(count.min(1024));
		for line in lines.filter(|l| !l.trim().is_empty()) {
			let object: Object =
				serde_json::from_str(line).map_err(|e| PackError::Format(e.to_string()))?;
			let actual = object.computed_hash();
			if actual != object.hash() {
				return Err(PackError::HashMismatch { expected: object.hash(), actual });
			}
			objects.push(object);
		}

		if objects.len() != count {
			return Err(PackError::Format(format!(
				"header announces {} objects, found {}",
				count,
				objects.len()
			)));
		}
		Ok(objects)
	}
}


// vim: ts=4
