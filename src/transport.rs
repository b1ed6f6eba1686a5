//! Peer streams and the transport host
//!
//! A [`PeerStream`] is one bidirectional byte stream to a known peer. The
//! [`Host`] opens outbound streams and hands inbound ones to the registered
//! protocol handler.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::io;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::logging::*;
use crate::protocol::Message;
use crate::types::{PeerAddress, PeerId};

/// Default cap on a single request line
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 4096;

/// Default time an inbound TCP connection gets to identify itself
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Leading token of the identity line a dialer sends on a fresh TCP connection
pub const HELLO: &str = "hello";

/// Anything usable as the byte stream under a [`PeerStream`]
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send + Sync {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Sync> AsyncStream for T {}

/// Handler invoked for every inbound stream
pub type StreamHandler = Arc<dyn Fn(PeerStream) -> BoxFuture<'static, ()> + Send + Sync>;

/// One stream to a remote peer
pub struct PeerStream {
	remote: PeerId,
	io: BufReader<Box<dyn AsyncStream>>,
	max_message_len: usize,
	closed: bool,
}

impl PeerStream {
	pub fn new(remote: PeerId, io: impl AsyncStream + 'static) -> Self {
		PeerStream {
			remote,
			io: BufReader::new(Box::new(io)),
			max_message_len: DEFAULT_MAX_MESSAGE_LEN,
			closed: false,
		}
	}

	pub fn with_max_message_len(mut self, max_message_len: usize) -> Self {
		self.max_message_len = max_message_len;
		self
	}

	/// Identity of the peer at the other end
	pub fn remote(&self) -> &PeerId {
		&self.remote
	}

	/// Read one message line; `None` on clean EOF
	pub async fn read_message(&mut self) -> io::Result<Option<Vec<u8>>> {
		let limit = self.max_message_len as u64 + 1;
		let mut buf = Vec::new();
		let n = (&mut self.io).take(limit).read_until(b'\n', &mut buf).await?;
		if n == 0 {
			return Ok(None);
		}
		if !buf.ends_with(b"\n") && n as u64 >= limit {
			return Err(io::Error::new(
				io::ErrorKind::InvalidData,
				format!("message exceeds {} bytes", self.max_message_len),
			));
		}
		Ok(Some(buf))
	}

	pub async fn write_message(&mut self, message: &Message) -> io::Result<()> {
		self.write_all(&message.encode()).await
	}

	pub async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
		self.io.write_all(bytes).await?;
		self.io.flush().await
	}

	/// Read until the peer closes its side, failing past `limit` bytes
	pub async fn read_to_end(&mut self, limit: u64) -> io::Result<Vec<u8>> {
		let mut buf = Vec::new();
		(&mut self.io).take(limit.saturating_add(1)).read_to_end(&mut buf).await?;
		if buf.len() as u64 > limit {
			return Err(io::Error::new(
				io::ErrorKind::InvalidData,
				format!("response exceeds {} bytes", limit),
			));
		}
		Ok(buf)
	}

	/// Flush and shut down our side; safe to call more than once
	pub async fn close(&mut self) -> io::Result<()> {
		if self.closed {
			return Ok(());
		}
		self.closed = true;
		self.io.shutdown().await
	}

	pub fn is_closed(&self) -> bool {
		self.closed
	}

	/// Identify ourselves as the first line of a dialed stream
	pub async fn send_hello(&mut self, local: &PeerId) -> io::Result<()> {
		self.write_all(format!("{} {}\n", HELLO, local).as_bytes()).await
	}

	/// Read the dialer's identity line and adopt it as the remote peer id
	pub async fn accept_hello(&mut self) -> io::Result<()> {
		let line = self.read_message().await?.ok_or_else(|| {
			io::Error::new(io::ErrorKind::UnexpectedEof, "stream closed before hello")
		})?;
		self.remote = parse_hello(&line).ok_or_else(|| {
			io::Error::new(
				io::ErrorKind::InvalidData,
				format!("malformed hello {:?}", String::from_utf8_lossy(&line)),
			)
		})?;
		Ok(())
	}

	/// Abort the stream without a clean shutdown
	pub fn reset(self) {
		debug!("Resetting stream to {}", self.remote);
		drop(self);
	}
}

fn parse_hello(line: &[u8]) -> Option<PeerId> {
	let line = std::str::from_utf8(line).ok()?;
	let line = line.strip_suffix('\n').unwrap_or(line);
	let id = line.strip_prefix(HELLO)?.strip_prefix(' ')?;
	if id.is_empty() || id.chars().any(|c| c.is_whitespace() || c.is_control()) {
		return None;
	}
	Some(PeerId::new(id))
}

impl std::fmt::Debug for PeerStream {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PeerStream")
			.field("remote", &self.remote)
			.field("closed", &self.closed)
			.finish()
	}
}

/// Transport handle exposed by the DHT
#[async_trait]
pub trait Host: Send + Sync {
	/// Identity this host presents to peers
	fn local_id(&self) -> &PeerId;

	/// Open a new stream to `peer`
	async fn open_stream(&self, peer: &PeerAddress) -> io::Result<PeerStream>;

	/// Register the handler for inbound streams, replacing any previous one
	fn set_stream_handler(&self, handler: StreamHandler);
}

/// TCP transport.
///
/// A dialer opens every connection with a `hello <node id>` line, so inbound
/// peers are known by their node id rather than by an ephemeral socket
/// address. The id is taken on trust.
pub struct TcpHost {
	local: PeerId,
	handler: RwLock<Option<StreamHandler>>,
	max_message_len: usize,
	handshake_timeout: Duration,
}

impl TcpHost {
	pub fn new(local: PeerId) -> Self {
		TcpHost {
			local,
			handler: RwLock::new(None),
			max_message_len: DEFAULT_MAX_MESSAGE_LEN,
			handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
		}
	}

	pub fn with_max_message_len(mut self, max_message_len: usize) -> Self {
		self.max_message_len = max_message_len;
		self
	}

	pub fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
		self.handshake_timeout = handshake_timeout;
		self
	}

	fn handler(&self) -> Option<StreamHandler> {
		self.handler.read().unwrap_or_else(PoisonError::into_inner).clone()
	}

	/// Accept connections until `shutdown` fires, spawning the handler for each
	pub async fn accept_loop(
		&self,
		listener: TcpListener,
		shutdown: CancellationToken,
	) -> io::Result<()> {
		info!("Listening on {}", listener.local_addr()?);
		loop {
			let (socket, addr) = tokio::select! {
				_ = shutdown.cancelled() => {
					debug!("Accept loop shutting down");
					return Ok(());
				}
				accepted = listener.accept() => match accepted {
					Ok(accepted) => accepted,
					Err(e) => {
						warn!("Failed to accept connection: {}", e);
						continue;
					}
				},
			};

			let Some(handler) = self.handler() else {
				warn!("No stream handler registered, dropping connection from {}", addr);
				continue;
			};
			debug!("Accepted connection from {}", addr);
			let mut stream = PeerStream::new(PeerId::new(addr.to_string()), socket)
				.with_max_message_len(self.max_message_len);
			let handshake_timeout = self.handshake_timeout;
			tokio::spawn(async move {
				match tokio::time::timeout(handshake_timeout, stream.accept_hello()).await {
					Ok(Ok(())) => {
						debug!("{} identified as {}", addr, stream.remote());
						handler(stream).await;
					}
					Ok(Err(e)) => warn!("Handshake with {} failed: {}", addr, e),
					Err(_) => warn!("Handshake with {} timed out", addr),
				}
			});
		}
	}
}

#[async_trait]
impl Host for TcpHost {
	fn local_id(&self) -> &PeerId {
		&self.local
	}

	async fn open_stream(&self, peer: &PeerAddress) -> io::Result<PeerStream> {
		let socket = TcpStream::connect(&peer.addr).await?;
		socket.set_nodelay(true)?;
		let mut stream =
			PeerStream::new(peer.id.clone(), socket).with_max_message_len(self.max_message_len);
		stream.send_hello(&self.local).await?;
		Ok(stream)
	}

	fn set_stream_handler(&self, handler: StreamHandler) {
		*self.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
	}
}


// vim: ts=4
