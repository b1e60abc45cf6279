//! Unix socket stream wrapper carrying the peer's kernel credentials.
//!
//! Each accepted connection goes through [`server_handshake`] exactly once,
//! before tonic reads a single byte from it. The handshake asks the kernel for
//! `SO_PEERCRED`: the uid and pid of the process that called `connect()`.
//! The peer cannot forge these by writing bytes on the socket.
//!
//! ```text
//! UnixListener::accept() ──► server_handshake() ──► UnixPeerCredsStream
//!                                  │                        │
//!                     getsockopt(SO_PEERCRED)     Connected::connect_info()
//!                                  │                        │
//!                            PeerCredsInfo ────────► Request::extensions()
//! ```

use std::fmt;
use std::future::Future;
use std::io;
use std::os::fd::{AsFd, AsRawFd};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::Stream;
use nix::errno::Errno;
use nix::sys::socket::{
    getsockname, getsockopt, sockopt::PeerCredentials, AddressFamily, SockaddrLike,
    SockaddrStorage,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

use crate::metrics::HANDSHAKES_TOTAL;

/// Failure to identify the peer of a connection. The connection is dropped.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("server handshake failed: unexpected socket type")]
    UnexpectedSocketType,

    #[error("server handshake failed: error inspecting raw connection: {0}")]
    Socket(#[source] Errno),

    #[error("server handshake failed: SO_PEERCRED query error: {0}")]
    PeerCredentials(#[source] Errno),
}

/// Kernel-reported identity of the process at the other end of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerCredsInfo {
    uid: u32,
    pid: i32,
}

impl PeerCredsInfo {
    pub fn new(uid: u32, pid: i32) -> Self {
        Self { uid, pid }
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Transport auth label: `"uid: <uid>, pid: <pid>"`
    pub fn auth_type(&self) -> String {
        self.to_string()
    }

    /// Identity attached by the transport to an incoming request, if any
    pub fn from_request<T>(request: &tonic::Request<T>) -> Option<&Self> {
        request.extensions().get::<Self>()
    }
}

impl fmt::Display for PeerCredsInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uid: {}, pid: {}", self.uid, self.pid)
    }
}

/// Extract the peer credentials of a Unix domain socket connection.
///
/// Returns the connection unchanged along with the identity. Anything that is
/// not an `AF_UNIX` socket is rejected.
pub fn server_handshake<C: AsFd>(conn: C) -> Result<(C, PeerCredsInfo), HandshakeError> {
    let info = {
        // Borrowed for this block only, never stored
        let fd = conn.as_fd();

        let local: SockaddrStorage = getsockname(fd.as_raw_fd()).map_err(|e| match e {
            Errno::ENOTSOCK => HandshakeError::UnexpectedSocketType,
            e => HandshakeError::Socket(e),
        })?;
        if local.family() != Some(AddressFamily::Unix) {
            return Err(HandshakeError::UnexpectedSocketType);
        }

        let cred = getsockopt(&fd, PeerCredentials).map_err(HandshakeError::PeerCredentials)?;
        PeerCredsInfo::new(cred.uid(), cred.pid())
    };

    Ok((conn, info))
}

/// Unix stream whose peer has been identified
///
/// Implements tonic's `Connected` so the identity lands in the extensions of
/// every request received on this connection.
pub struct UnixPeerCredsStream {
    inner: UnixStream,
    info: PeerCredsInfo,
}

impl UnixPeerCredsStream {
    /// Run the handshake on an accepted stream
    pub fn accept(stream: UnixStream) -> Result<Self, HandshakeError> {
        let (inner, info) = server_handshake(stream)?;
        Ok(Self { inner, info })
    }

    pub fn peer_creds(&self) -> PeerCredsInfo {
        self.info
    }

    pub fn into_inner(self) -> UnixStream {
        self.inner
    }
}

/// Delegate AsyncRead to the inner UnixStream
impl AsyncRead for UnixPeerCredsStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

/// Delegate AsyncWrite to the inner UnixStream
impl AsyncWrite for UnixPeerCredsStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl tonic::transport::server::Connected for UnixPeerCredsStream {
    type ConnectInfo = PeerCredsInfo;

    fn connect_info(&self) -> Self::ConnectInfo {
        self.info
    }
}

/// Pause after a failed `accept()` before trying again. Errors such as
/// `EMFILE` persist until a descriptor is released, and retrying at once
/// would spin.
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Accept connections on `listener`, identifying each peer.
///
/// Hand the result to `tonic::transport::Server::serve_with_incoming`.
/// Connections failing the handshake are logged and closed; accept errors are
/// passed through, then the loop waits [`ACCEPT_ERROR_BACKOFF`].
pub fn with_unix_peer_creds(
    listener: UnixListener,
) -> impl Stream<Item = io::Result<UnixPeerCredsStream>> {
    let listener = Arc::new(listener);
    identify_incoming(move || {
        let listener = listener.clone();
        async move { listener.accept().await.map(|(stream, _addr)| stream) }
    })
}

fn identify_incoming<A, F>(mut accept: A) -> impl Stream<Item = io::Result<UnixPeerCredsStream>>
where
    A: FnMut() -> F,
    F: Future<Output = io::Result<UnixStream>>,
{
    async_stream::stream! {
        loop {
            let stream = match accept().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    yield Err(e);
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
            };

            match UnixPeerCredsStream::accept(stream) {
                Ok(conn) => {
                    HANDSHAKES_TOTAL.with_label_values(&["ok"]).inc();
                    debug!(peer = %conn.peer_creds(), "Accepted connection");
                    yield Ok(conn);
                }
                Err(e) => {
                    HANDSHAKES_TOTAL.with_label_values(&["failed"]).inc();
                    warn!(error = %e, "Dropping connection");
                }
            }
        }
    }
}
