use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// Any bidirectional byte stream the dialer can hand back.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Something that opens a byte stream to `address` over `network`.
///
/// Used for the TCP leg to the relay ingress and for fallback dials of
/// addresses that are not bound endpoints. Implementations should give up
/// promptly once `cancel` fires.
#[async_trait]
pub trait ContextDialer: Send + Sync {
    async fn dial_context(
        &self,
        cancel: &CancellationToken,
        network: &str,
        address: &str,
    ) -> io::Result<BoxedStream>;
}

/// Default network dialer: plain TCP with a connect timeout and `TCP_NODELAY`.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    connect_timeout: Duration,
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpDialer {
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    async fn connect(&self, network: &str, address: &str) -> io::Result<TcpStream> {
        let candidates: Vec<SocketAddr> = tokio::net::lookup_host(address)
            .await?
            .filter(|addr| match network {
                "tcp4" => addr.is_ipv4(),
                "tcp6" => addr.is_ipv6(),
                _ => true,
            })
            .collect();

        let mut last_err = None;
        for addr in candidates {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no {network} address for {address}"),
            )
        }))
    }
}

#[async_trait]
impl ContextDialer for TcpDialer {
    async fn dial_context(
        &self,
        cancel: &CancellationToken,
        network: &str,
        address: &str,
    ) -> io::Result<BoxedStream> {
        if !matches!(network, "tcp" | "tcp4" | "tcp6") {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("unsupported network {network:?}"),
            ));
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(io::Error::new(io::ErrorKind::Interrupted, "dial cancelled")),
            res = tokio::time::timeout(self.connect_timeout, self.connect(network, address)) => match res {
                Ok(Ok(stream)) => Ok(Box::new(stream) as BoxedStream),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {address} timed out after {:?}", self.connect_timeout),
                )),
            },
        }
    }
}

/// What the relay told us about an established binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingInfo {
    pub hostname: String,
    pub port: u16,
    /// Relay-side identifier of the endpoint.
    pub endpoint_id: String,
    /// Protocol the relay reported for the endpoint.
    pub proto: String,
}

/// A dialed connection: either upgraded through the relay or a plain
/// fallback stream. Reads and writes go straight to the underlying stream.
pub struct Connection {
    stream: BoxedStream,
    binding: Option<BindingInfo>,
}

impl Connection {
    pub(crate) fn bound(stream: BoxedStream, binding: BindingInfo) -> Self {
        Self {
            stream,
            binding: Some(binding),
        }
    }

    pub(crate) fn plain(stream: BoxedStream) -> Self {
        Self {
            stream,
            binding: None,
        }
    }

    /// Binding metadata, present only for connections made through the relay.
    pub fn binding(&self) -> Option<&BindingInfo> {
        self.binding.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    pub fn into_inner(self) -> BoxedStream {
        self.stream
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("binding", &self.binding)
            .finish_non_exhaustive()
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn tcp_dialer_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"hi").await.unwrap();
        });

        let cancel = CancellationToken::new();
        let mut stream = TcpDialer::new().dial_context(&cancel, "tcp", &addr).await.unwrap();
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[tokio::test]
    async fn tcp_dialer_rejects_other_networks() {
        let cancel = CancellationToken::new();
        let err = TcpDialer::new()
            .dial_context(&cancel, "udp", "127.0.0.1:9")
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn tcp6_filter_excludes_v4_literal() {
        let cancel = CancellationToken::new();
        let err = TcpDialer::new()
            .dial_context(&cancel, "tcp6", "127.0.0.1:9")
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), io::ErrorKind::AddrNotAvailable);
    }

    #[tokio::test]
    async fn cancelled_token_aborts_dial() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        // 192.0.2.0/24 is TEST-NET-1; connect would hang without cancellation.
        let err = TcpDialer::new()
            .dial_context(&cancel, "tcp", "192.0.2.1:443")
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
    }

    #[tokio::test]
    async fn plain_connection_passes_bytes_through() {
        let (a, mut b) = tokio::io::duplex(64);
        let mut conn = Connection::plain(Box::new(a));
        assert!(!conn.is_bound());
        conn.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }
}
