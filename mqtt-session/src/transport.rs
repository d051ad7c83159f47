//! Transport adapter: an abstract duplex byte channel plus the TCP and
//! in-memory loopback implementations this core ships.
//!
//! TLS is deliberately not implemented here: any `AsyncRead + AsyncWrite`
//! stream (a `tokio-rustls`/`native-tls` wrapper, say) satisfies [`Transport`]
//! through the same blanket impl plain TCP uses.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::{TcpStream, ToSocketAddrs};

#[async_trait]
pub trait Transport: Send {
    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;
    async fn read_some(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
    async fn shutdown(&mut self) -> std::io::Result<()>;
}

#[async_trait]
impl<S> Transport for S
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        AsyncWriteExt::write_all(self, buf).await
    }

    async fn read_some(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        AsyncReadExt::read(self, buf).await
    }

    async fn shutdown(&mut self) -> std::io::Result<()> {
        AsyncWriteExt::shutdown(self).await
    }
}

pub async fn connect_tcp(addr: impl ToSocketAddrs) -> std::io::Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// An in-memory, bidirectional pair for tests: stands in for a broker
/// connection without touching the network.
pub fn loopback(buffer_size: usize) -> (DuplexStream, DuplexStream) {
    tokio::io::duplex(buffer_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_roundtrips_bytes() {
        let (mut client, mut broker) = loopback(4096);
        Transport::write_all(&mut client, b"hello").await.unwrap();

        let mut buf = [0u8; 5];
        Transport::read_some(&mut broker, &mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }
}
