//! Bidirectional byte relay between two sockets.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Copy bytes both ways until either side finishes or fails, then shut
/// both down. Neither half outlives the other.
pub async fn relay<A, B>(client: A, upstream: B, label: &str)
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

    let outcome = tokio::select! {
        r = tokio::io::copy(&mut client_read, &mut upstream_write) => ("client", r),
        r = tokio::io::copy(&mut upstream_read, &mut client_write) => ("upstream", r),
    };
    match outcome {
        (side, Ok(bytes)) => debug!("{} relay closed by {} after {} bytes", label, side, bytes),
        (side, Err(e)) => debug!("{} relay error on {} side: {}", label, side, e),
    }

    let _ = client_write.shutdown().await;
    let _ = upstream_write.shutdown().await;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt};

    #[tokio::test]
    async fn test_bytes_flow_both_ways() {
        let (client, mut client_peer) = duplex(64);
        let (upstream, mut upstream_peer) = duplex(64);
        let task = tokio::spawn(async move { relay(client, upstream, "test").await });

        client_peer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        upstream_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        upstream_peer.write_all(b"pong").await.unwrap();
        client_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        drop(client_peer);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_upstream_close_tears_down_client() {
        let (client, mut client_peer) = duplex(64);
        let (upstream, upstream_peer) = duplex(64);
        let task = tokio::spawn(async move { relay(client, upstream, "test").await });

        drop(upstream_peer);
        task.await.unwrap();

        let mut rest = Vec::new();
        let n = client_peer.read_to_end(&mut rest).await.unwrap();
        assert_eq!(n, 0);
    }
}
