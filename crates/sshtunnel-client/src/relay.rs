//! Bidirectional byte relay between two connections

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Copy buffer size for each direction
pub const RELAY_BUFFER_SIZE: usize = 16 * 1024;

/// Bytes moved by one relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub a_to_b: u64,
    pub b_to_a: u64,
}

/// Relay bytes between `a` and `b` until either direction ends.
///
/// Both directions are polled concurrently inside the calling task, so a
/// direction blocked on a full writer never holds up the other; callers give
/// each relay its own task. The first direction to finish, on EOF or error,
/// ends the relay: both write halves are shut down (errors ignored) and both
/// connections are dropped before this returns.
pub async fn relay<A, B>(a: A, b: B) -> RelayStats
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);
    let mut stats = RelayStats::default();

    let finished = tokio::select! {
        result = pump(&mut a_read, &mut b_write, &mut stats.a_to_b) => ("a->b", result),
        result = pump(&mut b_read, &mut a_write, &mut stats.b_to_a) => ("b->a", result),
    };

    match finished {
        (direction, Ok(())) => debug!(direction, "Relay direction reached EOF"),
        (direction, Err(e)) => debug!(direction, "Relay direction failed: {}", e),
    }

    let _ = a_write.shutdown().await;
    let _ = b_write.shutdown().await;

    stats
}

async fn pump<R, W>(reader: &mut R, writer: &mut W, copied: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        *copied += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_relay_copies_both_directions() {
        let (mut client, a) = duplex(1024);
        let (b, mut server) = duplex(1024);

        let relay = tokio::spawn(relay(a, b));

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        server.write_all(b"pong!").await.unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong!");

        drop(client);
        let stats = tokio::time::timeout(Duration::from_secs(1), relay)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats, RelayStats { a_to_b: 4, b_to_a: 5 });

        let mut rest = Vec::new();
        server.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_one_side_closing_closes_the_other() {
        let (mut client, a) = duplex(1024);
        let (b, server) = duplex(1024);

        let relay = tokio::spawn(relay(a, b));
        drop(server);

        let mut buf = Vec::new();
        tokio::time::timeout(Duration::from_secs(1), client.read_to_end(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(buf.is_empty());
        relay.await.unwrap();
    }

    #[tokio::test]
    async fn test_large_payload_arrives_in_order() {
        let (mut client, a) = duplex(4096);
        let (b, mut server) = duplex(4096);
        tokio::spawn(relay(a, b));

        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            client.write_all(&payload).await.unwrap();
            client
        });

        let mut received = vec![0u8; expected.len()];
        server.read_exact(&mut received).await.unwrap();
        assert_eq!(received, expected);
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_stalled_direction_does_not_block_other() {
        let (client, a) = duplex(64);
        let (b, mut server) = duplex(64);
        tokio::spawn(relay(a, b));

        // The server never reads, so client-to-server stalls on full buffers.
        let (mut client_read, mut client_write) = tokio::io::split(client);
        let flood = tokio::spawn(async move {
            let _ = client_write.write_all(&vec![7u8; 64 * 1024]).await;
        });

        server.write_all(b"pong").await.unwrap();
        let mut buf = [0u8; 4];
        tokio::time::timeout(Duration::from_secs(1), client_read.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf, b"pong");
        assert!(!flood.is_finished());
        flood.abort();
    }
}
