//! Bidirectional byte relay for one tunnel session
//!
//! Each direction is copied by its own loop so a stalled writer on one side
//! never stops the other side from being read. The first EOF or I/O error in
//! either direction ends the whole session. Nothing is retried.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read chunk size per direction (4 KiB)
pub const RELAY_CHUNK_SIZE: usize = 4 * 1024;

/// Byte counts of a finished relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Bytes copied from client to upstream
    pub uploaded: u64,
    /// Bytes copied from upstream to client
    pub downloaded: u64,
}

/// Relay bytes between `client` and `upstream` until either side closes
pub async fn relay<C, U>(client: &mut C, upstream: &mut U) -> RelayStats
where
    C: AsyncRead + AsyncWrite + Unpin + ?Sized,
    U: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let (mut client_rd, mut client_wr) = tokio::io::split(client);
    let (mut upstream_rd, mut upstream_wr) = tokio::io::split(upstream);

    let mut stats = RelayStats::default();
    {
        let upload = pump(&mut client_rd, &mut upstream_wr, &mut stats.uploaded);
        let download = pump(&mut upstream_rd, &mut client_wr, &mut stats.downloaded);
        tokio::select! {
            _ = upload => {}
            _ = download => {}
        }
    }

    let _ = upstream_wr.shutdown().await;
    let _ = client_wr.shutdown().await;
    stats
}

/// Copy `reader` into `writer` until EOF or error, counting delivered bytes
async fn pump<R, W>(reader: &mut R, writer: &mut W, copied: &mut u64)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(RELAY_CHUNK_SIZE);
    buf.resize(RELAY_CHUNK_SIZE, 0);

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        if writer.write_all(&buf[..n]).await.is_err() || writer.flush().await.is_err() {
            return;
        }
        *copied += n as u64;
    }
}
