//! Raw byte tunnel behind `CONNECT`.

use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::{Id, JoinSet};
use tracing::debug;

/// Reason phrase of the status line that opens a tunnel
pub const CONNECT_ESTABLISHED: &[u8] = b"Connection established";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    ClientToBackend,
    BackendToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToBackend => f.write_str("client to server"),
            Direction::BackendToClient => f.write_str("server to client"),
        }
    }
}

/// How a tunnel ended: the direction that finished first and what it reported
#[derive(Debug)]
pub struct TunnelEnd {
    pub direction: Direction,
    pub result: io::Result<u64>,
}

/// Pipe bytes between `client` and `backend` until either direction stops.
///
/// Each direction runs as its own task. The first one to finish, cleanly or
/// not, ends the tunnel: the other task is aborted and both streams are
/// dropped, which closes them towards their peers.
pub async fn tunnel<C, B>(client: C, backend: B) -> TunnelEnd
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut client_rd, mut client_wr) = tokio::io::split(client);
    let (mut backend_rd, mut backend_wr) = tokio::io::split(backend);

    let mut copies = JoinSet::new();
    let upstream = copies
        .spawn(async move { tokio::io::copy(&mut client_rd, &mut backend_wr).await })
        .id();
    copies.spawn(async move { tokio::io::copy(&mut backend_rd, &mut client_wr).await });

    let direction_of = |id: Id| {
        if id == upstream {
            Direction::ClientToBackend
        } else {
            Direction::BackendToClient
        }
    };

    let end = match copies.join_next_with_id().await {
        Some(Ok((id, result))) => TunnelEnd {
            direction: direction_of(id),
            result,
        },
        // The copy task panicked
        Some(Err(join_err)) => TunnelEnd {
            direction: direction_of(join_err.id()),
            result: Err(io::Error::new(io::ErrorKind::Other, join_err)),
        },
        None => unreachable!("tunnel always spawns two copy tasks"),
    };

    copies.shutdown().await;
    if let Ok(bytes) = &end.result {
        debug!("Tunnel finished {} after {} bytes", end.direction, bytes);
    }
    end
}
