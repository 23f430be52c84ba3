//! Push/Pull state exchange
//!
//! Join and periodic anti-entropy both open a TCP connection to the peer's
//! gossip port and swap one [`PushPull`] frame each way. Frames are a
//! big-endian `u32` length followed by the bincode body.

use super::service::MembershipService;
use super::types::PushPull;
use crate::error::{FleetError, Result};

use rand::seq::SliceRandom;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Upper bound on a single push/pull frame.
const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

impl MembershipService {
    /// Contacts every seed with a join exchange.
    ///
    /// Returns how many seeds answered. Fails only if seeds were given and none
    /// of them could be reached. Seeds equal to our own address are skipped.
    pub async fn join(&self, seeds: &[SocketAddr]) -> Result<usize> {
        let own = self.local_node.addr;
        let targets: Vec<SocketAddr> = seeds.iter().copied().filter(|s| *s != own).collect();

        if targets.is_empty() {
            tracing::info!("Starting as seed node (no peers to contact)");
            return Ok(0);
        }

        let mut contacted = 0;
        for seed in &targets {
            tracing::info!("Attempting to join cluster via seed {}", seed);
            match self.exchange(*seed, true).await {
                Ok(remote) => {
                    self.merge_push_pull(remote);
                    contacted += 1;
                }
                Err(e) => tracing::warn!("Failed to contact seed {}: {}", seed, e),
            }
        }

        if contacted == 0 {
            return Err(FleetError::JoinFailed {
                attempted: targets.len(),
            });
        }

        tracing::info!(
            "Joined cluster through {} seed(s); {} live member(s)",
            contacted,
            self.member_count()
        );
        Ok(contacted)
    }

    pub(crate) fn local_push_pull(&self, join: bool) -> PushPull {
        PushPull {
            from: self.local_snapshot(),
            join,
            members: self.all_members(),
            state: self.delegate.local_state(),
        }
    }

    /// One request/response exchange with `addr`, bounded by the TCP timeout.
    async fn exchange(&self, addr: SocketAddr, join: bool) -> Result<PushPull> {
        let request = self.local_push_pull(join);
        let conversation = async {
            let mut stream = TcpStream::connect(addr).await?;
            write_frame(&mut stream, &request).await?;
            read_frame(&mut stream).await
        };

        tokio::time::timeout(self.config.tcp_timeout, conversation)
            .await
            .map_err(|_| FleetError::ConnectionTimeout {
                reason: format!("push/pull with {} timed out", addr),
            })?
    }

    /// Members first so join callbacks run before the state merge sees them.
    fn merge_push_pull(&self, remote: PushPull) {
        self.merge_member(remote.from);
        for member in remote.members {
            self.merge_member(member);
        }
        self.merge_state(&remote.state);
    }

    pub(crate) async fn push_pull_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.push_pull_interval);
        let mut shutdown = self.shutdown_signal();

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => {}
            }

            let peer = {
                let peers = self.live_peers();
                match peers.choose(&mut rand::thread_rng()) {
                    Some(peer) => peer.clone(),
                    None => continue,
                }
            };

            match self.exchange(peer.addr, false).await {
                Ok(remote) => self.merge_push_pull(remote),
                Err(e) => tracing::debug!("Push/pull with {} failed: {}", peer.id, e),
            }
        }

        tracing::debug!("Push/pull loop stopped");
    }

    pub(crate) async fn accept_loop(self: Arc<Self>) {
        let Some(listener) = self.listener.lock().take() else {
            tracing::error!("Push/pull listener already taken");
            return;
        };
        let mut shutdown = self.shutdown_signal();

        loop {
            let accepted = tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let service = self.clone();
                    tokio::spawn(async move {
                        let timeout = service.config.tcp_timeout;
                        match tokio::time::timeout(timeout, service.serve_push_pull(stream)).await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => tracing::warn!("Push/pull from {} failed: {}", peer, e),
                            Err(_) => tracing::warn!("Push/pull from {} timed out", peer),
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!("Failed to accept push/pull connection: {}", e);
                }
            }
        }

        tracing::debug!("Push/pull listener stopped");
    }

    async fn serve_push_pull(&self, mut stream: TcpStream) -> Result<()> {
        let remote = read_frame(&mut stream).await?;

        if remote.join {
            self.handle_join(remote.from.clone()).await;
        }

        write_frame(&mut stream, &self.local_push_pull(false)).await?;
        self.merge_push_pull(remote);
        Ok(())
    }
}

async fn write_frame<W>(writer: &mut W, msg: &PushPull) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = bincode::serialize(msg)?;
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_frame<R>(reader: &mut R) -> Result<PushPull>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_SIZE {
        return Err(FleetError::malformed(format!(
            "push/pull frame of {} bytes exceeds {}",
            len, MAX_FRAME_SIZE
        )));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(bincode::deserialize(&body)?)
}
