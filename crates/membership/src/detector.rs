//! UDP failure detector.
//!
//! Two halves share one socket:
//!
//! - the receiver answers every `Ping` with an `Ack` carrying the same `seq`
//!   and completes the matching outstanding probe when an `Ack` arrives
//! - `probe` pings a set of successors concurrently and reports the ones
//!   that did not ack within `ping_timeout`
//!
//! Each outstanding probe owns a oneshot channel keyed by its sequence number,
//! so a late ack for an abandoned probe is simply dropped.
//!
//! `close` gives the port back: once the receiver has exited, nothing holds
//! the socket any more.

use corelib::MemberIdentity;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use streaming::codec::{decode_datagram, encode_datagram, MAX_DATAGRAM_LEN};
use streaming::{Datagram, MembershipMessage};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
    pub protocol_period: Duration,
    pub ping_timeout: Duration,
    pub monitors: usize,
}

pub struct FailureDetector {
    socket: Mutex<Option<Arc<UdpSocket>>>,
    identity: MemberIdentity,
    config: DetectorConfig,
    next_seq: AtomicU64,
    pending: DashMap<u64, oneshot::Sender<()>>,
}

impl FailureDetector {
    pub fn new(socket: UdpSocket, identity: MemberIdentity, config: DetectorConfig) -> Arc<Self> {
        Arc::new(Self {
            socket: Mutex::new(Some(Arc::new(socket))),
            identity,
            config,
            next_seq: AtomicU64::new(1),
            pending: DashMap::new(),
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Drop the detector's handle on the socket. Later pings fail.
    pub fn close(&self) {
        self.socket.lock().take();
    }

    fn socket(&self) -> Option<Arc<UdpSocket>> {
        self.socket.lock().clone()
    }

    /// Answer pings and collect acks until `shutdown` fires.
    pub async fn run_receiver(self: Arc<Self>, shutdown: CancellationToken) {
        let Some(socket) = self.socket() else {
            return;
        };
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];

        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = socket.recv_from(&mut buf) => received,
            };

            match received {
                Ok((len, src)) => match decode_datagram(&buf[..len]) {
                    Ok(datagram) => self.on_datagram(&socket, datagram, src).await,
                    Err(e) => warn!("Failed to decode datagram from {}: {}", src, e),
                },
                Err(e) => {
                    warn!("Failed to receive UDP packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
        info!("failure detector receiver stopped");
    }

    async fn on_datagram(&self, socket: &UdpSocket, datagram: Datagram, src: SocketAddr) {
        match datagram.message {
            MembershipMessage::Ping(from) => {
                let ack = Datagram {
                    seq: datagram.seq,
                    message: MembershipMessage::Ack(self.identity.clone()),
                };
                match encode_datagram(&ack) {
                    Ok(bytes) => {
                        if let Err(e) = socket.send_to(&bytes, src).await {
                            debug!(to = %from, "failed to ack ping: {}", e);
                        }
                    }
                    Err(e) => warn!("failed to encode ack: {}", e),
                }
            }
            MembershipMessage::Ack(from) => {
                if let Some((_, waiter)) = self.pending.remove(&datagram.seq) {
                    let _ = waiter.send(());
                } else {
                    debug!(from = %from, seq = datagram.seq, "late ack");
                }
            }
            other => debug!(kind = other.kind(), "ignoring datagram"),
        }
    }

    /// Ping `targets` concurrently. Returns the targets that did not ack.
    pub async fn probe(self: &Arc<Self>, targets: Vec<MemberIdentity>) -> Vec<MemberIdentity> {
        let mut pings = JoinSet::new();
        for target in targets {
            let detector = Arc::clone(self);
            pings.spawn(async move {
                let acked = detector.ping(&target).await;
                (target, acked)
            });
        }

        let mut suspects = Vec::new();
        while let Some(joined) = pings.join_next().await {
            if let Ok((target, false)) = joined {
                suspects.push(target);
            }
        }
        suspects
    }

    /// One ping; true if the ack arrived within `ping_timeout`.
    pub async fn ping(&self, target: &MemberIdentity) -> bool {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (waiter, acked) = oneshot::channel();
        self.pending.insert(seq, waiter);

        let datagram = Datagram {
            seq,
            message: MembershipMessage::Ping(self.identity.clone()),
        };
        let sent = match (self.socket(), encode_datagram(&datagram)) {
            (Some(socket), Ok(bytes)) => socket.send_to(&bytes, target.address()).await.is_ok(),
            _ => false,
        };
        metrics::counter!("membership.pings_sent").increment(1);

        let result = sent
            && matches!(
                tokio::time::timeout(self.config.ping_timeout, acked).await,
                Ok(Ok(()))
            );
        self.pending.remove(&seq);

        if !result {
            metrics::counter!("membership.ping_timeouts").increment(1);
            debug!(target = %target, seq, "ping timed out");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DetectorConfig {
        DetectorConfig {
            protocol_period: Duration::from_millis(100),
            ping_timeout: Duration::from_millis(200),
            monitors: 1,
        }
    }

    async fn detector() -> (Arc<FailureDetector>, MemberIdentity) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        let identity = MemberIdentity::new("127.0.0.1", port, 1);
        (FailureDetector::new(socket, identity.clone(), config()), identity)
    }

    #[tokio::test]
    async fn test_live_peer_acks() {
        let (a, _) = detector().await;
        let (b, b_id) = detector().await;
        let shutdown = CancellationToken::new();
        tokio::spawn(Arc::clone(&a).run_receiver(shutdown.clone()));
        tokio::spawn(Arc::clone(&b).run_receiver(shutdown.clone()));

        assert!(a.ping(&b_id).await);
        assert!(a.probe(vec![b_id]).await.is_empty());
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_silent_peer_is_suspected() {
        let (a, _) = detector().await;
        let shutdown = CancellationToken::new();
        tokio::spawn(Arc::clone(&a).run_receiver(shutdown.clone()));

        // Bound but never answering.
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let silent_id = MemberIdentity::new("127.0.0.1", silent.local_addr().unwrap().port(), 1);

        let suspects = a.probe(vec![silent_id.clone()]).await;
        assert_eq!(suspects, vec![silent_id]);
        assert!(a.pending.is_empty());
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_close_releases_port() {
        let (a, a_id) = detector().await;
        let (b, b_id) = detector().await;
        let shutdown = CancellationToken::new();
        let receiver = tokio::spawn(Arc::clone(&a).run_receiver(shutdown.clone()));

        shutdown.cancel();
        a.close();
        receiver.await.unwrap();

        assert!(!a.ping(&b_id).await);
        let rebound = UdpSocket::bind(a_id.address()).await;
        assert!(rebound.is_ok(), "port still held: {:?}", rebound.err());
        drop(b);
    }
}
