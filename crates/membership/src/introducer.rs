//! Rendezvous service for joining members.
//!
//! The introducer is not a group member. It remembers the most recent joiners
//! and, for each new join request, hands out the newest one that still
//! accepts connections. Entries that fail the liveness check are forgotten.

use corelib::MemberIdentity;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use streaming::codec::{read_frame, write_frame};
use streaming::{IntroducerReply, IntroducerRequest, MembershipMessage, Message, Transport};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Joiners remembered at most.
const RECENT_CAPACITY: usize = 16;

pub struct Introducer {
    recent: Mutex<VecDeque<MemberIdentity>>,
    transport: Transport,
}

impl Introducer {
    pub fn new(transport: Transport) -> Arc<Self> {
        Arc::new(Self {
            recent: Mutex::new(VecDeque::new()),
            transport,
        })
    }

    /// Accept join requests on `listener` until `shutdown` fires.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        info!(address = %listener.local_addr()?, "introducer listening");
        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted?,
            };
            let introducer = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = introducer.serve_one(stream).await {
                    warn!(%peer, "introducer request failed: {}", e);
                }
            });
        }
        info!("introducer stopped");
        Ok(())
    }

    async fn serve_one(&self, mut stream: TcpStream) -> Result<()> {
        let request: IntroducerRequest = read_frame(&mut stream).await?;
        let reply = self.introduce(request.joining).await;
        write_frame(&mut stream, &reply).await?;
        Ok(())
    }

    /// Pick a live group member for `joining`, then remember `joining`.
    pub async fn introduce(&self, joining: MemberIdentity) -> IntroducerReply {
        let candidates: Vec<MemberIdentity> = self.recent.lock().iter().cloned().collect();

        let mut group_member = None;
        for candidate in candidates {
            if candidate.same_endpoint(&joining) {
                self.forget(&candidate);
                continue;
            }
            let probe = Message::Membership(MembershipMessage::IntroducerCheckAlive(candidate.clone()));
            match self.transport.send(&candidate, &probe).await {
                Ok(()) => {
                    group_member = Some(candidate);
                    break;
                }
                Err(e) => {
                    debug!(member = %candidate, "forgetting unreachable member: {}", e);
                    self.forget(&candidate);
                }
            }
        }

        {
            let mut recent = self.recent.lock();
            recent.push_front(joining.clone());
            recent.truncate(RECENT_CAPACITY);
        }
        match &group_member {
            Some(member) => info!(joining = %joining, via = %member, "introduced"),
            None => info!(joining = %joining, "first member of a new group"),
        }
        IntroducerReply { group_member }
    }

    fn forget(&self, member: &MemberIdentity) {
        self.recent.lock().retain(|known| known != member);
    }

    pub fn known(&self) -> Vec<MemberIdentity> {
        self.recent.lock().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_joiner_founds_group() {
        let introducer = Introducer::new(Transport::default());
        let reply = introducer
            .introduce(MemberIdentity::new("127.0.0.1", 7000, 1))
            .await;
        assert!(reply.group_member.is_none());
        assert_eq!(introducer.known().len(), 1);
    }

    #[tokio::test]
    async fn test_live_member_is_introduced_dead_one_forgotten() {
        let introducer = Introducer::new(Transport::default());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let live = MemberIdentity::new("127.0.0.1", listener.local_addr().unwrap().port(), 1);
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });
        introducer.introduce(live.clone()).await;

        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = MemberIdentity::new("127.0.0.1", closed.local_addr().unwrap().port(), 2);
        drop(closed);
        introducer.introduce(dead.clone()).await;

        let joiner = MemberIdentity::new("127.0.0.1", 9, 3);
        let reply = introducer.introduce(joiner.clone()).await;

        assert_eq!(reply.group_member, Some(live.clone()));
        assert_eq!(introducer.known(), vec![joiner, live]);
    }
}
