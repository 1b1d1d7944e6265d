//! Best-effort broadcast of membership events.
//!
//! One connection per recipient, no retries, no ordering. Receivers apply
//! events idempotently, so a missed or duplicated event is repaired by the
//! failure detector rather than here.

use corelib::MemberIdentity;
use streaming::{MembershipMessage, Message, Transport};
use tokio::task::JoinSet;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Disseminator {
    identity: MemberIdentity,
    transport: Transport,
}

impl Disseminator {
    pub fn new(identity: MemberIdentity, transport: Transport) -> Self {
        Self { identity, transport }
    }

    /// Send `event` to every recipient except ourselves and wait for the
    /// attempts to finish. Returns how many deliveries succeeded.
    pub async fn broadcast(&self, recipients: Vec<MemberIdentity>, event: MembershipMessage) -> usize {
        let message = Message::Membership(event);
        let mut sends = JoinSet::new();
        for recipient in recipients {
            if recipient == self.identity {
                continue;
            }
            let transport = self.transport;
            let message = message.clone();
            sends.spawn(async move {
                let result = transport.send(&recipient, &message).await;
                (recipient, result)
            });
        }

        let mut delivered = 0;
        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok((_, Ok(()))) => delivered += 1,
                Ok((recipient, Err(e))) => debug!(to = %recipient, "broadcast send failed: {}", e),
                Err(_) => {}
            }
        }
        delivered
    }
}
