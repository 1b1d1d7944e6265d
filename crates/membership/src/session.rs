//! One joined incarnation of a member.
//!
//! A session owns everything that exists only while joined: the listener and
//! UDP socket, the ring, the file store, the coordinator slot and the
//! background loops. Leaving (or being evicted) cancels the session's token
//! and waits for the tasks owning the listener and socket to exit, so the
//! port can be bound again by a later join under a new identity.

use corelib::{MemberIdentity, MemberList, MembershipRing, RingSnapshot};
use replication::{Coordinator, CoordinatorConfig, RandomPlacement, StoreNetwork, TcpStoreNetwork};
use std::sync::Arc;
use storage::{FileClient, FileStore};
use streaming::codec::{read_frame, write_frame};
use streaming::{
    Destination, FileMessage, IntroducerReply, IntroducerRequest, MembershipMessage, Message,
    Transport,
};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{Mutex as AsyncMutex, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MemberConfig;
use crate::detector::FailureDetector;
use crate::disseminator::Disseminator;
use crate::election::{Election, ElectionAction};
use crate::error::{MembershipError, Result};

pub(crate) struct Session {
    identity: MemberIdentity,
    config: MemberConfig,
    transport: Transport,
    ring: MemberList,
    shutdown: CancellationToken,
    election: Election,
    disseminator: Disseminator,
    detector: Arc<FailureDetector>,
    store: Arc<FileStore>,
    client: FileClient,
    coordinator: OnceCell<Arc<Coordinator>>,
    /// Accept loop and detector receiver; they own the bound port.
    bound_tasks: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Bind, obtain the group's membership, start every loop and announce
    /// ourselves.
    pub(crate) async fn start(config: MemberConfig) -> Result<Arc<Self>> {
        let transport = Transport::new(config.transport);

        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let port = listener.local_addr()?.port();
        let socket = UdpSocket::bind((config.host.as_str(), port)).await?;
        let identity = MemberIdentity::joining_now(config.host.clone(), port);

        let ring = MemberList::new(discover(&config, &identity, &transport).await?);
        let store = FileStore::open(config.storage_dir(port), ring.reader(), transport).await?;

        let session = Arc::new(Self {
            detector: FailureDetector::new(socket, identity.clone(), config.detector()),
            disseminator: Disseminator::new(identity.clone(), transport),
            client: FileClient::new(ring.reader(), transport),
            store: Arc::new(store),
            identity: identity.clone(),
            config,
            transport,
            ring,
            shutdown: CancellationToken::new(),
            election: Election::new(),
            coordinator: OnceCell::new(),
            bound_tasks: AsyncMutex::new(Vec::new()),
        });

        let accept = tokio::spawn(Arc::clone(&session).accept_loop(listener));
        let receiver = tokio::spawn(Arc::clone(&session.detector).run_receiver(session.shutdown.clone()));
        session.bound_tasks.lock().await.extend([accept, receiver]);
        tokio::spawn(Arc::clone(&session).protocol_loop());

        let members = session.ring.members();
        let delivered = session
            .disseminator
            .broadcast(members, MembershipMessage::Join(identity.clone()))
            .await;
        info!(identity = %identity, announced_to = delivered, "joined group");

        session.sync_role().await;
        Ok(session)
    }

    pub(crate) fn identity(&self) -> &MemberIdentity {
        &self.identity
    }

    pub(crate) fn ring(&self) -> &MemberList {
        &self.ring
    }

    pub(crate) fn store(&self) -> &FileStore {
        &self.store
    }

    pub(crate) fn client(&self) -> &FileClient {
        &self.client
    }

    pub(crate) fn is_active(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Stop every loop and release the port. With `announce`, tell the group
    /// first. Safe to call again; later calls wait for the release too.
    pub(crate) async fn stop(&self, announce: bool) {
        if self.is_active() {
            if announce {
                let members = self.ring.members();
                self.disseminator
                    .broadcast(members, MembershipMessage::Leave(self.identity.clone()))
                    .await;
            }
            self.shutdown.cancel();
            info!(identity = %self.identity, announced = announce, "left group");
        }

        self.detector.close();
        let mut bound = self.bound_tasks.lock().await;
        for task in bound.drain(..) {
            if let Err(e) = task.await {
                warn!("background task ended abnormally: {}", e);
            }
        }
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    let session = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = session.serve_connection(stream).await {
                            debug!(%peer, "connection ended with error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("accept failed: {}", e);
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
        debug!("accept loop stopped");
    }

    async fn serve_connection(self: Arc<Self>, mut stream: TcpStream) -> Result<()> {
        let message: Message = read_frame(&mut stream).await?;
        match message {
            Message::Membership(event) => self.on_membership(event, &mut stream).await?,
            Message::File(request) => match request.destination {
                Destination::Coordinator => {
                    let reply = match self.coordinator.get() {
                        Some(coordinator) => coordinator.handle(request).await,
                        None => {
                            debug!(kind = ?request.kind, "not coordinator, refusing request");
                            Some(FileMessage::fail())
                        }
                    };
                    if let Some(reply) = reply {
                        write_frame(&mut stream, &reply).await?;
                    }
                }
                Destination::FileServer => self.store.handle(request, &mut stream).await?,
                Destination::Client => warn!(kind = ?request.kind, "stray client reply"),
            },
        }
        Ok(())
    }

    async fn on_membership(self: &Arc<Self>, event: MembershipMessage, stream: &mut TcpStream) -> Result<()> {
        debug!(kind = event.kind(), subject = %event.subject(), "membership event");
        match event {
            MembershipMessage::Join(member) => {
                let stale: Vec<_> = self
                    .ring
                    .members()
                    .into_iter()
                    .filter(|known| known.same_endpoint(&member) && *known != member)
                    .collect();
                for old in stale {
                    self.remove_member(&old).await;
                }
                if self.ring.add(member.clone()) {
                    info!(member = %member, "member joined");
                }
            }
            MembershipMessage::Leave(member) => {
                if member != self.identity {
                    self.remove_member(&member).await;
                }
            }
            MembershipMessage::Crash(member) => {
                if member == self.identity {
                    warn!("reported as crashed, leaving without announcement");
                    self.stop(false).await;
                } else {
                    self.remove_member(&member).await;
                }
            }
            MembershipMessage::MemberListRequest(requester) => {
                debug!(requester = %requester, "sending membership snapshot");
                write_frame(stream, &self.ring.snapshot()).await?;
            }
            MembershipMessage::ElectionId(candidate) => {
                let action = self.ring.update(|ring| self.election.on_election_id(ring, candidate));
                self.apply(action).await;
            }
            MembershipMessage::Elected(leader) => {
                let action = self.ring.update(|ring| self.election.on_elected(ring, leader));
                self.apply(action).await;
            }
            MembershipMessage::IntroducerCheckAlive(_)
            | MembershipMessage::Ping(_)
            | MembershipMessage::Ack(_) => {}
        }
        Ok(())
    }

    /// Drop `member`. Without a coordinator (it was the coordinator, or an
    /// election was already running) the election starts over.
    async fn remove_member(self: &Arc<Self>, member: &MemberIdentity) {
        let (removed, lost_coordinator, action) = self.ring.update(|ring| {
            let was_coordinator = ring.coordinator() == Some(member);
            if !ring.remove(member) {
                return (false, false, ElectionAction::Ignore);
            }
            (true, was_coordinator, self.election.on_member_removed(ring))
        });
        if !removed {
            return;
        }
        info!(member = %member, "member removed");
        if lost_coordinator {
            warn!(coordinator = %member, "coordinator lost");
        }
        self.apply(action).await;
    }

    async fn start_election(self: &Arc<Self>) {
        let action = self.ring.update(|ring| self.election.initiate(ring));
        self.apply(action).await;
    }

    async fn apply(self: &Arc<Self>, action: ElectionAction) {
        match action {
            ElectionAction::Ignore => {}
            ElectionAction::Forward(token) => self.forward(token).await,
            ElectionAction::Won { announce } => {
                // The role is running before anyone learns of it.
                self.sync_role().await;
                if let Some(token) = announce {
                    self.forward(token).await;
                }
            }
        }
    }

    /// Send an election token to the ring successor.
    async fn forward(&self, token: MembershipMessage) {
        let Some(successor) = self.ring.successor() else {
            self.election.abort();
            return;
        };
        if let Err(e) = self.transport.send(&successor, &Message::Membership(token)).await {
            warn!(to = %successor, "failed to forward election token: {}", e);
            self.election.abort();
        }
    }

    /// Start the coordinator role if we hold it and it is not running yet.
    async fn sync_role(self: &Arc<Self>) {
        if self.ring.coordinator().as_ref() != Some(&self.identity) {
            return;
        }
        let session = Arc::clone(self);
        self.coordinator
            .get_or_init(|| async move {
                let network: Arc<dyn StoreNetwork> = Arc::new(TcpStoreNetwork::new(session.transport));
                let coordinator = Coordinator::start(
                    session.ring.reader(),
                    network,
                    Arc::new(RandomPlacement::new(session.config.replication_factor)),
                    CoordinatorConfig {
                        repair_period: session.config.repair_period,
                    },
                )
                .await;
                tokio::spawn(Arc::clone(&coordinator).run_repair(session.shutdown.clone()));
                coordinator
            })
            .await;
    }

    async fn protocol_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.detector.config().protocol_period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let targets = self.ring.successors(self.detector.config().monitors);
            let suspects = self.detector.probe(targets).await;
            if !self.is_active() {
                break;
            }

            for suspect in suspects {
                if !self.ring.contains(&suspect) {
                    continue;
                }
                warn!(member = %suspect, "no ack, reporting crash");
                metrics::counter!("membership.crashes_detected").increment(1);

                let members = self.ring.members();
                let disseminator = self.disseminator.clone();
                let event = MembershipMessage::Crash(suspect.clone());
                tokio::spawn(async move {
                    disseminator.broadcast(members, event).await;
                });
                self.remove_member(&suspect).await;
            }

            if self.ring.coordinator().is_none() {
                self.start_election().await;
            }
        }
        debug!("protocol loop stopped");
    }
}

/// Build the initial ring: alone, or from a snapshot obtained through the
/// introducer.
async fn discover(
    config: &MemberConfig,
    identity: &MemberIdentity,
    transport: &Transport,
) -> Result<MembershipRing> {
    let group_member = match &config.introducer {
        None => None,
        Some(address) => {
            let request = IntroducerRequest {
                joining: identity.clone(),
            };
            let reply: IntroducerReply = transport
                .request_at(address, &request)
                .await
                .map_err(|source| MembershipError::IntroducerUnreachable {
                    address: address.clone(),
                    source,
                })?;
            reply.group_member
        }
    };

    let Some(member) = group_member else {
        let mut ring = MembershipRing::new(identity.clone());
        ring.set_coordinator(identity);
        info!(identity = %identity, "founding a new group");
        return Ok(ring);
    };

    let request = Message::Membership(MembershipMessage::MemberListRequest(identity.clone()));
    let snapshot: RingSnapshot = transport
        .request(&member, &request)
        .await
        .map_err(|source| MembershipError::JoinFailed {
            member: member.to_string(),
            source,
        })?;
    info!(via = %member, members = snapshot.members.len(), "received membership");
    Ok(MembershipRing::from_snapshot(identity.clone(), snapshot))
}
