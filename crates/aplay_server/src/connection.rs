//! Per-connection state and the shared outbound handle.
//!
//! Each accepted socket gets one worker task that owns a [`ConnState`] and a
//! shared [`ConnHandle`]. The handle is the only path to the write half; the
//! keepalive loop, the creation-info resend loop and the delayed
//! announcement tasks all clone it and send through the same mutex, so
//! frames from concurrent tasks never interleave mid-frame.

use crate::codec::frame::FrameBuffer;
use crate::dedup::{MsgNoSequencer, PushDedupCache, PushKind};
use crate::error::ServerError;
use crate::wire;
use metagame::HenchmanTemplate;
use simulation::SimulationSession;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{watch, Mutex};
use tracing::trace;

/// One-way handshake flags for a connection.
///
/// Each latch flips exactly once per career session; together they encode
/// how far the client has come through the bootstrap sequence.
#[derive(Debug, Default, Clone)]
pub struct Latches {
    /// Hello prefix seen; pre-envelope phase is over.
    pub hello_seen: bool,
    /// RegularConnect accepted; the peer has an identity.
    pub logged_in: bool,
    /// Metagameplay entity introduced to the peer.
    pub metagameplay_introduced: bool,
    /// EnterCareer/CreateCareer bootstrap completed.
    pub career_entered: bool,
    /// Client pulled the hub at least once; creation-info resends stop.
    pub hub_pulled: bool,
    /// Gameworld/mission entities introduced for the current mission.
    pub mission_entities_introduced: bool,
}

impl Latches {
    /// Resets everything scoped to the active career so a re-entry replays
    /// the full career bootstrap. Login-level latches survive.
    pub fn reset_career(&mut self) {
        self.career_entered = false;
        self.hub_pulled = false;
        self.mission_entities_introduced = false;
    }
}

/// Mutable state owned by a connection's worker task.
#[derive(Debug, Default)]
pub struct ConnState {
    /// Reassembly buffer for the inbound byte stream.
    pub frames: FrameBuffer,
    pub latches: Latches,
    /// Resolved identity after a successful RegularConnect.
    pub identity: Option<String>,
    /// Active career slot while a career is entered.
    pub slot_index: usize,
    /// Last hub-state blob pushed to this peer; re-pushed after changes.
    pub cached_hub_state: Vec<u8>,
    /// Last creation-info blob; resent by the background loop until the
    /// client pulls the hub.
    pub cached_creation_info: Vec<u8>,
    /// Henchman roster as last sent; mission start resolves indices
    /// against this exact list.
    pub last_henchman_roster: Vec<HenchmanTemplate>,
    /// Maps already completed during this connection's lifetime; a repeated
    /// start for one of these is cancelled, never accepted.
    pub completed_missions: std::collections::HashSet<String>,
    /// Map of the running or pending mission.
    pub current_map: String,
    /// The running simulation, if any.
    pub session: Option<Arc<SimulationSession>>,
}

impl ConnState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops and drops any running simulation session.
    pub fn teardown_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.stop();
        }
        self.current_map.clear();
    }
}

/// Shared, cloneable send side of a connection.
pub struct ConnHandle {
    peer: SocketAddr,
    server_id: u32,
    writer: Mutex<OwnedWriteHalf>,
    sequencer: Arc<MsgNoSequencer>,
    dedup: Arc<PushDedupCache>,
    /// Highest message number the client has sent us; outbound numbers stay
    /// strictly above it.
    last_client_msg_no: AtomicU64,
    /// Mirrors `Latches::hub_pulled` for the resend task, which has no
    /// access to the worker-owned state.
    hub_pulled: AtomicBool,
    /// Any mission-related traffic arrived; read by the post-creation
    /// campaign watchdog.
    mission_traffic_seen: AtomicBool,
    closed_tx: watch::Sender<bool>,
}

impl ConnHandle {
    pub fn new(
        peer: SocketAddr,
        server_id: u32,
        writer: OwnedWriteHalf,
        sequencer: Arc<MsgNoSequencer>,
        dedup: Arc<PushDedupCache>,
    ) -> Arc<Self> {
        let (closed_tx, _) = watch::channel(false);
        Arc::new(Self {
            peer,
            server_id,
            writer: Mutex::new(writer),
            sequencer,
            dedup,
            last_client_msg_no: AtomicU64::new(0),
            hub_pulled: AtomicBool::new(false),
            mission_traffic_seen: AtomicBool::new(false),
            closed_tx,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Records an inbound message number; keeps the maximum seen.
    pub fn observe_client_msg_no(&self, msg_no: u64) {
        let mut current = self.last_client_msg_no.load(Ordering::Acquire);
        while current < msg_no {
            match self.last_client_msg_no.compare_exchange_weak(
                current,
                msg_no,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn last_client_msg_no(&self) -> u64 {
        self.last_client_msg_no.load(Ordering::Acquire)
    }

    pub fn mark_hub_pulled(&self) {
        self.hub_pulled.store(true, Ordering::Release);
    }

    pub fn hub_pulled(&self) -> bool {
        self.hub_pulled.load(Ordering::Acquire)
    }

    /// Re-arms the hub-pull flag when a career is left, so the next career
    /// bootstrap gets its own creation-info resend cycle.
    pub fn reset_hub_pulled(&self) {
        self.hub_pulled.store(false, Ordering::Release);
    }

    pub fn mark_mission_traffic(&self) {
        self.mission_traffic_seen.store(true, Ordering::Release);
    }

    pub fn mission_traffic_seen(&self) -> bool {
        self.mission_traffic_seen.load(Ordering::Acquire)
    }

    /// Marks the connection closed; background tasks observe this and exit.
    pub fn mark_closed(&self) {
        let _ = self.closed_tx.send(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    /// A receiver that resolves when the connection closes.
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    /// Writes one already-framed message to the socket.
    pub async fn send_raw(&self, frame: &[u8]) -> Result<(), ServerError> {
        if self.is_closed() {
            return Err(ServerError::Network(format!(
                "connection to {} is closed",
                self.peer
            )));
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Sends a single message of the given kind; returns the message number
    /// used.
    pub async fn send_kind(
        &self,
        msg_kind: u8,
        entity_id: u64,
        field_id: u16,
        data: &[u8],
    ) -> Result<u64, ServerError> {
        let msg_no = self.sequencer.next(self.last_client_msg_no());
        let frame = wire::build_frame(self.server_id, msg_kind, entity_id, field_id, data, msg_no);
        self.send_raw(&frame).await?;
        self.sequencer.commit(msg_no);
        trace!(
            "-> {} kind={} entity={} field={} msg_no={} ({} data bytes)",
            self.peer,
            msg_kind,
            entity_id,
            field_id,
            msg_no,
            data.len()
        );
        Ok(msg_no)
    }

    /// Sends a server event (the common outbound case).
    pub async fn send_event(
        &self,
        entity_id: u64,
        field_id: u16,
        data: &[u8],
    ) -> Result<u64, ServerError> {
        self.send_kind(wire::kind::EVENT, entity_id, field_id, data).await
    }

    /// Sends a block of events under one contiguous run of message numbers,
    /// so the client's ordering check sees them as a single burst.
    pub async fn send_event_block(
        &self,
        items: &[(u64, u16, Vec<u8>)],
    ) -> Result<(), ServerError> {
        if items.is_empty() {
            return Ok(());
        }
        let first = self.sequencer.next(self.last_client_msg_no());
        for (offset, (entity_id, field_id, data)) in items.iter().enumerate() {
            let msg_no = first + offset as u64;
            let frame =
                wire::build_event_frame(self.server_id, *entity_id, *field_id, data, msg_no);
            self.send_raw(&frame).await?;
        }
        self.sequencer.commit(first + items.len() as u64 - 1);
        Ok(())
    }

    /// Sends an idempotent push unless an identical one went out inside its
    /// suppression window. Returns whether the push was actually sent.
    pub async fn send_deduped(
        &self,
        push_kind: PushKind,
        entity_id: u64,
        field_id: u16,
        data: &[u8],
    ) -> Result<bool, ServerError> {
        if self.dedup.should_suppress(self.peer, push_kind, data) {
            trace!("-> {} suppressed duplicate {:?} push", self.peer, push_kind);
            return Ok(false);
        }
        self.send_event(entity_id, field_id, data).await?;
        Ok(true)
    }

    /// Introduce-then-own handshake for a shared entity.
    pub async fn introduce_entity(&self, entity_id: u64) -> Result<(), ServerError> {
        self.send_kind(wire::kind::INTRODUCE, entity_id, 0, &[]).await?;
        self.send_kind(wire::kind::SET_OWNER, entity_id, 0, &[]).await?;
        Ok(())
    }

    /// Disconnect cleanup: closes the handle and drops dedup records.
    pub fn release(&self) {
        self.mark_closed();
        self.dedup.forget_peer(self.peer);
    }
}

impl std::fmt::Debug for ConnHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnHandle")
            .field("peer", &self.peer)
            .field("server_id", &self.server_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::envelope::{decode_core_envelope, decode_shared_field_event};
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    async fn handle_pair() -> (Arc<ConnHandle>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let client = TcpStream::connect(addr).await.expect("connect");
        let (server_side, peer) = listener.accept().await.expect("accept");
        let (_read, write) = server_side.into_split();
        let handle = ConnHandle::new(
            peer,
            7,
            write,
            Arc::new(MsgNoSequencer::new()),
            Arc::new(PushDedupCache::new()),
        );
        (handle, client)
    }

    async fn read_frames(client: &mut TcpStream, count: usize) -> Vec<Vec<u8>> {
        let mut buffer = FrameBuffer::new();
        let mut frames = Vec::new();
        let mut chunk = [0u8; 1024];
        while frames.len() < count {
            let n = client.read(&mut chunk).await.expect("read");
            assert!(n > 0, "peer closed early");
            buffer.extend(&chunk[..n]);
            while let Some(frame) = buffer.extract_frame() {
                frames.push(frame);
            }
        }
        frames
    }

    #[tokio::test]
    async fn events_carry_increasing_msg_nos_above_client() {
        let (handle, mut client) = handle_pair().await;
        handle.observe_client_msg_no(41);
        handle.send_event(3, 12, b"one").await.expect("send");
        handle.send_event(3, 12, b"two").await.expect("send");
        let frames = read_frames(&mut client, 2).await;
        let first = decode_core_envelope(&frames[0]).expect("envelope");
        let second = decode_core_envelope(&frames[1]).expect("envelope");
        assert_eq!(first.msg_no, 42);
        assert_eq!(second.msg_no, 43);
        assert_eq!(first.server_id, 7);
    }

    #[tokio::test]
    async fn event_block_is_contiguous() {
        let (handle, mut client) = handle_pair().await;
        let items: Vec<(u64, u16, Vec<u8>)> =
            (0..4).map(|i| (4u64, 2u16, vec![i as u8])).collect();
        handle.send_event_block(&items).await.expect("block");
        let frames = read_frames(&mut client, 4).await;
        let numbers: Vec<u64> = frames
            .iter()
            .map(|f| decode_core_envelope(f).expect("envelope").msg_no)
            .collect();
        for pair in numbers.windows(2) {
            assert_eq!(pair[1], pair[0] + 1);
        }
    }

    #[tokio::test]
    async fn deduped_push_sends_once_per_window() {
        let (handle, mut client) = handle_pair().await;
        assert!(handle.send_deduped(PushKind::HubState, 3, 12, b"blob").await.expect("send"));
        assert!(!handle.send_deduped(PushKind::HubState, 3, 12, b"blob").await.expect("send"));
        assert!(handle.send_deduped(PushKind::HubState, 3, 12, b"other").await.expect("send"));
        let frames = read_frames(&mut client, 2).await;
        assert_eq!(frames.len(), 2);
    }

    #[tokio::test]
    async fn introduce_sends_introduce_then_set_owner() {
        let (handle, mut client) = handle_pair().await;
        handle.introduce_entity(wire::entity::ACCOUNT).await.expect("introduce");
        let frames = read_frames(&mut client, 2).await;
        let kinds: Vec<u8> = frames
            .iter()
            .map(|f| {
                let envelope = decode_core_envelope(f).expect("envelope");
                decode_shared_field_event(&envelope.raw).expect("event").kind
            })
            .collect();
        assert_eq!(kinds, vec![wire::kind::INTRODUCE, wire::kind::SET_OWNER]);
    }

    #[tokio::test]
    async fn closed_handle_refuses_sends() {
        let (handle, _client) = handle_pair().await;
        handle.release();
        assert!(handle.is_closed());
        assert!(handle.send_event(1, 1, b"x").await.is_err());
    }
}
