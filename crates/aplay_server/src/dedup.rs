//! Dedup/ordering cache: push suppression windows and the outbound
//! message-number watermark.
//!
//! The client UI stalls when it perceives a server push as stale or
//! duplicated. Two mechanisms keep it moving:
//!
//! * identical hub-state/creation-info pushes to the same peer are
//!   suppressed inside a per-kind time window, and
//! * every outbound message number is drawn from a process-wide watermark
//!   that never moves backwards, even when the client resends a repeated
//!   request with a stale (lower) sequence number.

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Suppression window for repeated hub-state pushes.
const HUB_STATE_WINDOW: Duration = Duration::from_millis(1500);

/// Suppression window for repeated creation-info pushes.
const CREATION_INFO_WINDOW: Duration = Duration::from_millis(10_000);

/// Kinds of idempotent pushes tracked per peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PushKind {
    HubState,
    CreationInfo,
}

#[derive(Debug, Clone, Copy)]
struct SendRecord {
    hash: u64,
    sent_at: Instant,
}

/// Per-peer content-hash suppression windows.
#[derive(Debug)]
pub struct PushDedupCache {
    records: DashMap<(SocketAddr, PushKind), SendRecord>,
    hub_state_window: Duration,
    creation_info_window: Duration,
}

impl Default for PushDedupCache {
    fn default() -> Self {
        Self {
            records: DashMap::new(),
            hub_state_window: HUB_STATE_WINDOW,
            creation_info_window: CREATION_INFO_WINDOW,
        }
    }
}

impl PushDedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn with_windows(hub_state_window: Duration, creation_info_window: Duration) -> Self {
        Self {
            records: DashMap::new(),
            hub_state_window,
            creation_info_window,
        }
    }

    fn window(&self, kind: PushKind) -> Duration {
        match kind {
            PushKind::HubState => self.hub_state_window,
            PushKind::CreationInfo => self.creation_info_window,
        }
    }

    /// Returns true when an identical payload was sent to `peer` within the
    /// kind's window. State is only updated on the send path (a suppressed
    /// push does not extend the window). Zero-length payloads never
    /// suppress.
    pub fn should_suppress(&self, peer: SocketAddr, kind: PushKind, payload: &[u8]) -> bool {
        if payload.is_empty() {
            return false;
        }
        let hash = fnv1a64(payload);
        let now = Instant::now();
        let key = (peer, kind);

        if let Some(record) = self.records.get(&key) {
            if record.hash == hash && now.duration_since(record.sent_at) <= self.window(kind) {
                return true;
            }
        }
        self.records.insert(key, SendRecord { hash, sent_at: now });
        false
    }

    /// Drops all records for a peer; called on disconnect.
    pub fn forget_peer(&self, peer: SocketAddr) {
        self.records.retain(|(addr, _), _| *addr != peer);
    }
}

/// 64-bit FNV-1a over a byte slice.
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Process-wide monotonically increasing outbound message-number source.
///
/// `next` hands out the first number of a block; after using a contiguous
/// run the caller commits the last number actually used. The commit loop
/// never decreases the watermark under concurrent callers.
#[derive(Debug, Default)]
pub struct MsgNoSequencer {
    watermark: AtomicU64,
}

impl MsgNoSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn with_watermark(value: u64) -> Self {
        Self { watermark: AtomicU64::new(value) }
    }

    /// First usable outbound number: strictly above both the watermark and
    /// the client's own last-seen number.
    pub fn next(&self, client_msg_no: u64) -> u64 {
        let watermark = self.watermark.load(Ordering::Acquire);
        watermark.saturating_add(1).max(client_msg_no.saturating_add(1))
    }

    /// Advances the watermark to `last_used` unless it already moved past
    /// it. Compare-and-retry so racing committers cannot regress it.
    pub fn commit(&self, last_used: u64) {
        let mut current = self.watermark.load(Ordering::Acquire);
        while current < last_used {
            match self.watermark.compare_exchange_weak(
                current,
                last_used,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn watermark(&self) -> u64 {
        self.watermark.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn peer(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().expect("addr")
    }

    #[test]
    fn identical_payload_within_window_is_suppressed() {
        let cache = PushDedupCache::new();
        let payload = b"hub state blob";
        assert!(!cache.should_suppress(peer(1000), PushKind::HubState, payload));
        assert!(cache.should_suppress(peer(1000), PushKind::HubState, payload));
    }

    #[test]
    fn changed_payload_always_sends() {
        let cache = PushDedupCache::new();
        assert!(!cache.should_suppress(peer(1001), PushKind::HubState, b"aaaa"));
        assert!(!cache.should_suppress(peer(1001), PushKind::HubState, b"aaab"));
    }

    #[test]
    fn kinds_and_peers_are_independent() {
        let cache = PushDedupCache::new();
        let payload = b"same bytes";
        assert!(!cache.should_suppress(peer(1002), PushKind::HubState, payload));
        assert!(!cache.should_suppress(peer(1002), PushKind::CreationInfo, payload));
        assert!(!cache.should_suppress(peer(1003), PushKind::HubState, payload));
    }

    #[test]
    fn empty_payload_never_suppresses() {
        let cache = PushDedupCache::new();
        assert!(!cache.should_suppress(peer(1004), PushKind::HubState, b""));
        assert!(!cache.should_suppress(peer(1004), PushKind::HubState, b""));
    }

    #[test]
    fn suppression_lapses_once_the_window_elapses() {
        let cache = PushDedupCache::with_windows(
            Duration::from_millis(20),
            Duration::from_millis(20),
        );
        let payload = b"hub state blob";
        assert!(!cache.should_suppress(peer(1006), PushKind::HubState, payload));
        assert!(cache.should_suppress(peer(1006), PushKind::HubState, payload));

        std::thread::sleep(Duration::from_millis(30));
        assert!(!cache.should_suppress(peer(1006), PushKind::HubState, payload));
        // The resend opened a fresh window.
        assert!(cache.should_suppress(peer(1006), PushKind::HubState, payload));
    }

    #[test]
    fn forget_peer_resets_the_window() {
        let cache = PushDedupCache::new();
        let payload = b"blob";
        assert!(!cache.should_suppress(peer(1005), PushKind::HubState, payload));
        cache.forget_peer(peer(1005));
        assert!(!cache.should_suppress(peer(1005), PushKind::HubState, payload));
    }

    #[test]
    fn sequencer_tracks_max_of_watermark_and_client() {
        let seq = MsgNoSequencer::with_watermark(100);
        assert_eq!(seq.next(50), 101);
        assert_eq!(seq.next(150), 151);
    }

    #[test]
    fn commit_advances_but_never_regresses() {
        let seq = MsgNoSequencer::with_watermark(100);
        let first = seq.next(150);
        assert_eq!(first, 151);
        seq.commit(155);
        assert_eq!(seq.watermark(), 155);
        seq.commit(120);
        assert_eq!(seq.watermark(), 155);
        assert_eq!(seq.next(0), 156);
    }

    #[test]
    fn concurrent_commits_keep_the_maximum() {
        let seq = Arc::new(MsgNoSequencer::with_watermark(100));
        let mut handles = Vec::new();
        for last in [155u64, 130, 152, 110] {
            let seq = Arc::clone(&seq);
            handles.push(std::thread::spawn(move || seq.commit(last)));
        }
        for handle in handles {
            handle.join().expect("join");
        }
        assert_eq!(seq.watermark(), 155);
    }

    #[test]
    fn fnv_matches_reference_vectors() {
        assert_eq!(fnv1a64(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a64(b"a"), 0xaf63_dc4c_8601_ec8c);
    }
}
