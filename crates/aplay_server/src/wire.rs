//! Wire-level constants and outbound frame builders.
//!
//! Every remote-callable member is addressed by an (entity id, field id)
//! pair on a conceptual shared entity. Entities are introduced to the peer
//! with an introduce + set-owner handshake pair before first use. This
//! module is the single authoritative table of those ids; the dispatcher
//! and the builders both read from here.

use crate::codec::envelope::{encode_core_envelope, encode_shared_field_event};
use crate::codec::frame::encode_frame;

/// Fixed prefix of the client's first (pre-envelope) hello payload.
pub const HELLO_PREFIX: &[u8] = b"aplay/1";

/// Message kinds carried in a Shared Field Event.
pub mod kind {
    /// Client-initiated call on a shared entity member.
    pub const CALL: u8 = 1;
    /// Server push / event, also used for call echoes.
    pub const EVENT: u8 = 2;
    /// Introduces a shared entity to the peer.
    pub const INTRODUCE: u8 = 3;
    /// Assigns ownership of an introduced entity to the peer.
    pub const SET_OWNER: u8 = 4;
}

/// Shared entity ids.
pub mod entity {
    pub const ACCOUNT_CONNECTION: u64 = 1;
    pub const ACCOUNT: u64 = 2;
    pub const METAGAMEPLAY: u64 = 3;
    pub const GAMEWORLD: u64 = 4;
    pub const MISSION_INSTANCE: u64 = 5;
    pub const MISSION_COMMAND: u64 = 6;
}

/// Fields of the account-connection entity.
pub mod account_connection {
    /// Client login call; payload\[0\] is the session token.
    pub const REGULAR_CONNECT: u16 = 1;
    pub const REJECT_LOGIN: u16 = 2;
    pub const KEEP_ALIVE: u16 = 3;
    /// Welcome event carrying the serialized career-summary list.
    pub const WELCOME: u16 = 4;
    pub const INITIALIZED: u16 = 5;
    pub const INTRODUCE_GAME_CLIENT: u16 = 6;
}

/// Fields of the account entity.
pub mod account {
    pub const ACCOUNT_WELCOME: u16 = 1;
    pub const UPDATE_CAREER_SUMMARIES: u16 = 2;
    /// Career bootstrap: enter an existing career slot.
    pub const ENTER_CAREER: u16 = 3;
    /// Career bootstrap: create a career in a slot.
    pub const CREATE_CAREER: u16 = 4;
    pub const LEAVE_CURRENT_CAREER: u16 = 5;
    pub const DEACTIVATE_CAREER: u16 = 6;
    pub const CAREER_DEACTIVATED: u16 = 7;
}

/// Fields of the metagameplay entity.
pub mod metagame {
    // Client pulls and calls.
    pub const GET_METAGAMEPLAY_DATA_SNAPSHOT: u16 = 1;
    pub const GET_HENCHMAN_COLLECTION: u16 = 2;
    pub const REQUEST_STORY_HUB_FOR: u16 = 3;
    pub const CHANGE_CHARACTER: u16 = 4;
    pub const CHANGE_SKILL_TREES: u16 = 5;
    pub const CHANGE_ITEM_POSSESSIONS: u16 = 6;
    /// Wrapped-message transport: a JSON document with a `__type` hint.
    pub const WRAPPED_MESSAGE: u16 = 7;

    // Server pushes.
    pub const METAGAMEPLAY_SNAPSHOT: u16 = 10;
    pub const HENCHMAN_COLLECTION: u16 = 11;
    pub const HUB_STATE: u16 = 12;
    pub const CREATION_INFO: u16 = 13;
    pub const SKILL_TREE_CHANGED: u16 = 14;
    pub const INVENTORY_CHANGED: u16 = 15;
    pub const WALLET_CHANGED: u16 = 16;
    pub const STORYPROGRESS_CHANGED: u16 = 17;
    pub const CHAPTER_CHANGE: u16 = 18;
    pub const MISSION_AVAILABLE: u16 = 19;
    pub const START_MISSION_ACCEPTED: u16 = 20;
    pub const START_MISSION_CANCELLED: u16 = 21;
    pub const START_MISSION_FOR_CLIENTS: u16 = 22;
    pub const GOT_MISSION_REWARD: u16 = 23;
}

/// Fields of the gameworld entity (server -> client relay).
pub mod gameworld {
    pub const STOP: u16 = 0;
    pub const LEAVE_MISSION: u16 = 1;
    pub const FOLLOW_PATH: u16 = 2;
    pub const ACTIVATE_ACTIVE_SKILL: u16 = 3;
    pub const LOOT_PREVIEW: u16 = 4;
}

/// Fields of the mission-command entity (client -> server commands).
pub mod mission_command {
    pub const MISSION_READY: u16 = 0;
    pub const LEAVE_MISSION: u16 = 1;
    pub const FOLLOW_PATH: u16 = 2;
    pub const ACTIVATE_ACTIVE_SKILL: u16 = 3;
}

/// Wrapped-message type hints.
pub mod wrapped {
    pub const TYPE_KEY: &str = "__type";
    pub const REQUEST_CURRENT_STORYLINE_HUB: &str = "RequestCurrentStorylineHubMessage";
    pub const SET_STORY_MISSION_STATE: &str = "SetStoryMissionStateMessage";
    pub const INTERACTED_WITH_NPC: &str = "InteractedWithNpcMessage";
    pub const START_SINGLEPLAYER_MISSION: &str = "StartSingleplayerMissionMessage";
}

/// Builds a complete wire frame for one Shared Field Event.
pub fn build_frame(
    server_id: u32,
    msg_kind: u8,
    entity_id: u64,
    field_id: u16,
    data: &[u8],
    msg_no: u64,
) -> Vec<u8> {
    let raw = encode_shared_field_event(msg_kind, entity_id, field_id, data);
    let envelope = encode_core_envelope(server_id, &raw, msg_no);
    encode_frame(&envelope)
}

/// Builds an event frame (the common outbound case).
pub fn build_event_frame(
    server_id: u32,
    entity_id: u64,
    field_id: u16,
    data: &[u8],
    msg_no: u64,
) -> Vec<u8> {
    build_frame(server_id, kind::EVENT, entity_id, field_id, data, msg_no)
}

/// Packs a run of i32 values little-endian, the layout used by movement
/// and skill payloads.
pub fn pack_i32s(values: &[i32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 4);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Packs a seed package as four little-endian u32 values.
pub fn pack_seeds(seeds: simulation::SeedPackage) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    for part in seeds.0 {
        out.extend_from_slice(&part.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::envelope::{decode_core_envelope, decode_shared_field_event};
    use crate::codec::frame::FrameBuffer;

    #[test]
    fn built_frames_decode_back() {
        let frame = build_event_frame(9, entity::METAGAMEPLAY, metagame::HUB_STATE, b"blob", 321);
        let mut buffer = FrameBuffer::new();
        buffer.extend(&frame);
        let payload = buffer.extract_frame().expect("frame");
        let envelope = decode_core_envelope(&payload).expect("envelope");
        assert_eq!(envelope.server_id, 9);
        assert_eq!(envelope.msg_no, 321);
        let event = decode_shared_field_event(&envelope.raw).expect("event");
        assert_eq!(event.kind, kind::EVENT);
        assert_eq!(event.entity_id, entity::METAGAMEPLAY);
        assert_eq!(event.field_id, metagame::HUB_STATE);
        assert_eq!(event.data, b"blob");
    }

    #[test]
    fn i32_and_seed_packing_is_little_endian() {
        assert_eq!(pack_i32s(&[1, -1]), vec![1, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF]);
        let packed = pack_seeds(simulation::SeedPackage([1, 2, 3, 4]));
        assert_eq!(packed.len(), 16);
        assert_eq!(&packed[0..4], &[1, 0, 0, 0]);
    }
}
