//! Serialized blob generators: career snapshots and match configurations.
//!
//! The client consumes two large opaque payloads: the "zipped career info"
//! snapshot shown in the hub, and the compressed match configuration a
//! mission is started with. Both are loosely-structured JSON documents,
//! deflate-compressed and base64-encoded. When generation fails for any
//! reason the engine falls back to [`FALLBACK_HUB_STATE`] so the client UI
//! never stalls on an empty reply.

use crate::career::CareerSlot;
use crate::henchmen::HenchmanTemplate;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde_json::json;
use std::io::Write;
use tracing::warn;

/// Minimal hub state served when snapshot generation fails outright: an
/// unoccupied, non-pending career at chapter 0, zlib-compressed and
/// base64-encoded like every generated snapshot.
pub const FALLBACK_HUB_STATE: &str =
    "eJyrVvJPTi4tyExNUbJKS8wpTtVRCkjNS8nMS3cuSk0syczPg4s7J+YWJGamAwWqlZwzEgtKUos881JSK5SsDGprAaVlGYw=";

/// Builds the zipped career-info snapshot for one slot.
#[derive(Debug, Default)]
pub struct CareerInfoGenerator;

impl CareerInfoGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Serializes a career slot into the compressed snapshot blob. The
    /// `pending_creation_override` lets callers nudge an already-generated
    /// payload to non-pending without touching the stored slot.
    pub fn zipped_career_info(
        &self,
        identity: &str,
        slot_index: usize,
        slot: &CareerSlot,
        pending_creation_override: Option<bool>,
    ) -> String {
        let pending = pending_creation_override.unwrap_or(slot.pending_creation);
        let doc = json!({
            "Identity": identity,
            "SlotIndex": slot_index,
            "Occupied": slot.occupied,
            "Name": slot.name,
            "PendingCreation": pending,
            "Appearance": {
                "SkinId": slot.skin_id,
                "BodytypeId": slot.bodytype_id,
                "Portrait": slot.portrait,
                "VoiceSet": slot.voice_set,
                "BackgroundStoryId": slot.background_story_id,
                "WantsBackgroundChange": slot.wants_background_change,
            },
            "Equipment": {
                "PrimaryWeapon": slot.primary_weapon,
                "SecondaryWeapon": slot.secondary_weapon,
                "Armor": slot.armor,
                "Slots": slot.equipment,
            },
            "Inventory": slot.inventory,
            "Skills": slot.skills,
            "Wallet": { "Karma": slot.wallet.karma, "Nuyen": slot.wallet.nuyen },
            "Campaign": {
                "ChapterIndex": slot.progress.chapter_index,
                "MissionStates": slot.progress.mission_states,
                "InteractedNpcs": slot.progress.interacted_npcs,
            },
        });
        match compress_to_base64(&doc.to_string()) {
            Some(blob) => blob,
            None => {
                warn!("Career info generation failed for {identity}#{slot_index}; serving fallback");
                FALLBACK_HUB_STATE.to_string()
            }
        }
    }
}

/// Builds the compressed match configuration a mission starts with.
#[derive(Debug, Default)]
pub struct MatchConfigGenerator;

impl MatchConfigGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn compressed_match_configuration(
        &self,
        map_name: &str,
        identity: &str,
        slot_index: usize,
        slot: &CareerSlot,
        henchmen: &[HenchmanTemplate],
    ) -> String {
        let doc = json!({
            "Map": map_name,
            "Identity": identity,
            "SlotIndex": slot_index,
            "Character": {
                "Name": slot.name,
                "BodytypeId": slot.bodytype_id,
                "PrimaryWeapon": slot.primary_weapon,
                "SecondaryWeapon": slot.secondary_weapon,
                "Armor": slot.armor,
                "Skills": slot.skills,
            },
            "Henchmen": henchmen
                .iter()
                .map(|h| json!({
                    "Id": h.id,
                    "TechnicalName": h.technical_name,
                    "BodytypeId": h.bodytype_id,
                    "Level": h.level,
                }))
                .collect::<Vec<_>>(),
        });
        match compress_to_base64(&doc.to_string()) {
            Some(blob) => blob,
            None => {
                warn!("Match configuration generation failed for map {map_name}");
                String::new()
            }
        }
    }
}

fn compress_to_base64(text: &str) -> Option<String> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes()).ok()?;
    let compressed = encoder.finish().ok()?;
    Some(BASE64.encode(compressed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::ZlibDecoder;
    use std::io::Read;

    fn decompress(blob: &str) -> String {
        let bytes = BASE64.decode(blob).expect("base64");
        let mut decoder = ZlibDecoder::new(bytes.as_slice());
        let mut out = String::new();
        decoder.read_to_string(&mut out).expect("zlib");
        out
    }

    #[test]
    fn career_info_round_trips_through_compression() {
        let mut slot = CareerSlot::default();
        slot.occupied = true;
        slot.name = "Shade".to_string();
        slot.pending_creation = true;

        let blob = CareerInfoGenerator::new().zipped_career_info("acct", 1, &slot, None);
        let doc: serde_json::Value = serde_json::from_str(&decompress(&blob)).expect("json");
        assert_eq!(doc["Name"], "Shade");
        assert_eq!(doc["PendingCreation"], true);
        assert_eq!(doc["SlotIndex"], 1);
    }

    #[test]
    fn pending_creation_override_wins() {
        let mut slot = CareerSlot::default();
        slot.pending_creation = true;
        let blob = CareerInfoGenerator::new().zipped_career_info("acct", 0, &slot, Some(false));
        let doc: serde_json::Value = serde_json::from_str(&decompress(&blob)).expect("json");
        assert_eq!(doc["PendingCreation"], false);
    }

    #[test]
    fn match_configuration_carries_henchmen() {
        let slot = CareerSlot::default();
        let henchmen = vec![HenchmanTemplate {
            id: 9,
            technical_name: "hm_decker".to_string(),
            ..HenchmanTemplate::default()
        }];
        let blob = MatchConfigGenerator::new()
            .compressed_match_configuration("m01", "acct", 0, &slot, &henchmen);
        let doc: serde_json::Value = serde_json::from_str(&decompress(&blob)).expect("json");
        assert_eq!(doc["Map"], "m01");
        assert_eq!(doc["Henchmen"][0]["Id"], 9);
    }

    #[test]
    fn fallback_hub_state_is_valid_zlib_base64() {
        let doc: serde_json::Value =
            serde_json::from_str(&decompress(FALLBACK_HUB_STATE)).expect("json");
        assert_eq!(doc["Occupied"], false);
        assert_eq!(doc["PendingCreation"], false);
    }
}
