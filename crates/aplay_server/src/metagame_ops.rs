//! Metagame interaction: pulls, character/skill/inventory changes and the
//! wrapped-message commands (story progress, NPC interaction, mission start).
//!
//! Every handler here follows the same contract: a malformed payload is
//! logged and dropped, an applied change is persisted immediately, and the
//! client's pending call is always resolved with some reply, a compensating
//! one when the request cannot be honored.

use crate::codec::envelope::SharedFieldEvent;
use crate::codec::strings::{decode_utf16_string_list, encode_utf16_string_list, extract_utf16_json};
use crate::connection::{ConnHandle, ConnState};
use crate::dedup::PushKind;
use crate::error::ServerError;
use crate::jsonscan::{extract_array, extract_i64, extract_scalar, objects_in_array};
use crate::server::core::Engine;
use crate::{career, wire};
use metagame::{CampaignProgress, CareerSlot, HenchmanTemplate, MissionState, FALLBACK_HUB_STATE};
use serde_json::json;
use simulation::{SeedPackage, SimulationSession};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// The two reward sections a mission can draw from.
const REWARD_SECTIONS: [&str; 2] = ["Rewards", "StoryRewards"];

/// Routes one metagameplay-entity event.
pub async fn dispatch(
    engine: &Arc<Engine>,
    handle: &Arc<ConnHandle>,
    state: &mut ConnState,
    event: &SharedFieldEvent,
) -> Result<(), ServerError> {
    match event.field_id {
        wire::metagame::GET_METAGAMEPLAY_DATA_SNAPSHOT => {
            send_snapshot(engine, handle, state).await
        }
        wire::metagame::GET_HENCHMAN_COLLECTION => {
            send_henchman_collection(engine, handle, state).await
        }
        wire::metagame::REQUEST_STORY_HUB_FOR => answer_hub_pull(engine, handle, state).await,
        wire::metagame::CHANGE_CHARACTER => {
            handle_change_character(engine, handle, state, event).await
        }
        wire::metagame::CHANGE_SKILL_TREES => {
            handle_change_skill_trees(engine, handle, state, event).await
        }
        wire::metagame::CHANGE_ITEM_POSSESSIONS => {
            handle_change_item_possessions(engine, handle, state, event).await
        }
        wire::metagame::WRAPPED_MESSAGE => handle_wrapped(engine, handle, state, event).await,
        field_id => {
            debug!("Unhandled metagame field {} from {}", field_id, handle.peer());
            Ok(())
        }
    }
}

/// Pulls the JSON document out of an event payload: first from the UTF-16
/// string list, then via the raw UTF-16 scan fallback.
fn event_json(data: &[u8]) -> Option<String> {
    for entry in decode_utf16_string_list(data) {
        if let (Some(start), Some(end)) = (entry.find('{'), entry.rfind('}')) {
            if end > start {
                return Some(entry[start..=end].to_string());
            }
        }
    }
    extract_utf16_json(data)
}

/// Regenerates and sends the metagameplay snapshot for the active slot.
async fn send_snapshot(
    engine: &Arc<Engine>,
    handle: &Arc<ConnHandle>,
    state: &mut ConnState,
) -> Result<(), ServerError> {
    let payload = match career::active_slot(engine, state) {
        Some((identity, slot)) => {
            career::hub_state_payload(engine, &identity, state.slot_index, &slot)
        }
        None => encode_utf16_string_list(&[FALLBACK_HUB_STATE]),
    };
    handle
        .send_event(wire::entity::METAGAMEPLAY, wire::metagame::METAGAMEPLAY_SNAPSHOT, &payload)
        .await?;
    Ok(())
}

/// Sends the henchman roster and records it as the reference list later
/// mission starts resolve their selections against.
async fn send_henchman_collection(
    engine: &Arc<Engine>,
    handle: &Arc<ConnHandle>,
    state: &mut ConnState,
) -> Result<(), ServerError> {
    let roster = engine.services.henchmen.roster();
    let payload = career::henchman_collection_json(&roster);
    state.last_henchman_roster = roster;
    handle
        .send_event(
            wire::entity::METAGAMEPLAY,
            wire::metagame::HENCHMAN_COLLECTION,
            &encode_utf16_string_list(&[payload.as_str()]),
        )
        .await?;
    Ok(())
}

/// Answers a hub pull from the cached payloads, regenerating them when the
/// cache is cold. Marks the hub as pulled, which cancels creation-info
/// resends.
async fn answer_hub_pull(
    engine: &Arc<Engine>,
    handle: &Arc<ConnHandle>,
    state: &mut ConnState,
) -> Result<(), ServerError> {
    handle.mark_hub_pulled();
    state.latches.hub_pulled = true;
    if state.cached_hub_state.is_empty() {
        state.cached_hub_state = match career::active_slot(engine, state) {
            Some((identity, slot)) => {
                career::hub_state_payload(engine, &identity, state.slot_index, &slot)
            }
            None => encode_utf16_string_list(&[FALLBACK_HUB_STATE]),
        };
    }
    handle
        .send_deduped(
            PushKind::HubState,
            wire::entity::METAGAMEPLAY,
            wire::metagame::HUB_STATE,
            &state.cached_hub_state,
        )
        .await?;
    if !state.cached_creation_info.is_empty() {
        handle
            .send_deduped(
                PushKind::CreationInfo,
                wire::entity::METAGAMEPLAY,
                wire::metagame::CREATION_INFO,
                &state.cached_creation_info,
            )
            .await?;
    }
    Ok(())
}

/// Applies at most one character change from the structured change set.
/// Returns a short label for logging, or `None` when nothing was applied.
fn apply_character_change(engine: &Arc<Engine>, slot: &mut CareerSlot, json: &str) -> Option<&'static str> {
    if extract_scalar(json, "FinishCreation").as_deref() == Some("true") {
        slot.pending_creation = false;
        return Some("creation commit");
    }
    if let Some(name) = extract_scalar(json, "Name") {
        if !name.trim().is_empty() {
            slot.name = name.trim().to_string();
            return Some("name");
        }
    }
    if let Some(skin) = extract_i64(json, "SkinId") {
        slot.skin_id = skin.max(0) as u64;
        return Some("skin");
    }
    if let (Some(metatype), Some(gender)) =
        (extract_i64(json, "MetatypeId"), extract_i64(json, "GenderId"))
    {
        match engine.services.statics.bodytype_id(metatype.max(0) as u64, gender.max(0) as u64) {
            Some(bodytype) => {
                slot.bodytype_id = bodytype;
                return Some("bodytype");
            }
            None => {
                debug!("No bodytype for metatype {} gender {}", metatype, gender);
                return None;
            }
        }
    }
    if let Some(portrait) = extract_scalar(json, "Portrait") {
        if !slot.portrait.is_empty() && !slot.pending_creation {
            // Portrait changes are locked in once creation is committed.
            debug!("Portrait change rejected for {}", slot.name);
            return None;
        }
        slot.portrait = portrait;
        return Some("portrait");
    }
    if let Some(voice) = extract_scalar(json, "VoiceSet") {
        slot.voice_set = voice;
        return Some("voice set");
    }
    if let Some(story) = extract_i64(json, "BackgroundStoryId") {
        slot.background_story_id = story.max(0) as u64;
        return Some("background story");
    }
    if let Some(wants) = extract_scalar(json, "WantsBackgroundChange") {
        slot.wants_background_change = wants == "true";
        return Some("background change flag");
    }
    if let Some(weapon) = extract_scalar(json, "PrimaryWeapon") {
        slot.primary_weapon = weapon;
        return Some("primary weapon");
    }
    if let Some(weapon) = extract_scalar(json, "SecondaryWeapon") {
        slot.secondary_weapon = weapon;
        return Some("secondary weapon");
    }
    if let Some(armor) = extract_scalar(json, "Armor") {
        slot.armor = armor;
        return Some("armor");
    }
    if let (Some(slot_name), Some(item)) =
        (extract_scalar(json, "EquipmentSlot"), extract_scalar(json, "ItemId"))
    {
        if item.is_empty() {
            slot.equipment.remove(&slot_name);
        } else {
            slot.equipment.insert(slot_name, item);
        }
        return Some("equipment slot");
    }
    None
}

async fn handle_change_character(
    engine: &Arc<Engine>,
    handle: &Arc<ConnHandle>,
    state: &mut ConnState,
    event: &SharedFieldEvent,
) -> Result<(), ServerError> {
    let json = match event_json(&event.data) {
        Some(json) => json,
        None => {
            debug!("ChangeCharacter from {} carried no document", handle.peer());
            return Ok(());
        }
    };
    let (identity, mut slot) = match career::active_slot(engine, state) {
        Some(active) => active,
        None => return Ok(()),
    };
    let was_pending = slot.pending_creation;
    let applied = match apply_character_change(engine, &mut slot, &json) {
        Some(applied) => applied,
        None => {
            trace!("ChangeCharacter from {} applied nothing", handle.peer());
            return Ok(());
        }
    };
    let committed = was_pending && !slot.pending_creation;
    if committed {
        // A brand-new career starts at chapter 0 with the first mandatory
        // mission open and the starting funds granted.
        let first_mission = first_required_mission(engine);
        slot.progress = CampaignProgress::default();
        if let Some(mission) = &first_mission {
            slot.progress.set_mission_state(mission, MissionState::Available);
        }
        slot.wallet.apply_karma(i64::from(engine.config.starting_karma));
        slot.wallet.apply_nuyen(i64::from(engine.config.starting_nuyen));
        info!("✨ {} committed new career '{}'", handle.peer(), slot.name);
    } else {
        debug!("ChangeCharacter from {}: applied {}", handle.peer(), applied);
    }

    engine.services.store.upsert(&identity, state.slot_index, &slot);
    state.cached_hub_state =
        career::hub_state_payload(engine, &identity, state.slot_index, &slot);
    state.cached_creation_info =
        career::creation_info_payload(engine, &identity, state.slot_index, &slot, None);
    career::send_update_career_summaries(engine, handle, &identity).await?;
    handle
        .send_event(
            wire::entity::METAGAMEPLAY,
            wire::metagame::METAGAMEPLAY_SNAPSHOT,
            &state.cached_hub_state,
        )
        .await?;
    if committed {
        spawn_campaign_announcements(engine, handle, first_required_mission(engine));
    }
    Ok(())
}

/// First required mission of the storyline's first chapter.
fn first_required_mission(engine: &Arc<Engine>) -> Option<String> {
    engine
        .services
        .statics
        .storyline(&engine.config.storyline)
        .and_then(|s| s.chapters.first().and_then(|c| c.required_missions.first().cloned()))
}

/// After a creation commit, announces the chapter and the first available
/// mission on a short delay, then watches for mission traffic. The client
/// is expected to auto-start the mandatory mission; when it does not, that
/// is worth a log line, nothing more.
fn spawn_campaign_announcements(
    engine: &Arc<Engine>,
    handle: &Arc<ConnHandle>,
    first_mission: Option<String>,
) {
    let handle = Arc::clone(handle);
    let mut shutdown = engine.shutdown_signal();
    let announce_delay = Duration::from_millis(engine.config.campaign_announce_delay_ms);
    let watchdog = Duration::from_millis(engine.config.campaign_watchdog_ms);
    tokio::spawn(async move {
        let mut closed = handle.closed();
        tokio::select! {
            _ = tokio::time::sleep(announce_delay) => {}
            _ = shutdown.recv() => return,
            _ = closed.changed() => return,
        }
        if handle.is_closed() {
            return;
        }
        let chapter = json!({ "ChapterIndex": 0 }).to_string();
        if handle
            .send_event(
                wire::entity::METAGAMEPLAY,
                wire::metagame::CHAPTER_CHANGE,
                &encode_utf16_string_list(&[chapter.as_str()]),
            )
            .await
            .is_err()
        {
            return;
        }
        if let Some(mission) = &first_mission {
            let announcement = json!({ "Mission": mission, "State": "Available" }).to_string();
            if handle
                .send_event(
                    wire::entity::METAGAMEPLAY,
                    wire::metagame::MISSION_AVAILABLE,
                    &encode_utf16_string_list(&[announcement.as_str()]),
                )
                .await
                .is_err()
            {
                return;
            }
        }
        tokio::select! {
            _ = tokio::time::sleep(watchdog) => {}
            _ = shutdown.recv() => return,
            _ = closed.changed() => return,
        }
        if !handle.is_closed() && !handle.mission_traffic_seen() {
            warn!(
                "No mission traffic from {} within {:?} of campaign start",
                handle.peer(),
                watchdog
            );
        }
    });
}

/// Level encoded in a skill's technical name suffix (`sk_rifles_2` -> 2),
/// used when the client sends level zero.
fn infer_skill_level(technical_name: &str) -> i32 {
    technical_name
        .rsplit('_')
        .next()
        .and_then(|suffix| suffix.parse::<i32>().ok())
        .filter(|level| *level > 0)
        .unwrap_or(1)
}

async fn handle_change_skill_trees(
    engine: &Arc<Engine>,
    handle: &Arc<ConnHandle>,
    state: &mut ConnState,
    event: &SharedFieldEvent,
) -> Result<(), ServerError> {
    let json = match event_json(&event.data) {
        Some(json) => json,
        None => return Ok(()),
    };
    let (identity, mut slot) = match career::active_slot(engine, state) {
        Some(active) => active,
        None => return Ok(()),
    };

    if extract_scalar(&json, "Reset").as_deref() == Some("true") {
        debug!("Skill reset for {} ({} skills)", slot.name, slot.skills.len());
        slot.skills.clear();
    }
    if let Some(purchases) = extract_array(&json, "Purchases") {
        for purchase in objects_in_array(purchases) {
            let tree = extract_scalar(purchase, "Tree").unwrap_or_default();
            let skill = extract_scalar(purchase, "Skill").unwrap_or_default();
            if tree.is_empty() || skill.is_empty() {
                continue;
            }
            let mut level = extract_i64(purchase, "Level").unwrap_or(0) as i32;
            if level <= 0 {
                level = infer_skill_level(&skill);
            }
            if slot.add_skill(&tree, &skill, level) {
                if let Some(cost) = engine.services.statics.skill_karma_cost(&skill) {
                    slot.wallet.apply_karma(-i64::from(cost));
                }
            }
        }
    }

    engine.services.store.upsert(&identity, state.slot_index, &slot);
    handle
        .send_event(wire::entity::METAGAMEPLAY, wire::metagame::SKILL_TREE_CHANGED, &event.data)
        .await?;
    Ok(())
}

async fn handle_change_item_possessions(
    engine: &Arc<Engine>,
    handle: &Arc<ConnHandle>,
    state: &mut ConnState,
    event: &SharedFieldEvent,
) -> Result<(), ServerError> {
    let json = match event_json(&event.data) {
        Some(json) => json,
        None => return Ok(()),
    };
    let (identity, mut slot) = match career::active_slot(engine, state) {
        Some(active) => active,
        None => return Ok(()),
    };

    let shop_keeper = extract_scalar(&json, "ShopKeeper").unwrap_or_default();
    let mut total_cost: i64 = 0;
    if let Some(changes) = extract_array(&json, "Changes") {
        for change in objects_in_array(changes) {
            let item = extract_scalar(change, "Item").unwrap_or_default();
            if item.is_empty() {
                continue;
            }
            let delta = extract_i64(change, "Delta").unwrap_or(0) as i32;
            if delta == 0 {
                continue;
            }
            let quality = extract_i64(change, "Quality").unwrap_or(0) as i32;
            let flavor = extract_scalar(change, "Flavor").unwrap_or_default();
            if let Some(price) = engine.services.statics.shop_price(&shop_keeper, &item) {
                if delta > 0 {
                    total_cost += i64::from(price) * i64::from(delta);
                } else {
                    // Selling refunds half the list price, rounded down.
                    total_cost -= i64::from(price / 2) * i64::from(-delta);
                }
            }
            slot.apply_item_change(&item, delta, quality, &flavor);
        }
    }
    slot.wallet.apply_nuyen(-total_cost);

    engine.services.store.upsert(&identity, state.slot_index, &slot);
    handle
        .send_event(wire::entity::METAGAMEPLAY, wire::metagame::INVENTORY_CHANGED, &event.data)
        .await?;
    let wallet = json!({ "Karma": slot.wallet.karma, "Nuyen": slot.wallet.nuyen }).to_string();
    handle
        .send_event(
            wire::entity::METAGAMEPLAY,
            wire::metagame::WALLET_CHANGED,
            &encode_utf16_string_list(&[wallet.as_str()]),
        )
        .await?;
    state.cached_hub_state =
        career::hub_state_payload(engine, &identity, state.slot_index, &slot);
    handle
        .send_event(
            wire::entity::METAGAMEPLAY,
            wire::metagame::METAGAMEPLAY_SNAPSHOT,
            &state.cached_hub_state,
        )
        .await?;
    Ok(())
}

/// Routes a wrapped message by its `__type` hint.
async fn handle_wrapped(
    engine: &Arc<Engine>,
    handle: &Arc<ConnHandle>,
    state: &mut ConnState,
    event: &SharedFieldEvent,
) -> Result<(), ServerError> {
    let json = match event_json(&event.data) {
        Some(json) => json,
        None => {
            debug!("Wrapped message from {} carried no document", handle.peer());
            return Ok(());
        }
    };
    let message_type = extract_scalar(&json, wire::wrapped::TYPE_KEY).unwrap_or_default();
    match message_type.as_str() {
        wire::wrapped::REQUEST_CURRENT_STORYLINE_HUB => {
            answer_hub_pull(engine, handle, state).await
        }
        wire::wrapped::SET_STORY_MISSION_STATE => {
            handle_set_story_mission_state(engine, handle, state, &json, event).await
        }
        wire::wrapped::INTERACTED_WITH_NPC => {
            handle_interacted_with_npc(engine, handle, state, &json, event).await
        }
        wire::wrapped::START_SINGLEPLAYER_MISSION => {
            handle_start_singleplayer_mission(engine, handle, state, &json, event).await
        }
        other => {
            debug!("Unknown wrapped message type '{}' from {}", other, handle.peer());
            Ok(())
        }
    }
}

/// Grants the static rewards a mission pays out when its rewards are
/// collected.
fn grant_mission_rewards(engine: &Arc<Engine>, slot: &mut CareerSlot, mission: &str, outcome: &str) {
    for section in REWARD_SECTIONS {
        if let Some(karma) =
            engine.services.statics.mission_currency_reward(section, mission, outcome, "Karma")
        {
            slot.wallet.apply_karma(i64::from(karma));
        }
        if let Some(nuyen) =
            engine.services.statics.mission_currency_reward(section, mission, outcome, "Nuyen")
        {
            slot.wallet.apply_nuyen(i64::from(nuyen));
        }
        for change in engine.services.statics.mission_item_changes(section, mission, outcome) {
            slot.apply_item_change(&change.item_id, change.delta, change.quality, &change.flavor);
        }
    }
}

/// Advances the campaign when every required mission of the current chapter
/// is at least Completed. Emits exactly one ChapterChange per advancement.
pub async fn try_advance_chapter(
    engine: &Arc<Engine>,
    handle: &Arc<ConnHandle>,
    slot: &mut CareerSlot,
) -> Result<bool, ServerError> {
    let storyline = match engine.services.statics.storyline(&engine.config.storyline) {
        Some(storyline) => storyline,
        None => return Ok(false),
    };
    let chapter_index = slot.progress.chapter_index;
    let chapter = match storyline.chapters.iter().find(|c| c.index == chapter_index) {
        Some(chapter) => chapter,
        None => return Ok(false),
    };
    if chapter_index as usize + 1 >= storyline.chapters.len() {
        return Ok(false);
    }
    let all_done = chapter
        .required_missions
        .iter()
        .all(|mission| slot.progress.mission_state(mission).is_at_least_completed());
    if !all_done {
        return Ok(false);
    }
    slot.progress.chapter_index = chapter_index + 1;
    info!("📖 '{}' advanced to chapter {}", slot.name, slot.progress.chapter_index);
    let announcement = json!({ "ChapterIndex": slot.progress.chapter_index }).to_string();
    handle
        .send_event(
            wire::entity::METAGAMEPLAY,
            wire::metagame::CHAPTER_CHANGE,
            &encode_utf16_string_list(&[announcement.as_str()]),
        )
        .await?;
    Ok(true)
}

async fn handle_set_story_mission_state(
    engine: &Arc<Engine>,
    handle: &Arc<ConnHandle>,
    state: &mut ConnState,
    json: &str,
    event: &SharedFieldEvent,
) -> Result<(), ServerError> {
    let mission = extract_scalar(json, "Mission").unwrap_or_default();
    let target = extract_scalar(json, "State").unwrap_or_default();
    if mission.is_empty() || target.is_empty() {
        debug!("SetStoryMissionState from {} missing fields", handle.peer());
        return Ok(());
    }
    let (identity, mut slot) = match career::active_slot(engine, state) {
        Some(active) => active,
        None => return Ok(()),
    };
    let new_state = MissionState::parse(&target);
    let old_state = slot.progress.mission_state(&mission);
    if old_state == MissionState::ReadyToReceiveRewards && new_state == MissionState::Completed {
        let outcome = extract_scalar(json, "Outcome").unwrap_or_else(|| "Victory".to_string());
        grant_mission_rewards(engine, &mut slot, &mission, &outcome);
    }
    slot.progress.set_mission_state(&mission, new_state);
    engine.services.store.upsert(&identity, state.slot_index, &slot);

    let progress = json!({ "Mission": mission, "State": new_state.as_str() }).to_string();
    handle
        .send_event(
            wire::entity::METAGAMEPLAY,
            wire::metagame::STORYPROGRESS_CHANGED,
            &encode_utf16_string_list(&[progress.as_str()]),
        )
        .await?;

    if try_advance_chapter(engine, handle, &mut slot).await? {
        engine.services.store.upsert(&identity, state.slot_index, &slot);
    }
    state.cached_hub_state =
        career::hub_state_payload(engine, &identity, state.slot_index, &slot);
    handle
        .send_event(
            wire::entity::METAGAMEPLAY,
            wire::metagame::METAGAMEPLAY_SNAPSHOT,
            &state.cached_hub_state,
        )
        .await?;
    if matches!(new_state, MissionState::ReadyToPlay | MissionState::Completed) {
        handle
            .send_deduped(
                PushKind::HubState,
                wire::entity::METAGAMEPLAY,
                wire::metagame::HUB_STATE,
                &state.cached_hub_state,
            )
            .await?;
        if !state.cached_creation_info.is_empty() {
            handle
                .send_deduped(
                    PushKind::CreationInfo,
                    wire::entity::METAGAMEPLAY,
                    wire::metagame::CREATION_INFO,
                    &state.cached_creation_info,
                )
                .await?;
        }
    }
    // Echo resolves the client's pending wrapped call.
    handle
        .send_event(wire::entity::METAGAMEPLAY, wire::metagame::WRAPPED_MESSAGE, &event.data)
        .await?;
    Ok(())
}

async fn handle_interacted_with_npc(
    engine: &Arc<Engine>,
    handle: &Arc<ConnHandle>,
    state: &mut ConnState,
    json: &str,
    event: &SharedFieldEvent,
) -> Result<(), ServerError> {
    let npc_id = extract_scalar(json, "NpcId").unwrap_or_default();
    if let Some((identity, mut slot)) = career::active_slot(engine, state) {
        if slot.record_npc_interaction(&npc_id) {
            engine.services.store.upsert(&identity, state.slot_index, &slot);
            debug!("'{}' interacted with NPC {}", slot.name, npc_id);
        }
    }
    handle
        .send_event(wire::entity::METAGAMEPLAY, wire::metagame::WRAPPED_MESSAGE, &event.data)
        .await?;
    Ok(())
}

/// Henchman ids requested by a mission start, as either bare numbers or
/// `{ "Id": n }` objects.
fn requested_henchman_ids(json: &str) -> Vec<u64> {
    let array = match extract_array(json, "Henchmen") {
        Some(array) => array,
        None => return Vec::new(),
    };
    let objects = objects_in_array(array);
    if !objects.is_empty() {
        return objects
            .iter()
            .filter_map(|o| extract_i64(o, "Id"))
            .filter(|id| *id > 0)
            .map(|id| id as u64)
            .collect();
    }
    array
        .trim_matches(|c| c == '[' || c == ']')
        .split(',')
        .filter_map(|token| token.trim().parse::<u64>().ok())
        .filter(|id| *id > 0)
        .collect()
}

async fn handle_start_singleplayer_mission(
    engine: &Arc<Engine>,
    handle: &Arc<ConnHandle>,
    state: &mut ConnState,
    json: &str,
    event: &SharedFieldEvent,
) -> Result<(), ServerError> {
    handle.mark_mission_traffic();
    let map = extract_scalar(json, "Map")
        .or_else(|| extract_scalar(json, "Mission"))
        .unwrap_or_default();
    if map.is_empty() {
        debug!("Mission start from {} without a map", handle.peer());
        return Ok(());
    }
    if state.completed_missions.contains(&map) {
        // The client resends mission starts aggressively during teardown;
        // answer its pending call instead of silently dropping it.
        info!("🚫 Mission start for completed map {} from {} cancelled", map, handle.peer());
        let cancellation = json!({ "Map": map }).to_string();
        handle
            .send_event(
                wire::entity::METAGAMEPLAY,
                wire::metagame::START_MISSION_CANCELLED,
                &encode_utf16_string_list(&[cancellation.as_str()]),
            )
            .await?;
        if !state.cached_hub_state.is_empty() {
            handle
                .send_deduped(
                    PushKind::HubState,
                    wire::entity::METAGAMEPLAY,
                    wire::metagame::HUB_STATE,
                    &state.cached_hub_state,
                )
                .await?;
        }
        if !state.cached_creation_info.is_empty() {
            handle
                .send_deduped(
                    PushKind::CreationInfo,
                    wire::entity::METAGAMEPLAY,
                    wire::metagame::CREATION_INFO,
                    &state.cached_creation_info,
                )
                .await?;
        }
        return Ok(());
    }
    let (identity, slot) = match career::active_slot(engine, state) {
        Some(active) => active,
        None => return Ok(()),
    };

    if !state.latches.mission_entities_introduced {
        handle.introduce_entity(wire::entity::GAMEWORLD).await?;
        handle.introduce_entity(wire::entity::MISSION_INSTANCE).await?;
        handle.introduce_entity(wire::entity::MISSION_COMMAND).await?;
        state.latches.mission_entities_introduced = true;
    }

    // Resolve selections against the roster the client last saw; stale or
    // unknown ids are skipped, not errors.
    let requested = requested_henchman_ids(json);
    let henchmen: Vec<HenchmanTemplate> = requested
        .iter()
        .filter_map(|id| {
            let found = state.last_henchman_roster.iter().find(|h| h.id == *id).cloned();
            if found.is_none() {
                debug!("Skipping stale henchman selection {} from {}", id, handle.peer());
            }
            found
        })
        .collect();

    let match_config = engine.services.match_config.compressed_match_configuration(
        &map,
        &identity,
        state.slot_index,
        &slot,
        &henchmen,
    );
    let seeds = SeedPackage(engine.config.mission_seed);
    let session = Arc::new(SimulationSession::create(
        &map,
        &match_config,
        seeds,
        &engine.config.storyline,
        slot.progress.chapter_index,
        engine.config.ai_enabled,
    ));
    if let Some(previous) = state.session.replace(session) {
        previous.stop();
    }
    state.current_map = map.clone();
    info!("🎬 {} starts mission {} with {} henchmen", handle.peer(), map, henchmen.len());

    let accepted = json!({
        "Map": map,
        "Seeds": engine.config.mission_seed,
        "Gameworld": wire::entity::GAMEWORLD,
        "MissionInstance": wire::entity::MISSION_INSTANCE,
        "MissionCommand": wire::entity::MISSION_COMMAND,
        "MatchConfiguration": match_config,
    })
    .to_string();
    handle
        .send_event(
            wire::entity::METAGAMEPLAY,
            wire::metagame::START_MISSION_ACCEPTED,
            &encode_utf16_string_list(&[accepted.as_str()]),
        )
        .await?;
    // The echo resolves the pending call immediately; the launch signal
    // follows after the client has had time to load the map.
    handle
        .send_event(wire::entity::METAGAMEPLAY, wire::metagame::WRAPPED_MESSAGE, &event.data)
        .await?;
    spawn_mission_launch(engine, handle, map);
    Ok(())
}

/// Delayed StartMissionForClients signal.
fn spawn_mission_launch(engine: &Arc<Engine>, handle: &Arc<ConnHandle>, map: String) {
    let handle = Arc::clone(handle);
    let mut shutdown = engine.shutdown_signal();
    let delay = Duration::from_millis(engine.config.mission_start_delay_ms);
    tokio::spawn(async move {
        let mut closed = handle.closed();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.recv() => return,
            _ = closed.changed() => return,
        }
        if handle.is_closed() {
            return;
        }
        let launch = json!({ "Map": map }).to_string();
        if let Err(e) = handle
            .send_event(
                wire::entity::METAGAMEPLAY,
                wire::metagame::START_MISSION_FOR_CLIENTS,
                &encode_utf16_string_list(&[launch.as_str()]),
            )
            .await
        {
            debug!("Mission launch signal to {} failed: {}", handle.peer(), e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skill_level_inference_reads_name_suffix() {
        assert_eq!(infer_skill_level("sk_rifles_2"), 2);
        assert_eq!(infer_skill_level("sk_dodge_10"), 10);
        assert_eq!(infer_skill_level("sk_leadership"), 1);
        assert_eq!(infer_skill_level(""), 1);
    }

    #[test]
    fn henchman_ids_parse_objects_and_bare_numbers() {
        let objects = r#"{"Henchmen":[{"Id":3},{"Id":7},{"Id":0}]}"#;
        assert_eq!(requested_henchman_ids(objects), vec![3, 7]);
        let bare = r#"{"Henchmen":[4, 9]}"#;
        assert_eq!(requested_henchman_ids(bare), vec![4, 9]);
        assert!(requested_henchman_ids(r#"{"Henchmen":[]}"#).is_empty());
        assert!(requested_henchman_ids("{}").is_empty());
    }

    #[test]
    fn event_json_prefers_string_list_entries() {
        let data = encode_utf16_string_list(&[r#"xx{"Map":"m01"}yy"#]);
        let json = event_json(&data).expect("json");
        assert_eq!(extract_scalar(&json, "Map").as_deref(), Some("m01"));
    }
}
