//! Career selection: the EnterCareer/CreateCareer bootstrap sequence,
//! leaving a career and deactivating a slot.
//!
//! The bootstrap event order matters to the client: AccountWelcome,
//! UpdateCareerSummaries, MetagameplaySnapshot, HenchmanCollection, then the
//! deduped HubState and CreationInfo pushes. CreationInfo is additionally
//! resent on a fire-and-forget timer until the client pulls the hub.

use crate::codec::envelope::SharedFieldEvent;
use crate::codec::strings::{decode_utf16_string_list, encode_utf16_string_list};
use crate::connection::{ConnHandle, ConnState};
use crate::dedup::PushKind;
use crate::error::ServerError;
use crate::server::core::Engine;
use crate::server::handlers::Flow;
use crate::wire;
use metagame::{CareerSlot, CAREER_SLOT_COUNT};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Serialized summary list for all three slots, sent with Welcome and
/// UpdateCareerSummaries. Always exactly three entries, occupied or not.
pub fn career_summaries_json(engine: &Arc<Engine>, identity: &str) -> String {
    let slots = engine.services.store.list_slots(identity);
    let summaries: Vec<_> = slots
        .iter()
        .enumerate()
        .map(|(index, slot)| {
            json!({
                "SlotIndex": index,
                "Occupied": slot.occupied,
                "Name": slot.name,
                "ChapterIndex": slot.progress.chapter_index,
                "PendingCreation": slot.pending_creation,
            })
        })
        .collect();
    json!(summaries).to_string()
}

/// Pushes a fresh UpdateCareerSummaries event.
pub async fn send_update_career_summaries(
    engine: &Arc<Engine>,
    handle: &Arc<ConnHandle>,
    identity: &str,
) -> Result<(), ServerError> {
    let summaries = career_summaries_json(engine, identity);
    handle
        .send_event(
            wire::entity::ACCOUNT,
            wire::account::UPDATE_CAREER_SUMMARIES,
            &encode_utf16_string_list(&[summaries.as_str()]),
        )
        .await?;
    Ok(())
}

/// Builds the hub-state payload for a slot: the zipped career snapshot,
/// wire-encoded. The result is cached on the connection so later pull
/// requests answer without regeneration.
pub fn hub_state_payload(
    engine: &Arc<Engine>,
    identity: &str,
    slot_index: usize,
    slot: &CareerSlot,
) -> Vec<u8> {
    let blob = engine
        .services
        .career_info
        .zipped_career_info(identity, slot_index, slot, None);
    encode_utf16_string_list(&[blob.as_str()])
}

/// Builds the creation-info payload; `pending_override` nudges an existing
/// payload to non-pending (used after deactivation).
pub fn creation_info_payload(
    engine: &Arc<Engine>,
    identity: &str,
    slot_index: usize,
    slot: &CareerSlot,
    pending_override: Option<bool>,
) -> Vec<u8> {
    let blob = engine
        .services
        .career_info
        .zipped_career_info(identity, slot_index, slot, pending_override);
    encode_utf16_string_list(&[blob.as_str()])
}

/// Loads the connection's active slot from the store.
pub fn active_slot(engine: &Arc<Engine>, state: &ConnState) -> Option<(String, CareerSlot)> {
    let identity = state.identity.clone()?;
    let slot = engine
        .services
        .store
        .get_or_create_slot(&identity, state.slot_index, true)?;
    Some((identity, slot))
}

/// EnterCareer / CreateCareer bootstrap. Rejects (and closes) when no login
/// preceded it; a repeated bootstrap while a career is already entered is
/// ignored until LeaveCurrentCareer resets the latch.
pub async fn handle_career_bootstrap(
    engine: &Arc<Engine>,
    handle: &Arc<ConnHandle>,
    state: &mut ConnState,
    event: &SharedFieldEvent,
    create: bool,
) -> Result<Flow, ServerError> {
    let identity = match &state.identity {
        Some(identity) if state.latches.logged_in => identity.clone(),
        _ => {
            warn!("Career bootstrap from {} without login; rejecting", handle.peer());
            handle
                .send_event(
                    wire::entity::ACCOUNT_CONNECTION,
                    wire::account_connection::REJECT_LOGIN,
                    &[],
                )
                .await?;
            return Ok(Flow::Close);
        }
    };
    if state.latches.career_entered {
        trace!("Repeated career bootstrap from {} ignored", handle.peer());
        return Ok(Flow::Continue);
    }

    let args = decode_utf16_string_list(&event.data);
    let slot_index = args
        .first()
        .and_then(|s| s.trim().parse::<usize>().ok())
        .unwrap_or_else(|| engine.services.store.last_slot_index(&identity).max(0) as usize)
        .min(CAREER_SLOT_COUNT - 1);
    let requested_name = args.get(1).map(String::as_str).unwrap_or("").trim();

    let mut slot = engine
        .services
        .store
        .get_or_create_slot(&identity, slot_index, true)
        .unwrap_or_default();
    if create && !slot.occupied {
        slot.occupied = true;
        slot.pending_creation = true;
    }
    if create && !requested_name.is_empty() {
        slot.name = requested_name.to_string();
    }
    engine.services.store.upsert(&identity, slot_index, &slot);
    engine.services.store.set_last_slot_index(&identity, slot_index as i32);

    state.slot_index = slot_index;
    state.latches.career_entered = true;
    info!(
        "🎭 {} entered career slot {} ({})",
        handle.peer(),
        slot_index,
        if slot.name.is_empty() { "unnamed" } else { &slot.name }
    );

    // Ordered bootstrap sequence; the client stalls if any of these arrive
    // out of order.
    handle
        .send_event(
            wire::entity::ACCOUNT,
            wire::account::ACCOUNT_WELCOME,
            &encode_utf16_string_list(&[identity.as_str(), slot.name.as_str()]),
        )
        .await?;
    send_update_career_summaries(engine, handle, &identity).await?;

    if !state.latches.metagameplay_introduced {
        handle.introduce_entity(wire::entity::METAGAMEPLAY).await?;
        state.latches.metagameplay_introduced = true;
    }

    let snapshot = hub_state_payload(engine, &identity, slot_index, &slot);
    handle
        .send_event(wire::entity::METAGAMEPLAY, wire::metagame::METAGAMEPLAY_SNAPSHOT, &snapshot)
        .await?;

    let roster = engine.services.henchmen.roster();
    let roster_json = henchman_collection_json(&roster);
    state.last_henchman_roster = roster;
    handle
        .send_event(
            wire::entity::METAGAMEPLAY,
            wire::metagame::HENCHMAN_COLLECTION,
            &encode_utf16_string_list(&[roster_json.as_str()]),
        )
        .await?;

    state.cached_hub_state = snapshot;
    handle
        .send_deduped(
            PushKind::HubState,
            wire::entity::METAGAMEPLAY,
            wire::metagame::HUB_STATE,
            &state.cached_hub_state,
        )
        .await?;

    state.cached_creation_info = creation_info_payload(engine, &identity, slot_index, &slot, None);
    handle
        .send_deduped(
            PushKind::CreationInfo,
            wire::entity::METAGAMEPLAY,
            wire::metagame::CREATION_INFO,
            &state.cached_creation_info,
        )
        .await?;
    spawn_creation_info_resend(engine, handle, state.cached_creation_info.clone());
    Ok(Flow::Continue)
}

/// Resends CreationInfo a bounded number of times unless the client pulls
/// the hub first. Fire and forget; a failed send ends the task.
fn spawn_creation_info_resend(engine: &Arc<Engine>, handle: &Arc<ConnHandle>, payload: Vec<u8>) {
    let handle = Arc::clone(handle);
    let mut shutdown = engine.shutdown_signal();
    let delay = Duration::from_millis(engine.config.creation_info_resend_ms.max(50));
    let attempts = engine.config.creation_info_resend_attempts;
    tokio::spawn(async move {
        let mut closed = handle.closed();
        for attempt in 1..=attempts {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.recv() => return,
                _ = closed.changed() => return,
            }
            if handle.is_closed() || handle.hub_pulled() {
                trace!("CreationInfo resend for {} cancelled", handle.peer());
                return;
            }
            debug!("CreationInfo resend {}/{} to {}", attempt, attempts, handle.peer());
            let sent = handle
                .send_event(wire::entity::METAGAMEPLAY, wire::metagame::CREATION_INFO, &payload)
                .await;
            if sent.is_err() {
                return;
            }
        }
    });
}

/// LeaveCurrentCareer: re-arms the bootstrap latch so a later EnterCareer
/// on a different slot is processed again. Any running mission is torn down.
pub async fn handle_leave_current_career(
    handle: &Arc<ConnHandle>,
    state: &mut ConnState,
) -> Result<(), ServerError> {
    info!("🚪 {} left career slot {}", handle.peer(), state.slot_index);
    state.teardown_session();
    state.latches.reset_career();
    handle.reset_hub_pulled();
    state.cached_hub_state.clear();
    state.cached_creation_info.clear();
    state.last_henchman_roster.clear();
    Ok(())
}

/// DeactivateCareer: clears the slot, announces the deactivation and fresh
/// summaries, and nudges the cached creation-info payload to non-pending.
pub async fn handle_deactivate_career(
    engine: &Arc<Engine>,
    handle: &Arc<ConnHandle>,
    state: &mut ConnState,
    event: &SharedFieldEvent,
) -> Result<(), ServerError> {
    let identity = match &state.identity {
        Some(identity) => identity.clone(),
        None => {
            debug!("DeactivateCareer from {} without login ignored", handle.peer());
            return Ok(());
        }
    };
    let args = decode_utf16_string_list(&event.data);
    let slot_index = args
        .first()
        .and_then(|s| s.trim().parse::<usize>().ok())
        .unwrap_or(state.slot_index)
        .min(CAREER_SLOT_COUNT - 1);

    let default_hub = engine
        .services
        .statics
        .storyline(&engine.config.storyline)
        .and_then(|s| s.chapters.first().map(|c| c.hub.clone()))
        .unwrap_or_default();
    engine.services.store.deactivate_slot(&identity, slot_index, &default_hub);
    info!("🗑️ {} deactivated career slot {}", handle.peer(), slot_index);

    handle
        .send_event(wire::entity::ACCOUNT, wire::account::CAREER_DEACTIVATED, &[])
        .await?;
    send_update_career_summaries(engine, handle, &identity).await?;

    if slot_index == state.slot_index {
        let slot = engine
            .services
            .store
            .get_or_create_slot(&identity, slot_index, true)
            .unwrap_or_default();
        state.cached_creation_info =
            creation_info_payload(engine, &identity, slot_index, &slot, Some(false));
    }
    Ok(())
}

/// Serializes the henchman roster for the HenchmanCollection event.
pub fn henchman_collection_json(roster: &[metagame::HenchmanTemplate]) -> String {
    let entries: Vec<_> = roster
        .iter()
        .map(|h| {
            json!({
                "Id": h.id,
                "TechnicalName": h.technical_name,
                "DisplayName": h.display_name,
                "BodytypeId": h.bodytype_id,
                "Level": h.level,
            })
        })
        .collect();
    json!(entries).to_string()
}
