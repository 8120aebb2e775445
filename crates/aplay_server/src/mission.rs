//! Mission command relay: translates in-mission wire commands into
//! simulation calls and relays AI actions and loot back to the client.
//!
//! A parse failure for one field is logged and skips that field only; frame
//! processing for the connection always continues.

use crate::codec::envelope::{ByteReader, SharedFieldEvent};
use crate::codec::strings::encode_utf16_string_list;
use crate::connection::{ConnHandle, ConnState};
use crate::error::ServerError;
use crate::metagame_ops;
use crate::server::core::Engine;
use crate::{career, wire};
use metagame::MissionState;
use serde_json::json;
use simulation::{AiAction, SeedPackage, END_TEAM_TURN_SKILL_ID};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Fixed-shape reference header preceding the integer arguments of movement
/// and skill commands. Opaque to the server; skipped, never interpreted.
const REF_HEADER_LEN: usize = 13;

/// Routes one mission-command event.
pub async fn dispatch(
    engine: &Arc<Engine>,
    handle: &Arc<ConnHandle>,
    state: &mut ConnState,
    event: &SharedFieldEvent,
) -> Result<(), ServerError> {
    handle.mark_mission_traffic();
    match event.field_id {
        wire::mission_command::MISSION_READY => {
            trace!("Mission ready from {} ({})", handle.peer(), state.current_map);
            Ok(())
        }
        wire::mission_command::LEAVE_MISSION => handle_leave_mission(engine, handle, state).await,
        wire::mission_command::FOLLOW_PATH => handle_follow_path(handle, state, event).await,
        wire::mission_command::ACTIVATE_ACTIVE_SKILL => {
            handle_activate_skill(handle, state, event).await
        }
        field_id => {
            debug!("Unhandled mission command field {} from {}", field_id, handle.peer());
            Ok(())
        }
    }
}

/// True when `map` is the first required mission of the storyline, the one
/// played straight out of character creation.
fn is_prologue_mission(engine: &Arc<Engine>, map: &str) -> bool {
    engine
        .services
        .statics
        .storyline(&engine.config.storyline)
        .and_then(|s| s.chapters.first().map(|c| c.required_missions.first().map(String::as_str) == Some(map)))
        .unwrap_or(false)
}

async fn handle_leave_mission(
    engine: &Arc<Engine>,
    handle: &Arc<ConnHandle>,
    state: &mut ConnState,
) -> Result<(), ServerError> {
    let map = state.current_map.clone();
    if map.is_empty() {
        debug!("LeaveMission from {} without an active mission", handle.peer());
        return Ok(());
    }
    info!("🏁 {} leaves mission {}", handle.peer(), map);
    state.completed_missions.insert(map.clone());

    let loot = state
        .session
        .as_ref()
        .map(|s| s.drain_pending_loot())
        .unwrap_or_default();

    if let Some((identity, mut slot)) = career::active_slot(engine, state) {
        // The prologue is marked fully Completed on exit; anything else
        // waits in ReadyToReceiveRewards until the client collects. The
        // client otherwise re-triggers a mandatory-mission auto-start loop
        // during teardown.
        let exit_state = if is_prologue_mission(engine, &map) {
            MissionState::Completed
        } else {
            MissionState::ReadyToReceiveRewards
        };
        slot.progress.set_mission_state(&map, exit_state);

        let mut loot_nuyen: i64 = 0;
        for grant in &loot {
            loot_nuyen += i64::from(grant.nuyen);
            if grant.delta != 0 {
                slot.apply_item_change(&grant.item_id, grant.delta, 0, "");
            }
        }
        slot.wallet.apply_nuyen(loot_nuyen);
        if let Some(karma) = engine
            .services
            .statics
            .mission_currency_reward("Rewards", &map, "Victory", "Karma")
        {
            slot.wallet.apply_karma(i64::from(karma));
        }
        if let Some(nuyen) = engine
            .services
            .statics
            .mission_currency_reward("Rewards", &map, "Victory", "Nuyen")
        {
            slot.wallet.apply_nuyen(i64::from(nuyen));
        }

        metagame_ops::try_advance_chapter(engine, handle, &mut slot).await?;
        engine.services.store.upsert(&identity, state.slot_index, &slot);
        state.cached_hub_state =
            career::hub_state_payload(engine, &identity, state.slot_index, &slot);

        let reward = json!({
            "Map": map,
            "State": exit_state.as_str(),
            "Karma": slot.wallet.karma,
            "Nuyen": slot.wallet.nuyen,
            "Loot": loot
                .iter()
                .map(|g| json!({ "Item": g.item_id, "Delta": g.delta, "Nuyen": g.nuyen }))
                .collect::<Vec<_>>(),
        })
        .to_string();
        handle
            .send_event(
                wire::entity::METAGAMEPLAY,
                wire::metagame::GOT_MISSION_REWARD,
                &encode_utf16_string_list(&[reward.as_str()]),
            )
            .await?;
    }

    handle
        .send_event(wire::entity::GAMEWORLD, wire::gameworld::LEAVE_MISSION, &[])
        .await?;
    handle
        .send_event(wire::entity::GAMEWORLD, wire::gameworld::STOP, &[])
        .await?;
    state.teardown_session();
    Ok(())
}

/// Reads `count` little-endian i32 arguments after the ref header.
fn read_command_args(data: &[u8], count: usize) -> Option<Vec<i32>> {
    let mut reader = ByteReader::new(data);
    reader.skip(REF_HEADER_LEN)?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        args.push(reader.read_i32()?);
    }
    Some(args)
}

/// Encodes a relayed AI action as a gameworld event payload.
fn ai_action_payload(action: &AiAction) -> (u16, Vec<u8>) {
    match action {
        AiAction::FollowPath { agent_id, target_x, target_y, seeds } => {
            let mut data = wire::pack_i32s(&[*agent_id, *target_x, *target_y]);
            data.extend_from_slice(&wire::pack_seeds(*seeds));
            (wire::gameworld::FOLLOW_PATH, data)
        }
        AiAction::ActivateSkill {
            weapon_index,
            skill_index,
            skill_id,
            agent_id,
            target_x,
            target_y,
            seeds,
        } => {
            let mut data = wire::pack_i32s(&[
                *weapon_index,
                *skill_index,
                *skill_id,
                *agent_id,
                *target_x,
                *target_y,
            ]);
            data.extend_from_slice(&wire::pack_seeds(*seeds));
            (wire::gameworld::ACTIVATE_ACTIVE_SKILL, data)
        }
    }
}

/// Drains the AI turn (when the simulation passed it over) and appends the
/// resulting relay events to the outbound block.
fn append_ai_actions(
    handle: &Arc<ConnHandle>,
    state: &ConnState,
    items: &mut Vec<(u64, u16, Vec<u8>)>,
) {
    let session = match &state.session {
        Some(session) => session,
        None => return,
    };
    for action in session.skip_ai_turns_if_needed() {
        if let AiAction::ActivateSkill { skill_id, agent_id, .. } = &action {
            if *skill_id == END_TEAM_TURN_SKILL_ID {
                debug!("AI agent {} hands the turn back to {}", agent_id, handle.peer());
            }
        }
        let (field_id, data) = ai_action_payload(&action);
        items.push((wire::entity::GAMEWORLD, field_id, data));
    }
}

/// Sends queued loot-preview notifications after a command was relayed.
async fn flush_loot_previews(
    handle: &Arc<ConnHandle>,
    state: &ConnState,
) -> Result<(), ServerError> {
    let previews = match &state.session {
        Some(session) => session.drain_pending_loot_previews(),
        None => return Ok(()),
    };
    for item_id in previews {
        handle
            .send_event(
                wire::entity::GAMEWORLD,
                wire::gameworld::LOOT_PREVIEW,
                &encode_utf16_string_list(&[item_id.as_str()]),
            )
            .await?;
    }
    Ok(())
}

async fn handle_follow_path(
    handle: &Arc<ConnHandle>,
    state: &mut ConnState,
    event: &SharedFieldEvent,
) -> Result<(), ServerError> {
    let args = match read_command_args(&event.data, 3) {
        Some(args) => args,
        None => {
            debug!("Short FollowPath payload from {}; skipping", handle.peer());
            return Ok(());
        }
    };
    let (agent_id, target_x, target_y) = (args[0], args[1], args[2]);
    trace!("{} moves agent {} to ({}, {})", handle.peer(), agent_id, target_x, target_y);

    if let Some(session) = &state.session {
        session.execute_follow_path(agent_id, target_x, target_y);
    }
    // The echo and any AI relay share one contiguous run of msg numbers.
    let mut items: Vec<(u64, u16, Vec<u8>)> = vec![(
        wire::entity::GAMEWORLD,
        wire::gameworld::FOLLOW_PATH,
        wire::pack_i32s(&args),
    )];
    append_ai_actions(handle, state, &mut items);
    handle.send_event_block(&items).await?;
    flush_loot_previews(handle, state).await
}

async fn handle_activate_skill(
    handle: &Arc<ConnHandle>,
    state: &mut ConnState,
    event: &SharedFieldEvent,
) -> Result<(), ServerError> {
    let args = match read_command_args(&event.data, 6) {
        Some(args) => args,
        None => {
            debug!("Short ActivateActiveSkill payload from {}; skipping", handle.peer());
            return Ok(());
        }
    };
    let seeds = state
        .session
        .as_ref()
        .map(|s| s.create_seed_package())
        .unwrap_or(SeedPackage::FALLBACK);
    trace!(
        "{} activates skill {} with agent {} (seeds {:?})",
        handle.peer(),
        args[2],
        args[3],
        seeds
    );

    if let Some(session) = &state.session {
        session.execute_activate_skill(args[0], args[1], args[2], args[3], args[4], args[5], seeds);
    }
    let mut echo = wire::pack_i32s(&args);
    echo.extend_from_slice(&wire::pack_seeds(seeds));
    let mut items: Vec<(u64, u16, Vec<u8>)> = vec![(
        wire::entity::GAMEWORLD,
        wire::gameworld::ACTIVATE_ACTIVE_SKILL,
        echo,
    )];
    append_ai_actions(handle, state, &mut items);
    handle.send_event_block(&items).await?;
    flush_loot_previews(handle, state).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command_payload(values: &[i32]) -> Vec<u8> {
        let mut data = vec![0u8; REF_HEADER_LEN];
        data.extend_from_slice(&wire::pack_i32s(values));
        data
    }

    #[test]
    fn command_args_parse_after_ref_header() {
        let data = command_payload(&[7, -3, 12]);
        assert_eq!(read_command_args(&data, 3), Some(vec![7, -3, 12]));
    }

    #[test]
    fn short_command_payload_is_rejected() {
        assert!(read_command_args(&[0u8; REF_HEADER_LEN], 1).is_none());
        assert!(read_command_args(&[0u8; 4], 1).is_none());
        let data = command_payload(&[1, 2]);
        assert!(read_command_args(&data, 3).is_none());
    }

    #[test]
    fn ai_actions_encode_with_seed_suffix() {
        let follow = AiAction::FollowPath {
            agent_id: 101,
            target_x: 4,
            target_y: 9,
            seeds: SeedPackage([1, 2, 3, 4]),
        };
        let (field, data) = ai_action_payload(&follow);
        assert_eq!(field, wire::gameworld::FOLLOW_PATH);
        assert_eq!(data.len(), 3 * 4 + 16);

        let skill = AiAction::ActivateSkill {
            weapon_index: 0,
            skill_index: 1,
            skill_id: END_TEAM_TURN_SKILL_ID,
            agent_id: 101,
            target_x: 0,
            target_y: 0,
            seeds: SeedPackage([1, 2, 3, 4]),
        };
        let (field, data) = ai_action_payload(&skill);
        assert_eq!(field, wire::gameworld::ACTIVATE_ACTIVE_SKILL);
        assert_eq!(data.len(), 6 * 4 + 16);
        assert_eq!(&data[8..12], &END_TEAM_TURN_SKILL_ID.to_le_bytes());
    }
}
