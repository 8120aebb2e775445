//! The per-mission simulation session.

use crate::rng::{SeedPackage, SplitMix64};
use std::mem;
use std::sync::Mutex;
use tracing::{debug, trace};

/// Reserved skill id an AI team uses to hand the turn back.
pub const END_TEAM_TURN_SKILL_ID: i32 = 99997;

/// Player actions allowed before the turn passes to the AI team.
const PLAYER_ACTIONS_PER_TURN: u32 = 2;

/// Chance denominator for a loot roll per offensive skill use.
const LOOT_ROLL_DENOMINATOR: u32 = 4;

/// Small built-in drop table: (item id, sell price, nuyen bonus).
const DROP_TABLE: &[(&str, i32, i32)] = &[
    ("itm_credstick_small", 0, 150),
    ("itm_medkit", 40, 0),
    ("itm_ammo_clip", 15, 0),
    ("itm_scrap_electronics", 25, 25),
];

/// An AI-driven action the engine relays to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AiAction {
    FollowPath {
        agent_id: i32,
        target_x: i32,
        target_y: i32,
        seeds: SeedPackage,
    },
    ActivateSkill {
        weapon_index: i32,
        skill_index: i32,
        skill_id: i32,
        agent_id: i32,
        target_x: i32,
        target_y: i32,
        seeds: SeedPackage,
    },
}

/// Loot accumulated during a mission, applied to the career on exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LootGrant {
    pub item_id: String,
    pub delta: i32,
    pub sell_price: i32,
    pub nuyen: i32,
}

#[derive(Debug)]
struct Inner {
    rng: SplitMix64,
    stopped: bool,
    ai_turn_pending: bool,
    player_actions_this_turn: u32,
    pending_loot: Vec<LootGrant>,
    pending_previews: Vec<String>,
    ai_agent_ids: Vec<i32>,
}

/// A running mission. One per connection at most; replaced wholesale when the
/// client starts a new mission.
#[derive(Debug)]
pub struct SimulationSession {
    map_name: String,
    ai_enabled: bool,
    inner: Mutex<Inner>,
}

impl SimulationSession {
    /// Creates a session for a mission. `match_config` is the compressed
    /// configuration blob the mission was started with; it only feeds the
    /// generator state here, the session does not interpret it.
    pub fn create(
        map_name: &str,
        match_config: &str,
        seeds: SeedPackage,
        storyline: &str,
        chapter: i32,
        ai_enabled: bool,
    ) -> Self {
        let mut rng = SplitMix64::new(
            seeds.fold() ^ (match_config.len() as u64).wrapping_mul(0x9E37_79B9),
        );
        // Two to four opposing agents, ids in a band the client treats as
        // server-controlled.
        let agent_count = 2 + rng.next_below(3) as i32;
        let ai_agent_ids: Vec<i32> = (0..agent_count).map(|i| 100 + i).collect();
        debug!(
            "Simulation session for {} (storyline {}, chapter {}): {} AI agents, ai_enabled={}",
            map_name,
            storyline,
            chapter,
            ai_agent_ids.len(),
            ai_enabled
        );
        Self {
            map_name: map_name.to_string(),
            ai_enabled,
            inner: Mutex::new(Inner {
                rng,
                stopped: false,
                ai_turn_pending: false,
                player_actions_this_turn: 0,
                pending_loot: Vec::new(),
                pending_previews: Vec::new(),
                ai_agent_ids,
            }),
        }
    }

    pub fn map_name(&self) -> &str {
        &self.map_name
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Forwards a player movement command.
    pub fn execute_follow_path(&self, agent_id: i32, target_x: i32, target_y: i32) {
        let mut inner = self.lock();
        if inner.stopped {
            return;
        }
        trace!("{}: agent {} moves to ({}, {})", self.map_name, agent_id, target_x, target_y);
        self.count_player_action(&mut inner);
    }

    /// Forwards a player skill activation. An end-team-turn skill passes the
    /// turn immediately; any other skill may roll loot.
    #[allow(clippy::too_many_arguments)]
    pub fn execute_activate_skill(
        &self,
        weapon_index: i32,
        skill_index: i32,
        skill_id: i32,
        agent_id: i32,
        target_x: i32,
        target_y: i32,
        seeds: SeedPackage,
    ) {
        let mut inner = self.lock();
        if inner.stopped {
            return;
        }
        trace!(
            "{}: agent {} activates skill {} (weapon {}, index {}) at ({}, {}) seeds {:?}",
            self.map_name, agent_id, skill_id, weapon_index, skill_index, target_x, target_y, seeds
        );
        if skill_id == END_TEAM_TURN_SKILL_ID {
            inner.player_actions_this_turn = 0;
            inner.ai_turn_pending = self.ai_enabled;
            return;
        }
        self.maybe_roll_loot(&mut inner);
        self.count_player_action(&mut inner);
    }

    /// When the turn has passed to an AI-controlled team, produces the full
    /// action sequence for that team and hands the turn back. Returns an
    /// empty list while it is still the player's turn.
    pub fn skip_ai_turns_if_needed(&self) -> Vec<AiAction> {
        let mut inner = self.lock();
        if inner.stopped || !inner.ai_turn_pending {
            return Vec::new();
        }
        inner.ai_turn_pending = false;

        let agent_ids = inner.ai_agent_ids.clone();
        let mut actions = Vec::with_capacity(agent_ids.len() + 1);
        for agent_id in &agent_ids {
            let target_x = inner.rng.next_below(32) as i32;
            let target_y = inner.rng.next_below(32) as i32;
            let seeds = inner.rng.next_seed_package();
            actions.push(AiAction::FollowPath {
                agent_id: *agent_id,
                target_x,
                target_y,
                seeds,
            });
        }
        let closer_agent = agent_ids.first().copied().unwrap_or(0);
        let seeds = inner.rng.next_seed_package();
        actions.push(AiAction::ActivateSkill {
            weapon_index: 0,
            skill_index: 0,
            skill_id: END_TEAM_TURN_SKILL_ID,
            agent_id: closer_agent,
            target_x: 0,
            target_y: 0,
            seeds,
        });
        actions
    }

    /// Removes and returns all loot accumulated since the last drain.
    pub fn drain_pending_loot(&self) -> Vec<LootGrant> {
        mem::take(&mut self.lock().pending_loot)
    }

    /// Removes and returns all loot-preview item ids since the last drain.
    pub fn drain_pending_loot_previews(&self) -> Vec<String> {
        mem::take(&mut self.lock().pending_previews)
    }

    /// Derives a fresh seed package from the session stream.
    pub fn create_seed_package(&self) -> SeedPackage {
        self.lock().rng.next_seed_package()
    }

    /// Stops the session; all subsequent commands become no-ops.
    pub fn stop(&self) {
        let mut inner = self.lock();
        if !inner.stopped {
            inner.stopped = true;
            debug!("Simulation session for {} stopped", self.map_name);
        }
    }

    fn count_player_action(&self, inner: &mut Inner) {
        inner.player_actions_this_turn += 1;
        if inner.player_actions_this_turn >= PLAYER_ACTIONS_PER_TURN {
            inner.player_actions_this_turn = 0;
            inner.ai_turn_pending = self.ai_enabled;
        }
    }

    fn maybe_roll_loot(&self, inner: &mut Inner) {
        if inner.rng.next_below(LOOT_ROLL_DENOMINATOR) != 0 {
            return;
        }
        let pick = inner.rng.next_below(DROP_TABLE.len() as u32) as usize;
        let (item_id, sell_price, nuyen) = DROP_TABLE[pick];
        inner.pending_previews.push(item_id.to_string());
        inner.pending_loot.push(LootGrant {
            item_id: item_id.to_string(),
            delta: 1,
            sell_price,
            nuyen,
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(ai_enabled: bool) -> SimulationSession {
        SimulationSession::create("m01", "cfg", SeedPackage([1, 2, 3, 4]), "Main Campaign", 0, ai_enabled)
    }

    #[test]
    fn no_ai_actions_while_player_turn_is_running() {
        let sim = session(true);
        assert!(sim.skip_ai_turns_if_needed().is_empty());
        sim.execute_follow_path(1, 5, 5);
        assert!(sim.skip_ai_turns_if_needed().is_empty());
    }

    #[test]
    fn end_team_turn_passes_turn_to_ai() {
        let sim = session(true);
        sim.execute_activate_skill(0, 0, END_TEAM_TURN_SKILL_ID, 1, 0, 0, SeedPackage::FALLBACK);
        let actions = sim.skip_ai_turns_if_needed();
        assert!(!actions.is_empty());
        match actions.last().expect("closing action") {
            AiAction::ActivateSkill { skill_id, .. } => {
                assert_eq!(*skill_id, END_TEAM_TURN_SKILL_ID)
            }
            other => panic!("expected closing skill, got {other:?}"),
        }
        // Turn handed back: no further actions until the player acts again.
        assert!(sim.skip_ai_turns_if_needed().is_empty());
    }

    #[test]
    fn ai_disabled_never_produces_actions() {
        let sim = session(false);
        sim.execute_activate_skill(0, 0, END_TEAM_TURN_SKILL_ID, 1, 0, 0, SeedPackage::FALLBACK);
        assert!(sim.skip_ai_turns_if_needed().is_empty());
    }

    #[test]
    fn identical_seeds_replay_identical_ai_turns() {
        let a = session(true);
        let b = session(true);
        for sim in [&a, &b] {
            sim.execute_activate_skill(0, 0, END_TEAM_TURN_SKILL_ID, 1, 0, 0, SeedPackage::FALLBACK);
        }
        assert_eq!(a.skip_ai_turns_if_needed(), b.skip_ai_turns_if_needed());
        assert_eq!(a.create_seed_package(), b.create_seed_package());
    }

    #[test]
    fn loot_drains_empty() {
        let sim = session(true);
        // Enough offensive actions to make at least one loot roll land.
        for i in 0..32 {
            sim.execute_activate_skill(0, 0, 5, 1, i, i, SeedPackage::FALLBACK);
            sim.skip_ai_turns_if_needed();
        }
        let loot = sim.drain_pending_loot();
        let previews = sim.drain_pending_loot_previews();
        assert!(!loot.is_empty());
        assert_eq!(loot.len(), previews.len());
        assert!(sim.drain_pending_loot().is_empty());
        assert!(sim.drain_pending_loot_previews().is_empty());
    }

    #[test]
    fn stopped_session_ignores_commands() {
        let sim = session(true);
        sim.stop();
        assert!(sim.is_stopped());
        sim.execute_activate_skill(0, 0, END_TEAM_TURN_SKILL_ID, 1, 0, 0, SeedPackage::FALLBACK);
        assert!(sim.skip_ai_turns_if_needed().is_empty());
    }
}
