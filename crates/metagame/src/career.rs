//! Career slot model: the persisted per-account character profile.
//!
//! An account owns up to [`CAREER_SLOT_COUNT`] slots. Each slot carries the
//! character's appearance, wallet, packed inventory, skill purchases and
//! campaign progress. Slots are mutated transactionally by the protocol
//! engine and written back to the store after every applied change.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of career slots per account identity.
pub const CAREER_SLOT_COUNT: usize = 3;

/// Progression states a story mission can be in, ordered by advancement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MissionState {
    Locked,
    Available,
    ReadyToPlay,
    ReadyToReceiveRewards,
    Completed,
}

impl MissionState {
    /// Parses the wire/storage spelling of a mission state.
    ///
    /// Unknown spellings map to `Locked` so a foreign state string can never
    /// accidentally count as progress.
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "Available" => Self::Available,
            "ReadyToPlay" => Self::ReadyToPlay,
            "ReadyToReceiveRewards" => Self::ReadyToReceiveRewards,
            "Completed" => Self::Completed,
            _ => Self::Locked,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Locked => "Locked",
            Self::Available => "Available",
            Self::ReadyToPlay => "ReadyToPlay",
            Self::ReadyToReceiveRewards => "ReadyToReceiveRewards",
            Self::Completed => "Completed",
        }
    }

    /// Whether this state counts as "done" for chapter advancement.
    pub fn is_at_least_completed(self) -> bool {
        self >= Self::Completed
    }
}

/// Currency balances. All arithmetic saturates; balances never wrap and the
/// nuyen balance is additionally floored at zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Wallet {
    pub karma: i32,
    pub nuyen: i32,
}

impl Wallet {
    /// Applies a signed nuyen delta, clamping the result into `0..=i32::MAX`.
    pub fn apply_nuyen(&mut self, delta: i64) {
        let next = i64::from(self.nuyen).saturating_add(delta);
        self.nuyen = next.clamp(0, i64::from(i32::MAX)) as i32;
    }

    /// Applies a signed karma delta, clamping the result into `0..=i32::MAX`.
    pub fn apply_karma(&mut self, delta: i64) {
        let next = i64::from(self.karma).saturating_add(delta);
        self.karma = next.clamp(0, i64::from(i32::MAX)) as i32;
    }
}

/// Story campaign progress for one career.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CampaignProgress {
    /// Index of the chapter the career currently plays in.
    pub chapter_index: i32,
    /// Mission technical name -> state string (see [`MissionState`]).
    pub mission_states: BTreeMap<String, String>,
    /// NPC ids the character has interacted with, recorded idempotently.
    pub interacted_npcs: Vec<String>,
}

impl CampaignProgress {
    pub fn mission_state(&self, mission: &str) -> MissionState {
        self.mission_states
            .get(mission)
            .map(|s| MissionState::parse(s))
            .unwrap_or(MissionState::Locked)
    }

    pub fn set_mission_state(&mut self, mission: &str, state: MissionState) {
        self.mission_states
            .insert(mission.to_string(), state.as_str().to_string());
    }
}

/// One persisted career slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CareerSlot {
    pub occupied: bool,
    pub name: String,

    // Appearance
    pub skin_id: u64,
    pub bodytype_id: u64,
    pub portrait: String,
    pub voice_set: String,
    pub background_story_id: u64,
    pub wants_background_change: bool,

    // Equipment
    pub primary_weapon: String,
    pub secondary_weapon: String,
    pub armor: String,
    /// Arbitrary equipment slot name -> item id.
    pub equipment: BTreeMap<String, String>,

    /// Packed inventory: `item|quality|flavor` -> quantity. Entries whose
    /// quantity drops to zero or below are removed.
    pub inventory: BTreeMap<String, i32>,

    /// Skill map: `tree|skill` -> level. Re-adding an existing skill is a
    /// no-op.
    pub skills: BTreeMap<String, i32>,

    pub wallet: Wallet,
    pub progress: CampaignProgress,

    /// True while the career was entered via CreateCareer but character
    /// creation has not been committed yet.
    pub pending_creation: bool,
}

/// Builds the packed inventory key for an item stack.
pub fn pack_inventory_key(item: &str, quality: i32, flavor: &str) -> String {
    format!("{item}|{quality}|{flavor}")
}

impl CareerSlot {
    /// Applies a quantity delta to a packed inventory entry, removing the
    /// entry when the resulting quantity is zero or negative.
    pub fn apply_item_change(&mut self, item: &str, delta: i32, quality: i32, flavor: &str) {
        let key = pack_inventory_key(item, quality, flavor);
        let current = self.inventory.get(&key).copied().unwrap_or(0);
        let next = current.saturating_add(delta);
        if next > 0 {
            self.inventory.insert(key, next);
        } else {
            self.inventory.remove(&key);
        }
    }

    /// Adds a skill purchase; returns true when the skill was newly added.
    pub fn add_skill(&mut self, tree: &str, skill: &str, level: i32) -> bool {
        let key = format!("{tree}|{skill}");
        if self.skills.contains_key(&key) {
            return false;
        }
        self.skills.insert(key, level.max(1));
        true
    }

    /// Records an NPC interaction; returns true when the NPC was new.
    pub fn record_npc_interaction(&mut self, npc_id: &str) -> bool {
        if npc_id.is_empty() || self.progress.interacted_npcs.iter().any(|n| n == npc_id) {
            return false;
        }
        self.progress.interacted_npcs.push(npc_id.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mission_state_ordering_matches_progression() {
        assert!(MissionState::Available < MissionState::ReadyToPlay);
        assert!(MissionState::ReadyToReceiveRewards < MissionState::Completed);
        assert!(MissionState::Completed.is_at_least_completed());
        assert!(!MissionState::ReadyToReceiveRewards.is_at_least_completed());
    }

    #[test]
    fn unknown_mission_state_parses_as_locked() {
        assert_eq!(MissionState::parse("Bogus"), MissionState::Locked);
        assert_eq!(MissionState::parse(" Completed "), MissionState::Completed);
    }

    #[test]
    fn wallet_saturates_at_bounds() {
        let mut wallet = Wallet { karma: 0, nuyen: 100 };
        wallet.apply_nuyen(-500);
        assert_eq!(wallet.nuyen, 0);
        wallet.nuyen = i32::MAX - 1;
        wallet.apply_nuyen(i64::from(i32::MAX));
        assert_eq!(wallet.nuyen, i32::MAX);
    }

    #[test]
    fn item_changes_remove_depleted_stacks() {
        let mut slot = CareerSlot::default();
        slot.apply_item_change("medkit", 3, 1, "");
        slot.apply_item_change("medkit", -1, 1, "");
        assert_eq!(slot.inventory.get("medkit|1|"), Some(&2));
        slot.apply_item_change("medkit", -5, 1, "");
        assert!(slot.inventory.is_empty());
    }

    #[test]
    fn skill_purchases_are_idempotent() {
        let mut slot = CareerSlot::default();
        assert!(slot.add_skill("combat", "sk_rifles_2", 2));
        assert!(!slot.add_skill("combat", "sk_rifles_2", 2));
        assert_eq!(slot.skills.len(), 1);
    }

    #[test]
    fn npc_interactions_record_once() {
        let mut slot = CareerSlot::default();
        assert!(slot.record_npc_interaction("npc_fixer"));
        assert!(!slot.record_npc_interaction("npc_fixer"));
        assert!(!slot.record_npc_interaction(""));
        assert_eq!(slot.progress.interacted_npcs.len(), 1);
    }
}
