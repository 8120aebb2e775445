//! Career store: one JSON file per account identity under a data directory.
//!
//! Writes go through a temp file + rename so a crash mid-write cannot corrupt
//! an account record. All read failures degrade to a default record (three
//! empty slots) and are logged at diagnostic level; the protocol engine never
//! sees an error it would have to surface to the client.

use crate::career::{CareerSlot, CAREER_SLOT_COUNT};
use crate::error::MetagameError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Persisted record for one account identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccountRecord {
    slots: Vec<CareerSlot>,
    last_slot_index: i32,
}

impl Default for AccountRecord {
    fn default() -> Self {
        Self {
            slots: vec![CareerSlot::default(); CAREER_SLOT_COUNT],
            last_slot_index: 0,
        }
    }
}

impl AccountRecord {
    /// Guarantees exactly [`CAREER_SLOT_COUNT`] slots regardless of what was
    /// on disk.
    fn normalize(mut self) -> Self {
        self.slots.truncate(CAREER_SLOT_COUNT);
        while self.slots.len() < CAREER_SLOT_COUNT {
            self.slots.push(CareerSlot::default());
        }
        self
    }
}

/// File-backed career store.
///
/// A single process-wide mutex serializes read-modify-write cycles; career
/// traffic is light enough that finer-grained locking buys nothing.
#[derive(Debug)]
pub struct CareerStore {
    data_dir: PathBuf,
    io_lock: Mutex<()>,
}

impl CareerStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            io_lock: Mutex::new(()),
        }
    }

    /// Returns the slot at `index`, creating a default one in the record when
    /// `create_if_missing` is set and the slot is unoccupied. `None` when the
    /// index is out of range or the slot is unoccupied and creation was not
    /// requested.
    pub fn get_or_create_slot(
        &self,
        identity: &str,
        index: usize,
        create_if_missing: bool,
    ) -> Option<CareerSlot> {
        if index >= CAREER_SLOT_COUNT {
            return None;
        }
        let record = self.load(identity);
        let slot = record.slots[index].clone();
        if slot.occupied || create_if_missing {
            Some(slot)
        } else {
            None
        }
    }

    /// Writes a slot back, persisting the whole account record.
    pub fn upsert(&self, identity: &str, index: usize, slot: &CareerSlot) {
        if index >= CAREER_SLOT_COUNT {
            return;
        }
        let _guard = self.lock();
        let mut record = self.load_unlocked(identity);
        record.slots[index] = slot.clone();
        self.save_unlocked(identity, &record);
    }

    /// Lists all slots for an identity; always exactly three entries.
    pub fn list_slots(&self, identity: &str) -> Vec<CareerSlot> {
        self.load(identity).slots
    }

    pub fn last_slot_index(&self, identity: &str) -> i32 {
        self.load(identity).last_slot_index
    }

    pub fn set_last_slot_index(&self, identity: &str, index: i32) {
        let _guard = self.lock();
        let mut record = self.load_unlocked(identity);
        record.last_slot_index = index.clamp(0, CAREER_SLOT_COUNT as i32 - 1);
        self.save_unlocked(identity, &record);
    }

    /// Clears a slot back to an unoccupied default, keeping only the default
    /// hub in its campaign progress so the client lands somewhere sane.
    pub fn deactivate_slot(&self, identity: &str, index: usize, default_hub: &str) {
        if index >= CAREER_SLOT_COUNT {
            return;
        }
        let _guard = self.lock();
        let mut record = self.load_unlocked(identity);
        let mut fresh = CareerSlot::default();
        if !default_hub.is_empty() {
            fresh
                .progress
                .mission_states
                .insert(default_hub.to_string(), "Available".to_string());
        }
        record.slots[index] = fresh;
        self.save_unlocked(identity, &record);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        match self.io_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn load(&self, identity: &str) -> AccountRecord {
        let _guard = self.lock();
        self.load_unlocked(identity)
    }

    fn load_unlocked(&self, identity: &str) -> AccountRecord {
        let path = self.account_path(identity);
        match fs::read_to_string(&path) {
            Ok(json) => match serde_json::from_str::<AccountRecord>(&json) {
                Ok(record) => record.normalize(),
                Err(e) => {
                    warn!("Discarding corrupt account record {}: {}", path.display(), e);
                    AccountRecord::default()
                }
            },
            Err(_) => AccountRecord::default(),
        }
    }

    fn save_unlocked(&self, identity: &str, record: &AccountRecord) {
        if let Err(e) = self.try_save(identity, record) {
            warn!("Failed to persist account record for {identity}: {e}");
        }
    }

    fn try_save(&self, identity: &str, record: &AccountRecord) -> Result<(), MetagameError> {
        fs::create_dir_all(&self.data_dir)?;
        let path = self.account_path(identity);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(record)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        debug!("Persisted account record {}", path.display());
        Ok(())
    }

    fn account_path(&self, identity: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", sanitize_identity(identity)))
    }
}

/// Restricts identity-derived file names to a safe character set.
fn sanitize_identity(identity: &str) -> String {
    let cleaned: String = identity
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "_anonymous".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::career::MissionState;

    fn store() -> (tempfile::TempDir, CareerStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CareerStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn lists_three_slots_for_unknown_identity() {
        let (_dir, store) = store();
        let slots = store.list_slots("fresh");
        assert_eq!(slots.len(), CAREER_SLOT_COUNT);
        assert!(slots.iter().all(|s| !s.occupied));
    }

    #[test]
    fn upsert_round_trips_through_disk() {
        let (_dir, store) = store();
        let mut slot = CareerSlot::default();
        slot.occupied = true;
        slot.name = "Shade".to_string();
        slot.wallet.nuyen = 1234;
        slot.progress.set_mission_state("m01", MissionState::Available);
        store.upsert("acct", 1, &slot);

        let loaded = store.get_or_create_slot("acct", 1, false).expect("slot");
        assert_eq!(loaded, slot);
        assert_eq!(store.list_slots("acct")[0], CareerSlot::default());
    }

    #[test]
    fn unoccupied_slot_requires_create_flag() {
        let (_dir, store) = store();
        assert!(store.get_or_create_slot("acct", 0, false).is_none());
        assert!(store.get_or_create_slot("acct", 0, true).is_some());
        assert!(store.get_or_create_slot("acct", 9, true).is_none());
    }

    #[test]
    fn deactivate_clears_slot_and_seeds_hub() {
        let (_dir, store) = store();
        let mut slot = CareerSlot::default();
        slot.occupied = true;
        slot.name = "Gone".to_string();
        store.upsert("acct", 0, &slot);

        store.deactivate_slot("acct", 0, "hub_seattle");
        let cleared = store.list_slots("acct")[0].clone();
        assert!(!cleared.occupied);
        assert_eq!(
            cleared.progress.mission_states.get("hub_seattle").map(String::as_str),
            Some("Available")
        );
    }

    #[test]
    fn corrupt_record_degrades_to_default() {
        let (dir, store) = store();
        std::fs::write(dir.path().join("acct.json"), b"{ not json").expect("write");
        assert_eq!(store.list_slots("acct").len(), CAREER_SLOT_COUNT);
    }

    #[test]
    fn last_slot_index_is_clamped() {
        let (_dir, store) = store();
        store.set_last_slot_index("acct", 17);
        assert_eq!(store.last_slot_index("acct"), 2);
    }
}
