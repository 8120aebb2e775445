//! Static game-content lookups backed by extracted data files.
//!
//! The interesting tables all live in `metagameplay.json`, a composite object
//! produced by a foreign extraction tool: either `{"Components": [...]}` or a
//! bare component array, where each component is identified by the arrays it
//! carries rather than by a reliable type tag. Shop price tables live in a
//! separate `shops.json`.
//!
//! Each table is cached behind its own mutex and keyed by the source file's
//! modification time, so editing the extracted data on disk takes effect
//! without a restart. Every loader tolerates a missing or malformed file by
//! producing an empty map.

use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;
use tracing::debug;

/// Name of the composite metagameplay data file.
const METAGAMEPLAY_FILE: &str = "metagameplay.json";

/// Name of the shop price table file.
const SHOPS_FILE: &str = "shops.json";

/// One chapter of a storyline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChapterInfo {
    pub index: i32,
    pub technical_name: String,
    pub hub: String,
    pub required_missions: Vec<String>,
    pub required_unlocks: Vec<String>,
    pub dialog_npc_ids: Vec<String>,
}

/// An ordered sequence of chapters gating campaign advancement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorylineInfo {
    pub technical_name: String,
    pub chapters: Vec<ChapterInfo>,
}

/// A granted or removed item stack from a mission reward definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemChange {
    pub item_id: String,
    pub delta: i32,
    pub quality: i32,
    pub flavor: String,
}

#[derive(Debug, Default)]
struct Cached<T> {
    value: Option<T>,
    modified: Option<SystemTime>,
}

#[derive(Debug, Default)]
struct RewardMaps {
    /// `section|mission|outcome|currency` -> amount.
    currency: HashMap<String, i32>,
    /// `section|mission|outcome` -> item changes.
    items: HashMap<String, Vec<ItemChange>>,
}

/// Lock-guarded, mtime-invalidated static data lookups.
#[derive(Debug)]
pub struct StaticData {
    dir: PathBuf,
    storylines: Mutex<Cached<HashMap<String, StorylineInfo>>>,
    rewards: Mutex<Cached<RewardMaps>>,
    shops: Mutex<Cached<HashMap<String, HashMap<String, i32>>>>,
    bodytypes: Mutex<Cached<HashMap<String, u64>>>,
    skill_costs: Mutex<Cached<HashMap<String, i32>>>,
}

impl StaticData {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            storylines: Mutex::new(Cached::default()),
            rewards: Mutex::new(Cached::default()),
            shops: Mutex::new(Cached::default()),
            bodytypes: Mutex::new(Cached::default()),
            skill_costs: Mutex::new(Cached::default()),
        }
    }

    /// Returns the storyline with the given technical name, if present.
    pub fn storyline(&self, technical_name: &str) -> Option<StorylineInfo> {
        if technical_name.trim().is_empty() {
            return None;
        }
        let path = self.dir.join(METAGAMEPLAY_FILE);
        with_cache(&self.storylines, &path, load_storyline_map, |map| {
            map.get(&technical_name.to_ascii_lowercase()).cloned()
        })
    }

    /// Resolves a currency reward from the given reward section
    /// (`Rewards` or `StoryRewards`).
    pub fn mission_currency_reward(
        &self,
        section: &str,
        mission: &str,
        outcome: &str,
        currency: &str,
    ) -> Option<i32> {
        if section.is_empty() || mission.is_empty() || outcome.is_empty() || currency.is_empty() {
            return None;
        }
        let key = format!("{section}|{mission}|{outcome}|{currency}").to_ascii_lowercase();
        let path = self.dir.join(METAGAMEPLAY_FILE);
        with_cache(&self.rewards, &path, load_reward_maps, |maps| {
            maps.currency.get(&key).copied()
        })
    }

    /// Resolves the item changes a mission grants in the given section.
    pub fn mission_item_changes(
        &self,
        section: &str,
        mission: &str,
        outcome: &str,
    ) -> Vec<ItemChange> {
        if section.is_empty() || mission.is_empty() || outcome.is_empty() {
            return Vec::new();
        }
        let key = format!("{section}|{mission}|{outcome}").to_ascii_lowercase();
        let path = self.dir.join(METAGAMEPLAY_FILE);
        with_cache(&self.rewards, &path, load_reward_maps, |maps| {
            maps.items.get(&key).cloned()
        })
        .unwrap_or_default()
    }

    /// Looks up the unit price a shopkeeper charges for an item.
    pub fn shop_price(&self, shop_keeper: &str, item_id: &str) -> Option<i32> {
        if shop_keeper.is_empty() || item_id.is_empty() {
            return None;
        }
        let path = self.dir.join(SHOPS_FILE);
        with_cache(&self.shops, &path, load_shop_map, |map| {
            map.get(&shop_keeper.to_ascii_lowercase())
                .and_then(|prices| prices.get(&item_id.to_ascii_lowercase()).copied())
        })
    }

    /// Maps a (metatype, gender) pair to a bodytype definition id.
    pub fn bodytype_id(&self, metatype_id: u64, gender_id: u64) -> Option<u64> {
        if metatype_id == 0 || gender_id == 0 {
            return None;
        }
        let key = format!("{metatype_id}|{gender_id}");
        let path = self.dir.join(METAGAMEPLAY_FILE);
        with_cache(&self.bodytypes, &path, load_bodytype_map, |map| {
            map.get(&key).copied().filter(|id| *id != 0)
        })
    }

    /// Karma cost of a skill by technical name.
    pub fn skill_karma_cost(&self, skill_technical_name: &str) -> Option<i32> {
        let name = skill_technical_name.trim();
        if name.is_empty() {
            return None;
        }
        let path = self.dir.join(METAGAMEPLAY_FILE);
        with_cache(&self.skill_costs, &path, load_skill_cost_map, |map| {
            map.get(&name.to_ascii_lowercase()).copied().filter(|c| *c > 0)
        })
    }
}

/// Runs `select` against the cached value, reloading it first when the file's
/// mtime changed (or nothing is cached yet).
fn with_cache<T, R>(
    cache: &Mutex<Cached<T>>,
    path: &Path,
    load: fn(&Value) -> T,
    select: impl FnOnce(&T) -> Option<R>,
) -> Option<R>
where
    T: Default,
{
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok();
    let mut guard = match cache.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let stale = guard.value.is_none() || guard.modified != modified;
    if stale {
        let value = match read_json(path) {
            Some(root) => load(&root),
            None => T::default(),
        };
        guard.value = Some(value);
        guard.modified = modified;
    }
    guard.value.as_ref().and_then(select)
}

fn read_json(path: &Path) -> Option<Value> {
    let text = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&text) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("Unparsable static data file {}: {}", path.display(), e);
            None
        }
    }
}

/// The extraction tool emits either `{"Components": [...]}` or a bare array.
fn components(root: &Value) -> Vec<&Value> {
    if let Some(arr) = root.get("Components").and_then(Value::as_array) {
        return arr.iter().collect();
    }
    root.as_array().map(|a| a.iter().collect()).unwrap_or_default()
}

fn str_field(value: &Value, key: &str) -> String {
    value.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn u64_field(value: &Value, key: &str) -> u64 {
    match value.get(key) {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn i32_field(value: &Value, key: &str) -> i32 {
    match value.get(key) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0).clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32,
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn load_storyline_map(root: &Value) -> HashMap<String, StorylineInfo> {
    let mut result = HashMap::new();
    for comp in components(root) {
        let storylines = match comp.get("Storylines").and_then(Value::as_array) {
            Some(arr) => arr,
            None => continue,
        };
        for storyline in storylines {
            let technical_name = str_field(storyline, "TechnicalName");
            if technical_name.trim().is_empty() {
                continue;
            }
            let mut info = StorylineInfo {
                technical_name: technical_name.clone(),
                chapters: Vec::new(),
            };
            let chapters = storyline
                .get("Chapters")
                .and_then(Value::as_array)
                .map(|a| a.as_slice())
                .unwrap_or_default();
            for (index, chapter) in chapters.iter().enumerate() {
                let mut ch = ChapterInfo {
                    index: index as i32,
                    technical_name: str_field(chapter, "TechnicalName"),
                    hub: str_field(chapter, "Hub"),
                    ..ChapterInfo::default()
                };
                if let Some(unlocks) = chapter.get("RequiredUnlocksForNextChapter").and_then(Value::as_array) {
                    for unlock in unlocks {
                        if let Some(name) = unlock.as_str() {
                            if !name.trim().is_empty() {
                                ch.required_unlocks.push(name.to_string());
                            }
                        }
                    }
                }
                // "Required for next chapter" on the data side means "the
                // missions of this chapter" on the gating side.
                if let Some(missions) = chapter.get("RequiredMissionsForNextChapter").and_then(Value::as_array) {
                    for mission_ref in missions {
                        let name = str_field(mission_ref, "Mission");
                        if !name.trim().is_empty() {
                            ch.required_missions.push(name);
                        }
                    }
                }
                if let Some(dialogs) = chapter.get("DialogsForChapter").and_then(Value::as_array) {
                    for dialog in dialogs {
                        let id = str_field(dialog, "Id");
                        if !id.trim().is_empty() && !ch.dialog_npc_ids.contains(&id) {
                            ch.dialog_npc_ids.push(id);
                        }
                    }
                }
                info.chapters.push(ch);
            }
            result.insert(technical_name.to_ascii_lowercase(), info);
        }
    }
    result
}

fn load_reward_maps(root: &Value) -> RewardMaps {
    let mut maps = RewardMaps::default();
    for comp in components(root) {
        let rewards = match comp.get("MissionRewards").and_then(Value::as_array) {
            Some(arr) => arr,
            None => continue,
        };
        for def in rewards {
            let mission = str_field(def, "Mission");
            if mission.trim().is_empty() {
                continue;
            }
            for section in ["Rewards", "StoryRewards"] {
                let by_outcome = match def.get(section).and_then(Value::as_object) {
                    Some(map) => map,
                    None => continue,
                };
                for (outcome, reward) in by_outcome {
                    if let Some(currencies) = reward.get("Currencies").and_then(Value::as_object) {
                        for (currency, amount) in currencies {
                            let amount = amount.as_i64().unwrap_or(0);
                            let key = format!("{section}|{mission}|{outcome}|{currency}")
                                .to_ascii_lowercase();
                            maps.currency.insert(
                                key,
                                amount.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32,
                            );
                        }
                    }
                    if let Some(items) = reward.get("Items").and_then(Value::as_array) {
                        let changes: Vec<ItemChange> = items
                            .iter()
                            .filter_map(|item| {
                                let item_id = str_field(item, "Item");
                                if item_id.trim().is_empty() {
                                    return None;
                                }
                                Some(ItemChange {
                                    item_id,
                                    delta: i32_field(item, "Delta").max(1),
                                    quality: i32_field(item, "Quality"),
                                    flavor: str_field(item, "Flavor"),
                                })
                            })
                            .collect();
                        if !changes.is_empty() {
                            let key =
                                format!("{section}|{mission}|{outcome}").to_ascii_lowercase();
                            maps.items.insert(key, changes);
                        }
                    }
                }
            }
        }
    }
    maps
}

fn load_shop_map(root: &Value) -> HashMap<String, HashMap<String, i32>> {
    let mut result = HashMap::new();
    let shops = root
        .as_array()
        .map(|a| a.iter().collect::<Vec<_>>())
        .unwrap_or_else(|| components(root));
    for shop in shops {
        let keeper = str_field(shop, "ShopKeeper");
        if keeper.trim().is_empty() {
            continue;
        }
        let mut prices = HashMap::new();
        if let Some(table) = shop.get("Prices").and_then(Value::as_object) {
            for (item, price) in table {
                if let Some(price) = price.as_i64() {
                    prices.insert(
                        item.to_ascii_lowercase(),
                        price.clamp(0, i64::from(i32::MAX)) as i32,
                    );
                }
            }
        }
        result.insert(keeper.to_ascii_lowercase(), prices);
    }
    result
}

fn load_bodytype_map(root: &Value) -> HashMap<String, u64> {
    let mut result = HashMap::new();
    for comp in components(root) {
        let defs = match comp.get("BodytypeDefinitions").and_then(Value::as_array) {
            Some(arr) => arr,
            None => continue,
        };
        for def in defs {
            let id = u64_field(def, "Id");
            let metatype = u64_field(def, "MetatypeId");
            let gender = u64_field(def, "GenderId");
            if id == 0 || metatype == 0 || gender == 0 {
                continue;
            }
            result.insert(format!("{metatype}|{gender}"), id);
        }
    }
    result
}

fn load_skill_cost_map(root: &Value) -> HashMap<String, i32> {
    let mut result = HashMap::new();
    for comp in components(root) {
        let type_name = str_field(comp, "TypeName");
        if !type_name.to_ascii_lowercase().contains("skilltreedata") {
            continue;
        }
        let defs = comp
            .get("SkillTreeDefinitions")
            .and_then(Value::as_array)
            .map(|a| a.as_slice())
            .unwrap_or_default();
        for def in defs {
            let levels = def
                .get("SkillLevels")
                .and_then(Value::as_array)
                .map(|a| a.as_slice())
                .unwrap_or_default();
            for level in levels {
                let skills = level
                    .get("SerializedSkills")
                    .and_then(Value::as_array)
                    .map(|a| a.as_slice())
                    .unwrap_or_default();
                for skill in skills {
                    let name = str_field(skill, "TechnicalName");
                    let cost = i32_field(skill, "KarmaCost");
                    if !name.trim().is_empty() && cost > 0 {
                        result.insert(name.trim().to_ascii_lowercase(), cost);
                    }
                }
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_metagameplay(dir: &Path, json: &str) {
        fs::write(dir.join(METAGAMEPLAY_FILE), json).expect("write static data");
    }

    #[test]
    fn missing_files_yield_empty_lookups() {
        let dir = tempfile::tempdir().expect("tempdir");
        let data = StaticData::new(dir.path());
        assert!(data.storyline("Main Campaign").is_none());
        assert!(data.shop_price("keeper", "item").is_none());
        assert!(data.bodytype_id(1, 2).is_none());
        assert!(data.mission_currency_reward("Rewards", "m", "Victory", "Nuyen").is_none());
    }

    #[test]
    fn parses_storyline_composite() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_metagameplay(
            dir.path(),
            r#"{"Components":[{"Storylines":[{"TechnicalName":"Main Campaign","Chapters":[
                {"TechnicalName":"ch1","Hub":"hub_a","RequiredMissionsForNextChapter":[{"Mission":"m01"},{"Mission":"m02"}]},
                {"TechnicalName":"ch2","Hub":"hub_b","RequiredMissionsForNextChapter":[{"Mission":"m03"}]}
            ]}]}]}"#,
        );
        let data = StaticData::new(dir.path());
        let storyline = data.storyline("main campaign").expect("storyline");
        assert_eq!(storyline.chapters.len(), 2);
        assert_eq!(storyline.chapters[0].required_missions, vec!["m01", "m02"]);
        assert_eq!(storyline.chapters[1].hub, "hub_b");
        assert_eq!(storyline.chapters[1].index, 1);
    }

    #[test]
    fn resolves_rewards_by_section_and_outcome() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_metagameplay(
            dir.path(),
            r#"[{"MissionRewards":[{"Mission":"m01",
                "Rewards":{"Victory":{"Currencies":{"Nuyen":500}}},
                "StoryRewards":{"Victory":{"Currencies":{"Karma":3},
                    "Items":[{"Item":"itm_deck","Delta":1,"Quality":2}]}}}]}]"#,
        );
        let data = StaticData::new(dir.path());
        assert_eq!(data.mission_currency_reward("Rewards", "m01", "Victory", "Nuyen"), Some(500));
        assert_eq!(data.mission_currency_reward("StoryRewards", "m01", "Victory", "Karma"), Some(3));
        assert!(data.mission_currency_reward("Rewards", "m01", "Defeat", "Nuyen").is_none());
        let items = data.mission_item_changes("StoryRewards", "m01", "Victory");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item_id, "itm_deck");
        assert_eq!(items[0].quality, 2);
    }

    #[test]
    fn resolves_shop_prices_case_insensitively() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join(SHOPS_FILE),
            r#"[{"ShopKeeper":"Mr. Store","Prices":{"Itm_Medkit":120}}]"#,
        )
        .expect("write shops");
        let data = StaticData::new(dir.path());
        assert_eq!(data.shop_price("mr. store", "itm_medkit"), Some(120));
        assert!(data.shop_price("mr. store", "unknown").is_none());
    }

    #[test]
    fn resolves_bodytype_and_skill_costs() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_metagameplay(
            dir.path(),
            r#"{"Components":[
                {"BodytypeDefinitions":[{"Id":77,"MetatypeId":3,"GenderId":2}]},
                {"TypeName":"X.SkillTreeData","SkillTreeDefinitions":[{"SkillLevels":[
                    {"SerializedSkills":[{"TechnicalName":"sk_rifles_2","KarmaCost":4}]}
                ]}]}
            ]}"#,
        );
        let data = StaticData::new(dir.path());
        assert_eq!(data.bodytype_id(3, 2), Some(77));
        assert!(data.bodytype_id(3, 9).is_none());
        assert_eq!(data.skill_karma_cost("sk_rifles_2"), Some(4));
        assert!(data.skill_karma_cost("sk_unknown").is_none());
    }
}
