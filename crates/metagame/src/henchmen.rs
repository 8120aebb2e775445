//! Henchman roster: the NPC allies offered for mission squad selection.
//!
//! Templates come from `henchmen.json` in the static data directory. Like the
//! other static tables the roster is cached behind a mutex and invalidated by
//! file modification time. A missing file produces an empty roster, which the
//! engine answers with an empty collection rather than an error.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::SystemTime;
use tracing::debug;

const HENCHMEN_FILE: &str = "henchmen.json";

/// One offerable henchman template.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HenchmanTemplate {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub technical_name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub bodytype_id: u64,
    #[serde(default)]
    pub level: i32,
}

#[derive(Debug, Default)]
struct Cached {
    roster: Vec<HenchmanTemplate>,
    modified: Option<SystemTime>,
}

/// Process-wide cached henchman roster.
#[derive(Debug)]
pub struct HenchmanRoster {
    dir: PathBuf,
    cache: Mutex<Cached>,
}

impl HenchmanRoster {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(Cached::default()),
        }
    }

    /// Returns the current roster, reloading from disk when the source file
    /// changed. Templates without an id are dropped during load.
    pub fn roster(&self) -> Vec<HenchmanTemplate> {
        let path = self.dir.join(HENCHMEN_FILE);
        let modified = fs::metadata(&path).and_then(|m| m.modified()).ok();

        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if cache.modified != modified || (cache.roster.is_empty() && modified.is_some()) {
            cache.roster = load_roster(&path);
            cache.modified = modified;
        }
        cache.roster.clone()
    }
}

fn load_roster(path: &std::path::Path) -> Vec<HenchmanTemplate> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(_) => return Vec::new(),
    };
    match serde_json::from_str::<Vec<HenchmanTemplate>>(&text) {
        Ok(templates) => templates.into_iter().filter(|t| t.id != 0).collect(),
        Err(e) => {
            debug!("Unparsable henchman file {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_empty_roster() {
        let dir = tempfile::tempdir().expect("tempdir");
        let roster = HenchmanRoster::new(dir.path());
        assert!(roster.roster().is_empty());
    }

    #[test]
    fn loads_templates_and_skips_zero_ids() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join(HENCHMEN_FILE),
            r#"[{"id":5,"technical_name":"hm_tank","display_name":"Brick","level":3},
                {"id":0,"technical_name":"hm_broken"}]"#,
        )
        .expect("write roster");
        let roster = HenchmanRoster::new(dir.path());
        let templates = roster.roster();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].technical_name, "hm_tank");
    }
}
