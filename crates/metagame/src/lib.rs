//! # Metagame - Identity, Careers and Static Game Data
//!
//! Collaborator crate for the session protocol engine. It owns everything
//! the engine treats as "the outside world" below the wire:
//!
//! * **Session identity map** - short-lived session-token to account-identity
//!   resolution with sliding expiration
//! * **Career store** - persisted per-account career slots (JSON files on disk)
//! * **Static data** - storyline/chapter tables, mission rewards, shop prices,
//!   bodytype and skill-cost lookups, all cached and invalidated by file
//!   modification time
//! * **Generators** - the serialized career-snapshot and match-configuration
//!   blobs the client expects (deflate-compressed, base64-encoded)
//!
//! Every lookup in this crate degrades to an empty/default result on missing
//! or malformed input. The protocol engine must never crash because a static
//! data file is absent or a career file on disk is corrupt.

pub use career::{
    pack_inventory_key, CampaignProgress, CareerSlot, MissionState, Wallet, CAREER_SLOT_COUNT,
};
pub use error::MetagameError;
pub use generator::{CareerInfoGenerator, MatchConfigGenerator, FALLBACK_HUB_STATE};
pub use henchmen::{HenchmanRoster, HenchmanTemplate};
pub use identity::SessionIdentityMap;
pub use static_data::{ChapterInfo, ItemChange, StaticData, StorylineInfo};
pub use store::CareerStore;

pub mod career;
pub mod error;
pub mod generator;
pub mod henchmen;
pub mod identity;
pub mod static_data;
pub mod store;
