//! # Simulation - Deterministic Turn-Based Mission Sessions
//!
//! A best-effort local stand-in for the original server-side combat
//! simulation. The protocol engine creates one [`SimulationSession`] per
//! running mission, forwards the player's wire commands into it, and relays
//! the AI actions and loot events it produces back to the client.
//!
//! The session is intentionally simple: it does not evaluate combat rules.
//! It tracks whose turn it is, answers AI turns with a short deterministic
//! action sequence ending in the reserved end-team-turn skill, and rolls
//! loot from a small built-in table. Determinism comes from seed packages
//! (see [`rng::SeedPackage`]) derived from the mission's initial seed, so a
//! reconnecting client replays identical outcomes.

pub use rng::{SeedPackage, SplitMix64};
pub use session::{AiAction, LootGrant, SimulationSession, END_TEAM_TURN_SKILL_ID};

pub mod rng;
pub mod session;
