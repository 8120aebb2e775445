//! # APlay Server - Session Protocol Engine
//!
//! A locally-hosted stand-in for a game's proprietary network backend. A
//! client that expects to speak a binary session protocol to a remote
//! server connects here instead; this crate terminates the protocol,
//! reconstructs session/identity/career state, and drives a deterministic
//! turn-based mission simulation.
//!
//! ## Architecture
//!
//! Bytes arrive on a connection and flow leaf-up through the layers:
//!
//! * **Frame codec** ([`codec::frame`]) - null-terminated, base64-encoded
//!   frames reassembled from the TCP stream
//! * **Envelope codec** ([`codec::envelope`]) - the nested Core Envelope and
//!   Shared Field Event binary wrappers
//! * **Payload codecs** ([`codec::strings`], [`jsonscan`]) - UTF-16 string
//!   lists and tolerant ad-hoc JSON extraction
//! * **Dedup/ordering** ([`dedup`]) - per-peer push suppression windows and
//!   the monotonic outbound message-number watermark
//! * **State machine** ([`session`], [`career`], [`metagame_ops`],
//!   [`mission`]) - handshake, login, career selection, metagame
//!   interaction and the in-mission command relay
//!
//! The [`server`] module owns the listener and spawns one worker per
//! connection; collaborators (identity map, career store, static data,
//! generators, simulation) live in the `metagame` and `simulation` crates.
//!
//! ## Failure philosophy
//!
//! Malformed input never terminates a connection. Decoders return
//! `None`/partial results, handlers drop the offending message, and every
//! collaborator failure degrades to a safe fallback. The only intentional
//! closes are explicit protocol rejections (unknown session token, career
//! bootstrap without login) and socket-level EOF/errors.

pub use config::ServerConfig;
pub use error::ServerError;
pub use server::{AplayServer, Engine, Services};

pub mod career;
pub mod codec;
pub mod config;
pub mod connection;
pub mod dedup;
pub mod error;
pub mod jsonscan;
pub mod metagame_ops;
pub mod mission;
pub mod server;
pub mod session;
pub mod wire;
