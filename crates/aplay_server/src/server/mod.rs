//! Server orchestration: listener, per-connection workers, dispatch.

pub mod core;
pub mod handlers;

pub use core::{AplayServer, Engine, Services};
