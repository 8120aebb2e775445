//! Server configuration types and defaults.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Configuration for the session protocol server.
///
/// The delay/window values exist because the client sequences its UI off
/// server timing; shortening them is safe for tests but changes what a real
/// client perceives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The socket address to bind the server to
    pub bind_address: SocketAddr,

    /// Origin/server id stamped into every outbound Core Envelope
    pub server_id: u32,

    /// Technical name of the storyline driving chapter advancement
    pub storyline: String,

    /// Socket receive timeout in seconds; reads are retried after a timeout
    pub receive_timeout_secs: u64,

    /// Interval of the post-login KeepAlive loop in milliseconds
    pub keepalive_interval_ms: u64,

    /// Delay between creation-info resend attempts in milliseconds
    pub creation_info_resend_ms: u64,

    /// Number of fire-and-forget creation-info resend attempts
    pub creation_info_resend_attempts: u32,

    /// Pause before StartMissionForClients in milliseconds
    pub mission_start_delay_ms: u64,

    /// Pause before post-creation campaign announcements in milliseconds
    pub campaign_announce_delay_ms: u64,

    /// Watchdog window after campaign announcements in milliseconds
    pub campaign_watchdog_ms: u64,

    /// Body served to an HTTP probe; `None` answers a plain `OK`
    pub probe_reply_address: Option<String>,

    /// Currency granted when a brand-new career is committed
    pub starting_karma: i32,
    pub starting_nuyen: i32,

    /// Fixed four-part seed for new simulation sessions
    pub mission_seed: [u32; 4],

    /// Whether AI-controlled teams act (versus always ending their turn)
    pub ai_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 5055)),
            server_id: 1,
            storyline: "Main Campaign".to_string(),
            receive_timeout_secs: 60,
            keepalive_interval_ms: 2000,
            creation_info_resend_ms: 2000,
            creation_info_resend_attempts: 3,
            mission_start_delay_ms: 6000,
            campaign_announce_delay_ms: 1200,
            campaign_watchdog_ms: 10_000,
            probe_reply_address: None,
            starting_karma: 5,
            starting_nuyen: 2000,
            mission_seed: [0x1A2B_3C4D, 0x5E6F_7081, 0x92A3_B4C5, 0xD6E7_F809],
            ai_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address.port(), 5055);
        assert_eq!(config.keepalive_interval_ms, 2000);
        assert_eq!(config.creation_info_resend_attempts, 3);
        assert!(config.ai_enabled);
    }

    #[test]
    fn round_trips_through_serde() {
        let config = ServerConfig::default();
        let json = serde_json::to_string(&config).expect("serialize");
        let back: ServerConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.bind_address, config.bind_address);
        assert_eq!(back.mission_seed, config.mission_seed);
    }
}
