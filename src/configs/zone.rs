use serde::{Deserialize, Serialize};

/// Zone behavior knobs. Password fields left unset disable the
/// corresponding gate entirely.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ZoneConfig {
    /// Shared secret required to join, when set.
    pub join_password: Option<String>,
    /// Bypass password that skips without a vote, when set.
    pub skip_password: Option<String>,
    /// Privileged password for the reboot message, when set.
    pub reboot_password: Option<String>,

    /// Display names are truncated to this many characters.
    pub name_length: usize,
    /// Chat lines are truncated to this many characters.
    pub chat_length: usize,
    /// Avatar payloads longer than this are dropped.
    pub avatar_length: usize,
    /// Max queued items per submitter address.
    pub queue_limit: usize,

    /// Fraction of active users needed to vote-skip the current item.
    pub skip_threshold: f64,
    /// Fraction of active users reporting playback errors that forces a skip.
    pub error_threshold: f64,

    /// Server-side websocket ping interval.
    pub ping_interval_secs: u64,
    /// Periodic snapshot save interval.
    pub save_interval_secs: u64,
    /// How long an abruptly disconnected identity is kept for reconnection.
    pub grace_secs: u64,
    /// Slack added to the advance timer so it never fires a hair early.
    pub playback_padding_ms: u64,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            join_password: None,
            skip_password: None,
            reboot_password: None,
            name_length: 16,
            chat_length: 160,
            avatar_length: 12,
            queue_limit: 3,
            skip_threshold: 0.6,
            error_threshold: 0.5,
            ping_interval_secs: 20,
            save_interval_secs: 30,
            grace_secs: 30,
            playback_padding_ms: 1000,
        }
    }
}
