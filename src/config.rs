// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the progress sync engine.
//!
//! # Example
//!
//! ```
//! use progress_sync::SyncConfig;
//!
//! // Minimal config (uses defaults)
//! let config = SyncConfig::default();
//! assert_eq!(config.max_queue_size, 500);
//! assert!(config.sync_enabled);
//!
//! // Point at a staging server with a smaller queue
//! let config = SyncConfig {
//!     api_base_url: "https://staging.example.com/api".into(),
//!     max_queue_size: 100,
//!     ..Default::default()
//! };
//! assert_eq!(config.transaction_timeout_ms, 10_000);
//! ```

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the sync engine.
///
/// All fields have defaults, so a partial JSON/TOML document deserializes
/// cleanly. `max_queue_size` and `queue_storage_key` are read once when the
/// coordinator opens; everything else is re-read at the start of each cycle.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SyncConfig {
    /// Maximum pending operations kept in the mutation queue (oldest evicted first)
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Master switch for remote sync
    #[serde(default = "default_sync_enabled")]
    pub sync_enabled: bool,

    /// Sync against a local development server (no auth check, no wake-up)
    #[serde(default)]
    pub local_sync_mode: bool,

    /// Header carrying the bearer token on remote requests
    #[serde(default = "default_auth_header_name")]
    pub auth_header_name: String,

    /// Base URL of the remote authority
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Timeout guarding every durable-storage operation
    #[serde(default = "default_transaction_timeout_ms")]
    pub transaction_timeout_ms: u64,

    /// Timeout for the best-effort warm-up request
    #[serde(default = "default_wake_timeout_ms")]
    pub wake_timeout_ms: u64,

    /// Timeout for bulk upload/download requests
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Storage key under which the queue is persisted
    #[serde(default = "default_queue_storage_key")]
    pub queue_storage_key: String,

    /// Storage key of the locally-persisted pseudo-identity
    #[serde(default = "default_local_user_id_key")]
    pub local_user_id_key: String,

    /// Storage key of the user's sync on/off preference
    #[serde(default = "default_sync_preference_key")]
    pub sync_preference_key: String,

    /// Local ids starting with any of these (case-insensitive) are placeholders
    #[serde(default = "default_transient_id_prefixes")]
    pub transient_id_prefixes: Vec<String>,

    /// Buffered diagnostic events per subscriber
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

fn default_max_queue_size() -> usize { 500 }
fn default_sync_enabled() -> bool { true }
fn default_auth_header_name() -> String { "Authorization".into() }
fn default_api_base_url() -> String { "http://127.0.0.1:8080".into() }
fn default_transaction_timeout_ms() -> u64 { 10_000 }
fn default_wake_timeout_ms() -> u64 { 5_000 }
fn default_request_timeout_ms() -> u64 { 30_000 }
fn default_queue_storage_key() -> String { "sync_queue".into() }
fn default_local_user_id_key() -> String { "user_id".into() }
fn default_sync_preference_key() -> String { "sync_enabled".into() }
fn default_event_channel_capacity() -> usize { 64 }

fn default_transient_id_prefixes() -> Vec<String> {
    ["temp-", "temp_", "anon-", "anonymous", "guest", "local-", "placeholder"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            sync_enabled: default_sync_enabled(),
            local_sync_mode: false,
            auth_header_name: default_auth_header_name(),
            api_base_url: default_api_base_url(),
            transaction_timeout_ms: default_transaction_timeout_ms(),
            wake_timeout_ms: default_wake_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            queue_storage_key: default_queue_storage_key(),
            local_user_id_key: default_local_user_id_key(),
            sync_preference_key: default_sync_preference_key(),
            transient_id_prefixes: default_transient_id_prefixes(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    #[must_use]
    pub fn wake_timeout(&self) -> Duration {
        Duration::from_millis(self.wake_timeout_ms)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Whether a locally-persisted id is a throwaway placeholder.
    ///
    /// Blank ids and the literal strings `"null"`/`"undefined"` (left behind by
    /// serializing a missing value) always count as transient.
    #[must_use]
    pub fn is_transient_id(&self, id: &str) -> bool {
        let id = id.trim().to_ascii_lowercase();
        if id.is_empty() || id == "null" || id == "undefined" {
            return true;
        }
        self.transient_id_prefixes
            .iter()
            .any(|prefix| id.starts_with(&prefix.to_ascii_lowercase()))
    }
}
