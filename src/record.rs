// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Record categories and identity extraction.
//!
//! Domain records are opaque JSON objects. The engine only ever looks at one
//! field of them, the identity field, which depends on the category:
//!
//! | Category    | Identity field |
//! |-------------|----------------|
//! | `attempts`  | `id`           |
//! | `mastery`   | `id`           |
//! | `schedules` | `id`           |
//! | `settings`  | `key`          |
//!
//! # Example
//!
//! ```
//! use progress_sync::{RecordType, record_identity};
//! use serde_json::json;
//!
//! assert_eq!(record_identity(RecordType::Schedules, &json!({"id": "abc"})), Some("abc".into()));
//! assert_eq!(record_identity(RecordType::Settings, &json!({"key": "theme"})), Some("theme".into()));
//! assert_eq!(record_identity(RecordType::Mastery, &json!({"id": 7})), Some("7".into()));
//! assert_eq!(record_identity(RecordType::Attempts, &json!({"verb": "ser"})), None);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Category of a synced record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Attempts,
    Mastery,
    Schedules,
    Settings,
}

impl RecordType {
    pub const ALL: [RecordType; 4] = [
        RecordType::Attempts,
        RecordType::Mastery,
        RecordType::Schedules,
        RecordType::Settings,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Attempts => "attempts",
            Self::Mastery => "mastery",
            Self::Schedules => "schedules",
            Self::Settings => "settings",
        }
    }

    /// Name of the payload field holding the record's identity.
    #[must_use]
    pub fn identity_field(&self) -> &'static str {
        match self {
            Self::Settings => "key",
            _ => "id",
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "attempts" => Ok(Self::Attempts),
            "mastery" => Ok(Self::Mastery),
            "schedules" => Ok(Self::Schedules),
            "settings" => Ok(Self::Settings),
            other => Err(format!("unknown record type '{}'", other)),
        }
    }
}

/// Extract a record's identity as a string.
///
/// Strings are taken verbatim (empty ones are ignored), numbers by their
/// decimal text. Anything else has no identity.
#[must_use]
pub fn record_identity(record_type: RecordType, payload: &Value) -> Option<String> {
    match payload.get(record_type.identity_field())? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
