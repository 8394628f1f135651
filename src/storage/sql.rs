// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL storage backend for durable local state.
//!
//! SQLite is the normal on-device backend; the MySQL dialect is supported so
//! the same store can back a server-side replica in tests or tooling.
//!
//! Schema:
//! ```sql
//! CREATE TABLE kv_store (
//!   name  VARCHAR(255) PRIMARY KEY,
//!   value LONGTEXT NOT NULL           -- JSON as text
//! );
//! CREATE TABLE local_records (
//!   seq         BIGINT AUTO_INCREMENT PRIMARY KEY,  -- insertion order
//!   record_type VARCHAR(32)  NOT NULL,
//!   record_id   VARCHAR(255) NOT NULL,
//!   payload     LONGTEXT     NOT NULL,
//!   UNIQUE (record_type, record_id)
//! );
//! ```
//!
//! ## sqlx Any Driver Quirks
//!
//! MySQL LONGTEXT comes back as BLOB through the `Any` driver, so text
//! columns are read as `String` first and then as UTF-8 bytes.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use std::sync::Once;
use std::time::Duration;

use crate::record::{record_identity, RecordType};
use crate::resilience::retry::{retry, RetryConfig};
use super::traits::{StorageAdapter, StorageError};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

pub struct SqlStore {
    pool: AnyPool,
    is_sqlite: bool,
}

impl SqlStore {
    /// Open a SQL store with startup-mode retry (fails fast if config is wrong).
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        install_drivers();

        let is_sqlite = connection_string.starts_with("sqlite:");

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(if is_sqlite { 1 } else { 10 })
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        let store = Self { pool, is_sqlite };

        if is_sqlite {
            store.enable_wal_mode().await?;
        }

        store.init_schema().await?;
        Ok(store)
    }

    /// Enable WAL mode so readers don't block the queue writer.
    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let statements: &[&str] = if self.is_sqlite {
            &[
                r#"
                CREATE TABLE IF NOT EXISTS kv_store (
                    name TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS local_records (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    record_type TEXT NOT NULL,
                    record_id TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    UNIQUE (record_type, record_id)
                )
                "#,
            ]
        } else {
            &[
                r#"
                CREATE TABLE IF NOT EXISTS kv_store (
                    name VARCHAR(255) PRIMARY KEY,
                    value LONGTEXT NOT NULL
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS local_records (
                    seq BIGINT AUTO_INCREMENT PRIMARY KEY,
                    record_type VARCHAR(32) NOT NULL,
                    record_id VARCHAR(255) NOT NULL,
                    payload LONGTEXT NOT NULL,
                    UNIQUE KEY uq_record (record_type, record_id)
                )
                "#,
            ]
        };

        for sql in statements {
            retry("sql_init_schema", &RetryConfig::startup(), || async {
                sqlx::query(sql)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| StorageError::Backend(e.to_string()))
            })
            .await?;
        }

        Ok(())
    }

    /// Read a text column, tolerating the BLOB mapping of MySQL LONGTEXT.
    fn text_column(row: &AnyRow, column: &str) -> Option<String> {
        row.try_get::<String, _>(column).ok().or_else(|| {
            row.try_get::<Vec<u8>, _>(column)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
    }

    fn parse_json(key: &str, text: &str) -> Result<Value, StorageError> {
        serde_json::from_str(text).map_err(|e| StorageError::Corruption {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl StorageAdapter for SqlStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE name = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        match row {
            Some(row) => {
                let text = Self::text_column(&row, "value").ok_or_else(|| StorageError::Corruption {
                    key: key.to_string(),
                    reason: "value column unreadable".to_string(),
                })?;
                Self::parse_json(key, &text).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        let sql = if self.is_sqlite {
            "INSERT INTO kv_store (name, value) VALUES (?, ?)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value"
        } else {
            "INSERT INTO kv_store (name, value) VALUES (?, ?)
             ON DUPLICATE KEY UPDATE value = VALUES(value)"
        };

        sqlx::query(sql)
            .bind(key)
            .bind(value.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn load_records(&self, record_type: RecordType) -> Result<Vec<Value>, StorageError> {
        let rows = sqlx::query(
            "SELECT record_id, payload FROM local_records WHERE record_type = ? ORDER BY seq ASC",
        )
        .bind(record_type.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let id = Self::text_column(&row, "record_id").unwrap_or_default();
            let label = format!("{}/{}", record_type, id);
            let text = Self::text_column(&row, "payload").ok_or_else(|| StorageError::Corruption {
                key: label.clone(),
                reason: "payload column unreadable".to_string(),
            })?;
            records.push(Self::parse_json(&label, &text)?);
        }
        Ok(records)
    }

    async fn insert_records(
        &self,
        record_type: RecordType,
        records: &[Value],
    ) -> Result<usize, StorageError> {
        let sql = if self.is_sqlite {
            "INSERT OR IGNORE INTO local_records (record_type, record_id, payload) VALUES (?, ?, ?)"
        } else {
            "INSERT IGNORE INTO local_records (record_type, record_id, payload) VALUES (?, ?, ?)"
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let mut inserted = 0usize;
        for record in records {
            let Some(id) = record_identity(record_type, record) else {
                continue;
            };
            let result = sqlx::query(sql)
                .bind(record_type.as_str())
                .bind(id)
                .bind(record.to_string())
                .execute(&mut *tx)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            inserted += result.rows_affected() as usize;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::Backend(format!("Record insert commit failed: {}", e)))?;

        Ok(inserted)
    }
}
