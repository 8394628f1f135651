// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable local storage backends.

pub mod traits;
pub mod memory;
pub mod sql;

pub use memory::InMemoryStore;
pub use sql::SqlStore;
pub use traits::{StorageAdapter, StorageError};
