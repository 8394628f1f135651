// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resilience primitives: startup retry for storage, circuit breaker for the remote.

pub mod circuit_breaker;
pub mod retry;
