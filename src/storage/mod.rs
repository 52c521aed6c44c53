// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Persistent document store for the access engine. All data lives in a
//! single redb file under `DATA_DIR`:
//!
//! ```text
//! $DATA_DIR/
//!   access.redb     # users, nonces, session keys, flags, access states
//! ```

pub mod database;

pub use database::{AccessDatabase, ApplyOutcome, DbError, DbResult, NonceConsumption};

/// File name of the redb database inside the data directory.
pub const DATABASE_FILE: &str = "access.redb";
