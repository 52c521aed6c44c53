// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token Gate - wallet-signature login and token-gated feature access.
//!
//! Users prove address ownership by signing a server-issued nonce and receive
//! a session token. Each user's balances of the tokens that gate features are
//! kept current from chain transfer events, with full on-chain reconciliation
//! as a safety net.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Signature verification, nonces, and session tokens
//! - `blockchain` - EVM contract bindings and RPC reads
//! - `features` - Feature catalog, event listener, and balance updates
//! - `storage` - Embedded document store (redb)

pub mod api;
pub mod auth;
pub mod blockchain;
pub mod config;
pub mod error;
pub mod features;
pub mod models;
pub mod state;
pub mod storage;
