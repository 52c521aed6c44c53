// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Address-ownership login for the token-gating service.
//!
//! ## Auth Flow
//!
//! 1. Client calls preflight with its address and receives a nonce
//! 2. Wallet signs the nonce (raw keccak or personal-sign header)
//! 3. Server:
//!    - Verifies the signature recovers to the claimed address
//!    - Records the attempt
//!    - Rotates the nonce and issues a session token
//! 4. Client sends `Authorization: Bearer <session token>` on protected calls
//!
//! ## Security
//!
//! - Each session token has its own random HS256 secret stored per address
//! - Only the latest secret for an address verifies, so re-login revokes
//! - Clock skew tolerance is 60 seconds

pub mod error;
pub mod extractor;
pub mod nonce;
pub mod pipeline;
pub mod session;
pub mod signature;

pub use error::AuthError;
pub use extractor::SessionAuth;
pub use nonce::NonceStore;
pub use pipeline::{AuthFlowError, AuthOutcome, AuthService, PreflightOutput, RequestMeta, UserView};
pub use session::SessionIssuer;
pub use signature::{verify_signature, SignatureError};
