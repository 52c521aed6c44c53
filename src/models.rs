// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Domain Models
//!
//! Data types shared by storage, authentication and the access engine.
//!
//! ## Addresses
//!
//! The [`WalletAddress`] newtype wraps an EVM address in its normalized
//! (lowercase, `0x`-prefixed) string form. It is the join key between users,
//! nonces, session keys and on-chain transfer endpoints.
//!
//! ## Model Categories
//!
//! - **Identity**: [`User`], [`Nonce`], [`LoginAttempt`], [`SessionKey`]
//! - **Gating**: [`FeatureFlag`], [`TokenIdentifier`], [`TokenStandard`]
//! - **Balances**: [`AccessState`], [`BalanceChange`], [`TokenDelta`]

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// =============================================================================
// Wallet Address Type
// =============================================================================

/// Error returned when a string is not a valid 20-byte hex address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid address: {0}")]
pub struct AddressError(pub String);

/// Normalized EVM address.
///
/// Format: `0x` followed by 40 lowercase hexadecimal characters. Parsing is
/// case-insensitive, so checksummed input compares equal to its lowercase form.
///
/// # Example
///
/// ```rust,ignore
/// let addr: WalletAddress = "0x742d35Cc6634C0532925a3b844Bc9e7595f4aB12".parse()?;
/// assert_eq!(addr.as_str(), "0x742d35cc6634c0532925a3b844bc9e7595f4ab12");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "String", into = "String")]
#[schema(value_type = String, example = "0x742d35cc6634c0532925a3b844bc9e7595f4ab12")]
pub struct WalletAddress(String);

impl WalletAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The address as a typed alloy [`Address`].
    pub fn address(&self) -> Address {
        // Invariant: the inner string was produced from a valid Address.
        Address::from_str(&self.0).unwrap_or(Address::ZERO)
    }
}

impl FromStr for WalletAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let address =
            Address::from_str(trimmed).map_err(|_| AddressError(trimmed.to_string()))?;
        Ok(Self::from(address))
    }
}

impl From<Address> for WalletAddress {
    fn from(value: Address) -> Self {
        WalletAddress(alloy::hex::encode_prefixed(value))
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WalletAddress> for String {
    fn from(value: WalletAddress) -> Self {
        value.0
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Identity Models
// =============================================================================

/// A registered user. May own several linked addresses.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    pub addresses: Vec<WalletAddress>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(address: WalletAddress) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            username: None,
            bio: None,
            addresses: vec![address],
            created_at: now,
            updated_at: now,
        }
    }
}

/// Challenge string issued to an address. Only the latest one is live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Nonce {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub value: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub address: WalletAddress,
}

/// Immutable audit record of a create/login/add-address attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoginAttempt {
    pub id: String,
    pub address: WalletAddress,
    pub signature: String,
    pub nonce_value: String,
    pub user_exists: bool,
    pub signature_valid: bool,
    #[serde(default)]
    pub request_host: Option<String>,
    #[serde(default)]
    pub request_headers: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// Server-held signing material for one issued session token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionKey {
    pub id: String,
    pub address: WalletAddress,
    pub secret_value: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Gating Models
// =============================================================================

/// Token standard of a gated token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum TokenStandard {
    Erc20,
    Erc721,
    Erc1155,
}

/// `(contract address, token id)` pair. ERC-20 tokens use token id `0`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenIdentifier {
    #[schema(value_type = String, example = "0x5fbdb2315678afecb367f032d93f642f64180aa3")]
    pub address: Address,
    #[schema(value_type = String, example = "0x0")]
    pub token_id: U256,
}

impl TokenIdentifier {
    /// Sentinel token id used for fungible (ERC-20) tokens.
    pub const FUNGIBLE_TOKEN_ID: U256 = U256::ZERO;

    pub fn new(address: Address, token_id: U256) -> Self {
        Self { address, token_id }
    }

    pub fn fungible(address: Address) -> Self {
        Self::new(address, Self::FUNGIBLE_TOKEN_ID)
    }
}

/// Persisted string form: `<lowercase address>+<hex token id>`.
impl fmt::Display for TokenIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}+{:#x}",
            alloy::hex::encode_prefixed(self.address),
            self.token_id
        )
    }
}

impl FromStr for TokenIdentifier {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, token_id) = s
            .split_once('+')
            .ok_or_else(|| AddressError(s.to_string()))?;
        let address = Address::from_str(address).map_err(|_| AddressError(s.to_string()))?;
        let token_id = U256::from_str(token_id).map_err(|_| AddressError(s.to_string()))?;
        Ok(Self { address, token_id })
    }
}

/// A named capability unlocked by owning at least `required_amount` of a token.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct FeatureFlag {
    pub name: String,
    pub required_token: TokenIdentifier,
    pub required_amount: u64,
    pub token_type: TokenStandard,
}

impl FeatureFlag {
    /// Key under which this flag's balance is tracked in [`AccessState`].
    ///
    /// Fungible flags always collapse to the sentinel token id.
    pub fn token(&self) -> TokenIdentifier {
        match self.token_type {
            TokenStandard::Erc20 => TokenIdentifier::fungible(self.required_token.address),
            TokenStandard::Erc721 | TokenStandard::Erc1155 => self.required_token,
        }
    }
}

// =============================================================================
// Balance Models
// =============================================================================

/// Per-user balances of every gated token, as of `block_number`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AccessState {
    pub user_id: String,
    #[serde(with = "token_map")]
    pub required_tokens_owned: BTreeMap<TokenIdentifier, u64>,
    pub block_number: u64,
}

impl AccessState {
    pub fn new(user_id: impl Into<String>, block_number: u64) -> Self {
        Self {
            user_id: user_id.into(),
            required_tokens_owned: BTreeMap::new(),
            block_number,
        }
    }

    /// Owned balance for a token; untracked tokens count as zero.
    pub fn owned(&self, token: &TokenIdentifier) -> u64 {
        self.required_tokens_owned.get(token).copied().unwrap_or(0)
    }

    /// Apply a batch of changes in order.
    pub fn apply(&mut self, deltas: &[TokenDelta]) {
        for delta in deltas {
            let current = self.owned(&delta.token);
            self.required_tokens_owned
                .insert(delta.token, delta.change.apply(current));
        }
    }
}

/// A change to one balance entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceChange {
    Increase(u64),
    Decrease(u64),
    /// Absolute value (ERC-721 ownership is 0 or 1, never a running total).
    Set(u64),
}

impl BalanceChange {
    /// Saturates at `0` and `u64::MAX`.
    pub fn apply(self, current: u64) -> u64 {
        match self {
            BalanceChange::Increase(amount) => current.saturating_add(amount),
            BalanceChange::Decrease(amount) => current.saturating_sub(amount),
            BalanceChange::Set(value) => value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenDelta {
    pub token: TokenIdentifier,
    pub change: BalanceChange,
}

/// String-keyed (de)serialization of the balance map.
mod token_map {
    use std::collections::BTreeMap;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::TokenIdentifier;

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<TokenIdentifier, u64>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_map(map.iter().map(|(k, v)| (k.to_string(), v)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<TokenIdentifier, u64>, D::Error> {
        let raw = BTreeMap::<String, u64>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(k, v)| {
                k.parse::<TokenIdentifier>()
                    .map(|token| (token, v))
                    .map_err(D::Error::custom)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    #[test]
    fn wallet_address_normalizes_case() {
        let a: WalletAddress = "0xABCD1234567890ABCDEF1234567890ABCDEF1234".parse().unwrap();
        let b: WalletAddress = "0xabcd1234567890abcdef1234567890abcdef1234".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "0xabcd1234567890abcdef1234567890abcdef1234");
        assert_eq!(
            a.address(),
            address!("0xabcd1234567890abcdef1234567890abcdef1234")
        );
    }

    #[test]
    fn wallet_address_rejects_garbage() {
        assert!("not-an-address".parse::<WalletAddress>().is_err());
        assert!("0x1234".parse::<WalletAddress>().is_err());
        assert!(serde_json::from_str::<WalletAddress>("\"0xzz\"").is_err());
    }

    #[test]
    fn token_identifier_string_form() {
        let token = TokenIdentifier::new(
            address!("0x5FbDB2315678afecb367f032d93F642f64180aa3"),
            U256::from(255),
        );
        let s = token.to_string();
        assert_eq!(s, "0x5fbdb2315678afecb367f032d93f642f64180aa3+0xff");
        assert_eq!(s.parse::<TokenIdentifier>().unwrap(), token);
    }

    #[test]
    fn access_state_persists_string_keys() {
        let token = TokenIdentifier::fungible(address!("0x5FbDB2315678afecb367f032d93F642f64180aa3"));
        let mut state = AccessState::new("user-1", 42);
        state.required_tokens_owned.insert(token, 7);

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(
            json["required_tokens_owned"]["0x5fbdb2315678afecb367f032d93f642f64180aa3+0x0"],
            7
        );
        assert_eq!(json["block_number"], 42);

        let back: AccessState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn balance_change_saturates() {
        assert_eq!(BalanceChange::Decrease(10).apply(3), 0);
        assert_eq!(BalanceChange::Increase(1).apply(u64::MAX), u64::MAX);
        assert_eq!(BalanceChange::Set(1).apply(40), 1);
    }

    #[test]
    fn fungible_flags_use_sentinel_token_id() {
        let flag = FeatureFlag {
            name: "vip".into(),
            required_token: TokenIdentifier::new(Address::repeat_byte(0xab), U256::from(9)),
            required_amount: 5,
            token_type: TokenStandard::Erc20,
        };
        assert_eq!(flag.token().token_id, TokenIdentifier::FUNGIBLE_TOKEN_ID);

        let json = serde_json::to_value(&flag).unwrap();
        assert_eq!(json["token_type"], "ERC20");
    }
}
