// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Transfer Event Decoding
//!
//! Turns a raw log into a [`TransferEvent`] in one step; the updater only ever
//! pattern-matches the result.
//!
//! | topic0 | topics | Event |
//! |--------|--------|-------|
//! | `Transfer` | 3 | ERC-20 transfer, amount in the body |
//! | `Transfer` | 4 | ERC-721 transfer, token id in topic 3 |
//! | `TransferSingle` | 4 | ERC-1155 single, `(id, value)` in the body |
//! | `TransferBatch` | 4 | ERC-1155 batch, `(ids[], values[])` in the body |
//! | anything else | - | `Unknown` |

use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;

use crate::blockchain::contracts::{IERC1155, IERC20, IERC721};
use crate::models::{BalanceChange, TokenDelta, TokenIdentifier};

/// topic0 values the chain subscription filters on.
pub const WATCHED_TOPICS: [B256; 3] = [
    IERC20::Transfer::SIGNATURE_HASH,
    IERC1155::TransferSingle::SIGNATURE_HASH,
    IERC1155::TransferBatch::SIGNATURE_HASH,
];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Transfer log with {0} topics")]
    UnexpectedTopicCount(usize),

    #[error("ABI decode failed: {0}")]
    Abi(String),

    #[error("batch has {ids} ids but {values} values")]
    BatchLengthMismatch { ids: usize, values: usize },

    #[error("log is not mined (no block number)")]
    Pending,
}

/// Every transfer shape the access engine understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    Erc20 {
        from: Address,
        to: Address,
        amount: U256,
    },
    Erc721 {
        from: Address,
        to: Address,
        token_id: U256,
    },
    Erc1155Single {
        from: Address,
        to: Address,
        token_id: U256,
        amount: U256,
    },
    Erc1155Batch {
        from: Address,
        to: Address,
        token_ids: Vec<U256>,
        amounts: Vec<U256>,
    },
    Unknown {
        topic0: Option<B256>,
    },
}

fn abi_err(e: alloy::sol_types::Error) -> DecodeError {
    DecodeError::Abi(e.to_string())
}

/// On-chain amounts above `u64::MAX` are clamped.
fn clamp(amount: U256) -> u64 {
    amount.saturating_to::<u64>()
}

/// Decode a log's topics and body.
pub fn decode_transfer(topics: &[B256], data: &[u8]) -> Result<TransferEvent, DecodeError> {
    let Some(topic0) = topics.first().copied() else {
        return Ok(TransferEvent::Unknown { topic0: None });
    };

    if topic0 == IERC20::Transfer::SIGNATURE_HASH {
        return match topics.len() {
            3 => {
                let ev = IERC20::Transfer::decode_raw_log(topics.iter().copied(), data)
                    .map_err(abi_err)?;
                Ok(TransferEvent::Erc20 {
                    from: ev.from,
                    to: ev.to,
                    amount: ev.value,
                })
            }
            4 => {
                let ev = IERC721::Transfer::decode_raw_log(topics.iter().copied(), data)
                    .map_err(abi_err)?;
                Ok(TransferEvent::Erc721 {
                    from: ev.from,
                    to: ev.to,
                    token_id: ev.tokenId,
                })
            }
            n => Err(DecodeError::UnexpectedTopicCount(n)),
        };
    }

    if topic0 == IERC1155::TransferSingle::SIGNATURE_HASH {
        let ev = IERC1155::TransferSingle::decode_raw_log(topics.iter().copied(), data)
            .map_err(abi_err)?;
        return Ok(TransferEvent::Erc1155Single {
            from: ev.from,
            to: ev.to,
            token_id: ev.id,
            amount: ev.value,
        });
    }

    if topic0 == IERC1155::TransferBatch::SIGNATURE_HASH {
        let ev = IERC1155::TransferBatch::decode_raw_log(topics.iter().copied(), data)
            .map_err(abi_err)?;
        if ev.ids.len() != ev.values.len() {
            return Err(DecodeError::BatchLengthMismatch {
                ids: ev.ids.len(),
                values: ev.values.len(),
            });
        }
        return Ok(TransferEvent::Erc1155Batch {
            from: ev.from,
            to: ev.to,
            token_ids: ev.ids,
            amounts: ev.values,
        });
    }

    Ok(TransferEvent::Unknown {
        topic0: Some(topic0),
    })
}

impl TransferEvent {
    /// `(from, to)` for recognized transfers.
    pub fn endpoints(&self) -> Option<(Address, Address)> {
        match self {
            TransferEvent::Erc20 { from, to, .. }
            | TransferEvent::Erc721 { from, to, .. }
            | TransferEvent::Erc1155Single { from, to, .. }
            | TransferEvent::Erc1155Batch { from, to, .. } => Some((*from, *to)),
            TransferEvent::Unknown { .. } => None,
        }
    }

    /// Balance changes for the sender and the receiver, in that order.
    ///
    /// Batches yield one delta per `(id, amount)` pair on each side so that
    /// each side can be persisted in a single write.
    pub fn balance_changes(&self, contract: Address) -> (Vec<TokenDelta>, Vec<TokenDelta>) {
        let moved = |token: TokenIdentifier, amount: U256| {
            (
                TokenDelta {
                    token,
                    change: BalanceChange::Decrease(clamp(amount)),
                },
                TokenDelta {
                    token,
                    change: BalanceChange::Increase(clamp(amount)),
                },
            )
        };

        match self {
            TransferEvent::Erc20 { amount, .. } => {
                let (out, inc) = moved(TokenIdentifier::fungible(contract), *amount);
                (vec![out], vec![inc])
            }
            TransferEvent::Erc721 { token_id, .. } => {
                let token = TokenIdentifier::new(contract, *token_id);
                (
                    vec![TokenDelta {
                        token,
                        change: BalanceChange::Set(0),
                    }],
                    vec![TokenDelta {
                        token,
                        change: BalanceChange::Set(1),
                    }],
                )
            }
            TransferEvent::Erc1155Single {
                token_id, amount, ..
            } => {
                let (out, inc) = moved(TokenIdentifier::new(contract, *token_id), *amount);
                (vec![out], vec![inc])
            }
            TransferEvent::Erc1155Batch {
                token_ids, amounts, ..
            } => token_ids
                .iter()
                .zip(amounts)
                .map(|(id, amount)| moved(TokenIdentifier::new(contract, *id), *amount))
                .unzip(),
            TransferEvent::Unknown { .. } => (Vec::new(), Vec::new()),
        }
    }
}

/// A decoded transfer with its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLog {
    pub contract: Address,
    pub block_number: u64,
    pub transaction_hash: Option<B256>,
    pub event: TransferEvent,
}

impl DecodedLog {
    pub fn from_rpc_log(log: &Log) -> Result<Self, DecodeError> {
        let block_number = log.block_number.ok_or(DecodeError::Pending)?;
        let event = decode_transfer(log.topics(), &log.data().data)?;
        Ok(Self {
            contract: log.address(),
            block_number,
            transaction_hash: log.transaction_hash,
            event,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::LogData;

    fn a(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn contract() -> Address {
        a(0xcc)
    }

    fn decode(log: LogData) -> Result<TransferEvent, DecodeError> {
        decode_transfer(log.topics(), &log.data)
    }

    #[test]
    fn erc20_transfer_deltas_are_symmetric() {
        let log = IERC20::Transfer {
            from: a(1),
            to: a(2),
            value: U256::from(40),
        }
        .encode_log_data();
        let event = decode(log).unwrap();
        assert_eq!(
            event,
            TransferEvent::Erc20 {
                from: a(1),
                to: a(2),
                amount: U256::from(40)
            }
        );

        let (from, to) = event.balance_changes(contract());
        let token = TokenIdentifier::fungible(contract());
        assert_eq!(from, vec![TokenDelta { token, change: BalanceChange::Decrease(40) }]);
        assert_eq!(to, vec![TokenDelta { token, change: BalanceChange::Increase(40) }]);
    }

    #[test]
    fn erc721_transfer_sets_binary_ownership() {
        let log = IERC721::Transfer {
            from: a(1),
            to: a(2),
            tokenId: U256::from(7),
        }
        .encode_log_data();
        assert_eq!(log.topics().len(), 4);

        let event = decode(log).unwrap();
        let (from, to) = event.balance_changes(contract());
        let token = TokenIdentifier::new(contract(), U256::from(7));
        assert_eq!(from, vec![TokenDelta { token, change: BalanceChange::Set(0) }]);
        assert_eq!(to, vec![TokenDelta { token, change: BalanceChange::Set(1) }]);
    }

    #[test]
    fn erc1155_single_reads_id_and_amount_from_body() {
        let log = IERC1155::TransferSingle {
            operator: a(9),
            from: a(1),
            to: a(2),
            id: U256::from(3),
            value: U256::from(11),
        }
        .encode_log_data();
        assert_eq!(log.data.len(), 64);

        match decode(log).unwrap() {
            TransferEvent::Erc1155Single {
                from,
                to,
                token_id,
                amount,
            } => {
                assert_eq!((from, to), (a(1), a(2)));
                assert_eq!(token_id, U256::from(3));
                assert_eq!(amount, U256::from(11));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn erc1155_batch_yields_one_delta_per_pair() {
        let ids: Vec<U256> = (1..=3).map(U256::from).collect();
        let values: Vec<U256> = [10u64, 20, 30].into_iter().map(U256::from).collect();
        let log = IERC1155::TransferBatch {
            operator: a(9),
            from: a(1),
            to: a(2),
            ids: ids.clone(),
            values: values.clone(),
        }
        .encode_log_data();

        let event = decode(log).unwrap();
        let (from, to) = event.balance_changes(contract());
        assert_eq!(from.len(), 3);
        assert_eq!(to.len(), 3);
        for (i, (out, inc)) in from.iter().zip(&to).enumerate() {
            assert_eq!(out.token, TokenIdentifier::new(contract(), ids[i]));
            assert_eq!(out.change, BalanceChange::Decrease(10 * (i as u64 + 1)));
            assert_eq!(inc.change, BalanceChange::Increase(10 * (i as u64 + 1)));
        }
    }

    #[test]
    fn erc1155_batch_with_uneven_arrays_is_rejected() {
        let log = IERC1155::TransferBatch {
            operator: a(9),
            from: a(1),
            to: a(2),
            ids: (1..=3).map(U256::from).collect(),
            values: vec![U256::from(10), U256::from(20)],
        }
        .encode_log_data();

        assert_eq!(
            decode(log),
            Err(DecodeError::BatchLengthMismatch { ids: 3, values: 2 })
        );
    }

    #[test]
    fn unknown_topic_is_not_an_error() {
        let topic = B256::repeat_byte(0x11);
        let event = decode_transfer(&[topic], &[]).unwrap();
        assert_eq!(event, TransferEvent::Unknown { topic0: Some(topic) });
        assert!(event.endpoints().is_none());
        assert_eq!(event.balance_changes(contract()), (vec![], vec![]));
    }

    #[test]
    fn malformed_logs_are_decode_errors() {
        let transfer = IERC20::Transfer::SIGNATURE_HASH;
        assert_eq!(
            decode_transfer(&[transfer, B256::ZERO], &[]),
            Err(DecodeError::UnexpectedTopicCount(2))
        );
        // ERC-20 shape with a truncated body
        assert!(matches!(
            decode_transfer(&[transfer, B256::ZERO, B256::ZERO], &[0u8; 5]),
            Err(DecodeError::Abi(_))
        ));
    }

    #[test]
    fn huge_amounts_clamp_to_u64() {
        let event = TransferEvent::Erc20 {
            from: a(1),
            to: a(2),
            amount: U256::MAX,
        };
        let (from, _) = event.balance_changes(contract());
        assert_eq!(from[0].change, BalanceChange::Decrease(u64::MAX));
    }

    #[test]
    fn rpc_log_requires_block_number() {
        let data = IERC20::Transfer {
            from: a(1),
            to: a(2),
            value: U256::from(1),
        }
        .encode_log_data();
        let mut log = Log {
            inner: alloy::primitives::Log {
                address: contract(),
                data,
            },
            ..Default::default()
        };
        assert_eq!(DecodedLog::from_rpc_log(&log), Err(DecodeError::Pending));

        log.block_number = Some(77);
        let decoded = DecodedLog::from_rpc_log(&log).unwrap();
        assert_eq!(decoded.block_number, 77);
        assert_eq!(decoded.contract, contract());
    }
}
