// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Deposit request model, its EIP-712 identity and the status lifecycle.

use ethers::abi::{encode, ParamType, Token};
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const ASSET_TYPE: &str = "Asset(address assetAddr,uint256 id)";
pub const STEALTH_ADDRESS_TYPE: &str = "StealthAddress(uint256 h1,uint256 h2)";
/// Referenced struct types are appended in alphabetical order as EIP-712 requires
pub const DEPOSIT_REQUEST_TYPE: &str = "DepositRequest(address spender,Asset asset,uint256 value,StealthAddress depositAddr,uint256 nonce,uint256 gasCompensation)Asset(address assetAddr,uint256 id)StealthAddress(uint256 h1,uint256 h2)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub asset_addr: Address,
    pub id: U256,
}

impl Asset {
    pub fn erc20(asset_addr: Address) -> Self {
        Self {
            asset_addr,
            id: U256::zero(),
        }
    }

    fn struct_hash(&self) -> [u8; 32] {
        keccak256(encode(&[
            Token::FixedBytes(keccak256(ASSET_TYPE).to_vec()),
            Token::Address(self.asset_addr),
            Token::Uint(self.id),
        ]))
    }
}

/// Compressed stealth address the deposited note is created for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StealthAddress {
    pub h1: U256,
    pub h2: U256,
}

impl StealthAddress {
    fn struct_hash(&self) -> [u8; 32] {
        keccak256(encode(&[
            Token::FixedBytes(keccak256(STEALTH_ADDRESS_TYPE).to_vec()),
            Token::Uint(self.h1),
            Token::Uint(self.h2),
        ]))
    }
}

/// A deposit instantiated on-chain. Immutable once observed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositRequest {
    pub spender: Address,
    pub asset: Asset,
    pub value: U256,
    pub deposit_addr: StealthAddress,
    pub nonce: U256,
    pub gas_compensation: U256,
}

impl DepositRequest {
    /// EIP-712 struct hash. Used as the idempotency key for queue jobs,
    /// status records and on-chain outstanding checks.
    pub fn hash(&self) -> DepositHash {
        DepositHash(H256::from(self.struct_hash()))
    }

    pub(crate) fn struct_hash(&self) -> [u8; 32] {
        keccak256(encode(&[
            Token::FixedBytes(keccak256(DEPOSIT_REQUEST_TYPE).to_vec()),
            Token::Address(self.spender),
            Token::FixedBytes(self.asset.struct_hash().to_vec()),
            Token::Uint(self.value),
            Token::FixedBytes(self.deposit_addr.struct_hash().to_vec()),
            Token::Uint(self.nonce),
            Token::Uint(self.gas_compensation),
        ]))
    }

    /// ABI tuple layout matching the on-chain `DepositRequest` struct
    pub fn to_token(&self) -> Token {
        Token::Tuple(vec![
            Token::Address(self.spender),
            Token::Tuple(vec![
                Token::Address(self.asset.asset_addr),
                Token::Uint(self.asset.id),
            ]),
            Token::Uint(self.value),
            Token::Tuple(vec![
                Token::Uint(self.deposit_addr.h1),
                Token::Uint(self.deposit_addr.h2),
            ]),
            Token::Uint(self.nonce),
            Token::Uint(self.gas_compensation),
        ])
    }

    pub fn param_type() -> ParamType {
        ParamType::Tuple(vec![
            ParamType::Address,
            ParamType::Tuple(vec![ParamType::Address, ParamType::Uint(256)]),
            ParamType::Uint(256),
            ParamType::Tuple(vec![ParamType::Uint(256), ParamType::Uint(256)]),
            ParamType::Uint(256),
            ParamType::Uint(256),
        ])
    }

    /// Inverse of [`DepositRequest::to_token`]. `None` if the layout does not match.
    pub fn from_token(token: Token) -> Option<Self> {
        let mut fields = token.into_tuple()?.into_iter();
        let spender = fields.next()?.into_address()?;
        let mut asset = fields.next()?.into_tuple()?.into_iter();
        let asset = Asset {
            asset_addr: asset.next()?.into_address()?,
            id: asset.next()?.into_uint()?,
        };
        let value = fields.next()?.into_uint()?;
        let mut deposit_addr = fields.next()?.into_tuple()?.into_iter();
        let deposit_addr = StealthAddress {
            h1: deposit_addr.next()?.into_uint()?,
            h2: deposit_addr.next()?.into_uint()?,
        };
        Some(Self {
            spender,
            asset,
            value,
            deposit_addr,
            nonce: fields.next()?.into_uint()?,
            gas_compensation: fields.next()?.into_uint()?,
        })
    }

    pub fn asset_address(&self) -> Address {
        self.asset.asset_addr
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DepositHash(pub H256);

impl DepositHash {
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for DepositHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl FromStr for DepositHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        H256::from_str(s.trim_start_matches("0x"))
            .map(DepositHash)
            .map_err(|e| format!("invalid deposit hash {}: {}", s, e))
    }
}

impl From<H256> for DepositHash {
    fn from(h: H256) -> Self {
        DepositHash(h)
    }
}

/// Lifecycle of a deposit as seen by the screener.
///
/// Progression is monotonic:
/// `DoesNotExist -> PassedFirstScreen -> AwaitingFulfillment -> Completed`,
/// with `FailedScreen` reachable from the first two and terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DepositRequestStatus {
    DoesNotExist,
    PassedFirstScreen,
    FailedScreen,
    AwaitingFulfillment,
    Completed,
}

impl DepositRequestStatus {
    fn rank(&self) -> u8 {
        match self {
            DepositRequestStatus::DoesNotExist => 0,
            DepositRequestStatus::PassedFirstScreen => 1,
            DepositRequestStatus::AwaitingFulfillment => 2,
            DepositRequestStatus::Completed => 3,
            DepositRequestStatus::FailedScreen => u8::MAX,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DepositRequestStatus::FailedScreen | DepositRequestStatus::Completed
        )
    }

    /// Whether a status write from `self` to `next` respects the lifecycle.
    /// Re-writing the current status is allowed (re-delivered events).
    pub fn can_transition_to(&self, next: DepositRequestStatus) -> bool {
        if *self == next {
            return true;
        }
        match (self, next) {
            (s, _) if s.is_terminal() => false,
            (DepositRequestStatus::DoesNotExist, DepositRequestStatus::FailedScreen)
            | (DepositRequestStatus::PassedFirstScreen, DepositRequestStatus::FailedScreen) => {
                true
            }
            (_, DepositRequestStatus::FailedScreen) => false,
            (current, next) => next.rank() > current.rank(),
        }
    }
}

impl fmt::Display for DepositRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DepositRequestStatus::DoesNotExist => "DoesNotExist",
            DepositRequestStatus::PassedFirstScreen => "PassedFirstScreen",
            DepositRequestStatus::FailedScreen => "FailedScreen",
            DepositRequestStatus::AwaitingFulfillment => "AwaitingFulfillment",
            DepositRequestStatus::Completed => "Completed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepositEventKind {
    Instantiated,
    Retrieved,
    Completed,
}

/// A deposit-manager event as delivered by the event stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositEvent {
    pub kind: DepositEventKind,
    pub request: DepositRequest,
    pub block_number: u64,
    pub tx_hash: Option<H256>,
}

/// A contiguous slice of the event stream. `checkpoint` is the monotonic
/// position to resume after once every event in the batch is handled.
#[derive(Debug, Clone, Default)]
pub struct DepositEventBatch {
    pub checkpoint: u64,
    pub events: Vec<DepositEvent>,
}

/// Rate-limit parameters of one supported asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedAsset {
    pub ticker: String,
    pub address: Address,
    /// Maximum value admitted per rolling period, in the asset's base units
    pub global_cap: U256,
    pub period_ms: u64,
}

impl SupportedAsset {
    pub fn period_secs(&self) -> u64 {
        self.period_ms / 1000
    }
}

/// Assets the screener admits, keyed by token address
#[derive(Debug, Clone, Default)]
pub struct SupportedAssets {
    by_address: BTreeMap<Address, SupportedAsset>,
}

impl SupportedAssets {
    pub fn new(assets: impl IntoIterator<Item = SupportedAsset>) -> Self {
        Self {
            by_address: assets.into_iter().map(|a| (a.address, a)).collect(),
        }
    }

    pub fn get(&self, address: &Address) -> Option<&SupportedAsset> {
        self.by_address.get(address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.by_address.contains_key(address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SupportedAsset> {
        self.by_address.values()
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }
}
