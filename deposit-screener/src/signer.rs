// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! EIP-712 attestation that a deposit passed screening.
//!
//! The deposit manager only completes a deposit when the call carries a
//! signature from its screener over
//! `keccak256(0x1901 || domainSeparator || hashStruct(DepositRequest))`.

use crate::chain::CompletionCall;
use crate::error::{ScreenerError, ScreenerResult};
use crate::types::DepositRequest;
use ethers::abi::{encode, Token};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, Signature, H256, U256};
use ethers::utils::keccak256;

pub const EIP712_DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";

pub const COMPLETE_DEPOSIT_SIGNATURE: &str =
    "completeDeposit((address,(address,uint256),uint256,(uint256,uint256),uint256,uint256),bytes)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eip712Domain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

impl Eip712Domain {
    pub fn separator(&self) -> [u8; 32] {
        keccak256(encode(&[
            Token::FixedBytes(keccak256(EIP712_DOMAIN_TYPE).to_vec()),
            Token::FixedBytes(keccak256(self.name.as_bytes()).to_vec()),
            Token::FixedBytes(keccak256(self.version.as_bytes()).to_vec()),
            Token::Uint(U256::from(self.chain_id)),
            Token::Address(self.verifying_contract),
        ]))
    }
}

pub struct DepositCompletionSigner {
    wallet: LocalWallet,
    domain: Eip712Domain,
    domain_separator: [u8; 32],
}

impl DepositCompletionSigner {
    pub fn new(wallet: LocalWallet, domain: Eip712Domain) -> Self {
        let domain_separator = domain.separator();
        Self {
            wallet: wallet.with_chain_id(domain.chain_id),
            domain,
            domain_separator,
        }
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    pub fn domain(&self) -> &Eip712Domain {
        &self.domain
    }

    pub fn digest(&self, deposit: &DepositRequest) -> H256 {
        let mut preimage = Vec::with_capacity(66);
        preimage.extend_from_slice(&[0x19, 0x01]);
        preimage.extend_from_slice(&self.domain_separator);
        preimage.extend_from_slice(&deposit.struct_hash());
        H256::from(keccak256(preimage))
    }

    pub fn sign(&self, deposit: &DepositRequest) -> ScreenerResult<Signature> {
        self.wallet
            .sign_hash(self.digest(deposit))
            .map_err(|e| ScreenerError::Signing(format!("deposit {}: {e}", deposit.hash())))
    }

    /// Calldata for `completeDeposit(req, signature)` on the deposit manager
    pub fn completion_call(&self, deposit: &DepositRequest, signature: &Signature) -> CompletionCall {
        let selector = &keccak256(COMPLETE_DEPOSIT_SIGNATURE)[..4];
        let args = encode(&[deposit.to_token(), Token::Bytes(signature.to_vec())]);
        let mut data = Vec::with_capacity(4 + args.len());
        data.extend_from_slice(selector);
        data.extend_from_slice(&args);
        CompletionCall {
            to: self.domain.verifying_contract,
            data: Bytes::from(data),
        }
    }
}
