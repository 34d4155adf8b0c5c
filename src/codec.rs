//! Conversion between the split and packed (v0.6) operation representations.
//!
//! This is the only place allowed to turn one [`UserOperation`] variant into
//! the other. Every function here builds a new value; inputs are never
//! touched.

use crate::error::{Error, Result};
use crate::types::{
    FactoryArgs, PaymasterArgs, UserOperation, UserOperationPacked, UserOperationSplit,
};
use ethers::types::{Address, Bytes, U256};

const ONE_GWEI: u64 = 1_000_000_000;

/// Values substituted for gas/fee fields that are zero or absent.
///
/// Some bundlers reject a zero limit or fee outright. These floors only ever
/// replace zero; a caller-supplied nonzero value always wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GasFloors {
    pub call_gas_limit: u64,
    pub verification_gas_limit: u64,
    pub pre_verification_gas: u64,
    pub max_fee_per_gas: u64,
    pub max_priority_fee_per_gas: u64,
}

impl GasFloors {
    /// Fuse chain-native bundler.
    pub const FUSE: GasFloors = GasFloors {
        call_gas_limit: 100_000,
        verification_gas_limit: 100_000,
        pre_verification_gas: 21_000,
        max_fee_per_gas: ONE_GWEI,
        max_priority_fee_per_gas: ONE_GWEI,
    };

    /// Pimlico bundler.
    pub const PIMLICO: GasFloors = GasFloors {
        call_gas_limit: 200_000,
        verification_gas_limit: 500_000,
        pre_verification_gas: 100_000,
        max_fee_per_gas: ONE_GWEI,
        max_priority_fee_per_gas: ONE_GWEI,
    };
}

fn floor(value: Option<U256>, floor: u64) -> U256 {
    match value {
        Some(v) if !v.is_zero() => v,
        _ => U256::from(floor),
    }
}

pub(crate) fn concat(address: Address, data: &Bytes) -> Bytes {
    let mut v = Vec::with_capacity(20 + data.len());
    v.extend_from_slice(address.as_bytes());
    v.extend_from_slice(data.as_ref());
    Bytes::from(v)
}

/// Splits `address ++ data`; an empty input means "absent".
fn split_prefixed(bytes: &Bytes, what: &str) -> Result<Option<(Address, Bytes)>> {
    if bytes.is_empty() {
        return Ok(None);
    }
    if bytes.len() < 20 {
        return Err(Error::validation(format!(
            "{what} is {} bytes, shorter than a 20-byte address",
            bytes.len()
        )));
    }
    let (address, data) = bytes.split_at(20);
    Ok(Some((Address::from_slice(address), Bytes::from(data.to_vec()))))
}

/// Produces the v0.6 wire form of `op`, applying `floors` to zero/absent
/// numeric fields. Never fails.
pub fn to_packed(op: &UserOperation, floors: &GasFloors) -> UserOperationPacked {
    match op {
        UserOperation::Split(op) => split_to_packed(op, floors),
        UserOperation::Packed(op) => UserOperationPacked {
            sender: op.sender,
            nonce: op.nonce,
            init_code: op.init_code.clone(),
            call_data: op.call_data.clone(),
            call_gas_limit: floor(Some(op.call_gas_limit), floors.call_gas_limit),
            verification_gas_limit: floor(
                Some(op.verification_gas_limit),
                floors.verification_gas_limit,
            ),
            pre_verification_gas: floor(Some(op.pre_verification_gas), floors.pre_verification_gas),
            max_fee_per_gas: floor(Some(op.max_fee_per_gas), floors.max_fee_per_gas),
            max_priority_fee_per_gas: floor(
                Some(op.max_priority_fee_per_gas),
                floors.max_priority_fee_per_gas,
            ),
            paymaster_and_data: op.paymaster_and_data.clone(),
            signature: op.signature.clone(),
        },
    }
}

fn split_to_packed(op: &UserOperationSplit, floors: &GasFloors) -> UserOperationPacked {
    let init_code = op
        .factory
        .as_ref()
        .map(|f| concat(f.factory, &f.factory_data))
        .unwrap_or_default();

    // paymasterVerificationGasLimit / paymasterPostOpGasLimit have no v0.6 slot.
    let paymaster_and_data = op
        .paymaster
        .as_ref()
        .map(|p| concat(p.paymaster, &p.paymaster_data))
        .unwrap_or_default();

    UserOperationPacked {
        sender: op.sender,
        nonce: op.nonce,
        init_code,
        call_data: op.call_data.clone(),
        call_gas_limit: floor(op.call_gas_limit, floors.call_gas_limit),
        verification_gas_limit: floor(op.verification_gas_limit, floors.verification_gas_limit),
        pre_verification_gas: floor(op.pre_verification_gas, floors.pre_verification_gas),
        max_fee_per_gas: floor(op.max_fee_per_gas, floors.max_fee_per_gas),
        max_priority_fee_per_gas: floor(op.max_priority_fee_per_gas, floors.max_priority_fee_per_gas),
        paymaster_and_data,
        signature: op.signature.clone(),
    }
}

/// Reverse of [`to_packed`] for the byte fields: the first 20 bytes of
/// `initCode` / `paymasterAndData` become the factory / paymaster address.
///
/// Numeric fields are carried over as-is (zero stays zero, it is not turned
/// back into "absent").
pub fn to_split(op: &UserOperationPacked) -> Result<UserOperationSplit> {
    let factory = split_prefixed(&op.init_code, "initCode")?.map(|(factory, factory_data)| {
        FactoryArgs {
            factory,
            factory_data,
        }
    });
    let paymaster = split_prefixed(&op.paymaster_and_data, "paymasterAndData")?.map(
        |(paymaster, paymaster_data)| PaymasterArgs {
            paymaster,
            paymaster_data,
            paymaster_verification_gas_limit: None,
            paymaster_post_op_gas_limit: None,
        },
    );

    Ok(UserOperationSplit {
        sender: op.sender,
        nonce: op.nonce,
        factory,
        call_data: op.call_data.clone(),
        call_gas_limit: Some(op.call_gas_limit),
        verification_gas_limit: Some(op.verification_gas_limit),
        pre_verification_gas: Some(op.pre_verification_gas),
        max_fee_per_gas: Some(op.max_fee_per_gas),
        max_priority_fee_per_gas: Some(op.max_priority_fee_per_gas),
        paymaster,
        signature: op.signature.clone(),
    })
}
