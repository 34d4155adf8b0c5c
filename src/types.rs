use crate::error::{Error, Result};
use ethers::types::{Address, Bytes, U256};
use std::fmt;
use std::str::FromStr;

/// ERC-4337 UserOperation in the EntryPoint v0.6 wire layout.
///
/// Deployment and sponsorship data travel as single concatenated byte strings
/// (`init_code`, `paymaster_and_data`); either may be empty.
///
/// Note: EntryPoint v0.7 uses a *different* packed struct layout.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserOperationPacked {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

/// Factory half of a split operation. Both parts are present or the whole
/// group is absent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FactoryArgs {
    pub factory: Address,
    pub factory_data: Bytes,
}

/// Paymaster group of a split operation.
///
/// The two gas limits have no slot in the v0.6 layout and are dropped when
/// packing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymasterArgs {
    pub paymaster: Address,
    pub paymaster_data: Bytes,
    pub paymaster_verification_gas_limit: Option<U256>,
    pub paymaster_post_op_gas_limit: Option<U256>,
}

/// UserOperation with deployment/sponsorship expressed as separate
/// components. Absent gas and fee fields are filled in by the codec.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserOperationSplit {
    pub sender: Address,
    pub nonce: U256,
    pub factory: Option<FactoryArgs>,
    pub call_data: Bytes,
    pub call_gas_limit: Option<U256>,
    pub verification_gas_limit: Option<U256>,
    pub pre_verification_gas: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
    pub paymaster: Option<PaymasterArgs>,
    pub signature: Bytes,
}

/// Either representation of the same logical operation. Only
/// [`crate::codec`] converts between the two.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UserOperation {
    Split(UserOperationSplit),
    Packed(UserOperationPacked),
}

impl UserOperation {
    pub fn sender(&self) -> Address {
        match self {
            UserOperation::Split(op) => op.sender,
            UserOperation::Packed(op) => op.sender,
        }
    }
}

impl From<UserOperationSplit> for UserOperation {
    fn from(op: UserOperationSplit) -> Self {
        UserOperation::Split(op)
    }
}

impl From<UserOperationPacked> for UserOperation {
    fn from(op: UserOperationPacked) -> Self {
        UserOperation::Packed(op)
    }
}

/// One call executed by the smart account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

impl Call {
    pub fn new(to: Address, value: U256, data: Bytes) -> Self {
        Self { to, value, data }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryPointVersion {
    V06,
}

impl fmt::Display for EntryPointVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryPointVersion::V06 => f.write_str("0.6"),
        }
    }
}

impl FromStr for EntryPointVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().trim_start_matches('v') {
            "0.6" | "0.6.0" => Ok(EntryPointVersion::V06),
            other => Err(Error::validation(format!(
                "unsupported EntryPoint version {other} (only 0.6 is supported)"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryPointConfig {
    pub address: Address,
    pub version: EntryPointVersion,
}

impl EntryPointConfig {
    pub fn v06(address: Address) -> Self {
        Self {
            address,
            version: EntryPointVersion::V06,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GasEstimates {
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
}
