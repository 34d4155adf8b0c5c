use crate::codec;
use crate::error::{Error, Result};
use crate::types::{
    FactoryArgs, PaymasterArgs, UserOperation, UserOperationPacked, UserOperationSplit,
};
use ethers::types::{Address, Bytes, H256, U256};
use serde_json::{Map, Value};

pub fn fmt_address(addr: Address) -> String {
    format!("0x{}", hex::encode(addr.as_bytes()))
}

pub fn fmt_h256(h: H256) -> String {
    format!("0x{}", hex::encode(h.as_bytes()))
}

/// JSON-RPC "quantity" encoding.
pub fn fmt_u256(v: U256) -> String {
    if v.is_zero() {
        "0x0".to_string()
    } else {
        format!("0x{:x}", v)
    }
}

pub fn fmt_bytes(b: &Bytes) -> String {
    format!("0x{}", hex::encode(b.as_ref()))
}

/// v0.6 wire form, as accepted by `eth_sendUserOperation` and friends.
pub fn user_op_to_json(op: &UserOperationPacked) -> Value {
    serde_json::json!({
        "sender": fmt_address(op.sender),
        "nonce": fmt_u256(op.nonce),
        "initCode": fmt_bytes(&op.init_code),
        "callData": fmt_bytes(&op.call_data),
        "callGasLimit": fmt_u256(op.call_gas_limit),
        "verificationGasLimit": fmt_u256(op.verification_gas_limit),
        "preVerificationGas": fmt_u256(op.pre_verification_gas),
        "maxFeePerGas": fmt_u256(op.max_fee_per_gas),
        "maxPriorityFeePerGas": fmt_u256(op.max_priority_fee_per_gas),
        "paymasterAndData": fmt_bytes(&op.paymaster_and_data),
        "signature": fmt_bytes(&op.signature),
    })
}

/// Parses a JSON operation object into whichever representation it carries.
///
/// Objects with `initCode` or `paymasterAndData` are read as packed, anything
/// else as split. `null` fields count as absent. On a packed object, an empty
/// `initCode`/`paymasterAndData` is derived from `factory`/`paymaster` groups
/// carried alongside; a non-empty one must agree with them.
pub fn user_op_from_json(v: &Value) -> Result<UserOperation> {
    let obj = v
        .as_object()
        .ok_or_else(|| Error::validation("user operation must be a JSON object"))?;

    let sender = field(obj, "sender")
        .ok_or_else(|| Error::validation("user operation is missing sender"))
        .and_then(|s| parse_address_value(s, "sender"))?;
    let nonce = opt_quantity(obj, "nonce")?.unwrap_or_default();
    let call_data = opt_bytes(obj, "callData")?.unwrap_or_default();
    let signature = opt_bytes(obj, "signature")?.unwrap_or_default();
    let call_gas_limit = opt_quantity(obj, "callGasLimit")?;
    let verification_gas_limit = opt_quantity(obj, "verificationGasLimit")?;
    let pre_verification_gas = opt_quantity(obj, "preVerificationGas")?;
    let max_fee_per_gas = opt_quantity(obj, "maxFeePerGas")?;
    let max_priority_fee_per_gas = opt_quantity(obj, "maxPriorityFeePerGas")?;

    let factory = group(obj, "factory", "factoryData")?.map(|(factory, factory_data)| {
        FactoryArgs {
            factory,
            factory_data,
        }
    });
    let paymaster = match group(obj, "paymaster", "paymasterData")? {
        Some((paymaster, paymaster_data)) => Some(PaymasterArgs {
            paymaster,
            paymaster_data,
            paymaster_verification_gas_limit: opt_quantity(obj, "paymasterVerificationGasLimit")?,
            paymaster_post_op_gas_limit: opt_quantity(obj, "paymasterPostOpGasLimit")?,
        }),
        None => None,
    };

    // Mixed objects: a packed field left empty is filled from its split group.
    if obj.contains_key("initCode") || obj.contains_key("paymasterAndData") {
        let init_code = merge_prefixed(
            opt_bytes(obj, "initCode")?.unwrap_or_default(),
            factory.as_ref().map(|f| (f.factory, &f.factory_data)),
            "initCode",
        )?;
        let paymaster_and_data = merge_prefixed(
            opt_bytes(obj, "paymasterAndData")?.unwrap_or_default(),
            paymaster.as_ref().map(|p| (p.paymaster, &p.paymaster_data)),
            "paymasterAndData",
        )?;
        return Ok(UserOperation::Packed(UserOperationPacked {
            sender,
            nonce,
            init_code,
            call_data,
            call_gas_limit: call_gas_limit.unwrap_or_default(),
            verification_gas_limit: verification_gas_limit.unwrap_or_default(),
            pre_verification_gas: pre_verification_gas.unwrap_or_default(),
            max_fee_per_gas: max_fee_per_gas.unwrap_or_default(),
            max_priority_fee_per_gas: max_priority_fee_per_gas.unwrap_or_default(),
            paymaster_and_data,
            signature,
        }));
    }

    Ok(UserOperation::Split(UserOperationSplit {
        sender,
        nonce,
        factory,
        call_data,
        call_gas_limit,
        verification_gas_limit,
        pre_verification_gas,
        max_fee_per_gas,
        max_priority_fee_per_gas,
        paymaster,
        signature,
    }))
}

pub fn parse_u256_quantity(s: &str) -> Result<U256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_str_radix(s, 16)
        .map_err(|e| Error::validation(format!("invalid hex quantity 0x{s}: {e}")))
}

pub fn parse_h256(s: &str) -> Result<H256> {
    let bytes = parse_hex(s)?;
    if bytes.len() != 32 {
        return Err(Error::validation(format!(
            "expected 32-byte hex, got {} bytes",
            bytes.len()
        )));
    }
    Ok(H256::from_slice(&bytes))
}

pub fn parse_address(s: &str) -> Result<Address> {
    let bytes = parse_hex(s)?;
    if bytes.len() != 20 {
        return Err(Error::validation(format!(
            "expected 20-byte address, got {} bytes",
            bytes.len()
        )));
    }
    Ok(Address::from_slice(&bytes))
}

pub fn parse_bytes(s: &str) -> Result<Bytes> {
    parse_hex(s).map(Bytes::from)
}

fn parse_hex(s: &str) -> Result<Vec<u8>> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).map_err(|e| Error::validation(format!("invalid hex 0x{s}: {e}")))
}

/// An address field and its data field: both present or both absent. Empty
/// data with no address counts as absent.
fn group(
    obj: &Map<String, Value>,
    address_key: &str,
    data_key: &str,
) -> Result<Option<(Address, Bytes)>> {
    match (opt_address(obj, address_key)?, opt_bytes(obj, data_key)?) {
        (Some(address), Some(data)) => Ok(Some((address, data))),
        (Some(_), None) => Err(Error::validation(format!(
            "{address_key} present without {data_key}"
        ))),
        (None, Some(data)) if !data.is_empty() => Err(Error::validation(format!(
            "{data_key} present without {address_key}"
        ))),
        (None, _) => Ok(None),
    }
}

fn merge_prefixed(packed: Bytes, group: Option<(Address, &Bytes)>, what: &str) -> Result<Bytes> {
    let Some((address, data)) = group else {
        return Ok(packed);
    };
    let derived = codec::concat(address, data);
    if packed.is_empty() || packed == derived {
        Ok(derived)
    } else {
        Err(Error::validation(format!(
            "{what} {} disagrees with its split fields {}",
            fmt_bytes(&packed),
            fmt_bytes(&derived)
        )))
    }
}

fn field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.get(key).filter(|v| !v.is_null())
}

fn opt_quantity(obj: &Map<String, Value>, key: &str) -> Result<Option<U256>> {
    match field(obj, key) {
        None => Ok(None),
        Some(Value::String(s)) => parse_u256_quantity(s).map(Some),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(|n| Some(U256::from(n)))
            .ok_or_else(|| Error::validation(format!("{key} must be a non-negative integer"))),
        Some(other) => Err(Error::validation(format!(
            "{key} must be a hex quantity, got {other}"
        ))),
    }
}

fn opt_bytes(obj: &Map<String, Value>, key: &str) -> Result<Option<Bytes>> {
    match field(obj, key) {
        None => Ok(None),
        Some(Value::String(s)) => parse_bytes(s).map(Some),
        Some(other) => Err(Error::validation(format!(
            "{key} must be a hex byte string, got {other}"
        ))),
    }
}

fn opt_address(obj: &Map<String, Value>, key: &str) -> Result<Option<Address>> {
    field(obj, key)
        .map(|v| parse_address_value(v, key))
        .transpose()
}

fn parse_address_value(v: &Value, key: &str) -> Result<Address> {
    v.as_str()
        .ok_or_else(|| Error::validation(format!("{key} must be a hex address, got {v}")))
        .and_then(parse_address)
}
