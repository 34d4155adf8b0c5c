use crate::codec;
use crate::encoding::{parse_bytes, parse_u256_quantity};
use crate::error::{Error, Result};
use crate::types::{UserOperationPacked, UserOperationSplit};
use ethers::types::{Bytes, U256};
use serde_json::Value;

/// What a `pm_sponsorUserOperation` call handed back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SponsorResult {
    /// `paymaster ++ paymasterData`, v0.6 packed form.
    pub paymaster_and_data: Bytes,
    pub call_gas_limit: Option<U256>,
    pub verification_gas_limit: Option<U256>,
    pub pre_verification_gas: Option<U256>,
}

impl SponsorResult {
    /// Installs the paymaster group and any sponsor-provided gas limits on
    /// `op`. Limits the sponsor left out keep their current values.
    pub fn apply(&self, op: UserOperationSplit) -> Result<UserOperationSplit> {
        // Borrow the codec's prefix split so a short paymasterAndData is
        // rejected the same way everywhere.
        let probe = UserOperationPacked {
            paymaster_and_data: self.paymaster_and_data.clone(),
            ..Default::default()
        };
        let paymaster = codec::to_split(&probe)?.paymaster;

        Ok(UserOperationSplit {
            paymaster,
            call_gas_limit: self.call_gas_limit.or(op.call_gas_limit),
            verification_gas_limit: self.verification_gas_limit.or(op.verification_gas_limit),
            pre_verification_gas: self.pre_verification_gas.or(op.pre_verification_gas),
            ..op
        })
    }
}

/// Reads a sponsor response.
///
/// `paymasterAndData` is required. It may sit at the top level or under an
/// `entrypointV06Response` / `entryPointV06Response` wrapper; gas limits are
/// read from the same object.
pub fn parse_sponsor_result(result: &Value) -> Result<SponsorResult> {
    let body = if result.get("paymasterAndData").is_some() {
        result
    } else {
        result
            .get("entrypointV06Response")
            .or_else(|| result.get("entryPointV06Response"))
            .ok_or_else(|| {
                Error::validation(format!(
                    "invalid paymaster response (missing paymasterAndData): {result}"
                ))
            })?
    };

    let paymaster_and_data = body
        .get("paymasterAndData")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            Error::validation(format!(
                "invalid paymaster response (missing paymasterAndData): {result}"
            ))
        })
        .and_then(parse_bytes)?;

    Ok(SponsorResult {
        paymaster_and_data,
        call_gas_limit: opt_limit(body, "callGasLimit")?,
        verification_gas_limit: opt_limit(body, "verificationGasLimit")?,
        pre_verification_gas: opt_limit(body, "preVerificationGas")?,
    })
}

fn opt_limit(body: &Value, key: &str) -> Result<Option<U256>> {
    match body.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => parse_u256_quantity(s).map(Some),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(|n| Some(U256::from(n)))
            .ok_or_else(|| Error::validation(format!("invalid {key} in paymaster response: {n}"))),
        Some(other) => Err(Error::validation(format!(
            "invalid {key} in paymaster response: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Address;
    use serde_json::json;

    const PAYMASTER: &str = "0x8e4bbe1f6a0b7d3b3c7a1b0e9bd4d3c9a0b1c2d3";

    fn pm_data() -> String {
        format!("{PAYMASTER}deadbeef")
    }

    fn paymaster() -> Address {
        PAYMASTER.parse().unwrap()
    }

    #[test]
    fn parse_paymaster_and_data_top_level() {
        let res = json!({ "paymasterAndData": pm_data(), "callGasLimit": "0x88b8" });
        let out = parse_sponsor_result(&res).unwrap();
        assert_eq!(out.paymaster_and_data.len(), 24);
        assert_eq!(out.call_gas_limit, Some(U256::from(0x88b8)));
        assert_eq!(out.verification_gas_limit, None);
    }

    #[test]
    fn parse_paymaster_and_data_nested_entrypoint_v06() {
        for key in ["entrypointV06Response", "entryPointV06Response"] {
            let res = json!({ key: { "paymasterAndData": pm_data(), "preVerificationGas": 50000 } });
            let out = parse_sponsor_result(&res).unwrap();
            assert_eq!(&out.paymaster_and_data[20..], &[0xde, 0xad, 0xbe, 0xef]);
            assert_eq!(out.pre_verification_gas, Some(U256::from(50_000)));
        }
    }

    #[test]
    fn parse_paymaster_and_data_missing_fields() {
        let res = json!({ "entrypointV07Response": { "paymasterAndData": pm_data() } });
        assert!(matches!(
            parse_sponsor_result(&res),
            Err(Error::ValidationError(_))
        ));
        assert!(parse_sponsor_result(&json!({ "callGasLimit": "0x1" })).is_err());
        assert!(parse_sponsor_result(&Value::Null).is_err());
    }

    #[test]
    fn apply_installs_paymaster_and_returned_limits() {
        let op = UserOperationSplit {
            call_gas_limit: Some(U256::from(1)),
            verification_gas_limit: Some(U256::from(2)),
            pre_verification_gas: Some(U256::from(3)),
            ..Default::default()
        };
        let res = parse_sponsor_result(&json!({
            "paymasterAndData": pm_data(),
            "callGasLimit": "0x186a0",
            "verificationGasLimit": "0x30d40",
        }))
        .unwrap();

        let out = res.apply(op).unwrap();
        let group = out.paymaster.expect("paymaster group");
        assert_eq!(group.paymaster, paymaster());
        assert_eq!(&group.paymaster_data[..], &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(out.call_gas_limit, Some(U256::from(100_000)));
        assert_eq!(out.verification_gas_limit, Some(U256::from(200_000)));
        assert_eq!(out.pre_verification_gas, Some(U256::from(3)));
    }

    #[test]
    fn apply_rejects_truncated_paymaster() {
        let res = SponsorResult {
            paymaster_and_data: Bytes::from(vec![0x01; 8]),
            ..Default::default()
        };
        assert!(res.apply(UserOperationSplit::default()).is_err());
    }
}
