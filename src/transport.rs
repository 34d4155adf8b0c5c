use crate::codec::{self, GasFloors};
use crate::encoding::{self, parse_h256, parse_u256_quantity};
use crate::error::{Error, Result};
use crate::types::{GasEstimates, UserOperation, UserOperationPacked};
use ethers::types::{Address, H256, U256};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Which bundler family an endpoint belongs to. Selects the default floors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundlerProvider {
    /// Fuse chain-native bundler/paymaster.
    Fuse,
    /// Pimlico bundler.
    Pimlico,
}

impl BundlerProvider {
    pub fn floors(&self) -> GasFloors {
        match self {
            BundlerProvider::Fuse => GasFloors::FUSE,
            BundlerProvider::Pimlico => GasFloors::PIMLICO,
        }
    }
}

impl fmt::Display for BundlerProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BundlerProvider::Fuse => f.write_str("fuse"),
            BundlerProvider::Pimlico => f.write_str("pimlico"),
        }
    }
}

impl FromStr for BundlerProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fuse" => Ok(BundlerProvider::Fuse),
            "pimlico" => Ok(BundlerProvider::Pimlico),
            other => Err(Error::validation(format!(
                "unknown bundler provider {other} (expected fuse or pimlico)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BundlerEndpoint {
    pub url: String,
    pub entry_point: Address,
}

/// How a method's params are rewritten before they go on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamShaping {
    /// `[op, entryPoint]`: op packed, missing entry point filled in.
    UserOperation,
    /// `[op, context]`: op packed, missing context becomes `{}`.
    Sponsorship,
    /// Forwarded as given.
    Passthrough,
}

pub fn shaping_for(method: &str) -> ParamShaping {
    match method {
        "eth_sendUserOperation" | "eth_estimateUserOperationGas" => ParamShaping::UserOperation,
        "pm_sponsorUserOperation" | "pm_getPaymasterStubData" | "pm_getPaymasterData" => {
            ParamShaping::Sponsorship
        }
        _ => ParamShaping::Passthrough,
    }
}

/// Rewrites `params` for `method`. Pure; the caller's value is consumed and a
/// new array is built.
pub fn shape_params(
    method: &str,
    params: Option<Value>,
    entry_point: Address,
    floors: &GasFloors,
) -> Value {
    let shaping = shaping_for(method);

    let mut list = match params {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(list)) => list,
        Some(other) => return other,
    };

    if shaping == ParamShaping::Passthrough {
        return Value::Array(list);
    }

    while list.len() < 2 {
        list.push(Value::Null);
    }

    if list[0].is_object() {
        match encoding::user_op_from_json(&list[0]) {
            Ok(op) => list[0] = encoding::user_op_to_json(&codec::to_packed(&op, floors)),
            Err(e) => {
                tracing::debug!(method, error = %e, "params[0] is not a user operation; forwarding as-is")
            }
        }
    }

    if list[1].is_null() {
        list[1] = match shaping {
            ParamShaping::UserOperation => Value::String(encoding::fmt_address(entry_point)),
            _ => Value::Object(serde_json::Map::new()),
        };
    }

    Value::Array(list)
}

/// JSON-RPC client for one bundler/paymaster endpoint.
///
/// Every call is exactly one POST: no retries and no timeout. Callers that
/// need a deadline wrap the call in [`crate::deadline::with_deadline`].
#[derive(Debug, Clone)]
pub struct BundlerTransport {
    endpoint: BundlerEndpoint,
    provider: BundlerProvider,
    http: reqwest::Client,
}

impl BundlerTransport {
    pub fn new(endpoint: BundlerEndpoint, provider: BundlerProvider) -> Self {
        Self::with_client(endpoint, provider, reqwest::Client::new())
    }

    pub fn with_client(
        endpoint: BundlerEndpoint,
        provider: BundlerProvider,
        http: reqwest::Client,
    ) -> Self {
        Self {
            endpoint,
            provider,
            http,
        }
    }

    pub fn endpoint(&self) -> &BundlerEndpoint {
        &self.endpoint
    }

    pub fn provider(&self) -> BundlerProvider {
        self.provider
    }

    /// Packs `op` with this provider's floors.
    pub fn pack(&self, op: &UserOperation) -> UserOperationPacked {
        codec::to_packed(op, &self.provider.floors())
    }

    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let params = shape_params(
            method,
            params,
            self.endpoint.entry_point,
            &self.provider.floors(),
        );
        let req = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        tracing::debug!(
            provider = %self.provider,
            method,
            params = %req["params"],
            "bundler request"
        );

        let resp = self.http.post(&self.endpoint.url).json(&req).send().await?;

        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(Error::TransportError {
                status: status.as_u16(),
                body: text,
            });
        }

        let body: Value = match serde_json::from_str(&text) {
            Ok(body) => body,
            Err(_) => {
                return Err(Error::TransportError {
                    status: status.as_u16(),
                    body: text,
                })
            }
        };

        if let Some(err) = body.get("error").filter(|e| !e.is_null()) {
            tracing::debug!(method, error = %err, "bundler returned RPC error");
            return Err(rpc_error(err));
        }

        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }

    pub async fn send_user_operation(&self, op: &UserOperation) -> Result<H256> {
        let params = serde_json::json!([encoding::user_op_to_json(&self.pack(op))]);
        let res = self.call("eth_sendUserOperation", Some(params)).await?;
        parse_userop_hash(&res)
    }

    pub async fn estimate_user_operation_gas(&self, op: &UserOperation) -> Result<GasEstimates> {
        let params = serde_json::json!([encoding::user_op_to_json(&self.pack(op))]);
        let res = self
            .call("eth_estimateUserOperationGas", Some(params))
            .await?;

        Ok(GasEstimates {
            call_gas_limit: parse_u256_field(&res, "callGasLimit")?,
            verification_gas_limit: parse_u256_field(&res, "verificationGasLimit")?,
            pre_verification_gas: parse_u256_field(&res, "preVerificationGas")?,
        })
    }

    /// `pm_sponsorUserOperation`. Fuse expects the entry point between the
    /// operation and the context; Pimlico takes the context directly.
    pub async fn sponsor_user_operation(&self, op: &UserOperation, context: Value) -> Result<Value> {
        let op = encoding::user_op_to_json(&self.pack(op));
        let params = match self.provider {
            BundlerProvider::Fuse => serde_json::json!([
                op,
                encoding::fmt_address(self.endpoint.entry_point),
                context
            ]),
            BundlerProvider::Pimlico => serde_json::json!([op, context]),
        };
        self.call("pm_sponsorUserOperation", Some(params)).await
    }

    /// `None` until the operation is included.
    pub async fn get_user_operation_receipt(&self, user_op_hash: H256) -> Result<Option<Value>> {
        let params = serde_json::json!([encoding::fmt_h256(user_op_hash)]);
        let res = self
            .call("eth_getUserOperationReceipt", Some(params))
            .await?;
        Ok(if res.is_null() { None } else { Some(res) })
    }

    pub async fn supported_entry_points(&self) -> Result<Vec<Address>> {
        let res = self.call("eth_supportedEntryPoints", None).await?;
        res.as_array()
            .ok_or_else(|| Error::validation(format!("expected an array of addresses, got {res}")))?
            .iter()
            .map(|v| {
                v.as_str()
                    .ok_or_else(|| Error::validation(format!("expected an address, got {v}")))
                    .and_then(encoding::parse_address)
            })
            .collect()
    }

    pub async fn chain_id(&self) -> Result<u64> {
        let res = self.call("eth_chainId", None).await?;
        let s = res
            .as_str()
            .ok_or_else(|| Error::validation(format!("expected a hex chain id, got {res}")))?;
        let id = parse_u256_quantity(s)?;
        if id > U256::from(u64::MAX) {
            return Err(Error::validation(format!("chain id {id} does not fit in u64")));
        }
        Ok(id.as_u64())
    }
}

/// Surfaces the provider's error as sent: a bare string becomes the message,
/// anything else that is not an object is kept whole in `data`.
fn rpc_error(err: &Value) -> Error {
    match err {
        Value::Object(obj) => Error::RpcError {
            code: obj.get("code").and_then(Value::as_i64),
            message: match obj.get("message") {
                Some(Value::String(m)) => m.clone(),
                _ => String::new(),
            },
            data: obj.get("data").cloned(),
        },
        Value::String(m) => Error::RpcError {
            code: None,
            message: m.clone(),
            data: None,
        },
        other => Error::RpcError {
            code: None,
            message: String::new(),
            data: Some(other.clone()),
        },
    }
}

fn parse_u256_field(v: &Value, key: &str) -> Result<U256> {
    let field = v
        .get(key)
        .ok_or_else(|| Error::validation(format!("missing field {key}")))?;
    match field {
        Value::String(s) => parse_u256_quantity(s),
        Value::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| Error::validation(format!("invalid field {key}: {n}"))),
        other => Err(Error::validation(format!("invalid field {key}: {other}"))),
    }
}

fn parse_userop_hash(res: &Value) -> Result<H256> {
    // Most bundlers return the userOpHash directly as a JSON string; some wrap it.
    let hash_str = if let Some(s) = res.as_str() {
        s
    } else if let Some(s) = res.get("result").and_then(|v| v.as_str()) {
        s
    } else if let Some(s) = res.get("userOpHash").and_then(|v| v.as_str()) {
        s
    } else if let Some(s) = res.get("userOperationHash").and_then(|v| v.as_str()) {
        s
    } else {
        return Err(Error::validation(format!(
            "unexpected eth_sendUserOperation result shape (expected string or {{result: ...}}): {res}"
        )));
    };

    parse_h256(hash_str)
}
