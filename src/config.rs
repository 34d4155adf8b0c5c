use anyhow::{anyhow, Context, Result};
use ethers::types::Address;
use serde::Deserialize;
use std::{env, fs, path::Path};

pub const DEFAULT_FUSE_BUNDLER_URL: &str = "https://api.fuse.io/api/v0/bundler?apiKey=";
pub const DEFAULT_FUSE_PAYMASTER_URL: &str = "https://api.fuse.io/api/v0/paymaster?apiKey=";
pub const DEFAULT_PIMLICO_URL: &str = "https://api.pimlico.io/v2/122/rpc?apikey=";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRaw {
    pub chain_id: u64,
    pub rpc: String,
    #[serde(default)]
    pub rpc_env_var: Option<String>,
    pub entry_point: String,
    pub factory: String,
    #[serde(default)]
    pub paymaster: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

/// Chain-side addresses the CLI works against.
#[derive(Debug, Clone)]
pub struct Deployment {
    pub chain_id: u64,
    pub rpc_url: String,
    pub entry_point: Address,
    pub factory: Address,
    pub paymaster: Option<Address>,
    pub token: Option<Address>,
}

pub fn load_deployment(path: &Path, rpc_override: Option<String>) -> Result<Deployment> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read deployment json at {}", path.display()))?;
    let raw: DeploymentRaw = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse deployment json at {}", path.display()))?;

    resolve(raw, rpc_override, |name| env::var(name).ok())
}

/// `--rpc` wins, then the variable named by `rpcEnvVar`, then `rpc`.
fn resolve(
    raw: DeploymentRaw,
    rpc_override: Option<String>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Deployment> {
    let rpc_url = match (rpc_override, raw.rpc_env_var.as_deref()) {
        (Some(rpc), _) => rpc,
        (None, Some(var)) => lookup(var).unwrap_or_else(|| raw.rpc.clone()),
        (None, None) => raw.rpc.clone(),
    };

    let paymaster = raw
        .paymaster
        .as_deref()
        .map(parse_addr)
        .transpose()
        .context("invalid paymaster address")?;
    let token = raw
        .token
        .as_deref()
        .map(parse_addr)
        .transpose()
        .context("invalid token address")?;

    Ok(Deployment {
        chain_id: raw.chain_id,
        rpc_url,
        entry_point: parse_addr(&raw.entry_point).context("invalid entryPoint address")?,
        factory: parse_addr(&raw.factory).context("invalid factory address")?,
        paymaster,
        token,
    })
}

fn parse_addr(s: &str) -> Result<Address> {
    s.parse::<Address>().map_err(|e| anyhow!("{e}"))
}
