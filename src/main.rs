use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use ethers::abi::AbiEncode;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::{format_ether, parse_ether, parse_units};
use fuse_aa::config::{
    load_deployment, Deployment, DEFAULT_FUSE_BUNDLER_URL, DEFAULT_FUSE_PAYMASTER_URL,
    DEFAULT_PIMLICO_URL,
};
use fuse_aa::contracts::{SponsorPaymaster, TransferCall};
use fuse_aa::encoding;
use fuse_aa::{
    parse_sponsor_result, with_deadline, AccountConfig, BundlerEndpoint, BundlerProvider,
    BundlerTransport, Call, EntryPointConfig, Error, EthersChain, SmartAccount,
    UserOperationPacked, UserOperationSplit,
};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

type Account = SmartAccount<EthersChain<Provider<Http>>>;

#[derive(Parser, Debug)]
#[command(name = "fuse-aa", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the owner, smart account address, deployment state and nonce.
    Account(AccountArgs),

    /// Read a sponsor's deposit on the paymaster.
    PaymasterFunds(PaymasterFundsArgs),

    /// Send native FUSE or an ERC-20 transfer from the smart account.
    Transfer(TransferArgs),
}

#[derive(Args, Debug)]
struct ChainArgs {
    /// Deployment artifact (EntryPoint + factory + optional paymaster/token).
    #[arg(long, default_value = "deployments/fuse.json")]
    deployment: PathBuf,

    /// Override the chain RPC URL (otherwise uses deployment JSON).
    #[arg(long, env = "AA_RPC_URL")]
    rpc: Option<String>,

    /// Upper bound for each network step.
    #[arg(long, default_value_t = 30)]
    timeout_seconds: u64,
}

#[derive(Args, Debug)]
struct OwnerArgs {
    /// Smart account owner private key.
    #[arg(long, env = "AA_OWNER_PRIVATE_KEY", hide_env_values = true)]
    owner_private_key: String,

    /// CREATE2 salt (factory `index`) for the smart account.
    #[arg(long, default_value_t = 0)]
    salt: u64,
}

#[derive(Args, Debug)]
struct BundlerArgs {
    /// Which bundler family to talk to: fuse or pimlico.
    #[arg(long, default_value = "fuse")]
    provider: BundlerProvider,

    /// Bundler JSON-RPC URL. Defaults to the provider's public endpoint plus --api-key.
    #[arg(long, env = "AA_BUNDLER_URL")]
    bundler_url: Option<String>,

    /// Paymaster JSON-RPC URL. Defaults to the Fuse paymaster plus --api-key.
    #[arg(long, env = "AA_PAYMASTER_URL")]
    paymaster_url: Option<String>,

    /// API key appended to the default endpoints.
    #[arg(long, env = "AA_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Sponsor gas through `pm_sponsorUserOperation` with this sponsor id.
    #[arg(long, env = "AA_SPONSOR_ID")]
    sponsor_id: Option<String>,
}

#[derive(Args, Debug)]
struct AccountArgs {
    #[command(flatten)]
    chain: ChainArgs,

    #[command(flatten)]
    owner: OwnerArgs,
}

#[derive(Args, Debug)]
struct PaymasterFundsArgs {
    #[command(flatten)]
    chain: ChainArgs,

    /// Sponsor id whose deposit to read.
    #[arg(long, env = "AA_SPONSOR_ID")]
    sponsor_id: String,

    /// Paymaster contract (otherwise uses deployment JSON).
    #[arg(long)]
    paymaster: Option<String>,
}

#[derive(Args, Debug)]
struct TransferArgs {
    #[command(flatten)]
    chain: ChainArgs,

    #[command(flatten)]
    owner: OwnerArgs,

    #[command(flatten)]
    bundler: BundlerArgs,

    /// Recipient.
    #[arg(long)]
    to: String,

    /// Native amount in ether units.
    #[arg(long, conflicts_with = "amount")]
    value: Option<String>,

    /// ERC-20 amount in token units (uses --token or the deployment token).
    #[arg(long)]
    amount: Option<String>,

    /// ERC-20 token contract.
    #[arg(long)]
    token: Option<String>,

    /// ERC-20 decimals.
    #[arg(long, default_value_t = 18)]
    decimals: u32,

    /// Do not wait for the userOp receipt.
    #[arg(long, default_value_t = false)]
    no_wait: bool,

    /// Max seconds to wait for userOp receipt.
    #[arg(long, default_value_t = 120)]
    max_wait_seconds: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        // Logs go to stderr; stdout carries results only.
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Account(args) => cmd_account(args).await,
        Command::PaymasterFunds(args) => cmd_paymaster_funds(args).await,
        Command::Transfer(args) => cmd_transfer(args).await,
    }
}

async fn cmd_account(args: AccountArgs) -> Result<()> {
    let limit = Duration::from_secs(args.chain.timeout_seconds);
    let (dep, provider) = connect(&args.chain).await?;
    let account = open_account(&dep, provider, &args.owner)?;

    let address = with_deadline(limit, account.address())
        .await
        .context("failed to derive smart account address")?;
    let deployed = with_deadline(limit, account.is_deployed())
        .await
        .context("failed to read account code")?;
    let nonce = with_deadline(limit, account.nonce())
        .await
        .context("failed to read EntryPoint nonce")?;

    println!("chainId:        {}", dep.chain_id);
    println!("entryPoint:     {:?}", dep.entry_point);
    println!("factory:        {:?}", dep.factory);
    println!("owner:          {:?}", account.owner());
    println!("smartAccount:   {:?}", address);
    println!("isDeployed:     {}", deployed);
    println!("nonce:          {}", nonce);

    Ok(())
}

async fn cmd_paymaster_funds(args: PaymasterFundsArgs) -> Result<()> {
    let limit = Duration::from_secs(args.chain.timeout_seconds);
    let (dep, provider) = connect(&args.chain).await?;

    let paymaster = match args.paymaster.as_deref() {
        Some(s) => parse_addr(s).context("invalid --paymaster address")?,
        None => dep
            .paymaster
            .ok_or_else(|| anyhow!("no paymaster in deployment json; pass --paymaster"))?,
    };
    let sponsor_id = U256::from_dec_str(&args.sponsor_id)
        .map_err(|e| anyhow!("invalid --sponsor-id {}: {e}", args.sponsor_id))?;

    let contract = SponsorPaymaster::new(paymaster, Arc::new(provider));
    let balance = with_deadline(limit, async {
        contract
            .sponsor_balances(sponsor_id)
            .call()
            .await
            .map_err(Error::query)
    })
    .await
    .context("paymaster.sponsorBalances failed")?;

    println!("paymaster:      {:?}", paymaster);
    println!("sponsorId:      {}", sponsor_id);
    println!("balance:        {} FUSE", format_ether(balance));

    Ok(())
}

async fn cmd_transfer(args: TransferArgs) -> Result<()> {
    let limit = Duration::from_secs(args.chain.timeout_seconds);
    let (dep, provider) = connect(&args.chain).await?;

    let to = parse_addr(&args.to).context("invalid --to address")?;
    let call = match (args.value.as_deref(), args.amount.as_deref()) {
        (Some(value), None) => {
            let value = parse_ether(value).context("invalid --value")?;
            Call::new(to, value, Bytes::default())
        }
        (None, Some(amount)) => {
            let token = match args.token.as_deref() {
                Some(s) => parse_addr(s).context("invalid --token address")?,
                None => dep
                    .token
                    .ok_or_else(|| anyhow!("no token in deployment json; pass --token"))?,
            };
            let amount: U256 = parse_units(amount, args.decimals)
                .context("invalid --amount")?
                .into();
            let data = TransferCall { to, amount }.encode();
            Call::new(token, U256::zero(), data.into())
        }
        _ => return Err(anyhow!("pass exactly one of --value or --amount")),
    };

    let account = open_account(&dep, provider.clone(), &args.owner)?;
    let sender = with_deadline(limit, account.address())
        .await
        .context("failed to derive smart account address")?;
    let factory = with_deadline(limit, account.factory_args())
        .await
        .context("failed to read account deployment state")?;
    let nonce = with_deadline(limit, account.nonce())
        .await
        .context("failed to read EntryPoint nonce")?;
    let call_data = account.encode_calls(&[call])?;

    let gas_price = with_deadline(limit, async {
        provider.get_gas_price().await.map_err(Error::query)
    })
    .await
    .context("failed to fetch gas price")?;

    tracing::info!(
        sender = %sender,
        nonce = %nonce,
        deploying = factory.is_some(),
        "building user operation"
    );

    let op = UserOperationSplit {
        sender,
        nonce,
        factory,
        call_data,
        max_fee_per_gas: Some(gas_price),
        max_priority_fee_per_gas: Some(gas_price),
        signature: account.stub_signature(),
        ..Default::default()
    };

    let bundler = BundlerTransport::new(
        BundlerEndpoint {
            url: bundler_url(&args.bundler)?,
            entry_point: dep.entry_point,
        },
        args.bundler.provider,
    );

    let op = match args.bundler.sponsor_id.as_deref() {
        Some(sponsor_id) => {
            let paymaster = BundlerTransport::new(
                BundlerEndpoint {
                    url: paymaster_url(&args.bundler)?,
                    entry_point: dep.entry_point,
                },
                args.bundler.provider,
            );
            eprintln!("requesting sponsorship (pm_sponsorUserOperation)...");
            let res = with_deadline(
                limit,
                paymaster.sponsor_user_operation(
                    &op.clone().into(),
                    serde_json::json!({ "sponsorId": sponsor_id }),
                ),
            )
            .await
            .context("pm_sponsorUserOperation failed")?;
            parse_sponsor_result(&res)?.apply(op)?
        }
        None => {
            let est = with_deadline(limit, bundler.estimate_user_operation_gas(&op.clone().into()))
                .await
                .context("bundler gas estimate failed")?;
            UserOperationSplit {
                call_gas_limit: Some(est.call_gas_limit),
                verification_gas_limit: Some(est.verification_gas_limit),
                pre_verification_gas: Some(est.pre_verification_gas),
                ..op
            }
        }
    };

    let packed = bundler.pack(&op.into());
    let signature = with_deadline(limit, account.sign(&packed))
        .await
        .context("failed to sign user operation")?;
    let packed = UserOperationPacked { signature, ..packed };

    eprintln!(
        "\nUserOperation (final):\n{}",
        serde_json::to_string_pretty(&encoding::user_op_to_json(&packed))?
    );

    let user_op_hash = with_deadline(limit, bundler.send_user_operation(&packed.into()))
        .await
        .context("bundler send failed")?;

    println!("userOpHash: {}", encoding::fmt_h256(user_op_hash));

    if args.no_wait {
        eprintln!("--no-wait set: not waiting for receipt.");
        return Ok(());
    }

    let receipt = wait_receipt(
        &bundler,
        user_op_hash,
        limit,
        Duration::from_secs(args.max_wait_seconds),
    )
    .await?;

    println!("{}", serde_json::to_string_pretty(&receipt)?);

    Ok(())
}

async fn connect(args: &ChainArgs) -> Result<(Deployment, Provider<Http>)> {
    let dep = load_deployment(&args.deployment, args.rpc.clone())?;
    let provider =
        Provider::<Http>::try_from(dep.rpc_url.as_str())?.interval(Duration::from_millis(350));

    let chain_id = with_deadline(Duration::from_secs(args.timeout_seconds), async {
        provider.get_chainid().await.map_err(Error::query)
    })
    .await
    .context("failed to fetch chain id")?
    .as_u64();
    if chain_id != dep.chain_id {
        return Err(anyhow!(
            "chainId mismatch: deployment has {}, RPC returned {}",
            dep.chain_id,
            chain_id
        ));
    }

    Ok((dep, provider))
}

fn open_account(dep: &Deployment, provider: Provider<Http>, owner: &OwnerArgs) -> Result<Account> {
    let wallet = owner
        .owner_private_key
        .trim()
        .parse::<LocalWallet>()
        .context("invalid owner private key")?
        .with_chain_id(dep.chain_id);

    let config = AccountConfig {
        factory: dep.factory,
        salt: U256::from(owner.salt),
        entry_point: EntryPointConfig::v06(dep.entry_point),
        chain_id: dep.chain_id,
    };

    Ok(SmartAccount::new(
        wallet,
        config,
        EthersChain::new(Arc::new(provider)),
    ))
}

fn bundler_url(args: &BundlerArgs) -> Result<String> {
    let base = match args.provider {
        BundlerProvider::Fuse => DEFAULT_FUSE_BUNDLER_URL,
        BundlerProvider::Pimlico => DEFAULT_PIMLICO_URL,
    };
    endpoint_url(args.bundler_url.as_deref(), base, args.api_key.as_deref(), "--bundler-url")
}

fn paymaster_url(args: &BundlerArgs) -> Result<String> {
    let base = match args.provider {
        BundlerProvider::Fuse => DEFAULT_FUSE_PAYMASTER_URL,
        // Pimlico serves pm_* on the bundler endpoint.
        BundlerProvider::Pimlico => DEFAULT_PIMLICO_URL,
    };
    endpoint_url(
        args.paymaster_url.as_deref().or(args.bundler_url.as_deref().filter(|_| {
            args.provider == BundlerProvider::Pimlico
        })),
        base,
        args.api_key.as_deref(),
        "--paymaster-url",
    )
}

fn endpoint_url(explicit: Option<&str>, base: &str, api_key: Option<&str>, flag: &str) -> Result<String> {
    match (explicit, api_key) {
        (Some(url), _) => Ok(url.to_string()),
        (None, Some(key)) => Ok(format!("{base}{key}")),
        (None, None) => Err(anyhow!("pass {flag} or --api-key (AA_API_KEY)")),
    }
}

async fn wait_receipt(
    bundler: &BundlerTransport,
    user_op_hash: H256,
    poll_limit: Duration,
    max_wait: Duration,
) -> Result<Value> {
    let start = Instant::now();
    loop {
        if start.elapsed() > max_wait {
            return Err(anyhow!(
                "timed out waiting for userOp receipt after {:?}",
                max_wait
            ));
        }

        match with_deadline(poll_limit, bundler.get_user_operation_receipt(user_op_hash)).await {
            Ok(Some(receipt)) => return Ok(receipt),
            Ok(None) => {}
            // transient errors are common on public bundlers; keep polling
            Err(e) => tracing::warn!(error = %e, "bundler receipt poll error"),
        }

        tokio::time::sleep(Duration::from_millis(1500)).await;
    }
}

fn parse_addr(s: &str) -> Result<Address> {
    s.parse::<Address>().map_err(|e| anyhow!("{e}"))
}
