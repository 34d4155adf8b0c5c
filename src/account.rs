use crate::contracts::{CreateAccountCall, ExecuteBatchCall, ExecuteCall, GetAddressCall, GetNonceCall};
use crate::error::{Error, Result};
use crate::types::{Call, EntryPointConfig, FactoryArgs, UserOperationPacked};
use async_trait::async_trait;
use ethers::abi::{self, AbiDecode, AbiEncode, Token};
use ethers::providers::Middleware;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, H256, U256};
use ethers::utils::keccak256;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Placeholder signature used while estimating gas: 65 bytes, recovery byte
/// `0x1c`. It never validates on-chain.
pub const STUB_SIGNATURE: [u8; 65] = {
    let mut sig = [0u8; 65];
    let mut i = 0;
    while i < 15 {
        sig[i] = 0xff;
        i += 1;
    }
    sig[15] = 0xf0;
    sig[32] = 0x7a;
    let mut i = 33;
    while i < 64 {
        sig[i] = 0xaa;
        i += 1;
    }
    sig[64] = 0x1c;
    sig
};

/// Read-only view of the chain the account lives on.
#[async_trait]
pub trait ChainQuery: Send + Sync {
    /// `eth_call` against `to` at the latest block.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes>;

    /// Deployed bytecode at `address` (empty when nothing is deployed).
    async fn code_at(&self, address: Address) -> Result<Bytes>;
}

/// [`ChainQuery`] over any ethers provider stack.
#[derive(Debug, Clone)]
pub struct EthersChain<M> {
    client: Arc<M>,
}

impl<M> EthersChain<M> {
    pub fn new(client: Arc<M>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<M: Middleware + 'static> ChainQuery for EthersChain<M> {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        self.client.call(&tx, None).await.map_err(Error::query)
    }

    async fn code_at(&self, address: Address) -> Result<Bytes> {
        self.client
            .get_code(address, None)
            .await
            .map_err(Error::query)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AccountConfig {
    pub factory: Address,
    pub salt: U256,
    pub entry_point: EntryPointConfig,
    pub chain_id: u64,
}

/// Etherspot smart account owned by a single ECDSA key.
///
/// The counterfactual address is derived once through the factory and then
/// cached; deployment state and nonce are always read fresh.
#[derive(Debug)]
pub struct SmartAccount<C> {
    owner: LocalWallet,
    config: AccountConfig,
    chain: C,
    address: OnceCell<Address>,
}

impl<C: ChainQuery> SmartAccount<C> {
    pub fn new(owner: LocalWallet, config: AccountConfig, chain: C) -> Self {
        Self {
            owner,
            config,
            chain,
            address: OnceCell::new(),
        }
    }

    pub fn owner(&self) -> Address {
        self.owner.address()
    }

    pub fn config(&self) -> &AccountConfig {
        &self.config
    }

    pub fn entry_point(&self) -> Address {
        self.config.entry_point.address
    }

    /// `factory.getAddress(owner, salt)`.
    pub async fn address(&self) -> Result<Address> {
        self.address
            .get_or_try_init(|| self.derive_address())
            .await
            .copied()
    }

    async fn derive_address(&self) -> Result<Address> {
        let data = GetAddressCall {
            owner: self.owner(),
            index: self.config.salt,
        }
        .encode();
        let ret = self
            .chain
            .call(self.config.factory, data.into())
            .await?;
        let account = Address::decode(&ret).map_err(|e| {
            Error::query(format!("factory.getAddress returned undecodable data: {e}"))
        })?;

        tracing::info!(
            account = %account,
            owner = %self.owner(),
            factory = %self.config.factory,
            salt = %self.config.salt,
            "derived smart account address"
        );
        Ok(account)
    }

    pub async fn is_deployed(&self) -> Result<bool> {
        let address = self.address().await?;
        let code = self.chain.code_at(address).await?;
        Ok(!code.is_empty())
    }

    fn create_account_calldata(&self) -> Bytes {
        CreateAccountCall {
            owner: self.owner(),
            index: self.config.salt,
        }
        .encode()
        .into()
    }

    /// Deployment data in split form; `None` once the account has code.
    pub async fn factory_args(&self) -> Result<Option<FactoryArgs>> {
        if self.is_deployed().await? {
            return Ok(None);
        }
        Ok(Some(FactoryArgs {
            factory: self.config.factory,
            factory_data: self.create_account_calldata(),
        }))
    }

    /// `factory ++ createAccount(owner, salt)`, or empty once deployed.
    pub async fn init_code(&self) -> Result<Bytes> {
        if self.is_deployed().await? {
            return Ok(Bytes::default());
        }
        let create_calldata = self.create_account_calldata();
        let mut v = Vec::with_capacity(20 + create_calldata.len());
        v.extend_from_slice(self.config.factory.as_bytes());
        v.extend_from_slice(create_calldata.as_ref());
        Ok(Bytes::from(v))
    }

    /// `execute` for one call, `executeBatch` for several.
    pub fn encode_calls(&self, calls: &[Call]) -> Result<Bytes> {
        let encoded = match calls {
            [] => return Err(Error::validation("cannot encode an empty call list")),
            [call] => ExecuteCall {
                dest: call.to,
                value: call.value,
                func: call.data.clone(),
            }
            .encode(),
            calls => ExecuteBatchCall {
                dest: calls.iter().map(|c| c.to).collect(),
                value: calls.iter().map(|c| c.value).collect(),
                func: calls.iter().map(|c| c.data.clone()).collect(),
            }
            .encode(),
        };
        Ok(encoded.into())
    }

    /// `EntryPoint.getNonce(account, 0)`.
    pub async fn nonce(&self) -> Result<U256> {
        let address = self.address().await?;
        let data = GetNonceCall {
            sender: address,
            key: U256::zero(),
        }
        .encode();
        let ret = self.chain.call(self.entry_point(), data.into()).await?;
        U256::decode(&ret).map_err(|e| {
            Error::query(format!("entryPoint.getNonce returned undecodable data: {e}"))
        })
    }

    pub fn operation_hash(&self, op: &UserOperationPacked, chain_id: u64) -> H256 {
        user_operation_hash(op, self.entry_point(), chain_id)
    }

    /// Signs the operation hash as an EIP-191 personal message, which is what
    /// the account's signature check recovers against. Returns `r ++ s ++ v`.
    pub async fn sign(&self, op: &UserOperationPacked) -> Result<Bytes> {
        let hash = self.operation_hash(op, self.config.chain_id);
        let sig = self.sign_message(hash.as_bytes()).await?;

        tracing::debug!(user_op_hash = %crate::encoding::fmt_h256(hash), "signed user operation");
        Ok(sig)
    }

    /// Owner's EIP-191 signature over `message`, for `isValidSignature`
    /// checks made against the account.
    pub async fn sign_message<S>(&self, message: S) -> Result<Bytes>
    where
        S: AsRef<[u8]> + Send + Sync,
    {
        let sig = self
            .owner
            .sign_message(message)
            .await
            .map_err(|e| Error::Signing(e.to_string()))?;
        Ok(Bytes::from(sig.to_vec()))
    }

    pub fn stub_signature(&self) -> Bytes {
        Bytes::from(STUB_SIGNATURE.to_vec())
    }
}

/// EntryPoint v0.6 `getUserOpHash`. The signature field is not part of the
/// preimage.
pub fn user_operation_hash(op: &UserOperationPacked, entry_point: Address, chain_id: u64) -> H256 {
    let packed = abi::encode(&[
        Token::Address(op.sender),
        Token::Uint(op.nonce),
        Token::FixedBytes(keccak256(&op.init_code).to_vec()),
        Token::FixedBytes(keccak256(&op.call_data).to_vec()),
        Token::Uint(op.call_gas_limit),
        Token::Uint(op.verification_gas_limit),
        Token::Uint(op.pre_verification_gas),
        Token::Uint(op.max_fee_per_gas),
        Token::Uint(op.max_priority_fee_per_gas),
        Token::FixedBytes(keccak256(&op.paymaster_and_data).to_vec()),
    ]);

    H256(keccak256(abi::encode(&[
        Token::FixedBytes(keccak256(packed).to_vec()),
        Token::Address(entry_point),
        Token::Uint(U256::from(chain_id)),
    ])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::contract::EthCall;
    use ethers::types::{RecoveryMessage, Signature};
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const OWNER_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const ENTRY_POINT: &str = "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789";
    const FACTORY: &str = "0x7f6d8F107fE8551160BD5351d5F1514A6aD5d40E";
    const ACCOUNT: &str = "0x9c5754De1443984659E1b3a8d1931D83475ba29C";

    struct MockChain {
        account: Address,
        nonce: U256,
        code: Mutex<Bytes>,
        get_address_calls: AtomicUsize,
        last_nonce_query: Mutex<Option<GetNonceCall>>,
        fail: bool,
    }

    impl MockChain {
        fn new() -> Self {
            Self {
                account: ACCOUNT.parse().unwrap(),
                nonce: U256::from(5),
                code: Mutex::new(Bytes::default()),
                get_address_calls: AtomicUsize::new(0),
                last_nonce_query: Mutex::new(None),
                fail: false,
            }
        }

        fn deploy(&self) {
            *self.code.lock().unwrap() = Bytes::from(vec![0x60, 0x80, 0x60, 0x40]);
        }
    }

    #[async_trait]
    impl ChainQuery for MockChain {
        async fn call(&self, _to: Address, data: Bytes) -> Result<Bytes> {
            if self.fail {
                return Err(Error::query("execution reverted"));
            }
            let selector = &data[..4];
            if selector == GetAddressCall::selector() {
                self.get_address_calls.fetch_add(1, Ordering::SeqCst);
                return Ok(self.account.encode().into());
            }
            if selector == GetNonceCall::selector() {
                let query = GetNonceCall::decode(&data).unwrap();
                *self.last_nonce_query.lock().unwrap() = Some(query);
                return Ok(self.nonce.encode().into());
            }
            Err(Error::query("unexpected call"))
        }

        async fn code_at(&self, _address: Address) -> Result<Bytes> {
            Ok(self.code.lock().unwrap().clone())
        }
    }

    fn config() -> AccountConfig {
        AccountConfig {
            factory: FACTORY.parse().unwrap(),
            salt: U256::zero(),
            entry_point: EntryPointConfig::v06(ENTRY_POINT.parse().unwrap()),
            chain_id: 122,
        }
    }

    fn account(chain: MockChain) -> SmartAccount<MockChain> {
        let owner = LocalWallet::from_str(OWNER_KEY).unwrap();
        SmartAccount::new(owner, config(), chain)
    }

    #[tokio::test]
    async fn address_is_derived_once_and_stable() {
        let acct = account(MockChain::new());
        let first = acct.address().await.unwrap();
        acct.chain.deploy();
        let second = acct.address().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first, ACCOUNT.parse::<Address>().unwrap());
        assert_eq!(acct.chain.get_address_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_first_callers_share_one_derivation() {
        let acct = account(MockChain::new());
        let (a, b) = tokio::join!(acct.address(), acct.address());

        assert_eq!(a.unwrap(), ACCOUNT.parse::<Address>().unwrap());
        assert_eq!(b.unwrap(), ACCOUNT.parse::<Address>().unwrap());
        assert_eq!(acct.chain.get_address_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn address_failure_is_a_query_error() {
        let acct = account(MockChain {
            fail: true,
            ..MockChain::new()
        });
        assert!(matches!(
            acct.address().await,
            Err(Error::QueryFailed { .. })
        ));
    }

    #[tokio::test]
    async fn init_code_tracks_deployment_state() {
        let acct = account(MockChain::new());

        let init_code = acct.init_code().await.unwrap();
        let factory: Address = FACTORY.parse().unwrap();
        assert_eq!(&init_code[..20], factory.as_bytes());
        let create = CreateAccountCall::decode(&init_code[20..]).unwrap();
        assert_eq!(create.owner, acct.owner());
        assert_eq!(create.index, U256::zero());

        let args = acct.factory_args().await.unwrap().unwrap();
        assert_eq!(args.factory, factory);
        assert_eq!(&args.factory_data[..], &init_code[20..]);

        acct.chain.deploy();
        assert!(acct.init_code().await.unwrap().is_empty());
        assert!(acct.factory_args().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn nonce_uses_key_zero() {
        let acct = account(MockChain::new());
        assert_eq!(acct.nonce().await.unwrap(), U256::from(5));

        let query = acct.chain.last_nonce_query.lock().unwrap().clone().unwrap();
        assert_eq!(query.sender, ACCOUNT.parse::<Address>().unwrap());
        assert_eq!(query.key, U256::zero());
    }

    #[test]
    fn single_call_encodes_execute() {
        let acct = account(MockChain::new());
        let to: Address = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".parse().unwrap();
        let encoded = acct
            .encode_calls(&[Call::new(to, U256::from(100), Bytes::default())])
            .unwrap();

        let mut expected = ethers::utils::id("execute(address,uint256,bytes)").to_vec();
        expected.extend(abi::encode(&[
            Token::Address(to),
            Token::Uint(U256::from(100)),
            Token::Bytes(vec![]),
        ]));
        assert_eq!(encoded.to_vec(), expected);
    }

    #[test]
    fn single_call_matches_known_calldata() {
        let acct = account(MockChain::new());
        let encoded = acct
            .encode_calls(&[Call::new(
                ACCOUNT.parse().unwrap(),
                U256::from(100_000_000_000_000u64),
                Bytes::default(),
            )])
            .unwrap();
        let expected: Bytes = "0xb61d27f60000000000000000000000009c5754de1443984659e1b3a8d1931d83475ba29c00000000000000000000000000000000000000000000000000005af3107a400000000000000000000000000000000000000000000000000000000000000000600000000000000000000000000000000000000000000000000000000000000000".parse().unwrap();
        assert_eq!(encoded, expected);
    }

    #[test]
    fn many_calls_encode_execute_batch_in_order() {
        let acct = account(MockChain::new());
        let a: Address = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".parse().unwrap();
        let b: Address = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".parse().unwrap();
        let encoded = acct
            .encode_calls(&[
                Call::new(a, U256::from(1), Bytes::from(vec![0x01])),
                Call::new(b, U256::from(2), Bytes::from(vec![0x02, 0x03])),
            ])
            .unwrap();

        assert_eq!(
            &encoded[..4],
            &ethers::utils::id("executeBatch(address[],uint256[],bytes[])")[..]
        );
        let batch = ExecuteBatchCall::decode(&encoded).unwrap();
        assert_eq!(batch.dest, vec![a, b]);
        assert_eq!(batch.value, vec![U256::from(1), U256::from(2)]);
        assert_eq!(
            batch.func,
            vec![Bytes::from(vec![0x01]), Bytes::from(vec![0x02, 0x03])]
        );
    }

    #[test]
    fn empty_call_list_is_rejected() {
        let acct = account(MockChain::new());
        assert!(matches!(
            acct.encode_calls(&[]),
            Err(Error::ValidationError(_))
        ));
    }

    #[test]
    fn operation_hash_matches_entry_point_v06() {
        let entry_point: Address = ENTRY_POINT.parse().unwrap();

        let minimal = UserOperationPacked {
            verification_gas_limit: U256::from(100_000),
            pre_verification_gas: U256::from(21_000),
            max_priority_fee_per_gas: U256::from(1_000_000_000u64),
            ..Default::default()
        };
        assert_eq!(
            user_operation_hash(&minimal, entry_point, 80_001),
            "0x95418c07086df02ff6bc9e8bdc150b380cb761beecc098630440bcec6e862702"
                .parse::<H256>()
                .unwrap()
        );

        let with_init_code = UserOperationPacked {
            sender: ACCOUNT.parse().unwrap(),
            nonce: U256::zero(),
            init_code: "0x9406cc6185a346906296840746125a0e449764545fbfb9cf000000000000000000000000ce0fefa6f7979c4c9b5373e0f5105b7259092c6d0000000000000000000000000000000000000000000000000000000000000000".parse().unwrap(),
            call_data: "0xb61d27f60000000000000000000000009c5754de1443984659e1b3a8d1931d83475ba29c00000000000000000000000000000000000000000000000000005af3107a400000000000000000000000000000000000000000000000000000000000000000600000000000000000000000000000000000000000000000000000000000000000".parse().unwrap(),
            call_gas_limit: U256::from(33_100),
            verification_gas_limit: U256::from(361_460),
            pre_verification_gas: U256::from(44_980),
            max_fee_per_gas: U256::from(1_695_000_030u64),
            max_priority_fee_per_gas: U256::from(1_695_000_000u64),
            paymaster_and_data: Bytes::default(),
            signature: "0xebfd4657afe1f1c05c1ec65f3f9cc992a3ac083c424454ba61eab93152195e1400d74df01fc9fa53caadcb83a891d478b713016bcc0c64307c1ad3d7ea2e2d921b".parse().unwrap(),
        };
        assert_eq!(
            user_operation_hash(&with_init_code, entry_point, 80_001),
            "0x7c1b8c9df49a9e09ecef0f0fe6841d895850d29820f9a4b494097764085dcd7e"
                .parse::<H256>()
                .unwrap()
        );
    }

    #[test]
    fn operation_hash_ignores_signature() {
        let acct = account(MockChain::new());
        let op = UserOperationPacked {
            signature: Bytes::from(STUB_SIGNATURE.to_vec()),
            ..Default::default()
        };
        let zeroed = UserOperationPacked {
            signature: Bytes::default(),
            ..op.clone()
        };
        assert_eq!(acct.operation_hash(&op, 122), acct.operation_hash(&zeroed, 122));
        assert_ne!(acct.operation_hash(&op, 122), acct.operation_hash(&op, 1));
    }

    #[tokio::test]
    async fn signature_recovers_owner_over_personal_message() {
        let acct = account(MockChain::new());
        let op = UserOperationPacked {
            sender: ACCOUNT.parse().unwrap(),
            nonce: U256::from(1),
            call_gas_limit: U256::from(100_000),
            ..Default::default()
        };

        let sig = acct.sign(&op).await.unwrap();
        assert_eq!(sig.len(), 65);
        assert!(sig[64] == 27 || sig[64] == 28);

        let hash = acct.operation_hash(&op, 122);
        let signature = Signature::try_from(&sig[..]).unwrap();
        signature
            .verify(RecoveryMessage::Data(hash.as_bytes().to_vec()), acct.owner())
            .unwrap();

        // Not a bare signature over the hash.
        let raw = signature.recover(RecoveryMessage::Hash(hash)).unwrap();
        assert_ne!(raw, acct.owner());
    }

    #[tokio::test]
    async fn message_signature_recovers_to_owner() {
        let acct = account(MockChain::new());
        let sig = acct.sign_message("hello account").await.unwrap();
        assert_eq!(sig.len(), 65);

        let signature = Signature::try_from(&sig[..]).unwrap();
        signature.verify("hello account", acct.owner()).unwrap();
    }

    #[test]
    fn stub_signature_has_valid_shape() {
        let acct = account(MockChain::new());
        let stub = acct.stub_signature();
        let expected: Bytes = "0xfffffffffffffffffffffffffffffff0000000000000000000000000000000007aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1c".parse().unwrap();
        assert_eq!(stub, expected);
        assert_eq!(stub.len(), 65);
        assert_eq!(stub[64], 0x1c);
    }
}
