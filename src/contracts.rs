use ethers::contract::abigen;

// Etherspot wallet factory. `index` is the CREATE2 salt.
abigen!(
    WalletFactory,
    r#"[
        function createAccount(address owner, uint256 index) returns (address)
        function getAddress(address owner, uint256 index) view returns (address)
    ]"#
);

// Smart account entry points we encode call data for; never called off-chain.
abigen!(
    EtherspotWallet,
    r#"[
        function execute(address dest, uint256 value, bytes func)
        function executeBatch(address[] dest, uint256[] value, bytes[] func)
        function isValidSignature(bytes32 hash, bytes signature) view returns (bytes4)
    ]"#
);

// Only the read we need from EntryPoint v0.6.
abigen!(
    EntryPoint,
    r#"[
        function getNonce(address sender, uint192 key) view returns (uint256 nonce)
    ]"#
);

// Fuse sponsor paymaster: per-sponsor deposit.
abigen!(
    SponsorPaymaster,
    r#"[
        function sponsorBalances(uint256) view returns (uint256)
    ]"#
);

abigen!(
    Erc20,
    r#"[
        function transfer(address to, uint256 amount) returns (bool)
    ]"#
);
