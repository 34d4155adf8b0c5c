//! ERC-4337 (EntryPoint v0.6) smart account plumbing for Fuse: operation
//! representations and their wire codec, an Etherspot account adapter, and a
//! JSON-RPC transport for Fuse and Pimlico bundlers.

pub mod account;
pub mod codec;
pub mod config;
pub mod contracts;
pub mod deadline;
pub mod encoding;
pub mod error;
pub mod paymaster;
pub mod transport;
pub mod types;

pub use account::{AccountConfig, ChainQuery, EthersChain, SmartAccount, STUB_SIGNATURE};
pub use codec::{to_packed, to_split, GasFloors};
pub use deadline::with_deadline;
pub use error::{Error, Result};
pub use paymaster::{parse_sponsor_result, SponsorResult};
pub use transport::{BundlerEndpoint, BundlerProvider, BundlerTransport};
pub use types::{
    Call, EntryPointConfig, EntryPointVersion, FactoryArgs, GasEstimates, PaymasterArgs,
    UserOperation, UserOperationPacked, UserOperationSplit,
};
