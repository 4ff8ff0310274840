pub mod client;
pub mod wallet;

pub use client::{ApiTransaction, ChainTxStatus, StacksClient, StacksError};
pub use wallet::{SignerClient, StacksWallet, WalletError};
