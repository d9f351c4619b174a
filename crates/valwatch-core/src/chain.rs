//! The read-only chain query surface the engine depends on.

use async_trait::async_trait;

use crate::error::WatchError;
use crate::types::{BlockCommitEvent, SlashingParams, StakingPool, TxResult, ValidatorInfo};

/// Read requests against a Cosmos SDK chain.
///
/// An `error` envelope from the node (unknown address, height beyond head)
/// surfaces as `WatchError::Chain` for that call only.
#[async_trait]
pub trait ChainClient: Send + Sync + 'static {
    /// The full current validator set.
    async fn validators(&self) -> Result<Vec<ValidatorInfo>, WatchError>;

    /// One validator, at `height` when given, else at the latest height.
    async fn validator(
        &self,
        operator: &str,
        height: Option<u64>,
    ) -> Result<ValidatorInfo, WatchError>;

    /// Staking pool totals, at `height` when given.
    async fn staking_pool(&self, height: Option<u64>) -> Result<StakingPool, WatchError>;

    /// Header and last commit of the block at `height`.
    async fn block(&self, height: u64) -> Result<BlockCommitEvent, WatchError>;

    async fn slashing_params(&self) -> Result<SlashingParams, WatchError>;

    /// Transactions included at `height`.
    async fn block_txs(&self, height: u64) -> Result<Vec<TxResult>, WatchError>;

    /// Latest committed height known to the node.
    async fn latest_height(&self) -> Result<u64, WatchError>;
}
