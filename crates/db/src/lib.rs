//! Database interfaces for the staking indexer.
//!
//! Trait definitions and stored record types only; concrete backends live
//! in their own crates.  Naming loosely follows reth-style low level store
//! traits.

mod errors;
pub mod traits;
pub mod types;

pub use errors::{DbError, DbResult};
pub use traits::{ProgressDatabase, StakingIndexerDatabase};
pub use types::{StoredStakingTx, StoredUnbondingTx};
