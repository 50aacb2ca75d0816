//! Versioned staking-protocol parameters.
//!
//! Parameters are published as an ordered sequence of immutable versions,
//! each activating at a BTC height.  The set active for a block is the one
//! with the greatest activation height at or below it.

mod error;
mod serde_helpers;
mod types;
mod versioned;

pub use error::ParamsError;
pub use types::StakingParams;
pub use versioned::VersionedStakingParams;
