//! The staking-indexer pipeline.
//!
//! Wires the confirmed-block stream into classify → store → cap → publish →
//! checkpoint, and the tip stream into the unconfirmed TVL projection.

pub mod cap;
pub mod lookup;
pub mod tip;
pub mod tracker;
pub mod worker;

pub use cap::CapEnforcer;
pub use lookup::DbStakeLookup;
pub use tip::run_tip_worker;
pub use tracker::UnconfirmedTracker;
pub use worker::{run_confirmed_worker, ExecConfig, IndexerState};
