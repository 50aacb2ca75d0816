use thiserror::Error;

/// Errors raised while loading or validating a params file.  All of these
/// are fatal at startup; none can occur at steady state.
#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("params file unreadable: {0}")]
    Io(#[from] std::io::Error),

    #[error("params file malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("no param versions defined")]
    Empty,

    #[error("version {0} out of order (expected {1})")]
    VersionOutOfOrder(u16, u16),

    #[error("version {0} activates at {1}, below previous activation {2}")]
    ActivationNotMonotonic(u16, u64, u64),

    #[error("version {0}: covenant quorum {1} invalid for {2} covenant keys")]
    BadQuorum(u16, u32, usize),

    #[error("version {0}: min staking amount exceeds max")]
    BadAmountRange(u16),

    #[error("version {0}: min staking time exceeds max")]
    BadTimeRange(u16),

    #[error("version {0}: exactly one of staking_cap and cap_height must be set")]
    BadCap(u16),

    #[error("version {0}: confirmation depth must be nonzero")]
    ZeroConfirmationDepth(u16),
}
