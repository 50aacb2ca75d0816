use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    /// Insert of a key that is already present.  Callers replaying blocks
    /// treat this as a no-op.
    #[error("entry already exists")]
    AlreadyExists,

    /// Unbonding record references a staking tx that is not in the store.
    #[error("missing parent staking tx {0}")]
    MissingParent(bitcoin::Txid),

    /// A stored value failed to decode; the database needs operator
    /// attention.
    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    /// Backend-level failure (I/O and the like), possibly transient.
    #[error("storage backend: {0}")]
    Backend(String),
}

pub type DbResult<T> = Result<T, DbError>;
