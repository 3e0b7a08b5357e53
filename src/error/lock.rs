/// Errors returned by an [`AdvisoryLockStore`](crate::lock::AdvisoryLockStore).
#[derive(Debug, thiserror::Error)]
pub enum LockStoreError {
    /// The database rejected or failed the lock statement.
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    /// The lock backend could not be reached.
    #[error("advisory lock backend unavailable: {0}")]
    Unavailable(String),
}
