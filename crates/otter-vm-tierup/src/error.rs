use std::collections::TryReserveError;

/// Errors produced while bringing up the background optimizer.
///
/// Compilation failures are not represented here: a task whose compile fails
/// is dropped on the worker thread and only shows up in the statistics.
#[derive(Debug, thiserror::Error)]
pub enum TierUpError {
    /// The configuration was rejected before any thread was started.
    #[error("invalid tier-up configuration: {0}")]
    InvalidConfig(String),

    /// The OSR ring buffer could not be sized. Its capacity is fixed for the
    /// lifetime of the optimizer, so this is fatal for construction.
    #[error("failed to allocate OSR buffer with {capacity} slots: {source}")]
    OsrBufferAllocation {
        /// Requested number of slots.
        capacity: usize,
        /// Allocator error.
        #[source]
        source: TryReserveError,
    },

    /// The dedicated optimizer thread could not be spawned.
    #[error("failed to spawn optimizer thread: {0}")]
    SpawnWorker(#[from] std::io::Error),
}
