use thiserror::Error;

/// Errors raised while setting up or looking up a schedule
#[derive(Debug, Error)]
pub enum GovernorError {
    /// The monitor thread could not be started
    #[error("failed to spawn monitor thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),

    /// The schedule (or its context group) has already been torn down
    #[error("schedule has been disposed")]
    Disposed,
}
