use thiserror::Error;

#[derive(Debug, Error)]
/// Errors that prevent a disk search from starting.
///
/// Files that cannot be read while searching are skipped and logged, not reported here.
pub enum SearchError {
    #[error("invalid search pattern: {0}")]
    /// The pattern failed to compile.
    InvalidPattern(#[from] regex::Error),

    #[error("failed to spawn search worker: {0}")]
    /// The worker thread could not be started.
    Spawn(#[from] std::io::Error),
}
