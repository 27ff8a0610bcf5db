use thiserror::Error;

/// Directory-side failures. A metrics-restart failure aborts the current
/// run start; everything else degrades to a logged warning.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("failed to regenerate metrics collection config: {0}")]
    MetricsRestart(String),
    #[error("failed to persist directory state: {0}")]
    Persist(String),
    #[error("failed to reach node: {0}")]
    RunStart(String),
}
