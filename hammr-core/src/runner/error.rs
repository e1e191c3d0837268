pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("thread group `{group}`: `threads` must be >= 0 (got {value})")]
    InvalidThreads { group: String, value: i64 },

    #[error("thread group `{group}`: `loops` must be -1 (forever) or >= 0 (got {value})")]
    InvalidLoops { group: String, value: i64 },

    #[error("thread group `{0}`: scheduler mode requires a positive `duration`")]
    MissingDuration(String),

    #[error("thread group `{0}`: startup delay, ramp-up and duration add up to an unreachable time")]
    DurationOverflow(String),

    #[error("test plan has no thread groups")]
    EmptyPlan,
}
