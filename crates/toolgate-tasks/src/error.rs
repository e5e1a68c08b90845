use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("task not found: {0}")]
    NotFound(String),
    #[error("too many unfinished background tasks (limit {limit})")]
    Saturated { limit: usize },
}
