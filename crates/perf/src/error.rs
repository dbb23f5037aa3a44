use thiserror::Error;

pub type Result<T> = std::result::Result<T, PerfError>;

#[derive(Error, Debug)]
pub enum PerfError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("store persistence: {0}")]
    Persist(String),
}
