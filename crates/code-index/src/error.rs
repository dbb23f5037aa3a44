use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("search backend unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("invalid index root: {0}")]
    InvalidPath(String),

    #[error("index persistence: {0}")]
    Persist(String),
}
