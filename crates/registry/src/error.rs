use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("catalog fetch failed: {0}")]
    Fetch(String),

    #[error("remote operation requires an API key")]
    MissingApiKey,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
