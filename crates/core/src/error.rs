use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid build key: {0}")]
    InvalidKey(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
