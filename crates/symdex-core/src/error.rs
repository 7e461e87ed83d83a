use thiserror::Error;

#[derive(Error, Debug)]
pub enum SymdexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("PCH save error: {0}")]
    PchSave(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Watch error: {0}")]
    Watch(String),

    #[error("Threading error: {0}")]
    Threading(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

pub type Result<T> = std::result::Result<T, SymdexError>;
