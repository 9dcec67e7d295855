use thiserror::Error;

#[derive(Error, Debug)]
pub enum AccelError {
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Device Error: {0}")]
    Device(String),

    #[error("Out of memory (requested {requested} bytes)")]
    OutOfMemory { requested: usize },

    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    #[error("Device context not initialized: {0}")]
    NotInitialized(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Mapping Error: {0}")]
    Mapping(String),

    #[error("Invalid dispatch: {0}")]
    InvalidDispatch(String),
}

// A convenient alias
pub type AccelResult<T> = Result<T, AccelError>;
