use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("frame source timeout")]
    Timeout,
    #[error("capture line {line}: {msg}")]
    Parse { line: u64, msg: String },
    #[error("capture line {line}: bad payload hex: {msg}")]
    BadHex { line: u64, msg: String },
    #[error("cannot encode field '{name}': {msg}")]
    Encode { name: String, msg: String },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;
