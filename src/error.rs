use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum BridgeError {
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Unsupported command: {0}")]
    UnsupportedCommand(String),

    #[error("Invalid hex payload: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
