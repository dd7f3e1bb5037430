use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModemError {
    #[error("invalid configuration: {0}")]
    ConfigError(String),

    #[error("resource allocation failed: {0}")]
    ResourceError(String),

    #[error("calibration failed: {0}")]
    CalibrationError(String),

    #[error("frame error: {0}")]
    FrameError(String),

    #[error("packet payload exceeds 65535 bytes")]
    PacketOverflow,

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, ModemError>;
