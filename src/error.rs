use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("corrupt frame: {0}")]
    CorruptFrame(&'static str),

    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("unknown envelope: {0}")]
    UnknownEnvelope(String),

    #[error("malformed request: {0}")]
    MalformedRequest(&'static str),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("peer disconnected")]
    Disconnected,

    #[error("send stalled past deadline")]
    SendStalled,

    #[error("no request pending reply")]
    NoPendingRequest,

    #[error("undefined unit: {0}")]
    UndefinedUnit(String),

    #[error("cannot convert {from} to {to}: incompatible dimensions")]
    Dimensionality { from: String, to: String },

    #[error("invalid grid: {0}")]
    InvalidGrid(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
