use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Missing required '{0}' header")]
    MissingRequiredHeader(&'static str),

    #[error("Serializer '{0}' is no longer accepting tasks")]
    SerializerClosed(String),

    #[error("Service with name '{0}' already registered")]
    ServiceExists(String),

    #[error("Channel closed")]
    ChannelClosed,
}
