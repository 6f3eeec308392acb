use meshware_core::DhType;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Manifest parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Manifest has no Distributed_Components array")]
    MissingComponents,

    #[error("Manifest too large: {0} bytes")]
    TooLarge(u64),

    #[error("Component loader not initialized")]
    NotLoaded,

    #[error("No version record for device {0}")]
    UnknownDevice(String),

    #[error("Component type {0} does not exist")]
    TypeNotExist(DhType),
}
