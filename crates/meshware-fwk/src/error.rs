use meshware_components::LoaderError;
use meshware_core::DhType;
use meshware_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FwkError {
    #[error("Invalid parameter: {0}")]
    ParamInvalid(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Component type {0} does not exist")]
    TypeNotExist(DhType),

    #[error("Enable failed: {0}")]
    EnableFailed(String),

    #[error("Enable timed out")]
    EnableTimeout,

    #[error("Disable failed: {0}")]
    DisableFailed(String),

    #[error("Disable timed out")]
    DisableTimeout,

    #[error("Timed out waiting for tasks, {0} still running")]
    TaskTimeout(usize),

    #[error("Task id already on board: {0}")]
    RepeatTaskId(String),

    #[error("Task queue is full")]
    QueueFull,

    #[error("Device is already online")]
    RepeatOnline,

    #[error("Device is not online")]
    NotOnline,

    #[error("Hardware framework not initialized")]
    NotInitialized,

    #[error("Initialization failed: {0}")]
    InitFailed(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("Unrecognized option, -h for help.")]
    InvalidDumpArgs,
}

pub type Result<T> = std::result::Result<T, FwkError>;
