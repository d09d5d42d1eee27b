use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum PanelError {
    #[error("A run is already in progress ({0} active)")]
    AtCapacity(usize),

    #[error("run {0} not found")]
    RunNotFound(Uuid),

    #[error("no active worker to stop")]
    NoActiveRun,

    #[error("failed to start worker: {0}")]
    Spawn(std::io::Error),

    #[error("Invalid run request: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, PanelError>;
