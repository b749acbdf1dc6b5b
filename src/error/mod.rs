use crate::config::ConfigError;
use crate::layer::LayerError;
use crate::selection::SelectionError;
use crate::storage::StorageError;
use thiserror::Error;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Layer(#[from] LayerError),
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
