use super::machine::{SelectionEvent, SelectionPhase};
use thiserror::Error;

pub type SelectionResult<T> = std::result::Result<T, SelectionError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SelectionError {
    #[error("invalid selection transition: from {from:?} using event {event:?}")]
    InvalidTransition {
        from: SelectionPhase,
        event: SelectionEvent,
    },
    #[error("selection is {actual:?}, expected {expected:?}")]
    WrongPhase {
        expected: SelectionPhase,
        actual: SelectionPhase,
    },
    #[error("no transform drag in progress")]
    NoActiveDrag,
}
