use std::collections::VecDeque;

use super::error::{SelectionError, SelectionResult};

const TRANSITION_HISTORY_LIMIT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionPhase {
    #[default]
    Inactive,
    Selecting,
    Transforming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionEvent {
    Start,
    Capture,
    Cancel,
    Apply,
    Discard,
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTransition {
    pub from: SelectionPhase,
    pub event: SelectionEvent,
    pub to: SelectionPhase,
}

#[derive(Debug, Default)]
pub struct SelectionMachine {
    phase: SelectionPhase,
    transition_history: VecDeque<PhaseTransition>,
}

impl SelectionMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> SelectionPhase {
        self.phase
    }

    pub fn can_transition(&self, event: SelectionEvent) -> bool {
        self.next_phase(event).is_some()
    }

    pub fn next_phase(&self, event: SelectionEvent) -> Option<SelectionPhase> {
        use SelectionEvent::*;
        match (self.phase, event) {
            (SelectionPhase::Inactive, Start) => Some(SelectionPhase::Selecting),
            (SelectionPhase::Selecting, Capture) => Some(SelectionPhase::Transforming),
            (SelectionPhase::Selecting, Cancel) => Some(SelectionPhase::Inactive),
            (SelectionPhase::Transforming, Apply) => Some(SelectionPhase::Inactive),
            (SelectionPhase::Transforming, Discard) => Some(SelectionPhase::Inactive),
            (_, Reset) => Some(SelectionPhase::Inactive),
            _ => None,
        }
    }

    pub fn transition(&mut self, event: SelectionEvent) -> SelectionResult<SelectionPhase> {
        tracing::debug!(from = ?self.phase, event = ?event, "request selection transition");
        let next = self.next_phase(event).ok_or_else(|| {
            let from = self.phase;
            tracing::warn!(from = ?from, event = ?event, "invalid selection transition requested");
            SelectionError::InvalidTransition { from, event }
        })?;

        if self.transition_history.len() == TRANSITION_HISTORY_LIMIT {
            self.transition_history.pop_front();
        }
        self.transition_history.push_back(PhaseTransition {
            from: self.phase,
            event,
            to: next,
        });
        self.phase = next;
        Ok(next)
    }

    pub fn ensure(&self, expected: SelectionPhase) -> SelectionResult<()> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(SelectionError::WrongPhase {
                expected,
                actual: self.phase,
            })
        }
    }
}

#[cfg(test)]
impl SelectionMachine {
    fn history(&self) -> &VecDeque<PhaseTransition> {
        &self.transition_history
    }
}
