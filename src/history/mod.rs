use std::collections::VecDeque;

pub const DEFAULT_HISTORY_CAP: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryAction {
    Undo,
    Redo,
}

impl HistoryAction {
    pub const fn applied_message(self) -> &'static str {
        match self {
            Self::Undo => "undo applied",
            Self::Redo => "redo applied",
        }
    }

    pub const fn empty_message(self) -> &'static str {
        match self {
            Self::Undo => "undo stack empty",
            Self::Redo => "redo stack empty",
        }
    }
}

/// Undo and redo stacks that each hold at most `max_entries` states.
///
/// The oldest entries are dropped first once a stack is full.
#[derive(Debug, Clone)]
pub struct UndoRedoManager<T> {
    undo_stack: VecDeque<T>,
    redo_stack: VecDeque<T>,
    max_entries: usize,
}

impl<T> Default for UndoRedoManager<T> {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAP)
    }
}

impl<T> UndoRedoManager<T> {
    pub fn new(max_entries: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_entries: max_entries.max(1),
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Records the state that existed before a mutation and forgets any redo branch.
    pub fn save_state(&mut self, state: T) {
        push_bounded(&mut self.undo_stack, state, self.max_entries);
        self.redo_stack.clear();
    }

    /// Returns the state to restore, or `None` when there is nothing to undo.
    ///
    /// `current` is kept on the redo stack only when an undo actually happens.
    pub fn undo(&mut self, current: T) -> Option<T> {
        self.step(HistoryAction::Undo, current)
    }

    pub fn redo(&mut self, current: T) -> Option<T> {
        self.step(HistoryAction::Redo, current)
    }

    fn step(&mut self, action: HistoryAction, current: T) -> Option<T> {
        let (source, target) = match action {
            HistoryAction::Undo => (&mut self.undo_stack, &mut self.redo_stack),
            HistoryAction::Redo => (&mut self.redo_stack, &mut self.undo_stack),
        };
        let Some(restored) = source.pop_back() else {
            tracing::debug!("{}", action.empty_message());
            return None;
        };
        push_bounded(target, current, self.max_entries);
        tracing::debug!(
            undo_len = self.undo_stack.len(),
            redo_len = self.redo_stack.len(),
            "{}",
            action.applied_message()
        );
        Some(restored)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

fn push_bounded<T>(stack: &mut VecDeque<T>, state: T, max_entries: usize) {
    stack.push_back(state);
    while stack.len() > max_entries {
        stack.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undo_on_empty_stack_is_noop() {
        let mut history = UndoRedoManager::<u32>::new(4);
        assert_eq!(history.undo(7), None);
        assert_eq!(history.redo(7), None);
        assert!(!history.can_undo());
        assert!(!history.can_redo());
    }

    #[test]
    fn undo_then_redo_walks_states_in_order() {
        let mut history = UndoRedoManager::new(4);
        history.save_state(1);
        history.save_state(2);

        assert_eq!(history.undo(3), Some(2));
        assert_eq!(history.undo(2), Some(1));
        assert_eq!(history.undo(1), None);
        assert_eq!(history.redo(1), Some(2));
        assert_eq!(history.redo(2), Some(3));
        assert_eq!(history.redo(3), None);
    }

    #[test]
    fn save_state_discards_redo_branch() {
        let mut history = UndoRedoManager::new(4);
        history.save_state("a");
        assert_eq!(history.undo("b"), Some("a"));
        assert!(history.can_redo());

        history.save_state("c");
        assert!(!history.can_redo());
        assert_eq!(history.redo("d"), None);
    }

    #[test]
    fn undo_stack_never_exceeds_cap() {
        let cap = 5;
        let mut history = UndoRedoManager::new(cap);
        for state in 0..(cap * 3) {
            history.save_state(state);
            assert!(history.undo_len() <= cap);
        }
        assert_eq!(history.undo_len(), cap);

        let mut restored = Vec::new();
        let mut current = 100;
        while let Some(state) = history.undo(current) {
            restored.push(state);
            current = state;
        }
        assert_eq!(restored, vec![14, 13, 12, 11, 10]);
        assert!(history.redo_len() <= cap);
    }

    #[test]
    fn zero_cap_is_raised_to_one() {
        let mut history = UndoRedoManager::new(0);
        history.save_state(1);
        history.save_state(2);
        assert_eq!(history.max_entries(), 1);
        assert_eq!(history.undo(3), Some(2));
        assert_eq!(history.undo(2), None);
    }
}
