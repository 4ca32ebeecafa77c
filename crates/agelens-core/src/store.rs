//! Capture store: active flag plus an append-only history of records.

use crate::types::CapturedRecord;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureState {
    pub is_active: bool,
    /// Oldest first. Records are shared between successive states.
    pub history: Vec<Arc<CapturedRecord>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureAction {
    Start,
    Stop,
    /// Shared so the dispatcher keeps a handle to exactly what was appended.
    AddResult(Arc<CapturedRecord>),
}

/// Pure transition function.
pub fn reduce(state: &CaptureState, action: CaptureAction) -> CaptureState {
    match action {
        CaptureAction::Start => CaptureState {
            is_active: true,
            ..state.clone()
        },
        CaptureAction::Stop => CaptureState {
            is_active: false,
            ..state.clone()
        },
        CaptureAction::AddResult(record) => {
            let mut history = Vec::with_capacity(state.history.len() + 1);
            history.extend(state.history.iter().cloned());
            history.push(record);
            CaptureState {
                is_active: state.is_active,
                history,
            }
        }
    }
}

/// Owned state container. Observers subscribe for change notifications.
pub struct CaptureStore {
    state: watch::Sender<CaptureState>,
}

impl CaptureStore {
    pub fn new() -> Self {
        let (state, _) = watch::channel(CaptureState::default());
        Self { state }
    }

    /// Apply an action and return the resulting state.
    pub fn dispatch(&self, action: CaptureAction) -> CaptureState {
        let label = action_label(&action);
        let mut next = CaptureState::default();
        self.state.send_modify(|state| {
            *state = reduce(state, action);
            next = state.clone();
        });
        tracing::debug!(
            action = label,
            is_active = next.is_active,
            history = next.history.len(),
            "capture store updated"
        );
        next
    }

    pub fn state(&self) -> CaptureState {
        self.state.borrow().clone()
    }

    pub fn is_active(&self) -> bool {
        self.state.borrow().is_active
    }

    pub fn subscribe(&self) -> watch::Receiver<CaptureState> {
        self.state.subscribe()
    }

    /// Back to inactive with an empty history.
    pub fn reset(&self) {
        self.state.send_replace(CaptureState::default());
    }
}

impl Default for CaptureStore {
    fn default() -> Self {
        Self::new()
    }
}

fn action_label(action: &CaptureAction) -> &'static str {
    match action {
        CaptureAction::Start => "start",
        CaptureAction::Stop => "stop",
        CaptureAction::AddResult(_) => "add_result",
    }
}
