//! Per-call lifecycle states.
//!
//! A call moves strictly forward through the happy path
//! `Idle → Answering → MediaEstablishing → EngineInitializing → Conversing`,
//! may jump to `Cleaning` from any non-terminal state, and ends in
//! `Terminated`, which accepts no further transitions.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallState {
    Idle,
    Answering,
    MediaEstablishing,
    EngineInitializing,
    Conversing,
    Cleaning,
    Terminated,
}

impl CallState {
    /// Returns the label used in logs and admin output.
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Answering => "ANSWERING",
            Self::MediaEstablishing => "MEDIA_ESTABLISHING",
            Self::EngineInitializing => "ENGINE_INITIALIZING",
            Self::Conversing => "CONVERSING",
            Self::Cleaning => "CLEANING",
            Self::Terminated => "TERMINATED",
        }
    }

    /// Whether `self → next` is a legal lifecycle transition.
    pub fn can_transition_to(self, next: CallState) -> bool {
        use CallState::*;
        match (self, next) {
            (Terminated, _) => false,
            (Cleaning, Terminated) => true,
            (Cleaning, _) => false,
            (_, Cleaning) => true,
            (Idle, Answering)
            | (Answering, MediaEstablishing)
            | (MediaEstablishing, EngineInitializing)
            | (EngineInitializing, Conversing) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
