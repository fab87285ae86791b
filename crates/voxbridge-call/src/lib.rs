//! Call lifecycle orchestration for Voxbridge.
//!
//! A [`CallSession`] owns one call from the signaling offer to teardown:
//! it answers, establishes the media path, initializes the conversation
//! engine, speaks the greeting and then relays audio in both directions
//! until a relay ends, the call deadline passes, or it is terminated.
//! A [`CallRegistry`] owns every live session and keeps at most one per
//! call id.
//!
//! The signaling provider, media stack and conversation engine are reached
//! only through the traits in [`capability`], so the orchestration here can
//! be driven by real adapters or by test doubles.

pub mod capability;
pub mod config;
pub mod error;
pub mod registry;
pub mod session;
pub mod stream;

pub use capability::{
    Capabilities, ConversationEngine, EngineConnector, MediaHandle, MediaTransport,
    SignalingTransport,
};
pub use config::CallConfig;
pub use error::CallError;
pub use registry::CallRegistry;
pub use session::{CallSession, RaceOutcome, Relay};
pub use stream::{AudioSink, AudioStream};
