//! Interfaces to the collaborators a call depends on.
//!
//! The session never talks to a signaling provider, a media stack or an AI
//! engine directly; it is handed implementations of these traits through
//! [`Capabilities`].

use crate::error::CallError;
use crate::stream::AudioStream;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use voxbridge_types::{AudioFrame, CallId, EndpointId, EngineContext, SessionDescription};

/// Delivers the local answer to the remote party.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    async fn answer(
        &self,
        endpoint_id: &EndpointId,
        call_id: &CallId,
        answer: &SessionDescription,
    ) -> Result<(), CallError>;
}

/// Negotiates and opens the call's audio path.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Computes the local answer for an offer. Pure and fast; never blocks.
    fn create_answer(&self, offer: &SessionDescription) -> Result<SessionDescription, CallError>;

    async fn connect(
        &self,
        call_id: &CallId,
        local: &SessionDescription,
        remote: &SessionDescription,
    ) -> Result<Arc<dyn MediaHandle>, CallError>;
}

/// An established, bidirectional audio path.
#[async_trait]
pub trait MediaHandle: Send + Sync {
    async fn send_audio(&self, frame: AudioFrame) -> Result<(), CallError>;

    /// Takes the inbound audio stream. It can be taken once; later calls
    /// return [`CallError::StreamTaken`]. The stream ends when the handle closes.
    fn receive_audio(&self) -> Result<AudioStream, CallError>;

    /// Idempotent.
    async fn close(&self) -> Result<(), CallError>;
}

/// A connection to the realtime conversation engine, owned by one call.
#[async_trait]
pub trait ConversationEngine: Send + Sync {
    async fn initialize_session(&self, context: &EngineContext) -> Result<(), CallError>;

    /// Asks the engine to say `text`. The returned stream ends when the
    /// utterance is complete.
    async fn speak_fixed_utterance(&self, text: &str) -> Result<AudioStream, CallError>;

    async fn send_user_audio(&self, frame: AudioFrame) -> Result<(), CallError>;

    /// Asks the engine to process the user audio buffered so far.
    async fn commit_user_audio(&self) -> Result<(), CallError>;

    /// Generated response audio, running until the engine session ends.
    async fn response_audio_stream(&self) -> Result<AudioStream, CallError>;

    /// Idempotent.
    async fn disconnect(&self) -> Result<(), CallError>;
}

/// Opens a fresh engine connection for each call.
pub trait EngineConnector: Send + Sync {
    fn open(&self, call_id: &CallId) -> Arc<dyn ConversationEngine>;
}

/// The collaborator set handed to every session.
#[derive(Clone)]
pub struct Capabilities {
    pub signaling: Arc<dyn SignalingTransport>,
    pub media: Arc<dyn MediaTransport>,
    pub engines: Arc<dyn EngineConnector>,
}

impl Capabilities {
    pub fn new(
        signaling: Arc<dyn SignalingTransport>,
        media: Arc<dyn MediaTransport>,
        engines: Arc<dyn EngineConnector>,
    ) -> Self {
        Self {
            signaling,
            media,
            engines,
        }
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities").finish_non_exhaustive()
    }
}
