//! Shared types for the Voxbridge call relay.
//!
//! This crate holds the identifiers, payload wrappers and lifecycle states
//! that every other Voxbridge crate speaks in. It has no async runtime
//! dependency so it can be used from adapters and tests alike.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod state;

pub use state::CallState;

/// Opaque call identifier assigned by the signaling provider.
///
/// Unique within the process for as long as the call is registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CallId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier of the line (business phone number) the call arrived on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(String);

impl EndpointId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// An SDP offer or answer, carried as raw text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionDescription(String);

impl SessionDescription {
    pub fn new(sdp: impl Into<String>) -> Self {
        Self(sdp.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the description carries no non-whitespace text.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for SessionDescription {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A chunk of raw PCM audio travelling through the relay.
#[derive(Clone, PartialEq, Eq)]
pub struct AudioFrame(Vec<u8>);

impl AudioFrame {
    pub fn new(pcm: Vec<u8>) -> Self {
        Self(pcm)
    }

    /// A frame of `len` zero bytes.
    pub fn silence(len: usize) -> Self {
        Self(vec![0; len])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// Frames can be large; keep debug output to the size.
impl fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AudioFrame").field(&self.0.len()).finish()
    }
}

impl From<Vec<u8>> for AudioFrame {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

fn default_voice() -> String {
    "alloy".to_string()
}

/// Session parameters handed to the conversation engine when it is initialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineContext {
    /// System instructions for the assistant.
    #[serde(default)]
    pub instructions: String,

    /// Voice preset the engine should speak with.
    #[serde(default = "default_voice")]
    pub voice: String,

    /// Structured domain context appended to the instructions.
    #[serde(default)]
    pub context: serde_json::Value,
}

impl Default for EngineContext {
    fn default() -> Self {
        Self {
            instructions: String::new(),
            voice: default_voice(),
            context: serde_json::Value::Null,
        }
    }
}
