//! Simulated realtime conversation engine.
//!
//! Builds the same JSON events a realtime speech API expects and logs them
//! at debug level instead of sending them over a socket. Response audio is
//! synthesized silence.

use async_trait::async_trait;
use base64::Engine as _;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use voxbridge_call::{AudioStream, CallError, ConversationEngine, EngineConnector};
use voxbridge_types::{AudioFrame, CallId, EngineContext};

/// Size of one synthesized response chunk.
pub const RESPONSE_FRAME_BYTES: usize = 160;
/// Pace of synthesized response audio.
pub const RESPONSE_FRAME_INTERVAL: Duration = Duration::from_secs(1);

/// Credential for the realtime API. Never printed.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(****)")
    }
}

/// Opens one [`SimulatedRealtime`] per call.
#[derive(Debug, Clone)]
pub struct RealtimeConnector {
    url: String,
    api_key: ApiKey,
}

impl RealtimeConnector {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: ApiKey::new(api_key),
        }
    }
}

impl EngineConnector for RealtimeConnector {
    fn open(&self, call_id: &CallId) -> Arc<dyn ConversationEngine> {
        Arc::new(SimulatedRealtime::new(
            call_id.clone(),
            self.url.clone(),
            self.api_key.clone(),
        ))
    }
}

#[derive(Debug)]
pub struct SimulatedRealtime {
    call_id: CallId,
    url: String,
    api_key: ApiKey,
    disconnected: CancellationToken,
    disconnecting: AtomicBool,
    /// Last event of each type, and how many of each were sent.
    outbox: Mutex<HashMap<&'static str, (u64, Value)>>,
}

impl SimulatedRealtime {
    pub fn new(call_id: CallId, url: String, api_key: ApiKey) -> Self {
        Self {
            call_id,
            url,
            api_key,
            disconnected: CancellationToken::new(),
            disconnecting: AtomicBool::new(false),
            outbox: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_connected(&self) -> bool {
        !self.disconnected.is_cancelled()
    }

    pub fn sent_count(&self, event_type: &str) -> u64 {
        self.outbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(event_type)
            .map_or(0, |(count, _)| *count)
    }

    pub fn last_event(&self, event_type: &str) -> Option<Value> {
        self.outbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(event_type)
            .map(|(_, event)| event.clone())
    }

    fn ensure_connected(&self) -> Result<(), CallError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(CallError::Engine("engine session is disconnected".to_string()))
        }
    }

    fn send_event(&self, event_type: &'static str, event: Value) -> Result<(), CallError> {
        self.ensure_connected()?;
        tracing::debug!(call_id = %self.call_id, event_type, "realtime event");

        let mut outbox = self.outbox.lock().unwrap_or_else(|e| e.into_inner());
        let entry = outbox.entry(event_type).or_insert((0, Value::Null));
        entry.0 += 1;
        entry.1 = event;
        Ok(())
    }
}

#[async_trait]
impl ConversationEngine for SimulatedRealtime {
    async fn initialize_session(&self, context: &EngineContext) -> Result<(), CallError> {
        self.ensure_connected()?;
        if self.api_key.is_empty() {
            return Err(CallError::Engine("realtime api key is empty".to_string()));
        }
        tracing::debug!(call_id = %self.call_id, url = %self.url, api_key_set = true, "realtime handshake");

        self.send_event("session.update", session_update_event(context))?;
        tracing::info!(call_id = %self.call_id, url = %self.url, voice = %context.voice, "engine session initialized");
        Ok(())
    }

    async fn speak_fixed_utterance(&self, text: &str) -> Result<AudioStream, CallError> {
        self.send_event("response.create", response_create_event(text))?;

        // Roughly one chunk per word spoken.
        let chunks = text.split_whitespace().count().max(1);
        let frames = (0..chunks)
            .map(|_| AudioFrame::silence(RESPONSE_FRAME_BYTES))
            .collect();
        Ok(AudioStream::from_frames(frames))
    }

    async fn send_user_audio(&self, frame: AudioFrame) -> Result<(), CallError> {
        self.send_event("input_audio_buffer.append", append_event(&frame))
    }

    async fn commit_user_audio(&self) -> Result<(), CallError> {
        self.send_event("input_audio_buffer.commit", json!({"type": "input_audio_buffer.commit"}))
    }

    async fn response_audio_stream(&self) -> Result<AudioStream, CallError> {
        self.ensure_connected()?;

        let (sink, stream) = AudioStream::channel(4);
        let disconnected = self.disconnected.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval_at(
                Instant::now() + RESPONSE_FRAME_INTERVAL,
                RESPONSE_FRAME_INTERVAL,
            );
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = disconnected.cancelled() => break,
                    _ = sink.closed() => break,
                    _ = tick.tick() => {
                        if !sink.send(AudioFrame::silence(RESPONSE_FRAME_BYTES)).await {
                            break;
                        }
                    }
                }
            }
        });

        Ok(stream)
    }

    async fn disconnect(&self) -> Result<(), CallError> {
        if self.disconnecting.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.disconnected.cancel();
        tracing::info!(call_id = %self.call_id, "engine session disconnected");
        Ok(())
    }
}

/// `session.update`: configures voice, audio formats and server-side turn detection.
fn session_update_event(context: &EngineContext) -> Value {
    let instructions = if context.context.is_null() {
        context.instructions.clone()
    } else {
        format!("{}\n\nContext: {}", context.instructions, context.context)
    };

    json!({
        "type": "session.update",
        "session": {
            "modalities": ["text", "audio"],
            "instructions": instructions,
            "voice": context.voice,
            "input_audio_format": "pcm16",
            "output_audio_format": "pcm16",
            "input_audio_transcription": { "model": "whisper-1" },
            "turn_detection": {
                "type": "server_vad",
                "threshold": 0.5,
                "prefix_padding_ms": 300,
                "silence_duration_ms": 200
            }
        }
    })
}

fn response_create_event(text: &str) -> Value {
    json!({
        "type": "response.create",
        "response": {
            "modalities": ["audio"],
            "instructions": format!("Say exactly: '{}'", text)
        }
    })
}

fn append_event(frame: &AudioFrame) -> Value {
    json!({
        "type": "input_audio_buffer.append",
        "audio": base64::engine::general_purpose::STANDARD.encode(frame.as_bytes())
    })
}
