//! Simulated media transport.
//!
//! There is no WebRTC stack behind this adapter. It produces a well-formed
//! opus audio answer and a handle whose inbound audio is comfort silence,
//! which is enough to drive a full call lifecycle end to end.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use voxbridge_call::{AudioStream, CallError, MediaHandle, MediaTransport};
use voxbridge_types::{AudioFrame, CallId, SessionDescription};

/// Size of one inbound audio chunk.
pub const INBOUND_FRAME_BYTES: usize = 1024;
/// Pace of inbound audio.
pub const INBOUND_FRAME_INTERVAL: Duration = Duration::from_millis(20);

type SessionMap = HashMap<CallId, Arc<SimulatedMediaHandle>>;

#[derive(Debug, Default)]
pub struct SimulatedMedia {
    sessions: Arc<RwLock<SessionMap>>,
    answer_version: AtomicU64,
}

impl SimulatedMedia {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handles that have been connected and not yet closed.
    pub fn open_sessions(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_open(&self, call_id: &CallId) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(call_id)
    }
}

#[async_trait]
impl MediaTransport for SimulatedMedia {
    fn create_answer(&self, offer: &SessionDescription) -> Result<SessionDescription, CallError> {
        if offer.is_empty() {
            return Err(CallError::Media("offer SDP is empty".to_string()));
        }

        let version = self.answer_version.fetch_add(1, Ordering::Relaxed) + 1;
        let answer = format!(
            "v=0\r\n\
             o=- {version} 2 IN IP4 0.0.0.0\r\n\
             s=-\r\n\
             t=0 0\r\n\
             m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
             c=IN IP4 0.0.0.0\r\n\
             a=rtpmap:111 opus/48000/2\r\n\
             a=setup:active\r\n\
             a=sendrecv\r\n"
        );
        Ok(SessionDescription::new(answer))
    }

    async fn connect(
        &self,
        call_id: &CallId,
        _local: &SessionDescription,
        _remote: &SessionDescription,
    ) -> Result<Arc<dyn MediaHandle>, CallError> {
        let handle = Arc::new(SimulatedMediaHandle {
            call_id: call_id.clone(),
            sessions: self.sessions.clone(),
            closed: CancellationToken::new(),
            closing: AtomicBool::new(false),
            inbound_taken: Mutex::new(false),
            frames_sent: AtomicU64::new(0),
        });

        let previous = self
            .sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(call_id.clone(), handle.clone());
        if previous.is_some() {
            tracing::warn!(call_id = %call_id, "media session replaced an open one");
        }

        tracing::info!(call_id = %call_id, "media session connected");
        Ok(handle)
    }
}

#[derive(Debug)]
pub struct SimulatedMediaHandle {
    call_id: CallId,
    sessions: Arc<RwLock<SessionMap>>,
    closed: CancellationToken,
    closing: AtomicBool,
    inbound_taken: Mutex<bool>,
    frames_sent: AtomicU64,
}

impl SimulatedMediaHandle {
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MediaHandle for SimulatedMediaHandle {
    async fn send_audio(&self, frame: AudioFrame) -> Result<(), CallError> {
        if self.is_closed() {
            return Err(CallError::Media("media session is closed".to_string()));
        }
        let sent = self.frames_sent.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(call_id = %self.call_id, bytes = frame.len(), sent, "outbound audio frame");
        Ok(())
    }

    fn receive_audio(&self) -> Result<AudioStream, CallError> {
        {
            let mut taken = self.inbound_taken.lock().unwrap_or_else(|e| e.into_inner());
            if *taken {
                return Err(CallError::StreamTaken);
            }
            *taken = true;
        }

        let (sink, stream) = AudioStream::channel(8);
        if self.is_closed() {
            // Dropping the sink ends the stream right away.
            return Ok(stream);
        }

        let closed = self.closed.clone();
        let call_id = self.call_id.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(INBOUND_FRAME_INTERVAL);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = closed.cancelled() => break,
                    _ = sink.closed() => break,
                    _ = tick.tick() => {
                        if !sink.send(AudioFrame::silence(INBOUND_FRAME_BYTES)).await {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(call_id = %call_id, "inbound media stream ended");
        });

        Ok(stream)
    }

    async fn close(&self) -> Result<(), CallError> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.closed.cancel();

        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        if sessions
            .get(&self.call_id)
            .is_some_and(|current| std::ptr::eq(current.as_ref(), self))
        {
            sessions.remove(&self.call_id);
        }
        tracing::info!(call_id = %self.call_id, frames_sent = self.frames_sent(), "media session closed");
        Ok(())
    }
}
