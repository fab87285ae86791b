//! One-shot audio streams.
//!
//! An [`AudioStream`] is the consuming end of a bounded channel of frames.
//! It ends for good once every [`AudioSink`] feeding it has been dropped,
//! and cannot be rewound or restarted.

use crate::error::CallError;
use tokio::sync::mpsc;
use voxbridge_types::AudioFrame;

type Item = Result<AudioFrame, CallError>;

#[derive(Debug)]
pub struct AudioStream {
    rx: mpsc::Receiver<Item>,
}

/// Producing end of an [`AudioStream`].
#[derive(Debug, Clone)]
pub struct AudioSink {
    tx: mpsc::Sender<Item>,
}

impl AudioStream {
    /// Creates a connected sink/stream pair holding at most `capacity` frames in flight.
    pub fn channel(capacity: usize) -> (AudioSink, AudioStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (AudioSink { tx }, AudioStream { rx })
    }

    /// A finite stream that yields `frames` and then ends.
    pub fn from_frames(frames: Vec<AudioFrame>) -> Self {
        let (tx, rx) = mpsc::channel(frames.len().max(1));
        for frame in frames {
            // Capacity matches the frame count, so this never fails.
            let _ = tx.try_send(Ok(frame));
        }
        Self { rx }
    }

    /// Waits for the next frame. `None` means the stream has finished.
    pub async fn next(&mut self) -> Option<Item> {
        self.rx.recv().await
    }
}

impl AudioSink {
    /// Pushes a frame, waiting for room. Returns `false` if the consumer is gone.
    pub async fn send(&self, frame: AudioFrame) -> bool {
        self.tx.send(Ok(frame)).await.is_ok()
    }

    /// Delivers an error to the consumer in place of a frame.
    pub async fn fail(&self, error: CallError) -> bool {
        self.tx.send(Err(error)).await.is_ok()
    }

    /// Resolves once the consuming stream has been dropped or closed.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}
