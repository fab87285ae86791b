//! Recording test doubles for the call capabilities.
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use voxbridge_call::{
    AudioSink, AudioStream, CallConfig, CallError, CallSession, Capabilities, ConversationEngine,
    EngineConnector, MediaHandle, MediaTransport, SignalingTransport,
};
use voxbridge_types::{AudioFrame, CallId, EndpointId, EngineContext, SessionDescription};

pub const GREETING_BYTE: u8 = 0x01;
pub const RESPONSE_BYTE: u8 = 0x02;
pub const CALLER_BYTE: u8 = 0x03;

/// Ordered log of everything the fakes were asked to do.
#[derive(Default)]
pub struct Journal(Mutex<Vec<String>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.0.lock().unwrap().iter().any(|e| e == entry)
    }

    pub fn first(&self, entry: &str) -> Option<usize> {
        self.0.lock().unwrap().iter().position(|e| e == entry)
    }

    pub fn last(&self, entry: &str) -> Option<usize> {
        self.0.lock().unwrap().iter().rposition(|e| e == entry)
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == entry).count()
    }
}

/// How the fakes behave for a test.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub fail_answer: bool,
    pub fail_signaling: bool,
    pub hang_signaling: bool,
    pub fail_connect: bool,
    pub connect_delay: Option<Duration>,
    pub fail_init: bool,
    pub greeting_frames: usize,
    /// `Some(n)`: caller sends `n` frames and hangs up. `None`: the line stays open.
    pub inbound_frames: Option<usize>,
    pub response_frames: usize,
    pub fail_response: bool,
    /// How long each media close takes.
    pub close_delay: Option<Duration>,
    pub panic_on_receive: bool,
}

pub struct FakeSignaling {
    journal: Arc<Journal>,
    script: Script,
    pub answers: Mutex<Vec<(EndpointId, CallId, SessionDescription)>>,
}

#[async_trait]
impl SignalingTransport for FakeSignaling {
    async fn answer(
        &self,
        endpoint_id: &EndpointId,
        call_id: &CallId,
        answer: &SessionDescription,
    ) -> Result<(), CallError> {
        self.journal.record("signaling.answer");
        self.answers
            .lock()
            .unwrap()
            .push((endpoint_id.clone(), call_id.clone(), answer.clone()));
        if self.script.hang_signaling {
            std::future::pending::<()>().await;
        }
        if self.script.fail_signaling {
            return Err(CallError::Signaling("answer rejected".into()));
        }
        Ok(())
    }
}

pub struct FakeMedia {
    journal: Arc<Journal>,
    script: Script,
    pub answer: SessionDescription,
    pub connects: Mutex<Vec<(CallId, SessionDescription, SessionDescription)>>,
    pub handles: Mutex<Vec<Arc<FakeMediaHandle>>>,
}

impl FakeMedia {
    pub fn handle(&self, index: usize) -> Arc<FakeMediaHandle> {
        self.handles.lock().unwrap()[index].clone()
    }

    pub fn handle_count(&self) -> usize {
        self.handles.lock().unwrap().len()
    }
}

#[async_trait]
impl MediaTransport for FakeMedia {
    fn create_answer(&self, _offer: &SessionDescription) -> Result<SessionDescription, CallError> {
        self.journal.record("media.create_answer");
        if self.script.fail_answer {
            return Err(CallError::Media("unsupported offer".into()));
        }
        Ok(self.answer.clone())
    }

    async fn connect(
        &self,
        call_id: &CallId,
        local: &SessionDescription,
        remote: &SessionDescription,
    ) -> Result<Arc<dyn MediaHandle>, CallError> {
        self.journal.record("media.connect");
        self.connects
            .lock()
            .unwrap()
            .push((call_id.clone(), local.clone(), remote.clone()));
        if let Some(delay) = self.script.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if self.script.fail_connect {
            return Err(CallError::Media("ice failed".into()));
        }
        let handle = Arc::new(FakeMediaHandle::new(self.journal.clone(), &self.script));
        self.handles.lock().unwrap().push(handle.clone());
        Ok(handle)
    }
}

pub struct FakeMediaHandle {
    journal: Arc<Journal>,
    inbound: Mutex<Option<AudioStream>>,
    feed: Mutex<Option<AudioSink>>,
    pub sent: Mutex<Vec<AudioFrame>>,
    closes: AtomicUsize,
    close_delay: Option<Duration>,
    panic_on_receive: bool,
}

impl FakeMediaHandle {
    fn new(journal: Arc<Journal>, script: &Script) -> Self {
        let (inbound, feed) = match script.inbound_frames {
            Some(n) => (
                AudioStream::from_frames(vec![AudioFrame::new(vec![CALLER_BYTE; 320]); n]),
                None,
            ),
            None => {
                let (sink, stream) = AudioStream::channel(16);
                (stream, Some(sink))
            }
        };
        Self {
            journal,
            inbound: Mutex::new(Some(inbound)),
            feed: Mutex::new(feed),
            sent: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
            close_delay: script.close_delay,
            panic_on_receive: script.panic_on_receive,
        }
    }

    /// Plays a caller frame into the open line.
    pub async fn speak(&self) -> bool {
        let feed = self.feed.lock().unwrap().clone();
        match feed {
            Some(feed) => feed.send(AudioFrame::new(vec![CALLER_BYTE; 320])).await,
            None => false,
        }
    }

    /// Caller hangs up: the inbound stream ends.
    pub fn hang_up(&self) {
        self.feed.lock().unwrap().take();
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// First byte of every frame sent to the caller, in order.
    pub fn sent_markers(&self) -> Vec<u8> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|f| f.as_bytes()[0])
            .collect()
    }
}

#[async_trait]
impl MediaHandle for FakeMediaHandle {
    async fn send_audio(&self, frame: AudioFrame) -> Result<(), CallError> {
        self.journal
            .record(format!("media.send:{:02x}", frame.as_bytes()[0]));
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    fn receive_audio(&self) -> Result<AudioStream, CallError> {
        self.journal.record("media.receive_audio");
        if self.panic_on_receive {
            panic!("media stack crashed");
        }
        let stream = self
            .inbound
            .lock()
            .unwrap()
            .take()
            .ok_or(CallError::StreamTaken)?;
        if let Some(feed) = self.feed.lock().unwrap().clone() {
            watch_release(self.journal.clone(), feed, "media.inbound_released");
        }
        Ok(stream)
    }

    async fn close(&self) -> Result<(), CallError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.journal.record("media.close");
        self.hang_up();
        if let Some(delay) = self.close_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

pub struct FakeEngine {
    journal: Arc<Journal>,
    script: Script,
    pub contexts: Mutex<Vec<EngineContext>>,
    pub utterances: Mutex<Vec<String>>,
    user_frames: AtomicUsize,
    commits: AtomicUsize,
    disconnects: AtomicUsize,
    response: Mutex<Option<AudioSink>>,
}

impl FakeEngine {
    pub fn user_frames(&self) -> usize {
        self.user_frames.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConversationEngine for FakeEngine {
    async fn initialize_session(&self, context: &EngineContext) -> Result<(), CallError> {
        self.journal.record("engine.initialize");
        self.contexts.lock().unwrap().push(context.clone());
        if self.script.fail_init {
            return Err(CallError::Engine("session rejected".into()));
        }
        Ok(())
    }

    async fn speak_fixed_utterance(&self, text: &str) -> Result<AudioStream, CallError> {
        self.journal.record("engine.speak");
        self.utterances.lock().unwrap().push(text.to_string());
        Ok(AudioStream::from_frames(vec![
            AudioFrame::new(vec![GREETING_BYTE; 160]);
            self.script.greeting_frames
        ]))
    }

    async fn send_user_audio(&self, _frame: AudioFrame) -> Result<(), CallError> {
        self.user_frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn commit_user_audio(&self) -> Result<(), CallError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn response_audio_stream(&self) -> Result<AudioStream, CallError> {
        self.journal.record("engine.response_stream");
        let (sink, stream) = AudioStream::channel(self.script.response_frames + 1);
        if self.script.fail_response {
            sink.fail(CallError::Engine("response failed".into())).await;
        }
        for _ in 0..self.script.response_frames {
            sink.send(AudioFrame::new(vec![RESPONSE_BYTE; 160])).await;
        }
        watch_release(self.journal.clone(), sink.clone(), "engine.response_released");
        *self.response.lock().unwrap() = Some(sink);
        Ok(stream)
    }

    async fn disconnect(&self) -> Result<(), CallError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.journal.record("engine.disconnect");
        self.response.lock().unwrap().take();
        Ok(())
    }
}

pub struct FakeConnector {
    journal: Arc<Journal>,
    script: Script,
    pub engines: Mutex<Vec<Arc<FakeEngine>>>,
}

impl FakeConnector {
    pub fn engine(&self, index: usize) -> Arc<FakeEngine> {
        self.engines.lock().unwrap()[index].clone()
    }

    pub fn all(&self) -> Vec<Arc<FakeEngine>> {
        self.engines.lock().unwrap().clone()
    }
}

impl EngineConnector for FakeConnector {
    fn open(&self, _call_id: &CallId) -> Arc<dyn ConversationEngine> {
        let engine = Arc::new(FakeEngine {
            journal: self.journal.clone(),
            script: self.script.clone(),
            contexts: Mutex::new(Vec::new()),
            utterances: Mutex::new(Vec::new()),
            user_frames: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            response: Mutex::new(None),
        });
        self.engines.lock().unwrap().push(engine.clone());
        engine
    }
}

/// Records `entry` once the consumer of `sink` has dropped its stream.
fn watch_release(journal: Arc<Journal>, sink: AudioSink, entry: &'static str) {
    tokio::spawn(async move {
        sink.closed().await;
        journal.record(entry);
    });
}

pub struct Harness {
    pub journal: Arc<Journal>,
    pub signaling: Arc<FakeSignaling>,
    pub media: Arc<FakeMedia>,
    pub engines: Arc<FakeConnector>,
}

impl Harness {
    pub fn new(script: Script) -> Self {
        let journal = Arc::new(Journal::default());
        Self {
            signaling: Arc::new(FakeSignaling {
                journal: journal.clone(),
                script: script.clone(),
                answers: Mutex::new(Vec::new()),
            }),
            media: Arc::new(FakeMedia {
                journal: journal.clone(),
                script: script.clone(),
                answer: SessionDescription::new("B"),
                connects: Mutex::new(Vec::new()),
                handles: Mutex::new(Vec::new()),
            }),
            engines: Arc::new(FakeConnector {
                journal: journal.clone(),
                script,
                engines: Mutex::new(Vec::new()),
            }),
            journal,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities::new(
            self.signaling.clone(),
            self.media.clone(),
            self.engines.clone(),
        )
    }

    pub fn session(&self, call_id: &str, config: CallConfig) -> Arc<CallSession> {
        Arc::new(CallSession::new(
            CallId::new(call_id),
            EndpointId::new("endpoint-1"),
            self.capabilities(),
            Arc::new(config),
        ))
    }
}

pub fn config_with_timeout(seconds: u64) -> CallConfig {
    CallConfig {
        call_timeout_seconds: seconds,
        greeting: "Hello from the test".to_string(),
        ..CallConfig::default()
    }
}

/// Polls `condition` every 10ms (virtual time under a paused clock) for up to 30s.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..3000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
