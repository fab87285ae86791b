//! A single call's lifecycle.
//!
//! [`CallSession::initiate`] walks the call through answer, media
//! establishment and engine setup, speaks the greeting, then races the two
//! audio relays against the call deadline. Whatever ends the call, cleanup
//! runs exactly once and every step of it is attempted.

use crate::capability::{Capabilities, ConversationEngine, MediaHandle};
use crate::config::CallConfig;
use crate::error::CallError;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use voxbridge_types::{CallId, CallState, EndpointId, SessionDescription};

/// The two long-running audio activities of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relay {
    /// Caller audio from the media handle into the engine.
    Inbound,
    /// Engine response audio out to the media handle.
    Outbound,
}

impl Relay {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// What ended the conversation phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceOutcome {
    Deadline,
    RelayEnded(Relay),
    Terminated,
}

impl RaceOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deadline => "deadline",
            Self::RelayEnded(Relay::Inbound) => "inbound_ended",
            Self::RelayEnded(Relay::Outbound) => "outbound_ended",
            Self::Terminated => "terminated",
        }
    }
}

struct RelayTask {
    relay: Relay,
    handle: JoinHandle<()>,
}

/// Reports a relay's completion to the race when dropped, so a relay that
/// panics or is aborted still ends it.
struct RelayDone {
    relay: Relay,
    done: mpsc::Sender<Relay>,
}

impl Drop for RelayDone {
    fn drop(&mut self) {
        let _ = self.done.try_send(self.relay);
    }
}

pub struct CallSession {
    call_id: CallId,
    endpoint_id: EndpointId,
    capabilities: Capabilities,
    config: Arc<CallConfig>,
    engine: Arc<dyn ConversationEngine>,
    state: Mutex<CallState>,
    /// Read by the relays; set under the `state` lock so it never flips back on.
    active: Arc<AtomicBool>,
    cancel: CancellationToken,
    media: Mutex<Option<Arc<dyn MediaHandle>>>,
    relays: Mutex<Vec<RelayTask>>,
    cleanup: OnceCell<()>,
}

impl fmt::Debug for CallSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSession")
            .field("call_id", &self.call_id)
            .field("endpoint_id", &self.endpoint_id)
            .field("state", &self.state())
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl CallSession {
    pub fn new(
        call_id: CallId,
        endpoint_id: EndpointId,
        capabilities: Capabilities,
        config: Arc<CallConfig>,
    ) -> Self {
        let engine = capabilities.engines.open(&call_id);
        Self {
            call_id,
            endpoint_id,
            capabilities,
            config,
            engine,
            state: Mutex::new(CallState::Idle),
            active: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            media: Mutex::new(None),
            relays: Mutex::new(Vec::new()),
            cleanup: OnceCell::new(),
        }
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    pub fn endpoint_id(&self) -> &EndpointId {
        &self.endpoint_id
    }

    pub fn state(&self) -> CallState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn has_media(&self) -> bool {
        self.media.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// Drives the call from offer to teardown and returns once the call has ended.
    ///
    /// # Errors
    ///
    /// Returns the setup error (answer, media or engine initialization) that
    /// stopped the call, or [`CallError::Terminated`] if the session was
    /// terminated before the conversation began. Failures after the
    /// conversation has started are logged, not returned.
    pub async fn initiate(&self, offer: SessionDescription) -> Result<(), CallError> {
        info!(call_id = %self.call_id, endpoint_id = %self.endpoint_id, "processing call initiation");

        let result = self.establish(&offer).await;
        match &result {
            Ok(()) => self.converse().await,
            Err(CallError::Terminated) => {
                info!(call_id = %self.call_id, "call terminated during setup");
            }
            Err(e) => {
                error!(call_id = %self.call_id, error = %e, "error handling call initiation");
            }
        }

        self.cleanup().await;
        result
    }

    /// Marks the session inactive and runs cleanup. Safe to call repeatedly
    /// and concurrently; every caller returns once cleanup has finished.
    pub async fn terminate(&self) {
        info!(call_id = %self.call_id, "ending call session");
        self.cancel.cancel();
        self.cleanup().await;
    }

    async fn establish(&self, offer: &SessionDescription) -> Result<(), CallError> {
        self.advance(CallState::Answering)?;
        debug!(call_id = %self.call_id, "creating SDP answer");
        let answer = self.capabilities.media.create_answer(offer)?;
        self.until_terminated(self.capabilities.signaling.answer(
            &self.endpoint_id,
            &self.call_id,
            &answer,
        ))
        .await?;

        self.advance(CallState::MediaEstablishing)?;
        // Not raced against termination: a handle that arrives late is closed
        // by `install_media` instead of being dropped unreleased.
        let media = self
            .capabilities
            .media
            .connect(&self.call_id, &answer, offer)
            .await?;
        self.install_media(media).await?;

        self.advance(CallState::EngineInitializing)?;
        self.until_terminated(self.engine.initialize_session(&self.config.context))
            .await?;

        self.advance(CallState::Conversing)
    }

    async fn install_media(&self, media: Arc<dyn MediaHandle>) -> Result<(), CallError> {
        let rejected = {
            let mut slot = self.media.lock().unwrap_or_else(|e| e.into_inner());
            if self.cancel.is_cancelled() {
                Some(media)
            } else {
                *slot = Some(media);
                None
            }
        };

        match rejected {
            None => Ok(()),
            Some(media) => {
                if let Err(e) = media.close().await {
                    warn!(call_id = %self.call_id, error = %e, "error closing late media session");
                }
                Err(CallError::Terminated)
            }
        }
    }

    fn advance(&self, next: CallState) -> Result<(), CallError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if self.cancel.is_cancelled() || !state.can_transition_to(next) {
            return Err(CallError::Terminated);
        }
        debug!(call_id = %self.call_id, from = state.label(), to = next.label(), "call state transition");
        *state = next;
        if next == CallState::Conversing {
            self.active.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn until_terminated<T>(
        &self,
        operation: impl Future<Output = Result<T, CallError>>,
    ) -> Result<T, CallError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CallError::Terminated),
            result = operation => result,
        }
    }

    fn media_handle(&self) -> Option<Arc<dyn MediaHandle>> {
        self.media.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn converse(&self) {
        let Some(media) = self.media_handle() else {
            warn!(call_id = %self.call_id, "media session not established");
            return;
        };
        info!(call_id = %self.call_id, "starting AI conversation");

        if let Err(e) = self.speak_greeting(media.as_ref()).await {
            match e {
                CallError::Terminated => {
                    debug!(call_id = %self.call_id, "greeting abandoned by termination")
                }
                e => warn!(call_id = %self.call_id, error = %e, "greeting failed, ending call"),
            }
            return;
        }

        let outcome = self.race(media).await;
        info!(call_id = %self.call_id, outcome = outcome.as_str(), "AI conversation ended");
    }

    async fn speak_greeting(&self, media: &dyn MediaHandle) -> Result<(), CallError> {
        info!(call_id = %self.call_id, "AI speaking initial greeting");
        let mut frames = self
            .until_terminated(self.engine.speak_fixed_utterance(&self.config.greeting))
            .await?;

        let mut relayed = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(CallError::Terminated),
                next = frames.next() => next,
            };
            let Some(frame) = next else { break };
            self.until_terminated(media.send_audio(frame?)).await?;
            relayed += 1;
        }

        info!(call_id = %self.call_id, frames = relayed, "initial greeting completed");
        Ok(())
    }

    /// Starts both relays and waits for the first of: a relay finishing, the
    /// deadline, or external termination. The losers are cancelled.
    async fn race(&self, media: Arc<dyn MediaHandle>) -> RaceOutcome {
        let token = self.cancel.child_token();
        let (done_tx, mut done_rx) = mpsc::channel(2);
        let context = RelayContext {
            call_id: self.call_id.clone(),
            media,
            engine: self.engine.clone(),
            active: self.active.clone(),
            token: token.clone(),
        };

        self.spawn_relay(Relay::Inbound, context.clone(), done_tx.clone());
        self.spawn_relay(Relay::Outbound, context, done_tx);

        let outcome = tokio::select! {
            _ = tokio::time::sleep(self.config.call_timeout()) => {
                info!(
                    call_id = %self.call_id,
                    timeout_seconds = self.config.call_timeout_seconds,
                    "call deadline reached"
                );
                RaceOutcome::Deadline
            }
            _ = self.cancel.cancelled() => RaceOutcome::Terminated,
            finished = done_rx.recv() => match finished {
                Some(relay) => RaceOutcome::RelayEnded(relay),
                None => RaceOutcome::Terminated,
            },
        };

        token.cancel();
        outcome
    }

    fn spawn_relay(&self, relay: Relay, context: RelayContext, done: mpsc::Sender<Relay>) {
        let commit_interval = self.config.commit_interval();
        let handle = tokio::spawn(async move {
            let _done = RelayDone { relay, done };
            debug!(call_id = %context.call_id, relay = relay.as_str(), "relay started");
            let result = match relay {
                Relay::Inbound => context.inbound(commit_interval).await,
                Relay::Outbound => context.outbound().await,
            };
            match result {
                Ok(()) | Err(CallError::Terminated) => {}
                Err(e) => {
                    warn!(call_id = %context.call_id, relay = relay.as_str(), error = %e, "relay failed")
                }
            }
            debug!(call_id = %context.call_id, relay = relay.as_str(), "relay stopped");
        });

        let mut relays = self.relays.lock().unwrap_or_else(|e| e.into_inner());
        if self.cancel.is_cancelled() {
            handle.abort();
        } else {
            relays.push(RelayTask { relay, handle });
        }
    }

    async fn cleanup(&self) {
        self.cleanup.get_or_init(|| self.run_cleanup()).await;
    }

    async fn run_cleanup(&self) {
        info!(call_id = %self.call_id, "cleaning up call session");
        self.cancel.cancel();
        self.set_state(CallState::Cleaning);

        let grace = self.config.cancel_grace();
        self.stop_relays(grace).await;

        let media = self.media.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(media) = media {
            match tokio::time::timeout(grace, media.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(call_id = %self.call_id, error = %e, "error closing media session")
                }
                Err(_) => error!(call_id = %self.call_id, "timed out closing media session"),
            }
        }

        match tokio::time::timeout(grace, self.engine.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(call_id = %self.call_id, error = %e, "error disconnecting engine"),
            Err(_) => error!(call_id = %self.call_id, "timed out disconnecting engine"),
        }

        self.set_state(CallState::Terminated);
        info!(call_id = %self.call_id, "call session cleanup completed");
    }

    fn set_state(&self, next: CallState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if next == CallState::Cleaning {
            self.active.store(false, Ordering::SeqCst);
        }
        if state.can_transition_to(next) {
            debug!(call_id = %self.call_id, from = state.label(), to = next.label(), "call state transition");
            *state = next;
        }
    }

    async fn stop_relays(&self, grace: Duration) {
        let relays = std::mem::take(&mut *self.relays.lock().unwrap_or_else(|e| e.into_inner()));
        for RelayTask { relay, handle } in relays {
            let abort = handle.abort_handle();
            match tokio::time::timeout(grace, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => {
                    error!(call_id = %self.call_id, relay = relay.as_str(), error = %e, "relay task panicked")
                }
                Err(_) => {
                    warn!(
                        call_id = %self.call_id,
                        relay = relay.as_str(),
                        "relay did not stop within grace period, aborting"
                    );
                    abort.abort();
                }
            }
        }
    }
}

/// Everything a relay task needs, detached from the session so it can be spawned.
#[derive(Clone)]
struct RelayContext {
    call_id: CallId,
    media: Arc<dyn MediaHandle>,
    engine: Arc<dyn ConversationEngine>,
    active: Arc<AtomicBool>,
    token: CancellationToken,
}

impl RelayContext {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst) && !self.token.is_cancelled()
    }

    async fn guard<T>(
        &self,
        operation: impl Future<Output = Result<T, CallError>>,
    ) -> Result<T, CallError> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(CallError::Terminated),
            result = operation => result,
        }
    }

    /// Forwards caller audio to the engine, committing buffered input once
    /// per `commit_interval` and once more when the media stream ends.
    async fn inbound(&self, commit_interval: Duration) -> Result<(), CallError> {
        let mut frames = self.media.receive_audio()?;
        let mut commit_tick =
            tokio::time::interval_at(tokio::time::Instant::now() + commit_interval, commit_interval);
        commit_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pending = 0usize;

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return Ok(()),
                _ = commit_tick.tick(), if pending > 0 => {
                    self.guard(self.engine.commit_user_audio()).await?;
                    pending = 0;
                }
                next = frames.next() => {
                    let Some(frame) = next else {
                        debug!(call_id = %self.call_id, "inbound media stream closed");
                        break;
                    };
                    let frame = frame?;
                    if !self.is_active() {
                        return Ok(());
                    }
                    self.guard(self.engine.send_user_audio(frame)).await?;
                    pending += 1;
                }
            }
        }

        if pending > 0 && self.is_active() {
            self.guard(self.engine.commit_user_audio()).await?;
        }
        Ok(())
    }

    /// Forwards engine response audio to the caller.
    async fn outbound(&self) -> Result<(), CallError> {
        let mut frames = self.guard(self.engine.response_audio_stream()).await?;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.token.cancelled() => return Ok(()),
                next = frames.next() => next,
            };
            let Some(frame) = next else {
                debug!(call_id = %self.call_id, "engine response stream ended");
                return Ok(());
            };
            let frame = frame?;
            if !self.is_active() {
                return Ok(());
            }
            self.guard(self.media.send_audio(frame)).await?;
        }
    }
}
