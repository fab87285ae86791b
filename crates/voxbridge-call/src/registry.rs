//! The set of live calls.
//!
//! [`CallRegistry`] maps call ids to sessions, starts each session's
//! lifecycle on its own task, and guarantees at most one session per call id.
//!
//! The session map sits behind a `std::sync::RwLock` that is only ever held
//! for a get, insert or remove and never across an `.await`. `handle_new_call`
//! and `end_call` are additionally serialised per call id by an async
//! admission lock, so a replaced session is fully cleaned up before its
//! successor is inserted while other call ids are admitted freely. `end_all`
//! drains the map without taking any admission lock. No lock is held while a
//! session's lifecycle runs.

use crate::capability::Capabilities;
use crate::config::CallConfig;
use crate::error::CallError;
use crate::session::CallSession;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use voxbridge_types::{CallId, EndpointId, SessionDescription};

type SessionMap = HashMap<CallId, Arc<CallSession>>;
type AdmissionLock = tokio::sync::Mutex<()>;
type AdmissionMap = HashMap<CallId, Arc<AdmissionLock>>;

#[derive(Debug, Clone)]
pub struct CallRegistry {
    sessions: Arc<RwLock<SessionMap>>,
    admissions: Arc<Mutex<AdmissionMap>>,
    capabilities: Capabilities,
    config: Arc<CallConfig>,
}

impl CallRegistry {
    pub fn new(capabilities: Capabilities, config: CallConfig) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            admissions: Arc::new(Mutex::new(HashMap::new())),
            capabilities,
            config: Arc::new(config),
        }
    }

    /// Waits for exclusive admission rights on `call_id`.
    async fn admit(&self, call_id: &CallId) -> Admission {
        let lock = self
            .admissions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(call_id.clone())
            .or_default()
            .clone();
        let guard = lock.lock_owned().await;
        Admission {
            call_id: call_id.clone(),
            admissions: self.admissions.clone(),
            guard: Some(guard),
        }
    }

    /// Accepts a call and starts its lifecycle in the background.
    ///
    /// If a session is already registered for `call_id` it is terminated
    /// (cleanup completed) first. Returns as soon as the new session is
    /// registered; lifecycle failures are logged and end with the session
    /// removing itself.
    pub async fn handle_new_call(
        &self,
        call_id: CallId,
        offer: SessionDescription,
        endpoint_id: EndpointId,
    ) {
        let _admission = self.admit(&call_id).await;

        if let Some(previous) = self.get(&call_id) {
            warn!(call_id = %call_id, "call already exists, ending previous session");
            previous.terminate().await;
            remove_if_same(&self.sessions, &call_id, &previous);
        }

        info!(call_id = %call_id, endpoint_id = %endpoint_id, "creating new call session");
        let session = Arc::new(CallSession::new(
            call_id.clone(),
            endpoint_id,
            self.capabilities.clone(),
            self.config.clone(),
        ));
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(call_id, session.clone());

        tokio::spawn(supervise(self.sessions.clone(), session, offer));
    }

    /// Terminates and removes the session for `call_id`. No-op if absent.
    pub async fn end_call(&self, call_id: &CallId) {
        let _admission = self.admit(call_id).await;

        let Some(session) = self.get(call_id) else {
            debug!(call_id = %call_id, "end_call for unknown call ignored");
            return;
        };
        session.terminate().await;
        remove_if_same(&self.sessions, call_id, &session);
    }

    /// Terminates every registered session concurrently and waits for all of them.
    pub async fn end_all(&self) {
        let sessions: Vec<Arc<CallSession>> = self
            .sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, session)| session)
            .collect();
        if sessions.is_empty() {
            return;
        }

        info!(count = sessions.len(), "ending all active calls");
        let mut terminations = JoinSet::new();
        for session in sessions {
            terminations.spawn(async move { session.terminate().await });
        }
        while let Some(result) = terminations.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "call termination task failed");
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn get(&self, call_id: &CallId) -> Option<Arc<CallSession>> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(call_id)
            .cloned()
    }

    /// Snapshot of the registered call ids, in no particular order.
    pub fn call_ids(&self) -> Vec<CallId> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

/// Held for the duration of one admission or termination of a call id.
///
/// Dropping it releases the per-id lock and forgets the lock entirely once
/// nobody else is queued on it.
struct Admission {
    call_id: CallId,
    admissions: Arc<Mutex<AdmissionMap>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for Admission {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters clone the entry under this lock, so the count cannot grow
        // while it is held.
        let mut admissions = self.admissions.lock().unwrap_or_else(|e| e.into_inner());
        if admissions
            .get(&self.call_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            admissions.remove(&self.call_id);
        }
    }
}

/// Runs one session's lifecycle and removes it from the map afterwards.
///
/// The lifecycle runs on its own task so that a panic inside it is contained
/// here: the session is still cleaned up and unregistered.
async fn supervise(
    sessions: Arc<RwLock<SessionMap>>,
    session: Arc<CallSession>,
    offer: SessionDescription,
) {
    let call_id = session.call_id().clone();
    let lifecycle = {
        let session = session.clone();
        tokio::spawn(async move { session.initiate(offer).await })
    };

    match lifecycle.await {
        Ok(Ok(())) => debug!(call_id = %call_id, "call session finished"),
        Ok(Err(CallError::Terminated)) => debug!(call_id = %call_id, "call session terminated"),
        Ok(Err(e)) => error!(call_id = %call_id, error = %e, "error in call session"),
        Err(e) => {
            error!(call_id = %call_id, error = %e, "call session task failed");
            session.terminate().await;
        }
    }

    remove_if_same(&sessions, &call_id, &session);
}

/// Removes `call_id` only if it still maps to `session`, so a finished
/// session never unregisters its replacement.
fn remove_if_same(sessions: &RwLock<SessionMap>, call_id: &CallId, session: &Arc<CallSession>) {
    let mut sessions = sessions.write().unwrap_or_else(|e| e.into_inner());
    if sessions
        .get(call_id)
        .is_some_and(|current| Arc::ptr_eq(current, session))
    {
        sessions.remove(call_id);
        debug!(call_id = %call_id, remaining = sessions.len(), "call session unregistered");
    }
}
