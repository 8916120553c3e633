//! Request id allocation and response correlation.
//!
//! The pending table, the job table and the closed flag share one lock, so a
//! response can never be lost between registering a call and waiting on it,
//! and teardown can never race with a late registration. The lock is never
//! held across an await.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use mwrpc_core::{ClientError, ClientResult};
use mwrpc_protocol::{JobEvent, Response, parse_job_id};

use crate::jobs::{JobSender, JobTable};

/// What a pending call resolves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallKind {
    /// The response itself.
    Plain,
    /// A terminal event for the job id carried by the response.
    Job,
}

#[derive(Debug)]
struct PendingCall {
    kind: CallKind,
    sender: JobSender,
}

#[derive(Debug, Default)]
struct CallState {
    pending: HashMap<u64, PendingCall>,
    jobs: JobTable,
    closed: Option<ClientError>,
}

/// Pending calls and job waiters for one connection.
#[derive(Debug)]
pub(crate) struct Correlator {
    next_id: AtomicU64,
    state: Mutex<CallState>,
}

impl Default for Correlator {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            state: Mutex::new(CallState::default()),
        }
    }
}

impl Correlator {
    fn lock(&self) -> MutexGuard<'_, CallState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocates an id and registers a single-use slot for it.
    ///
    /// Fails with the teardown cause once the connection has closed.
    pub(crate) fn register(
        &self,
        kind: CallKind,
    ) -> ClientResult<(u64, oneshot::Receiver<ClientResult<Value>>)> {
        let mut state = self.lock();
        if let Some(reason) = &state.closed {
            return Err(reason.clone());
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        state.pending.insert(id, PendingCall { kind, sender });
        Ok((id, receiver))
    }

    /// Routes a response to its pending call.
    ///
    /// Returns false if no call is waiting on the id.
    pub(crate) fn resolve(&self, response: Response) -> bool {
        let mut state = self.lock();
        let Some(call) = state.pending.remove(&response.id) else {
            return false;
        };
        let call_id = response.id;

        let result = response.into_result().map_err(ClientError::Rpc);
        match (call.kind, result) {
            (CallKind::Plain, result) | (CallKind::Job, result @ Err(_)) => {
                let _ = call.sender.send(result);
            }
            (CallKind::Job, Ok(value)) => match parse_job_id(&value) {
                Some(job_id) => {
                    debug!(call_id, job_id, "job started");
                    state.jobs.attach(job_id, call_id, call.sender);
                }
                None => {
                    warn!(call_id, result = %value, "job call returned no job id");
                    let _ = call.sender.send(Err(ClientError::Protocol(format!(
                        "expected a job id, got {}",
                        value
                    ))));
                }
            },
        }
        true
    }

    /// Routes a job event to its waiter.
    pub(crate) fn on_job_event(&self, event: JobEvent) -> bool {
        self.lock().jobs.on_event(event)
    }

    /// Forgets a call that is no longer being waited on.
    pub(crate) fn cancel(&self, id: u64) {
        let mut state = self.lock();
        state.pending.remove(&id);
        state.jobs.forget_call(id);
    }

    /// Fails every pending call and job waiter with `reason` and refuses
    /// further registrations.
    ///
    /// Only the first call has an effect; returns whether this was it.
    pub(crate) fn fail_all(&self, reason: ClientError) -> bool {
        let mut state = self.lock();
        if state.closed.is_some() {
            return false;
        }
        let pending = state.pending.len();
        for (_, call) in state.pending.drain() {
            let _ = call.sender.send(Err(reason.clone()));
        }
        let jobs = state.jobs.len();
        state.jobs.fail_all(&reason);
        debug!(pending, jobs, reason = %reason, "failed outstanding calls");
        state.closed = Some(reason);
        true
    }

    /// The teardown cause, once closed.
    pub(crate) fn closed(&self) -> Option<ClientError> {
        self.lock().closed.clone()
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    #[cfg(test)]
    pub(crate) fn job_count(&self) -> usize {
        self.lock().jobs.len()
    }
}

/// Deregisters a call when its caller stops waiting, including when the
/// call future is dropped mid-flight.
pub(crate) struct PendingGuard<'a> {
    correlator: &'a Correlator,
    id: u64,
}

impl<'a> PendingGuard<'a> {
    pub(crate) fn new(correlator: &'a Correlator, id: u64) -> Self {
        Self { correlator, id }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.correlator.cancel(self.id);
    }
}
