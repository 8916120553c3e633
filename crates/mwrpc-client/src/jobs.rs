//! Job waiters.
//!
//! A job-producing call resolves in two steps: its response carries a job
//! id, then a terminal job event carries the outcome. The read loop attaches
//! the waiter for that id while it is processing the response, before it
//! reads the next frame, so an event that follows the response cannot slip
//! past. Events that arrive before the response are kept in a small buffer
//! and replayed on attach.

use std::collections::{HashMap, VecDeque};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use mwrpc_core::{ClientError, ClientResult, JobError};
use mwrpc_protocol::{JobEvent, JobState};

/// Terminal events retained for jobs nobody is waiting on yet.
pub(crate) const EARLY_EVENT_CAPACITY: usize = 128;

pub(crate) type JobSender = oneshot::Sender<ClientResult<Value>>;

/// Converts a terminal job event into the waiter's result.
pub(crate) fn outcome(event: &JobEvent) -> ClientResult<Value> {
    match event.state {
        JobState::Success => Ok(event.result.clone()),
        _ => Err(ClientError::Job(JobError::from_event(event))),
    }
}

#[derive(Debug)]
struct Waiter {
    call_id: u64,
    sender: JobSender,
}

/// Waiters keyed by job id, plus the early terminal-event buffer.
#[derive(Debug, Default)]
pub(crate) struct JobTable {
    waiters: HashMap<u64, Waiter>,
    early: VecDeque<JobEvent>,
}

impl JobTable {
    /// Registers interest in `job_id` on behalf of call `call_id`.
    ///
    /// Resolves immediately if the terminal event already arrived.
    pub(crate) fn attach(&mut self, job_id: u64, call_id: u64, sender: JobSender) {
        if let Some(index) = self.early.iter().position(|event| event.id == job_id)
            && let Some(event) = self.early.remove(index)
        {
            debug!(job_id, state = %event.state, "job finished before its id was known");
            let _ = sender.send(outcome(&event));
            return;
        }
        self.waiters.insert(job_id, Waiter { call_id, sender });
    }

    /// Applies a job event. Terminal events resolve their waiter.
    ///
    /// Returns true if a waiter was resolved.
    pub(crate) fn on_event(&mut self, event: JobEvent) -> bool {
        if !event.state.is_terminal() {
            if let Some(progress) = &event.progress {
                debug!(
                    job_id = event.id,
                    state = %event.state,
                    percent = ?progress.percent,
                    description = ?progress.description,
                    "job progress"
                );
            } else {
                trace!(job_id = event.id, state = %event.state, "job state changed");
            }
            return false;
        }

        match self.waiters.remove(&event.id) {
            Some(waiter) => {
                debug!(job_id = event.id, state = %event.state, "job finished");
                let _ = waiter.sender.send(outcome(&event));
                true
            }
            None => {
                if self.early.len() == EARLY_EVENT_CAPACITY {
                    self.early.pop_front();
                }
                self.early.push_back(event);
                false
            }
        }
    }

    /// Drops the waiter registered by `call_id`, if any.
    pub(crate) fn forget_call(&mut self, call_id: u64) {
        self.waiters.retain(|_, waiter| waiter.call_id != call_id);
    }

    /// Fails every waiter with `error`.
    pub(crate) fn fail_all(&mut self, error: &ClientError) {
        for (_, waiter) in self.waiters.drain() {
            let _ = waiter.sender.send(Err(error.clone()));
        }
        self.early.clear();
    }

    /// Number of jobs being waited on.
    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }

    #[cfg(test)]
    pub(crate) fn early_len(&self) -> usize {
        self.early.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(fields: Value) -> JobEvent {
        JobEvent::from_fields(fields).unwrap()
    }

    #[tokio::test]
    async fn success_resolves_with_result() {
        let mut table = JobTable::default();
        let (tx, rx) = oneshot::channel();
        table.attach(5, 1, tx);

        assert!(!table.on_event(event(json!({"id": 5, "state": "RUNNING"}))));
        assert_eq!(table.len(), 1);
        assert!(table.on_event(event(json!({"id": 5, "state": "SUCCESS", "result": [1, 2]}))));
        assert_eq!(table.len(), 0);

        assert_eq!(rx.await.unwrap().unwrap(), json!([1, 2]));
    }

    #[tokio::test]
    async fn failure_resolves_with_job_error() {
        let mut table = JobTable::default();
        let (tx, rx) = oneshot::channel();
        table.attach(6, 1, tx);
        table.on_event(event(json!({"id": 6, "state": "FAILED", "error": "disk full"})));

        match rx.await.unwrap() {
            Err(ClientError::Job(err)) => {
                assert_eq!(err.job_id, 6);
                assert_eq!(err.message.as_deref(), Some("disk full"));
                assert_eq!(err.payload["error"], json!("disk full"));
            }
            other => panic!("expected job error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn progress_never_resolves() {
        let mut table = JobTable::default();
        let (tx, mut rx) = oneshot::channel();
        table.attach(7, 1, tx);
        table.on_event(event(json!({
            "id": 7,
            "state": "RUNNING",
            "progress": {"percent": 50.0, "description": "copying"}
        })));
        assert!(rx.try_recv().is_err());
        assert_eq!(table.early_len(), 0);
    }

    #[tokio::test]
    async fn early_terminal_event_is_replayed() {
        let mut table = JobTable::default();
        table.on_event(event(json!({"id": 8, "state": "ABORTED"})));
        assert_eq!(table.early_len(), 1);

        let (tx, rx) = oneshot::channel();
        table.attach(8, 3, tx);
        assert_eq!(table.early_len(), 0);
        assert_eq!(table.len(), 0);

        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::Job(ref e) if e.is_aborted()));
    }

    #[test]
    fn early_buffer_is_bounded() {
        let mut table = JobTable::default();
        for id in 0..(EARLY_EVENT_CAPACITY as u64 + 10) {
            table.on_event(event(json!({"id": id, "state": "SUCCESS"})));
        }
        assert_eq!(table.early_len(), EARLY_EVENT_CAPACITY);
        assert!(table.early.front().is_some_and(|e| e.id == 10));
    }

    #[tokio::test]
    async fn forget_and_fail_all() {
        let mut table = JobTable::default();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        table.attach(1, 10, tx1);
        table.attach(2, 11, tx2);

        table.forget_call(10);
        assert_eq!(table.len(), 1);

        table.fail_all(&ClientError::closed("gone"));
        assert_eq!(table.len(), 0);
        assert!(rx2.await.unwrap().unwrap_err().is_connection_closed());
    }
}
