//! executor.rs - Runs backend requests on a dedicated background thread.
//!
//! The orchestrating caller is single-threaded. Backend runs block for the
//! whole lifetime of the child process, so they are handed to a worker thread
//! over a channel and the result comes back over another one. The caller's
//! thread never waits on subprocess I/O unless it chooses to block on the
//! response channel.

use crate::backend::{AutomationBackend, CancelFlag, ExecutionContext, RunResult};
use crate::types::AutomationMode;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error};

/// Unique identifier for each request/response pair.
pub type RequestId = u64;

/// A request to run the backend for one preset.
#[derive(Debug, Clone)]
pub struct AutomationRequest {
    pub id: RequestId,
    pub preset_id: String,
    pub mode: AutomationMode,
    pub deadline: Option<Duration>,
    pub cancel: CancelFlag,
}

/// The result of a request, tagged with what was asked for.
#[derive(Debug, Clone)]
pub struct AutomationResponse {
    pub id: RequestId,
    pub preset_id: String,
    pub mode: AutomationMode,
    pub result: RunResult,
}

/// Spawns the worker thread.
///
/// The thread runs requests strictly one after another and exits when either
/// channel is closed.
pub fn spawn_executor_thread(
    backend: Arc<dyn AutomationBackend>,
    request_rx: Receiver<AutomationRequest>,
    response_tx: Sender<AutomationResponse>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        debug!("Automation executor thread started.");
        while let Ok(request) = request_rx.recv() {
            debug!("Executing automation request: {:?}", request);
            let ctx = ExecutionContext {
                deadline: request.deadline,
                cancel: request.cancel.clone(),
            };
            let result = backend.execute(&request.preset_id, request.mode, &ctx);

            let response = AutomationResponse {
                id: request.id,
                preset_id: request.preset_id,
                mode: request.mode,
                result,
            };
            if response_tx.send(response).is_err() {
                error!("Failed to send automation response. Receiver probably dropped.");
                break;
            }
        }
        debug!("Automation executor thread shut down.");
    })
}

/// Both ends of a running executor, as held by the caller.
pub struct ExecutorHandle {
    pub requests: Sender<AutomationRequest>,
    pub responses: Receiver<AutomationResponse>,
    worker: Option<JoinHandle<()>>,
}

impl ExecutorHandle {
    pub fn spawn(backend: Arc<dyn AutomationBackend>) -> Self {
        let (request_tx, request_rx) = mpsc::channel();
        let (response_tx, response_rx) = mpsc::channel();
        let worker = spawn_executor_thread(backend, request_rx, response_tx);

        Self {
            requests: request_tx,
            responses: response_rx,
            worker: Some(worker),
        }
    }

    /// Close the request channel and wait for the worker to finish.
    ///
    /// Requests already queued are still run. Calling this twice is harmless.
    pub fn shutdown(&mut self) {
        let (closed_tx, _) = mpsc::channel();
        drop(std::mem::replace(&mut self.requests, closed_tx));
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Automation executor thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoBackend;

    impl AutomationBackend for EchoBackend {
        fn execute(&self, preset_id: &str, mode: AutomationMode, _ctx: &ExecutionContext) -> RunResult {
            RunResult::LaunchFailure {
                reason: format!("{preset_id}:{mode}"),
            }
        }
    }

    #[test]
    fn test_requests_are_answered_in_order() {
        let mut handle = ExecutorHandle::spawn(Arc::new(EchoBackend));

        for (id, mode) in [(1, AutomationMode::Apply), (2, AutomationMode::StatusProbe)] {
            handle
                .requests
                .send(AutomationRequest {
                    id,
                    preset_id: "perf".to_string(),
                    mode,
                    deadline: None,
                    cancel: CancelFlag::new(),
                })
                .unwrap();
        }

        let first = handle.responses.recv().unwrap();
        let second = handle.responses.recv().unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(
            second.result,
            RunResult::LaunchFailure {
                reason: "perf:status-probe".to_string()
            }
        );

        handle.shutdown();
    }

    #[test]
    fn test_shutdown_joins_worker() {
        let mut handle = ExecutorHandle::spawn(Arc::new(EchoBackend));
        handle.shutdown();
        handle.shutdown();

        let request = AutomationRequest {
            id: 1,
            preset_id: "perf".to_string(),
            mode: AutomationMode::Apply,
            deadline: None,
            cancel: CancelFlag::new(),
        };
        assert!(handle.requests.send(request).is_err());
        assert!(handle.responses.recv().is_err());
    }
}
