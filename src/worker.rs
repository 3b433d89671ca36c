//! Background thread for running alignments off the caller's thread.
//!
//! Jobs carry a snapshot of the core ([`AlignmentInput`]) and come back as
//! outcomes; the caller applies them to its hierarchy when convenient.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};

use crate::align::{AlignmentInput, AlignmentOutcome, align_core};
use crate::cancel::CancellationToken;
use crate::config::AlignConfig;
use crate::data::ImageServer;
use crate::error::AlignError;
use crate::model::ObjectId;

/// Identifier handed out by [`AlignmentWorker::submit`].
pub type JobId = u32;

struct AlignmentJob {
    id: JobId,
    input: AlignmentInput,
    config: AlignConfig,
    cancel: CancellationToken,
}

/// Message sent to the worker thread.
enum ThreadMessage {
    Align(Box<AlignmentJob>),
    Shutdown,
}

/// A finished job.
#[derive(Debug)]
pub struct JobResult {
    pub id: JobId,
    pub parent: ObjectId,
    pub outcome: Result<AlignmentOutcome, AlignError>,
}

/// Runs alignments on a named background thread, one at a time, in
/// submission order.
pub struct AlignmentWorker {
    request_tx: Sender<ThreadMessage>,
    result_rx: Receiver<JobResult>,
    thread_handle: Option<JoinHandle<()>>,
    next_id: JobId,
    /// Cancellation tokens of jobs that have not been collected yet
    pending: HashMap<JobId, CancellationToken>,
}

impl AlignmentWorker {
    /// Spawn the worker thread reading from `server`.
    pub fn spawn(server: Arc<dyn ImageServer>) -> std::io::Result<Self> {
        let (request_tx, request_rx) = mpsc::channel::<ThreadMessage>();
        let (result_tx, result_rx) = mpsc::channel::<JobResult>();

        let thread_handle = thread::Builder::new()
            .name("alignment-worker".to_string())
            .spawn(move || {
                log::debug!("Alignment worker started");
                Self::thread_loop(server.as_ref(), request_rx, result_tx);
                log::debug!("Alignment worker exiting");
            })?;

        Ok(Self {
            request_tx,
            result_rx,
            thread_handle: Some(thread_handle),
            next_id: 0,
            pending: HashMap::new(),
        })
    }

    fn thread_loop(
        server: &dyn ImageServer,
        request_rx: Receiver<ThreadMessage>,
        result_tx: Sender<JobResult>,
    ) {
        while let Ok(message) = request_rx.recv() {
            match message {
                ThreadMessage::Align(job) => {
                    let outcome = align_core(server, &job.input, &job.config, &job.cancel);
                    let result = JobResult {
                        id: job.id,
                        parent: job.input.parent,
                        outcome,
                    };
                    if result_tx.send(result).is_err() {
                        log::warn!("Result channel closed, alignment worker exiting");
                        break;
                    }
                }
                ThreadMessage::Shutdown => {
                    log::debug!("Received shutdown signal");
                    break;
                }
            }
        }
    }

    /// Queue an alignment and return its id.
    pub fn submit(
        &mut self,
        input: AlignmentInput,
        config: AlignConfig,
    ) -> Result<JobId, AlignError> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        let cancel = CancellationToken::new();
        let job = AlignmentJob {
            id,
            input,
            config,
            cancel: cancel.clone(),
        };
        self.request_tx
            .send(ThreadMessage::Align(Box::new(job)))
            .map_err(|_| AlignError::WorkerStopped)?;
        self.pending.insert(id, cancel);
        log::debug!("Submitted alignment job {}", id);
        Ok(id)
    }

    /// Request cancellation of one job. Returns false if it is unknown or
    /// already collected.
    pub fn cancel(&self, id: JobId) -> bool {
        match self.pending.get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Request cancellation of every pending job.
    pub fn cancel_all(&self) {
        for token in self.pending.values() {
            token.cancel();
        }
    }

    /// Take a finished job if one is ready. Non-blocking.
    pub fn try_recv(&mut self) -> Option<JobResult> {
        match self.result_rx.try_recv() {
            Ok(result) => {
                self.pending.remove(&result.id);
                Some(result)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                log::warn!("Alignment worker disconnected");
                None
            }
        }
    }

    /// Wait for the next finished job.
    pub fn recv(&mut self) -> Result<JobResult, RecvError> {
        let result = self.result_rx.recv()?;
        self.pending.remove(&result.id);
        Ok(result)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for AlignmentWorker {
    fn drop(&mut self) {
        log::debug!("Shutting down alignment worker");
        self.cancel_all();
        let _ = self.request_tx.send(ThreadMessage::Shutdown);

        if let Some(handle) = self.thread_handle.take() {
            if let Err(e) = handle.join() {
                log::warn!("Alignment worker panicked: {:?}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::apply_outcome;
    use crate::synthetic::{SlideLayout, tma_slide};

    fn config() -> AlignConfig {
        AlignConfig {
            gauss_filt_size: 11,
            ..AlignConfig::default()
        }
    }

    #[test]
    fn test_jobs_complete_in_order() {
        let mut slide = tma_slide(&SlideLayout::default());
        let server: Arc<dyn ImageServer> = Arc::new(slide.server());
        let mut worker = AlignmentWorker::spawn(server).unwrap();

        let cores = slide.hierarchy.tma_cores();
        let mut ids = Vec::new();
        for &core in &cores[..2] {
            let input = AlignmentInput::for_core(&slide.hierarchy, core).unwrap();
            ids.push(worker.submit(input, config()).unwrap());
        }
        assert_eq!(worker.pending_count(), 2);

        for (expected_id, &core) in ids.iter().zip(&cores[..2]) {
            let result = worker.recv().unwrap();
            assert_eq!(result.id, *expected_id);
            assert_eq!(result.parent, core);
            let outcome = result.outcome.unwrap();
            assert_eq!(apply_outcome(&mut slide.hierarchy, &outcome).unwrap(), 2);
        }
        assert_eq!(worker.pending_count(), 0);
        assert!(worker.try_recv().is_none());
    }

    #[test]
    fn test_cancel_pending_job() {
        let slide = tma_slide(&SlideLayout::default());
        let server: Arc<dyn ImageServer> = Arc::new(slide.server());
        let mut worker = AlignmentWorker::spawn(server).unwrap();

        let core = slide.hierarchy.tma_cores()[0];
        let input = AlignmentInput::for_core(&slide.hierarchy, core).unwrap();
        let first = worker.submit(input.clone(), config()).unwrap();
        let second = worker.submit(input, config()).unwrap();
        assert!(worker.cancel(second));
        assert!(!worker.cancel(999));

        let a = worker.recv().unwrap();
        assert_eq!(a.id, first);
        assert!(a.outcome.is_ok());
        let b = worker.recv().unwrap();
        assert_eq!(b.id, second);
        assert!(matches!(b.outcome, Err(AlignError::Cancelled)));
    }

    #[test]
    fn test_drop_joins_thread() {
        let slide = tma_slide(&SlideLayout {
            rows: 1,
            cols: 1,
            ..Default::default()
        });
        let server: Arc<dyn ImageServer> = Arc::new(slide.server());
        let worker = AlignmentWorker::spawn(server).unwrap();
        drop(worker);
    }
}
