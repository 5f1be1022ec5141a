//! Background runs.
//!
//! Each submitted run gets its own thread that owns the run's grid and
//! solids outright; the caller only ever sees [`RunEvent`]s. At most
//! one run per output target is live: a new submission for the same
//! target cancels the previous one.

use crate::{
    pipeline::{self, CancelToken, RunEvent, RunRequest, RunSummary},
    ReliefError,
};
use crossbeam_channel::{unbounded, Receiver};
use dashmap::DashMap;
use log::{debug, info};
use std::{
    path::PathBuf,
    sync::Arc,
    thread::{self, JoinHandle},
};

#[derive(Debug, Default, Clone)]
pub struct Dispatcher {
    /// Live runs by package path.
    active: Arc<DashMap<PathBuf, CancelToken>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts `request` on a new worker thread.
    pub fn submit(&self, request: RunRequest) -> Result<RunHandle, ReliefError> {
        let target = request.outputs().package();
        let cancel = CancelToken::new();
        if let Some(previous) = self.active.insert(target.clone(), cancel.clone()) {
            info!("superseding the running job for {target:?}");
            previous.cancel();
        }

        let (tx, rx) = unbounded();
        let active = Arc::clone(&self.active);
        let token = cancel.clone();
        let key = target.clone();
        let thread = thread::Builder::new()
            .name("relief-run".to_string())
            .spawn(move || {
                let event = match pipeline::run(request, &token, &tx) {
                    Ok(summary) => RunEvent::Finished(summary),
                    Err(ReliefError::Cancelled) => RunEvent::Cancelled,
                    Err(e) => RunEvent::Failed(e),
                };
                active.remove_if(&key, |_, live| live.same(&token));
                if tx.send(event).is_err() {
                    debug!("run for {key:?} ended unobserved");
                }
            })?;

        Ok(RunHandle {
            target,
            events: rx,
            cancel,
            thread: Some(thread),
        })
    }

    /// Number of runs still in flight.
    pub fn active(&self) -> usize {
        self.active.len()
    }
}

pub struct RunHandle {
    target: PathBuf,
    events: Receiver<RunEvent>,
    cancel: CancelToken,
    thread: Option<JoinHandle<()>>,
}

impl RunHandle {
    /// Package path this run writes.
    pub fn target(&self) -> &PathBuf {
        &self.target
    }

    pub fn events(&self) -> &Receiver<RunEvent> {
        &self.events
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Blocks until the run ends, handing every progress event to
    /// `on_event` on the way.
    pub fn wait_with<F>(mut self, mut on_event: F) -> Result<RunSummary, ReliefError>
    where
        F: FnMut(&RunEvent),
    {
        let mut outcome = Err(ReliefError::Cancelled);
        for event in self.events.iter() {
            on_event(&event);
            match event {
                RunEvent::Finished(summary) => {
                    outcome = Ok(summary);
                    break;
                }
                RunEvent::Failed(e) => {
                    outcome = Err(e);
                    break;
                }
                RunEvent::Cancelled => break,
                RunEvent::StageFinished { .. } | RunEvent::Degraded { .. } => (),
            }
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                return Err(ReliefError::geometry("worker", "run thread panicked"));
            }
        }
        outcome
    }

    pub fn wait(self) -> Result<RunSummary, ReliefError> {
        self.wait_with(|_| ())
    }
}
