//! Streams a run's steps to a remote observer while it executes.
//!
//! Each run gets its own task and its own bounded channel. Steps are
//! encoded as complete frames before the single send that delivers them, so
//! a receiver never sees a partial event. After the last step comes either
//! a `final` frame carrying the report or an `error` frame, then the
//! `[DONE]` sentinel.
//!
//! Dropping the receiver cancels the run at its next suspend point.

use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use caduceus_core::{Step, TransportError};
use caduceus_stream::{DONE_FRAME, WireEvent, encode};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::controller::{Controller, RunObserver};
use crate::run::{RunError, RunReport, RunRequest};

/// Spawns observed runs against a shared controller.
#[derive(Clone)]
pub struct Emitter {
    controller: Arc<Controller>,
    capacity: usize,
}

impl Emitter {
    /// `capacity` bounds the frames buffered ahead of a slow receiver.
    pub fn new(controller: Arc<Controller>, capacity: usize) -> Self {
        Self {
            controller,
            capacity: capacity.max(1),
        }
    }

    /// Start `request` on its own task and return its frame stream.
    pub fn spawn(&self, request: RunRequest) -> RunStream {
        let (tx, rx) = mpsc::channel::<String>(self.capacity);
        let controller = Arc::clone(&self.controller);

        let task = tokio::spawn(async move {
            let mut observer = ChannelObserver { tx: tx.clone() };

            let result = tokio::select! {
                biased;
                _ = tx.closed() => None,
                result = controller.run_observed(request, &mut observer) => Some(result),
            };

            let Some(result) = result else {
                debug!("Stream receiver dropped; run cancelled");
                return None;
            };

            let (terminal, report) = match result {
                Ok(report) => (final_event(&report), report),
                Err(RunError::Provider { source, report }) => (
                    WireEvent::Error {
                        error: source.to_string(),
                    },
                    *report,
                ),
                // The receiver is gone; there is no one left to tell.
                Err(RunError::Transport { report, .. }) => return Some(*report),
            };

            match encode(&terminal) {
                Ok(frame) => {
                    if tx.send(frame).await.is_err() {
                        debug!(thread_id = %report.thread_id, "Receiver dropped before terminal frame");
                        return Some(report);
                    }
                }
                Err(e) => warn!(thread_id = %report.thread_id, error = %e, "Failed to encode terminal frame"),
            }
            if tx.send(DONE_FRAME.to_string()).await.is_err() {
                debug!(thread_id = %report.thread_id, "Receiver dropped before sentinel");
            }
            Some(report)
        });

        RunStream {
            frames: rx,
            handle: RunHandle { task },
        }
    }
}

fn final_event(report: &RunReport) -> WireEvent {
    match serde_json::to_value(report) {
        Ok(result) => WireEvent::Final { result },
        Err(e) => WireEvent::Error {
            error: format!("report could not be serialized: {e}"),
        },
    }
}

/// Forwards each committed step as one encoded frame.
struct ChannelObserver {
    tx: mpsc::Sender<String>,
}

#[async_trait]
impl RunObserver for ChannelObserver {
    async fn on_step(&mut self, step: &Step) -> Result<(), TransportError> {
        let frame = match encode(&WireEvent::from(step)) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(iteration = step.iteration, error = %e, "Skipping step that failed to encode");
                return Ok(());
            }
        };
        self.tx
            .send(frame)
            .await
            .map_err(|_| TransportError::Disconnected)
    }
}

/// The receiving side of one spawned run.
pub struct RunStream {
    /// Complete frames, `data: ...\n\n`, ending with the sentinel.
    pub frames: mpsc::Receiver<String>,
    pub handle: RunHandle,
}

impl RunStream {
    /// The frames as a fallible byte-chunk stream, the shape an HTTP body
    /// or [`caduceus_stream::consume`] expects.
    pub fn into_byte_stream(
        self,
    ) -> (impl Stream<Item = Result<String, Infallible>> + Send + 'static, RunHandle) {
        let stream = ReceiverStream::new(self.frames).map(Ok::<String, Infallible>);
        (stream, self.handle)
    }
}

/// Control over a spawned run.
pub struct RunHandle {
    task: JoinHandle<Option<RunReport>>,
}

impl RunHandle {
    /// Stop the run at its current suspend point. Frames already sent stay
    /// valid; no terminal frame follows.
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the run. `None` when it was cancelled or aborted.
    pub async fn join(self) -> Option<RunReport> {
        match self.task.await {
            Ok(report) => report,
            Err(e) if e.is_cancelled() => None,
            Err(e) => {
                warn!(error = %e, "Run task failed");
                None
            }
        }
    }
}
