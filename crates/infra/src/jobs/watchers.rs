//! Thread-backed job observers: a periodic status emitter and a deadline
//! watchdog.
//!
//! Both run on their own named thread and are cancelled through a shutdown
//! channel. Cancellation is best effort: the thread notices at its next wake
//! up, but once disposed it never emits or fails anything again.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use genflow_core::JobId;
use genflow_events::{MessageBus, MessageEnvelope};

use super::observer::{Disposable, ObserverHandle};
use super::registry::JobRegistry;
use super::types::Transition;

/// Message kind of status snapshots published by [`ProgressEmitter`].
pub const JOB_STATUS_KIND: &str = "job.status";

struct ThreadObserver {
    cancelled: Arc<AtomicBool>,
    shutdown: Mutex<Option<mpsc::Sender<()>>>,
}

impl Disposable for ThreadObserver {
    fn dispose(&self) {
        self.cancelled.store(true, Ordering::Release);
        let sender = match self.shutdown.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(tx) = sender {
            // The thread may already be gone.
            let _ = tx.send(());
        }
    }
}

/// Observer-side view of the cancellation channel.
struct CancelSignal {
    cancelled: Arc<AtomicBool>,
    shutdown: mpsc::Receiver<()>,
}

impl CancelSignal {
    /// Sleep for `period`; `true` if the observer should act afterwards.
    fn wait(&self, period: Duration) -> bool {
        match self.shutdown.recv_timeout(period) {
            Err(RecvTimeoutError::Timeout) => !self.is_cancelled(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

fn spawn_observer(
    label: &'static str,
    thread_name: String,
    body: impl FnOnce(CancelSignal) + Send + 'static,
) -> io::Result<ObserverHandle> {
    let (tx, rx) = mpsc::channel::<()>();
    let cancelled = Arc::new(AtomicBool::new(false));

    let signal = CancelSignal {
        cancelled: cancelled.clone(),
        shutdown: rx,
    };
    thread::Builder::new().name(thread_name).spawn(move || body(signal))?;

    Ok(ObserverHandle::new(
        label,
        ThreadObserver {
            cancelled,
            shutdown: Mutex::new(Some(tx)),
        },
    ))
}

/// Publishes a job's status view every `interval` until disposed or until the
/// job is terminal.
#[derive(Debug)]
pub struct ProgressEmitter;

impl ProgressEmitter {
    pub fn spawn<B>(
        job_id: JobId,
        registry: Arc<JobRegistry>,
        bus: B,
        topic: impl Into<String>,
        interval: Duration,
    ) -> io::Result<ObserverHandle>
    where
        B: MessageBus<MessageEnvelope<JsonValue>> + 'static,
    {
        let topic = topic.into();
        let name = format!("progress-{job_id}");

        spawn_observer("progress_emitter", name, move |signal| {
            while signal.wait(interval) {
                let view = match registry.status(&job_id) {
                    Ok(view) => view,
                    Err(e) => {
                        debug!(job_id = %job_id, error = %e, "progress emitter stopping");
                        return;
                    }
                };

                let payload = match serde_json::to_value(&view) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(job_id = %job_id, error = %e, "failed to encode job status");
                        continue;
                    }
                };

                if signal.is_cancelled() {
                    return;
                }
                if let Err(e) = bus.publish(&topic, MessageEnvelope::new(JOB_STATUS_KIND, payload)) {
                    warn!(job_id = %job_id, topic = %topic, error = %e, "failed to publish job status");
                }

                if view.status.is_terminal() {
                    return;
                }
            }
        })
    }
}

/// Fails a job that is still active once `deadline` has passed.
#[derive(Debug)]
pub struct Watchdog;

impl Watchdog {
    pub fn spawn(job_id: JobId, registry: Arc<JobRegistry>, deadline: Duration) -> io::Result<ObserverHandle> {
        let name = format!("watchdog-{job_id}");

        spawn_observer("watchdog", name, move |signal| {
            if !signal.wait(deadline) {
                return;
            }

            let message = format!("deadline exceeded after {}ms", deadline.as_millis());
            match registry.fail(&job_id, message) {
                Ok(Transition::Applied) => warn!(job_id = %job_id, "job failed by watchdog"),
                Ok(Transition::Ignored) => {}
                Err(e) => debug!(job_id = %job_id, error = %e, "watchdog found nothing to fail"),
            }
        })
    }
}
