use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use genflow_events::{MessageBus, Subscription};

/// Handle to control and join a background worker.
///
/// Dropping the handle also stops the worker (without waiting for it).
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Subscribe for a worker, reporting a bus that cannot subscribe as an I/O error.
pub fn subscribe<M, B>(bus: &B, topic: &str) -> io::Result<Subscription<M>>
where
    B: MessageBus<M> + ?Sized,
{
    bus.subscribe(topic)
        .map_err(|e| io::Error::other(format!("subscribe to {topic} failed: {e}")))
}

/// Generic subscription worker loop.
///
/// - Owns one bus subscription
/// - Applies the handler to each message, in delivery order
/// - Handler failures are logged and the loop continues
/// - Supports graceful shutdown
#[derive(Debug)]
pub struct SubscriptionWorker;

impl SubscriptionWorker {
    /// Spawn a worker thread that processes messages from `subscription`.
    ///
    /// `handler` should be idempotent: buses deliver at least once.
    pub fn spawn<M, H, E>(name: impl Into<String>, subscription: Subscription<M>, mut handler: H) -> io::Result<WorkerHandle>
    where
        M: Send + 'static,
        H: FnMut(M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Display + Send + 'static,
    {
        let name = name.into();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread_name = name.clone();
        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(&thread_name, subscription, shutdown_rx, &mut handler))?;

        Ok(WorkerHandle {
            name,
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<M, H, E>(name: &str, sub: Subscription<M>, shutdown_rx: mpsc::Receiver<()>, handler: &mut H)
where
    H: FnMut(M) -> Result<(), E>,
    E: core::fmt::Display,
{
    let tick = Duration::from_millis(250);
    debug!(worker = name, topic = sub.topic(), "worker started");

    loop {
        match shutdown_rx.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        match sub.recv_timeout(tick) {
            Ok(msg) => {
                if let Err(err) = handler(msg) {
                    warn!(worker = name, error = %err, "worker handler failed");
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!(worker = name, "worker stopped");
}
