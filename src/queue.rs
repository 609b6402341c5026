use futures::FutureExt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};
use tracing::{debug, info, instrument, trace, warn};

use crate::connection::ConnectionManager;
use crate::{Error, Result};

type SideEffect = Box<dyn FnOnce() + Send>;

struct Command {
    label: &'static str,
    frame: Vec<u8>,
    on_success: Option<SideEffect>,
    done: oneshot::Sender<Result<()>>,
}

/// Completion of one queued command.
///
/// Dropping it does not cancel the command.
#[must_use = "the command runs anyway; await this to learn whether it was delivered"]
pub struct Pending {
    rx: oneshot::Receiver<Result<()>>,
}

impl Future for Pending {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.rx
            .poll_unpin(cx)
            .map(|outcome| outcome.unwrap_or(Err(Error::QueueClosed)))
    }
}

/// Delivers frames one at a time in submission order.
///
/// A single worker task drains the channel, so a slow or failing command only
/// delays the ones behind it and never reorders or drops them.
pub struct CommandQueue {
    tx: mpsc::UnboundedSender<Command>,
}

impl CommandQueue {
    /// Spawns the worker; it stops once the queue is dropped
    pub fn new(connection: ConnectionManager) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(Worker::new(connection).run(rx));
        Self { tx }
    }

    /// Queues a frame. `on_success` runs after the frame was written and
    /// before the returned [`Pending`] resolves.
    pub fn enqueue<F>(&self, label: &'static str, frame: impl Into<Vec<u8>>, on_success: F) -> Pending
    where
        F: FnOnce() + Send + 'static,
    {
        self.push(label, frame.into(), Some(Box::new(on_success)))
    }

    /// Queues a frame without a side effect
    pub fn enqueue_plain(&self, label: &'static str, frame: impl Into<Vec<u8>>) -> Pending {
        self.push(label, frame.into(), None)
    }

    fn push(&self, label: &'static str, frame: Vec<u8>, on_success: Option<SideEffect>) -> Pending {
        let (done, rx) = oneshot::channel();
        trace!("Queueing {} command", label);
        let command = Command {
            label,
            frame,
            on_success,
            done,
        };
        if let Err(mpsc::error::SendError(command)) = self.tx.send(command) {
            let _ = command.done.send(Err(Error::QueueClosed));
        }
        Pending { rx }
    }
}

struct Worker {
    connection: ConnectionManager,
    last_write: Option<Instant>,
}

impl Worker {
    fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            last_write: None,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            let Command {
                label,
                frame,
                on_success,
                done,
            } = command;

            let outcome = self.deliver(label, &frame).await;
            match &outcome {
                Ok(()) => {
                    if let Some(on_success) = on_success {
                        on_success();
                    }
                    info!("{} command sent", label);
                }
                Err(err) => {
                    warn!("{} command failed: {}", label, err);
                    self.connection.mark_link_lost().await;
                }
            }

            if done.send(outcome).is_err() {
                trace!("Nobody waiting for {} command", label);
            }
        }
        debug!("Command queue closed");
    }

    #[instrument(skip(self, frame), fields(len = frame.len()))]
    async fn deliver(&mut self, label: &'static str, frame: &[u8]) -> Result<()> {
        let settings = self.connection.settings().clone();
        let channel = self.connection.wait_for_ready(settings.ready_timeout).await?;

        self.pace(settings.command_interval).await;
        let written = self.connection.write(&channel, frame).await;
        self.last_write = Some(Instant::now());
        written
    }

    /// Rate limiting between consecutive writes
    async fn pace(&self, interval: Duration) {
        if let Some(last) = self.last_write {
            let elapsed = last.elapsed();
            if elapsed < interval {
                let wait = interval - elapsed;
                trace!("Rate limiting: waiting {:?} before next command", wait);
                time::sleep(wait).await;
            }
        }
    }
}
