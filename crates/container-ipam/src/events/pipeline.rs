//! Watch supervisor and handler loop
//!
//! ```text
//!  store.watch(networks) ──► receiver ──mpsc(bounded)──► handler ──spawn──► RateLimiter
//!        ▲                      │
//!        └── sleep, resubscribe ┘ (on watch error)
//! ```

use super::handler::EventHandler;
use crate::config::PipelineSettings;
use crate::store::{KvStore, WatchEvent, Watcher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Background flow-control pipeline for one host
pub struct FlowControlPipeline {
    store: Arc<dyn KvStore>,
    prefix: String,
    handler: EventHandler,
    queue_capacity: usize,
    retry_delay: Duration,
}

/// Running pipeline tasks
pub struct PipelineHandle {
    receiver: JoinHandle<()>,
    handler: JoinHandle<()>,
}

impl PipelineHandle {
    /// Stop both tasks
    pub fn abort(&self) {
        self.receiver.abort();
        self.handler.abort();
    }

    /// Whether both tasks have exited
    pub fn is_finished(&self) -> bool {
        self.receiver.is_finished() && self.handler.is_finished()
    }
}

impl FlowControlPipeline {
    pub fn new(
        store: Arc<dyn KvStore>,
        prefix: impl Into<String>,
        handler: EventHandler,
        settings: &PipelineSettings,
    ) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            handler,
            queue_capacity: settings.queue_capacity.max(1),
            retry_delay: settings.watch_retry_delay(),
        }
    }

    /// Subscribe and start the receiver and handler tasks.
    ///
    /// The first subscription is attempted before returning so that events
    /// written afterwards are seen; if it fails the receiver keeps retrying.
    pub async fn start(self) -> PipelineHandle {
        let (tx, rx) = mpsc::channel(self.queue_capacity);

        let initial = match self.store.watch(&self.prefix).await {
            Ok(watcher) => {
                info!(prefix = %self.prefix, "Watching for assignment changes");
                Some(watcher)
            }
            Err(e) => {
                warn!(prefix = %self.prefix, error = %e, "initial watch failed, will retry");
                None
            }
        };

        let receiver = tokio::spawn(receive_loop(
            self.store,
            self.prefix,
            self.handler.clone(),
            initial,
            tx,
            self.retry_delay,
        ));
        let handler = tokio::spawn(handle_loop(self.handler, rx));

        PipelineHandle { receiver, handler }
    }
}

/// Forward relevant events into the queue, re-subscribing after errors.
/// Exits only when the handler side is gone.
async fn receive_loop(
    store: Arc<dyn KvStore>,
    prefix: String,
    filter: EventHandler,
    mut watcher: Option<Box<dyn Watcher>>,
    tx: mpsc::Sender<WatchEvent>,
    retry_delay: Duration,
) {
    loop {
        let mut current = match watcher.take() {
            Some(current) => current,
            None => match store.watch(&prefix).await {
                Ok(current) => {
                    info!(prefix = %prefix, "Re-established watch");
                    current
                }
                Err(e) => {
                    warn!(prefix = %prefix, error = %e, "watch failed");
                    tokio::time::sleep(retry_delay).await;
                    continue;
                }
            },
        };

        loop {
            match current.next().await {
                Ok(event) => {
                    if !filter.is_relevant(&event) {
                        trace!(key = %event.key, "ignoring event");
                        continue;
                    }
                    if tx.send(event).await.is_err() {
                        debug!("event handler stopped, closing watch");
                        return;
                    }
                }
                Err(e) => {
                    warn!(prefix = %prefix, error = %e, "watch interrupted");
                    break;
                }
            }
        }
        tokio::time::sleep(retry_delay).await;
    }
}

async fn handle_loop(handler: EventHandler, mut rx: mpsc::Receiver<WatchEvent>) {
    while let Some(event) = rx.recv().await {
        match handler.handle(&event).await {
            Ok(decision) => trace!(key = %event.key, ?decision, "event handled"),
            Err(e) => warn!(key = %event.key, error = %e, "failed to handle event"),
        }
    }
}
