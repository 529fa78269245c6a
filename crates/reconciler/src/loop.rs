//! Controller loop: store notifications in, reconciliation passes out.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use refract_backrefs::{ANNOTATION_VALUE, parse_annotation_key};
use refract_core::{Kind, ObjectKey};
use refract_store::{ResourceStore, StoreError, StoreEvent};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::LoopConfig;
use crate::error::{ReconcileError, Result};
use crate::queue::WorkQueue;
use crate::reconciler::Reconciler;
use crate::types::RetryPolicy;

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(10);
const IDLE_SETTLE_POLLS: u32 = 5;

/// Handle for stopping a running [`ControllerLoop`].
#[derive(Clone)]
pub struct LoopStopper {
    stop_tx: Arc<watch::Sender<bool>>,
}

impl LoopStopper {
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }
}

/// Watches the store and reconciles affected transforms on a worker pool.
pub struct ControllerLoop<S: ?Sized> {
    reconciler: Arc<Reconciler<S>>,
    queue: Arc<WorkQueue>,
    config: LoopConfig,
    stop_tx: Arc<watch::Sender<bool>>,
    ready_tx: watch::Sender<bool>,
}

impl<S: ResourceStore + ?Sized + 'static> ControllerLoop<S> {
    pub fn new(reconciler: Arc<Reconciler<S>>, config: LoopConfig) -> Self {
        let (stop_tx, _) = watch::channel(false);
        let (ready_tx, _) = watch::channel(false);
        Self {
            queue: Arc::new(WorkQueue::new(
                config.retry_base_delay(),
                config.retry_max_delay(),
            )),
            reconciler,
            config,
            stop_tx: Arc::new(stop_tx),
            ready_tx,
        }
    }

    #[must_use]
    pub fn stopper(&self) -> LoopStopper {
        LoopStopper {
            stop_tx: Arc::clone(&self.stop_tx),
        }
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Run until stopped or the store closes its notification channel.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::List`] when listing transforms fails.
    /// Failed passes are retried, never returned.
    pub async fn run(&self) -> Result<()> {
        let mut stop_rx = self.stop_tx.subscribe();
        let mut events = self.reconciler.store().subscribe();
        self.enqueue_all().await?;
        self.ready_tx.send_replace(true);

        let workers: Vec<_> = (0..self.config.workers)
            .map(|id| {
                tokio::spawn(worker(
                    id,
                    Arc::clone(&self.reconciler),
                    Arc::clone(&self.queue),
                ))
            })
            .collect();
        info!(workers = self.config.workers, "Controller loop started");

        let api_group = self.reconciler.config().api_group.clone();
        let outcome = loop {
            if *stop_rx.borrow() {
                break Ok(());
            }
            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() {
                        break Ok(());
                    }
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        for key in keys_for_event(&event, &api_group) {
                            self.queue.add(key).await;
                        }
                    }
                    Err(StoreError::Lagged { skipped }) => {
                        warn!(skipped, "Missed store notifications, relisting");
                        if let Err(e) = self.enqueue_all().await {
                            break Err(e);
                        }
                    }
                    Err(_) => {
                        debug!("Store notifications closed");
                        break Ok(());
                    }
                },
            }
        };

        self.queue.shut_down().await;
        for joined in futures::future::join_all(workers).await {
            if let Err(e) = joined {
                warn!(error = %e, "Worker task failed");
            }
        }
        self.ready_tx.send_replace(false);
        info!("Controller loop stopped");
        outcome
    }

    async fn enqueue_all(&self) -> Result<()> {
        let transforms = self
            .reconciler
            .store()
            .list(Kind::SecretTransform, None)
            .await
            .map_err(|source| ReconcileError::List {
                kind: Kind::SecretTransform,
                source,
            })?;
        debug!(count = transforms.len(), "Queueing transforms");
        for transform in transforms {
            self.queue.add(transform.key()).await;
        }
        Ok(())
    }

    /// Wait until the loop has started and the queue stayed idle for a
    /// short settle window. Returns `false` on timeout.
    ///
    /// Delayed requeues (missing inputs, backoff) do not count as work.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let mut ready_rx = self.ready_tx.subscribe();
        tokio::time::timeout(timeout, async {
            if ready_rx.wait_for(|ready| *ready).await.is_err() {
                return;
            }
            let mut settled = 0_u32;
            while settled < IDLE_SETTLE_POLLS {
                if self.queue.is_idle().await {
                    settled = settled.saturating_add(1);
                } else {
                    settled = 0;
                }
                tokio::time::sleep(IDLE_POLL_INTERVAL).await;
            }
        })
        .await
        .is_ok()
    }
}

async fn worker<S>(id: usize, reconciler: Arc<Reconciler<S>>, queue: Arc<WorkQueue>)
where
    S: ResourceStore + ?Sized + 'static,
{
    let missing_input_delay = reconciler.config().missing_input_delay();
    while let Some(key) = queue.get().await {
        match reconciler.reconcile(&key).await {
            Ok(result) => {
                queue.forget(&key).await;
                debug!(worker = id, transform = %key, outcome = ?result.outcome, "Pass complete");
            }
            Err(err) => match err.retry(missing_input_delay) {
                RetryPolicy::Never => {
                    queue.forget(&key).await;
                    debug!(worker = id, transform = %key, "Waiting for a spec change");
                }
                RetryPolicy::After(delay) => {
                    queue.forget(&key).await;
                    debug!(worker = id, transform = %key, delay_secs = delay.as_secs(), "Requeueing");
                    queue.add_after(key.clone(), delay);
                }
                RetryPolicy::Backoff => {
                    queue.add_rate_limited(key.clone()).await;
                }
            },
        }
        queue.done(&key).await;
    }
    debug!(worker = id, "Worker stopped");
}

/// Transforms affected by a change to the event's object.
#[must_use]
pub fn keys_for_event(event: &StoreEvent, api_group: &str) -> Vec<ObjectKey> {
    let object = &event.object;
    if object.kind() == Kind::SecretTransform {
        return vec![event.key()];
    }

    let meta = object.meta();
    let owners = meta
        .owner_references
        .iter()
        .filter(|r| r.kind == Kind::SecretTransform)
        .map(|r| ObjectKey::new(Kind::SecretTransform, meta.namespace.clone(), r.name.clone()));
    let annotated = meta
        .annotations
        .iter()
        .filter(|(_, value)| value.as_str() == ANNOTATION_VALUE)
        .filter_map(|(key, _)| parse_annotation_key(key, api_group))
        .map(|(namespace, name)| ObjectKey::new(Kind::SecretTransform, namespace, name));

    owners.chain(annotated).collect::<BTreeSet<_>>().into_iter().collect()
}
