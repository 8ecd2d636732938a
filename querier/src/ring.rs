//! Replica ring and quorum-bounded fan-out
//!
//! A [`ReplicationSet`] names the ingester instances owning the keyspace of
//! a read, together with the number of failures the caller tolerates.
//! [`ReplicationSet::dispatch`] runs one task per instance and resolves as
//! soon as the quorum allows.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::QueryError;
use crate::metrics;

/// One ingester instance in the ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDesc {
    pub addr: String,
}

/// The instances owning a read, with the tolerated error budget.
#[derive(Debug, Clone)]
pub struct ReplicationSet {
    pub instances: Vec<InstanceDesc>,
    pub max_errors: usize,
}

/// A per-ingester response tagged with the instance it came from.
#[derive(Debug)]
pub struct ResponseFromReplica<T> {
    pub addr: String,
    pub response: T,
}

/// Aborts the owned tasks when dropped, so cancelling the dispatching
/// future cancels every in-flight ingester call.
struct AbortOnDrop(Vec<JoinHandle<()>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

impl ReplicationSet {
    /// The minimum number of instances that must succeed.
    pub fn min_success(&self) -> usize {
        self.instances.len().saturating_sub(self.max_errors)
    }

    /// Runs `f` for every instance in parallel.
    ///
    /// Succeeds once `min_success` calls have succeeded; the remaining
    /// outstanding calls are then awaited for up to `extra_delay` before
    /// being cancelled, and their late results are included. Failures
    /// beyond `max_errors` abort everything with `QuorumLost`.
    pub async fn dispatch<T, F, Fut>(
        &self,
        extra_delay: Duration,
        f: F,
    ) -> Result<Vec<ResponseFromReplica<T>>, QueryError>
    where
        T: Send + 'static,
        F: Fn(InstanceDesc) -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let total = self.instances.len();
        let min_success = self.min_success();

        let (tx, mut rx) = mpsc::channel::<(String, anyhow::Result<T>)>(total.max(1));
        let mut tasks = Vec::with_capacity(total);
        for instance in &self.instances {
            let tx = tx.clone();
            let addr = instance.addr.clone();
            let fut = f(instance.clone());
            tasks.push(tokio::spawn(async move {
                let result = fut.await;
                let _ = tx.send((addr, result)).await;
            }));
        }
        drop(tx);
        let _guard = AbortOnDrop(tasks);

        let mut responses = Vec::with_capacity(total);
        let mut failures = 0usize;

        while responses.len() < min_success {
            match rx.recv().await {
                Some((addr, Ok(response))) => {
                    metrics::FANOUT_TOTAL.with_label_values(&["ok"]).inc();
                    responses.push(ResponseFromReplica { addr, response });
                }
                Some((addr, Err(err))) => {
                    metrics::FANOUT_TOTAL.with_label_values(&["error"]).inc();
                    failures += 1;
                    if failures > self.max_errors {
                        warn!("ingester {} failed, error budget exhausted: {:#}", addr, err);
                        return Err(QueryError::QuorumLost {
                            succeeded: responses.len(),
                            required: min_success,
                        });
                    }
                    warn!("ingester {} failed, within the error budget: {:#}", addr, err);
                }
                None => {
                    return Err(QueryError::QuorumLost {
                        succeeded: responses.len(),
                        required: min_success,
                    });
                }
            }
        }

        // Quorum reached. Give stragglers the extra delay, then cancel.
        if responses.len() + failures < total && !extra_delay.is_zero() {
            let deadline = tokio::time::sleep(extra_delay);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    received = rx.recv() => match received {
                        Some((addr, Ok(response))) => {
                            metrics::FANOUT_TOTAL.with_label_values(&["ok"]).inc();
                            responses.push(ResponseFromReplica { addr, response });
                            if responses.len() + failures == total {
                                break;
                            }
                        }
                        Some((addr, Err(err))) => {
                            metrics::FANOUT_TOTAL.with_label_values(&["error"]).inc();
                            failures += 1;
                            warn!("ingester {} failed after quorum: {:#}", addr, err);
                            if responses.len() + failures == total {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        }

        Ok(responses)
    }
}

/// The ring ownership view for read queries.
pub trait ReadRing: Send + Sync {
    fn replication_set_for_read(&self) -> Result<ReplicationSet, QueryError>;
}

/// A fixed instance list, for static service discovery and tests.
#[derive(Debug, Clone)]
pub struct StaticRing {
    instances: Vec<InstanceDesc>,
    max_errors: usize,
}

impl StaticRing {
    pub fn new(addrs: impl IntoIterator<Item = String>, max_errors: usize) -> Self {
        Self {
            instances: addrs
                .into_iter()
                .map(|addr| InstanceDesc { addr })
                .collect(),
            max_errors,
        }
    }
}

impl ReadRing for StaticRing {
    fn replication_set_for_read(&self) -> Result<ReplicationSet, QueryError> {
        if self.instances.is_empty() {
            return Err(QueryError::Internal("replica ring is empty".to_string()));
        }
        Ok(ReplicationSet {
            instances: self.instances.clone(),
            max_errors: self.max_errors,
        })
    }
}
