// src/workers/pool.rs
//! Fixed-size pool of quote workers.
//!
//! Each worker is a tokio task owning its own [`WorkerState`]. Work arrives on
//! two unbounded queues per worker; the priority queue is always drained
//! first. Queries go to the least busy worker, state mutations are sent to
//! every worker.

use async_trait::async_trait;
use futures::future::{select_ok, BoxFuture, FutureExt};
use log::{debug, info, trace};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::arbitrage::calculator::RouteQuoter;
use crate::arbitrage::types::{Quote, Route};
use crate::error::ArbError;
use crate::workers::messages::{WorkerResult, WorkerTask, WorkerTaskKind};
use crate::workers::replica::WorkerState;

struct Envelope {
    task: WorkerTask,
    reply: oneshot::Sender<WorkerResult>,
}

struct WorkerHandle {
    priority_tx: mpsc::UnboundedSender<Envelope>,
    normal_tx: mpsc::UnboundedSender<Envelope>,
    in_flight: Arc<AtomicUsize>,
}

pub struct QuoteWorkerPool {
    workers: Vec<WorkerHandle>,
    next_worker: AtomicUsize,
    next_correlation_id: AtomicU64,
    late_replies: Arc<AtomicU64>,
}

impl QuoteWorkerPool {
    /// Spawns `size` workers, building each one's state with `factory(index)`.
    /// Must be called from within a tokio runtime.
    pub fn new<S, F>(size: usize, factory: F) -> Result<Self, ArbError>
    where
        S: WorkerState,
        F: Fn(usize) -> S,
    {
        if size == 0 {
            return Err(ArbError::WorkerPoolError(
                "worker pool needs at least one worker".to_string(),
            ));
        }

        let late_replies = Arc::new(AtomicU64::new(0));
        let workers = (0..size)
            .map(|index| {
                let (priority_tx, priority_rx) = mpsc::unbounded_channel();
                let (normal_tx, normal_rx) = mpsc::unbounded_channel();
                let in_flight = Arc::new(AtomicUsize::new(0));
                tokio::spawn(run_worker(
                    index,
                    factory(index),
                    priority_rx,
                    normal_rx,
                    in_flight.clone(),
                    late_replies.clone(),
                ));
                WorkerHandle {
                    priority_tx,
                    normal_tx,
                    in_flight,
                }
            })
            .collect();

        info!("Started {} quote workers", size);
        Ok(Self {
            workers,
            next_worker: AtomicUsize::new(0),
            next_correlation_id: AtomicU64::new(0),
            late_replies,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Replies that arrived after their caller stopped waiting.
    pub fn late_replies(&self) -> u64 {
        self.late_replies.load(Ordering::Relaxed)
    }

    fn least_busy_worker(&self) -> usize {
        let n = self.workers.len();
        let start = self.next_worker.fetch_add(1, Ordering::Relaxed) % n;
        (0..n)
            .map(|offset| (start + offset) % n)
            .min_by_key(|&i| self.workers[i].in_flight.load(Ordering::Relaxed))
            .unwrap_or(start)
    }

    fn send_to(
        &self,
        index: usize,
        kind: WorkerTaskKind,
        priority: bool,
    ) -> Result<oneshot::Receiver<WorkerResult>, ArbError> {
        let worker = &self.workers[index];
        let (reply, rx) = oneshot::channel();
        let envelope = Envelope {
            task: WorkerTask {
                correlation_id: self.next_correlation_id.fetch_add(1, Ordering::Relaxed),
                kind,
            },
            reply,
        };

        worker.in_flight.fetch_add(1, Ordering::Relaxed);
        let tx = if priority {
            &worker.priority_tx
        } else {
            &worker.normal_tx
        };
        tx.send(envelope).map_err(|_| {
            worker.in_flight.fetch_sub(1, Ordering::Relaxed);
            ArbError::WorkerPoolError(format!("worker {} is gone", index))
        })?;
        Ok(rx)
    }

    /// Runs a task on one worker. `None` on timeout or if the worker died;
    /// the worker still finishes the task and its reply is counted as late.
    pub async fn run_task(
        &self,
        kind: WorkerTaskKind,
        timeout: Option<Duration>,
        priority: bool,
    ) -> Option<WorkerResult> {
        let name = kind.name();
        let rx = match self.send_to(self.least_busy_worker(), kind, priority) {
            Ok(rx) => rx,
            Err(e) => {
                debug!("{} dispatch failed: {}", name, e);
                return None;
            }
        };

        match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(reply) => reply.ok(),
                Err(_) => {
                    trace!("{} timed out after {:?}", name, limit);
                    None
                }
            },
            None => rx.await.ok(),
        }
    }

    /// Sends the same task to every worker on the priority queue, one reply
    /// future per worker.
    pub fn run_task_on_all_workers(
        &self,
        kind: WorkerTaskKind,
    ) -> Vec<BoxFuture<'static, Result<WorkerResult, ArbError>>> {
        (0..self.workers.len())
            .map(|index| match self.send_to(index, kind.clone(), true) {
                Ok(rx) => async move {
                    rx.await.map_err(|_| {
                        ArbError::WorkerPoolError(format!("worker {} dropped the task", index))
                    })
                }
                .boxed(),
                Err(e) => futures::future::ready(Err(e)).boxed(),
            })
            .collect()
    }

    /// Broadcasts `kind` and resolves with the first successful reply. The
    /// other workers still apply the task.
    pub async fn broadcast_first(&self, kind: WorkerTaskKind) -> Result<WorkerResult, ArbError> {
        let replies = self.run_task_on_all_workers(kind);
        select_ok(replies).await.map(|(result, _rest)| result)
    }
}

#[async_trait]
impl RouteQuoter for QuoteWorkerPool {
    async fn calculate_route(&self, route: &Route, amount: u64, timeout: Duration) -> Option<Quote> {
        let task = WorkerTaskKind::CalculateRoute {
            route: route.clone(),
            amount,
        };
        match self.run_task(task, Some(timeout), false).await {
            Some(WorkerResult::Route(quote)) => Some(quote),
            _ => None,
        }
    }
}

async fn run_worker<S: WorkerState>(
    index: usize,
    mut state: S,
    mut priority_rx: mpsc::UnboundedReceiver<Envelope>,
    mut normal_rx: mpsc::UnboundedReceiver<Envelope>,
    in_flight: Arc<AtomicUsize>,
    late_replies: Arc<AtomicU64>,
) {
    loop {
        let envelope = tokio::select! {
            biased;
            Some(envelope) = priority_rx.recv() => envelope,
            Some(envelope) = normal_rx.recv() => envelope,
            else => break,
        };

        // nobody is waiting for this query any more
        if envelope.reply.is_closed() && !envelope.task.kind.is_mutation() {
            in_flight.fetch_sub(1, Ordering::Relaxed);
            continue;
        }

        let correlation_id = envelope.task.correlation_id;
        let result = state.handle(envelope.task.kind).await;
        in_flight.fetch_sub(1, Ordering::Relaxed);

        if envelope.reply.send(result).is_err() {
            late_replies.fetch_add(1, Ordering::Relaxed);
            trace!("worker {}: late reply for task {}", index, correlation_id);
        }
    }
    debug!("worker {} stopped", index);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::replica::PoolReplica;
    use pretty_assertions::assert_eq;
    use solana_sdk::pubkey::Pubkey;

    /// Answers every query with the worker index as output.
    struct IndexedWorker {
        index: u64,
    }

    #[async_trait]
    impl WorkerState for IndexedWorker {
        async fn handle(&mut self, kind: WorkerTaskKind) -> WorkerResult {
            match kind {
                WorkerTaskKind::CalculateRoute { amount, .. } => {
                    WorkerResult::Route(Quote::new(amount, self.index))
                }
                WorkerTaskKind::AccountUpdate { address, .. } => WorkerResult::AccountUpdate {
                    address,
                    error: false,
                },
                WorkerTaskKind::AddPool { market } => WorkerResult::AddPool {
                    pool_id: market.id,
                    accounts_for_update: vec![],
                },
            }
        }
    }

    #[test]
    fn test_empty_pool_is_rejected() {
        let result = QuoteWorkerPool::new(0, |_| PoolReplica::new(None));
        assert!(matches!(result, Err(ArbError::WorkerPoolError(_))));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_worker() {
        let pool = QuoteWorkerPool::new(4, |i| IndexedWorker { index: i as u64 }).unwrap();
        let address = Pubkey::new_unique();
        let replies = futures::future::join_all(pool.run_task_on_all_workers(
            WorkerTaskKind::AccountUpdate {
                address,
                data: None,
            },
        ))
        .await;

        assert_eq!(replies.len(), 4);
        for reply in replies {
            assert_eq!(
                reply.unwrap(),
                WorkerResult::AccountUpdate {
                    address,
                    error: false
                }
            );
        }
    }

    #[tokio::test]
    async fn test_idle_workers_share_queries() {
        let pool = QuoteWorkerPool::new(3, |i| IndexedWorker { index: i as u64 }).unwrap();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..3 {
            let route = Route::new(vec![]);
            let quote = pool
                .calculate_route(&route, 1, Duration::from_secs(1))
                .await
                .unwrap();
            seen.insert(quote.output);
        }
        // with every worker idle the round-robin start spreads the work
        assert_eq!(seen.len(), 3);
    }
}
