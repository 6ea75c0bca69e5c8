use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use futures::future::join_all;

use crate::{
    error::Result,
    types::{ShutdownMode, ShutdownPolicy},
    worker::{StopOutcome, Worker, WorkerState},
};

pub struct WorkerShutdown {
    pub name: String,
    pub outcome: Result<StopOutcome>,
}

#[derive(Default)]
pub struct ShutdownReport {
    /// Workers that were sent a termination request, in request order
    pub requested: Vec<String>,
    pub workers: Vec<WorkerShutdown>,
}

impl ShutdownReport {
    pub fn all_stopped(&self) -> bool {
        self.workers.iter().all(|w| w.outcome.is_ok())
    }
}

/// Runs the shutdown protocol exactly once.
pub struct ShutdownCoordinator {
    policy: ShutdownPolicy,
    started: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new(policy: ShutdownPolicy) -> Self {
        Self {
            policy,
            started: AtomicBool::new(false),
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Stop every worker in start order and drain the set.
    ///
    /// Returns `None` when a shutdown has already been performed.
    pub async fn shutdown(&self, workers: &mut Vec<Worker>) -> Option<ShutdownReport> {
        if self.started.swap(true, Ordering::SeqCst) {
            log::debug!("Shutdown: already done, ignoring");
            return None;
        }

        let mut workers = std::mem::take(workers);
        let grace = self.policy.grace_period();
        log::info!(
            "Shutdown: stopping {} output(s), {:?}, grace {:?}",
            workers.len(),
            self.policy.mode,
            grace
        );

        let report = match self.policy.mode {
            ShutdownMode::Parallel => stop_parallel(&mut workers, grace).await,
            ShutdownMode::Sequential => stop_sequential(&mut workers, grace).await,
        };

        for worker in &report.workers {
            match &worker.outcome {
                Ok(StopOutcome::Exited(status)) => {
                    log::info!("Shutdown: {} stopped ({})", worker.name, status)
                }
                Ok(StopOutcome::AlreadyExited) => {
                    log::info!("Shutdown: {} had already exited", worker.name)
                }
                Ok(StopOutcome::Killed) => log::warn!("Shutdown: {} was killed", worker.name),
                Err(e) => log::error!("Shutdown: {}: {}", worker.name, e),
            }
        }
        Some(report)
    }
}

async fn stop_parallel(workers: &mut [Worker], grace: Option<Duration>) -> ShutdownReport {
    let mut report = ShutdownReport::default();
    let sent: Vec<Result<bool>> = workers
        .iter_mut()
        .map(|worker| request(worker, &mut report.requested))
        .collect();

    report.workers = join_all(workers.iter_mut().zip(sent).map(|(worker, sent)| async move {
        WorkerShutdown {
            name: worker.name().to_string(),
            outcome: settle(worker, sent, grace).await,
        }
    }))
    .await;
    report
}

async fn stop_sequential(workers: &mut [Worker], grace: Option<Duration>) -> ShutdownReport {
    let mut report = ShutdownReport::default();
    for worker in workers.iter_mut() {
        let sent = request(worker, &mut report.requested);
        let outcome = settle(worker, sent, grace).await;
        report.workers.push(WorkerShutdown {
            name: worker.name().to_string(),
            outcome,
        });
    }
    report
}

fn request(worker: &mut Worker, requested: &mut Vec<String>) -> Result<bool> {
    let sent = worker.terminate();
    if matches!(sent, Ok(true)) {
        requested.push(worker.name().to_string());
    }
    sent
}

async fn settle(
    worker: &mut Worker,
    sent: Result<bool>,
    grace: Option<Duration>,
) -> Result<StopOutcome> {
    match sent {
        Ok(false) if worker.state() == WorkerState::Exited => Ok(StopOutcome::AlreadyExited),
        Ok(_) => worker.finish(grace).await,
        Err(e) => {
            log::error!("Shutdown: {}, killing {}", e, worker.name());
            worker.kill().await.map(|_| StopOutcome::Killed)
        }
    }
}
