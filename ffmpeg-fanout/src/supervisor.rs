use std::time::Duration;

use tokio::{
    io::{AsyncWrite, AsyncWriteExt, Stdout},
    sync::mpsc,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    command::StreamJob,
    error::Result,
    shutdown::{ShutdownCoordinator, ShutdownReport},
    types::FanoutSettings,
    worker::{OutputLine, Worker, WorkerEvent},
};

const EVENT_QUEUE_SIZE: usize = 1024;
// how often workers with closed output are polled for exit
const REAP_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunExit {
    /// The cancellation token fired.
    Interrupted,
    /// Every worker exited on its own.
    AllExited,
}

/// Owns every encoder worker and forwards their output to one console.
pub struct Supervisor<W = Stdout> {
    settings: FanoutSettings,
    workers: Vec<Worker>,
    open: usize,
    // output closed, process not reaped yet
    unreaped: Vec<String>,
    events_tx: mpsc::Sender<WorkerEvent>,
    events_rx: mpsc::Receiver<WorkerEvent>,
    coordinator: ShutdownCoordinator,
    console: W,
}

impl Supervisor<Stdout> {
    pub fn new(settings: FanoutSettings) -> Self {
        Self::with_console(settings, tokio::io::stdout())
    }
}

impl<W> Supervisor<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn with_console(settings: FanoutSettings, console: W) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_SIZE);
        let coordinator = ShutdownCoordinator::new(settings.shutdown.clone());
        Self {
            settings,
            workers: Vec::new(),
            open: 0,
            unreaped: Vec::new(),
            events_tx,
            events_rx,
            coordinator,
            console,
        }
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub fn console(&self) -> &W {
        &self.console
    }

    pub fn is_shut_down(&self) -> bool {
        self.coordinator.is_started()
    }

    /// One job per enabled target, in declared order.
    pub fn jobs(&self) -> Vec<StreamJob> {
        self.settings
            .enabled_targets()
            .map(|t| StreamJob::new(t, &self.settings.input, &self.settings.encoder))
            .collect()
    }

    /// Spawn a worker for every enabled target.
    ///
    /// A spawn failure stops the workers already started and is returned;
    /// the fan-out is never left half running. Returns the number of workers.
    pub async fn start_all(&mut self) -> Result<usize> {
        if self.coordinator.is_started() {
            log::warn!("Supervisor: already shut down, not starting");
            return Ok(0);
        }
        if !self.workers.is_empty() {
            log::warn!("Supervisor: already started");
            return Ok(self.workers.len());
        }

        for target in self.settings.targets.iter().filter(|t| !t.enabled) {
            log::info!("Supervisor: {} streaming disabled", target.name);
        }

        for job in self.jobs() {
            log::info!("Supervisor: starting {}: {}", job.name, job.display_args());
            match Worker::spawn(&job, self.events_tx.clone()) {
                Ok(worker) => {
                    log::info!("Supervisor: {} streaming enabled", job.name);
                    self.workers.push(worker);
                }
                Err(e) => {
                    log::error!("Supervisor: {}, aborting startup", e);
                    self.shutdown().await;
                    return Err(e);
                }
            }
        }

        for worker in self.workers.iter_mut() {
            worker.mark_running();
        }
        self.open = self.workers.len();
        if self.open > 0 {
            log::info!("Supervisor: streaming started with {} output(s)", self.open);
        }
        Ok(self.workers.len())
    }

    /// Forward worker output to the console until `cancel` fires or every
    /// worker has exited.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<RunExit> {
        let mut reap = time::interval_at(Instant::now() + REAP_INTERVAL, REAP_INTERVAL);
        reap.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.open > 0 || !self.unreaped.is_empty() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::info!("Supervisor: interrupted");
                    return Ok(RunExit::Interrupted);
                }
                Some(event) = self.events_rx.recv() => match event {
                    WorkerEvent::Line(line) => self.print(&line).await?,
                    WorkerEvent::Closed { worker } => {
                        self.open = self.open.saturating_sub(1);
                        self.on_closed(worker);
                    }
                },
                _ = reap.tick(), if !self.unreaped.is_empty() => self.reap_closed(),
            }
        }

        log::info!("Supervisor: no output running");
        Ok(RunExit::AllExited)
    }

    /// Print whatever output is already queued, without waiting for more.
    pub async fn flush_output(&mut self) -> Result<()> {
        while let Ok(event) = self.events_rx.try_recv() {
            if let WorkerEvent::Line(line) = event {
                self.print(&line).await?;
            }
        }
        Ok(())
    }

    /// Stop all workers. `None` if a shutdown already ran.
    pub async fn shutdown(&mut self) -> Option<ShutdownReport> {
        self.coordinator.shutdown(&mut self.workers).await
    }

    async fn print(&mut self, line: &OutputLine) -> Result<()> {
        let text = if self.settings.tag_output {
            format!("[{}] {}\n", line.worker, line.text)
        } else {
            format!("{}\n", line.text)
        };
        self.console.write_all(text.as_bytes()).await?;
        self.console.flush().await?;
        Ok(())
    }

    fn on_closed(&mut self, name: String) {
        if !self.workers.iter().any(|w| w.name() == name) {
            return;
        }
        if !self.try_reap(&name) {
            log::debug!("Supervisor: {} closed its output, waiting for it to exit", name);
            self.unreaped.push(name);
        }
    }

    fn reap_closed(&mut self) {
        let pending = std::mem::take(&mut self.unreaped);
        for name in pending {
            if !self.try_reap(&name) {
                self.unreaped.push(name);
            }
        }
    }

    /// `true` once the worker is gone, reaped or lost to an error.
    fn try_reap(&mut self, name: &str) -> bool {
        let Some(worker) = self.workers.iter_mut().find(|w| w.name() == name) else {
            return true;
        };
        match worker.try_exit() {
            Ok(Some(status)) => {
                log::warn!("Supervisor: {} exited unexpectedly ({})", name, status);
                true
            }
            Ok(None) => false,
            Err(e) => {
                log::error!("Supervisor: {}", e);
                true
            }
        }
    }
}

#[cfg(all(test, unix))]
#[path = "supervisor_test.rs"]
mod supervisor_test;
