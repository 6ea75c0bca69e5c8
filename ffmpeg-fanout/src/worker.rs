use std::{
    io,
    process::{ExitStatus, Stdio},
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
    sync::mpsc,
};

use crate::{
    command::StreamJob,
    error::{FanoutError, Result},
};

/// `Spawned -> Running -> (Terminating -> Exited) | Exited`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Spawned,
    Running,
    Terminating,
    Exited,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputSource {
    Stdout,
    Stderr,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputLine {
    pub worker: String,
    pub source: OutputSource,
    pub text: String,
}

#[derive(Debug)]
pub enum WorkerEvent {
    Line(OutputLine),
    /// Both output streams of the worker reached EOF.
    Closed { worker: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    /// The process was already gone before a termination request was sent.
    AlreadyExited,
    Exited(ExitStatus),
    /// The grace period ran out and the process was hard-killed.
    Killed,
}

/// One encoder child process.
pub struct Worker {
    name: String,
    pid: Option<u32>,
    child: Child,
    state: WorkerState,
    exit_status: Option<ExitStatus>,
}

impl Worker {
    /// Launch `job` and start forwarding its output lines to `events`.
    pub fn spawn(job: &StreamJob, events: mpsc::Sender<WorkerEvent>) -> Result<Self> {
        let mut std_cmd = std::process::Command::new(&job.program);
        std_cmd
            .args(&job.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // keep a terminal Ctrl-C away from the encoders; shutdown signals them in order
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_cmd.process_group(0);
        }
        let mut cmd = Command::from(std_cmd);
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| FanoutError::Spawn {
            name: job.name.clone(),
            program: job.program.clone(),
            source,
        })?;

        let pid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        tokio::spawn(pump_output(job.name.clone(), stdout, stderr, events));

        log::debug!("Worker: {} spawned with pid {:?}", job.name, pid);
        Ok(Self {
            name: job.name.clone(),
            pid,
            child,
            state: WorkerState::Spawned,
            exit_status: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    pub(crate) fn mark_running(&mut self) {
        if self.state == WorkerState::Spawned {
            self.state = WorkerState::Running;
        }
    }

    /// Reap the process if it has exited, without blocking.
    pub fn try_exit(&mut self) -> Result<Option<ExitStatus>> {
        if self.exit_status.is_some() {
            return Ok(self.exit_status);
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.exited(status);
                Ok(Some(status))
            }
            Ok(None) => Ok(None),
            Err(source) => Err(self.wait_error(source)),
        }
    }

    /// Ask the encoder to stop, the way Ctrl-C would.
    ///
    /// Returns `false` when no request was sent because the worker is already
    /// terminating or gone.
    pub fn terminate(&mut self) -> Result<bool> {
        if matches!(self.state, WorkerState::Terminating | WorkerState::Exited) {
            return Ok(false);
        }
        if self.try_exit()?.is_some() {
            return Ok(false);
        }

        log::debug!("Worker: interrupting {} (pid {:?})", self.name, self.pid);
        self.send_interrupt()?;
        self.state = WorkerState::Terminating;
        Ok(true)
    }

    #[cfg(unix)]
    fn send_interrupt(&mut self) -> Result<()> {
        use nix::{
            errno::Errno,
            sys::signal::{Signal, kill},
            unistd::Pid,
        };

        let Some(pid) = self.pid else {
            return Ok(());
        };
        match kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
            // exited but not reaped yet
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(FanoutError::Signal {
                name: self.name.clone(),
                source: io::Error::from(errno),
            }),
        }
    }

    #[cfg(not(unix))]
    fn send_interrupt(&mut self) -> Result<()> {
        self.child
            .start_kill()
            .map_err(|source| FanoutError::Signal {
                name: self.name.clone(),
                source,
            })
    }

    /// Block until the process exits and reap it.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.exit_status {
            return Ok(status);
        }
        let status = self
            .child
            .wait()
            .await
            .map_err(|source| self.wait_error(source))?;
        self.exited(status);
        Ok(status)
    }

    pub async fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<ExitStatus>> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Hard-kill and reap.
    pub async fn kill(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.exit_status {
            return Ok(status);
        }
        self.child
            .start_kill()
            .map_err(|source| FanoutError::Signal {
                name: self.name.clone(),
                source,
            })?;
        self.wait().await
    }

    /// Wait for a worker that was asked to terminate. With a grace period, a
    /// worker still alive when it runs out is killed.
    pub async fn finish(&mut self, grace: Option<Duration>) -> Result<StopOutcome> {
        let Some(grace) = grace else {
            return self.wait().await.map(StopOutcome::Exited);
        };
        if let Some(status) = self.wait_timeout(grace).await? {
            return Ok(StopOutcome::Exited(status));
        }

        log::warn!(
            "Worker: {} did not exit within {:?} after interrupt, killing",
            self.name,
            grace
        );
        self.kill().await?;
        Ok(StopOutcome::Killed)
    }

    /// `terminate` followed by `finish`.
    pub async fn stop(&mut self, grace: Option<Duration>) -> Result<StopOutcome> {
        if !self.terminate()? && self.state == WorkerState::Exited {
            return Ok(StopOutcome::AlreadyExited);
        }
        self.finish(grace).await
    }

    fn exited(&mut self, status: ExitStatus) {
        log::debug!("Worker: {} exited with {}", self.name, status);
        self.state = WorkerState::Exited;
        self.exit_status = Some(status);
    }

    fn wait_error(&self, source: io::Error) -> FanoutError {
        FanoutError::Wait {
            name: self.name.clone(),
            source,
        }
    }
}

/// Reads stdout and stderr of one worker concurrently and forwards every
/// line, in order per stream, until both are closed.
async fn pump_output<O, E>(
    worker: String,
    stdout: Option<O>,
    stderr: Option<E>,
    events: mpsc::Sender<WorkerEvent>,
) where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut out = stdout.map(BufReader::new);
    let mut err = stderr.map(BufReader::new);
    let mut out_buf = Vec::new();
    let mut err_buf = Vec::new();

    while out.is_some() || err.is_some() {
        let forwarded = tokio::select! {
            read = next_line(&mut out, &mut out_buf) => {
                forward(&worker, OutputSource::Stdout, read, &mut out, &mut out_buf, &events).await
            }
            read = next_line(&mut err, &mut err_buf) => {
                forward(&worker, OutputSource::Stderr, read, &mut err, &mut err_buf, &events).await
            }
        };
        if !forwarded {
            return;
        }
    }

    let _ = events.send(WorkerEvent::Closed { worker }).await;
}

// read_until keeps partial input in `buf` when cancelled by select
async fn next_line<R>(reader: &mut Option<BufReader<R>>, buf: &mut Vec<u8>) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match reader {
        Some(reader) => reader.read_until(b'\n', buf).await,
        None => std::future::pending().await,
    }
}

/// Returns `false` once nobody is listening any more.
async fn forward<R>(
    worker: &str,
    source: OutputSource,
    read: io::Result<usize>,
    reader: &mut Option<R>,
    buf: &mut Vec<u8>,
    events: &mpsc::Sender<WorkerEvent>,
) -> bool {
    let closed = match read {
        Ok(0) => true,
        Ok(_) => false,
        Err(e) => {
            log::debug!("Worker: {} {:?} read error: {}", worker, source, e);
            true
        }
    };
    if closed {
        *reader = None;
    }
    if buf.is_empty() {
        return true;
    }

    let text = String::from_utf8_lossy(buf)
        .trim_end_matches(['\r', '\n'])
        .to_string();
    buf.clear();
    let line = OutputLine {
        worker: worker.to_string(),
        source,
        text,
    };
    events.send(WorkerEvent::Line(line)).await.is_ok()
}
