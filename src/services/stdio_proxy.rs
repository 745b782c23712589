//! Transparent stdio interception for MCP servers.
//!
//! The proxy spawns the real server and runs two line pumps: outer stdin to
//! child stdin, and child stdout to outer stdout. Bytes and framing are
//! passed through untouched; every line is also mirrored to telemetry.
//! Nothing but forwarded child output is ever written to the outer stdout.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::future::Future;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use super::protocol::inspect_message;
use super::telemetry::{
    Direction, FileSink, HttpSink, SinkError, TelemetryDispatcher, TelemetryHandle, TelemetryRecord, TelemetrySink,
    TelemetryTags,
};
use crate::domain::models::StdioConfig;

/// Deadline for one HTTP telemetry POST.
const TELEMETRY_POST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("child process has no {0} pipe")]
    MissingPipe(&'static str),

    #[error("failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),

    #[error("failed to wait for child process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("telemetry sink setup failed: {0}")]
    Sink(#[from] SinkError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// What moved the proxy toward shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopTrigger {
    Signal,
    ChildExited,
    InputClosed,
}

/// Proxy state shared with observers.
#[derive(Debug)]
pub struct Lifecycle {
    state: std::sync::Mutex<ProxyState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            state: std::sync::Mutex::new(ProxyState::Starting),
        }
    }
}

impl Lifecycle {
    pub fn state(&self) -> ProxyState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_running(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == ProxyState::Starting {
            *state = ProxyState::Running;
        }
    }

    /// Enter `Stopping`. Only the first trigger counts; later ones return `false`.
    pub fn begin_stop(&self, trigger: StopTrigger) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            ProxyState::Starting | ProxyState::Running => {
                *state = ProxyState::Stopping;
                tracing::info!(?trigger, "stdio proxy stopping");
                true
            }
            ProxyState::Stopping | ProxyState::Stopped => false,
        }
    }

    fn mark_stopped(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = ProxyState::Stopped;
    }
}

/// Copy `reader` to `writer` one line at a time.
///
/// Each line is inspected, handed to telemetry, then written and flushed
/// under the writer lock, so two lines never interleave on the destination.
/// A final line without a newline is forwarded as is. Returns the number of
/// lines forwarded.
pub async fn pump_lines<R, W>(
    mut reader: R,
    writer: Arc<Mutex<W>>,
    direction: Direction,
    telemetry: TelemetryHandle,
    tags: Arc<TelemetryTags>,
) -> std::io::Result<u64>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = Vec::with_capacity(8 * 1024);
    let mut forwarded = 0u64;

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }

        telemetry.emit(TelemetryRecord::observe(direction, &line, inspect_message(&line), &tags));

        let mut out = writer.lock().await;
        out.write_all(&line).await?;
        out.flush().await?;
        drop(out);

        forwarded += 1;
    }

    tracing::debug!(direction = direction.as_str(), forwarded, "pump reached end of input");
    Ok(forwarded)
}

pub struct StdioProxy {
    command: String,
    args: Vec<String>,
    sinks: Vec<Arc<dyn TelemetrySink>>,
    tags: TelemetryTags,
    stdin_close_grace: Duration,
    shutdown_grace: Duration,
    lifecycle: Arc<Lifecycle>,
}

impl StdioProxy {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        let defaults = StdioConfig::default();
        Self {
            command: command.into(),
            args,
            sinks: Vec::new(),
            tags: TelemetryTags::default(),
            stdin_close_grace: Duration::from_millis(defaults.stdin_close_grace_ms),
            shutdown_grace: Duration::from_millis(defaults.shutdown_grace_ms),
            lifecycle: Arc::new(Lifecycle::default()),
        }
    }

    /// Apply grace periods and sinks from configuration.
    pub fn with_config(mut self, config: &StdioConfig) -> Result<Self, ProxyError> {
        self.stdin_close_grace = Duration::from_millis(config.stdin_close_grace_ms);
        self.shutdown_grace = Duration::from_millis(config.shutdown_grace_ms);
        if let Some(path) = &config.telemetry_file {
            self.sinks.push(Arc::new(FileSink::new(path)));
        }
        if let Some(url) = &config.telemetry_url {
            self.sinks.push(Arc::new(HttpSink::new(url.clone(), TELEMETRY_POST_TIMEOUT)?));
        }
        Ok(self)
    }

    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_tags(mut self, tags: TelemetryTags) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_grace(mut self, stdin_close_grace: Duration, shutdown_grace: Duration) -> Self {
        self.stdin_close_grace = stdin_close_grace;
        self.shutdown_grace = shutdown_grace;
        self
    }

    pub fn lifecycle(&self) -> Arc<Lifecycle> {
        Arc::clone(&self.lifecycle)
    }

    /// Proxy the process's own stdin/stdout until a stop trigger, and
    /// return the exit code to mirror.
    pub async fn run(&self) -> Result<i32, ProxyError> {
        let shutdown = termination_signal()?;
        self.run_with_io(tokio::io::stdin(), tokio::io::stdout(), shutdown).await
    }

    /// Like [`Self::run`] with explicit streams and stop future.
    pub async fn run_with_io<I, O, S>(&self, input: I, output: O, shutdown: S) -> Result<i32, ProxyError>
    where
        I: AsyncRead + Unpin + Send + 'static,
        O: AsyncWrite + Unpin + Send + 'static,
        S: Future<Output = ()>,
    {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProxyError::Spawn {
                command: self.command.clone(),
                source,
            })?;
        let child_stdin = child.stdin.take().ok_or(ProxyError::MissingPipe("stdin"))?;
        let child_stdout = child.stdout.take().ok_or(ProxyError::MissingPipe("stdout"))?;

        self.lifecycle.mark_running();
        tracing::info!(command = %self.command, pid = child.id(), "child process started");

        let dispatcher = TelemetryDispatcher::start(self.sinks.clone());
        let tags = Arc::new(self.tags.clone());

        let mut request_pump = tokio::spawn(pump_lines(
            BufReader::new(input),
            Arc::new(Mutex::new(child_stdin)),
            Direction::Request,
            dispatcher.handle(),
            Arc::clone(&tags),
        ));
        let mut response_pump = tokio::spawn(pump_lines(
            BufReader::new(child_stdout),
            Arc::new(Mutex::new(output)),
            Direction::Response,
            dispatcher.handle(),
            tags,
        ));

        tokio::pin!(shutdown);
        let (trigger, exited) = tokio::select! {
            () = &mut shutdown => (StopTrigger::Signal, None),
            status = child.wait() => (StopTrigger::ChildExited, Some(status)),
            _ = &mut request_pump => (StopTrigger::InputClosed, None),
        };
        self.lifecycle.begin_stop(trigger);

        // No new input after this point; dropping the pump closes child stdin.
        request_pump.abort();

        let status = match exited {
            Some(status) => status.map_err(ProxyError::Wait)?,
            None => self.terminate(&mut child).await?,
        };

        match tokio::time::timeout(self.shutdown_grace, &mut response_pump).await {
            Ok(Ok(Err(e))) => tracing::warn!(error = %e, "response pump failed"),
            Ok(_) => {}
            Err(_) => {
                tracing::warn!("child output not drained in time");
                response_pump.abort();
            }
        }
        dispatcher.shutdown(self.shutdown_grace).await;

        self.lifecycle.mark_stopped();
        let code = exit_code(status);
        tracing::info!(code, "stdio proxy stopped");
        Ok(code)
    }

    /// Wait for a cooperative exit after stdin closes, then SIGTERM, then kill.
    async fn terminate(&self, child: &mut Child) -> Result<ExitStatus, ProxyError> {
        if let Ok(status) = tokio::time::timeout(self.stdin_close_grace, child.wait()).await {
            return status.map_err(ProxyError::Wait);
        }

        if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
            tracing::info!(pid, "sending SIGTERM to child");
            if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                tracing::warn!(pid, error = ?e, "SIGTERM failed");
            }
        }
        if let Ok(status) = tokio::time::timeout(self.shutdown_grace, child.wait()).await {
            return status.map_err(ProxyError::Wait);
        }

        tracing::warn!("child ignored SIGTERM; killing");
        if let Err(e) = child.start_kill() {
            tracing::warn!(error = %e, "kill failed");
        }
        child.wait().await.map_err(ProxyError::Wait)
    }
}

/// Exit code to mirror: the child's own code, or 128 + signal number.
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| status.signal().map_or(1, |signal| 128 + signal))
}

/// Resolves on the first SIGINT, SIGTERM or SIGHUP.
fn termination_signal() -> Result<impl Future<Output = ()>, ProxyError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt()).map_err(ProxyError::Signal)?;
    let mut terminate = signal(SignalKind::terminate()).map_err(ProxyError::Signal)?;
    let mut hangup = signal(SignalKind::hangup()).map_err(ProxyError::Signal)?;

    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => tracing::info!("received SIGINT"),
            _ = terminate.recv() => tracing::info!("received SIGTERM"),
            _ = hangup.recv() => tracing::info!("received SIGHUP"),
        }
    })
}
