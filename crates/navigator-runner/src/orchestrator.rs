//! Execution environment orchestrator.
//!
//! [`Orchestrator::start`] hands a run configuration to a supervising task
//! and returns a [`RunHandle`] immediately. The supervising task launches
//! the child, decodes both output streams into the shared [`RunResult`] and
//! ends the run with exactly one terminal status:
//!
//! - exit code 0: `Completed`
//! - non-zero exit, signal, or launch failure: `Failed`
//! - [`RunHandle::cancel`]: `Canceled`
//! - configured timeout elapsed while the child was alive: `TimedOut`
//!
//! The child is torn down on every path out of the supervising task.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use navigator_core::{EventRecord, RunStatus, log_run_event};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::RunConfiguration;
use crate::decoder::EventDecoder;
use crate::launcher::{ExitStatus, OutputChunk, ProcessHandle, ProcessLauncher, ProcessOutput};
use crate::result::RunResult;

/// How long output is still drained after the child exits.
///
/// Grandchildren can keep a pipe open after the child itself is gone.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// New records and current status returned by [`RunHandle::poll`].
#[derive(Debug, Clone)]
pub struct RunPoll {
    pub records: Vec<EventRecord>,
    pub status: RunStatus,
}

/// Starts and supervises runs.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    launcher: Arc<ProcessLauncher>,
    drain_timeout: Duration,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::with_launcher(ProcessLauncher::new())
    }

    /// Create an orchestrator using a specific launcher.
    pub fn with_launcher(launcher: ProcessLauncher) -> Self {
        Self {
            launcher: Arc::new(launcher),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Set how long output is drained after the child exits.
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Start a run. Must be called from within a tokio runtime.
    #[instrument(level = "info", skip(self, config), fields(command = %config.command))]
    pub fn start(&self, config: RunConfiguration) -> RunHandle {
        let run_id = Uuid::new_v4().to_string();
        let result = RunResult::new(run_id.clone());
        let cancel = CancellationToken::new();
        let process_alive = Arc::new(AtomicBool::new(false));

        let supervisor = Supervisor {
            launcher: Arc::clone(&self.launcher),
            config,
            result: result.clone(),
            cancel: cancel.clone(),
            process_alive: Arc::clone(&process_alive),
            drain_timeout: self.drain_timeout,
        };
        let task = tokio::spawn(supervisor.run());

        info!("Started run {}", run_id);
        RunHandle {
            run_id,
            result,
            cancel,
            task: Some(task),
            cursor: 0,
            process_alive,
        }
    }
}

/// Caller's side of a live run.
///
/// Dropping the handle cancels a run that has not finished.
#[derive(Debug)]
pub struct RunHandle {
    run_id: String,
    result: RunResult,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    cursor: usize,
    process_alive: Arc<AtomicBool>,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Shared view of the run's records and status.
    pub fn result(&self) -> RunResult {
        self.result.clone()
    }

    /// Records appended since the previous poll, and the current status.
    ///
    /// Each record is returned exactly once across polls, in sequence order.
    pub fn poll(&mut self) -> RunPoll {
        // Status first: a terminal status guarantees every record is visible.
        let status = self.result.status();
        let records = self.result.records_since(self.cursor);
        self.cursor += records.len();
        RunPoll { records, status }
    }

    /// Request cancellation. Calling it again, or after the run finished,
    /// does nothing.
    pub fn cancel(&self) {
        if self.result.request_cancel() {
            log_run_event!(self.run_id, "cancel_requested");
        }
        self.cancel.cancel();
    }

    /// Returns true while the child process is running.
    pub fn is_process_alive(&self) -> bool {
        self.process_alive.load(Ordering::SeqCst)
    }

    /// Returns true once the run has a terminal status.
    pub fn is_finished(&self) -> bool {
        self.result.status().is_terminal()
    }

    /// Wait for the run to end.
    ///
    /// If `limit` elapses first the run is canceled and then awaited, which is
    /// bounded by the grace period. The returned result always has a terminal
    /// status.
    pub async fn await_completion(&mut self, limit: Option<Duration>) -> RunResult {
        let Some(mut task) = self.task.take() else {
            return self.result.clone();
        };

        let joined = match limit {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!("Run {} still active after {:?}, canceling", self.run_id, limit);
                    self.cancel();
                    task.await
                }
            },
            None => task.await,
        };

        if let Err(e) = joined {
            error!("Supervisor for run {} ended abnormally: {}", self.run_id, e);
        }
        // No-op unless the supervisor died before sealing the result.
        self.result.finish(RunStatus::Failed, None);
        self.process_alive.store(false, Ordering::SeqCst);
        self.result.clone()
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        if self.task.is_some() && !self.is_finished() {
            debug!("Run handle {} dropped while active", self.run_id);
            self.cancel();
        }
    }
}

/// Why the supervising loop stopped.
enum Ending {
    Exited,
    Canceled,
    TimedOut,
    Lost,
}

struct Supervisor {
    launcher: Arc<ProcessLauncher>,
    config: RunConfiguration,
    result: RunResult,
    cancel: CancellationToken,
    process_alive: Arc<AtomicBool>,
    drain_timeout: Duration,
}

impl Supervisor {
    async fn run(self) {
        let run_id = self.result.run_id();
        log_run_event!(run_id, "starting", command = %self.config.command, engine = %self.config.engine);

        let mut decoder = EventDecoder::new();

        let launched = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            launched = self.launcher.launch(&self.config) => Some(launched),
        };

        let mut process = match launched {
            None => {
                let status = self.result.finish(RunStatus::Canceled, None);
                log_run_event!(run_id, "finished", status = %status);
                return;
            }
            Some(Err(err)) => {
                error!("Launch failed for run {}: {}", run_id, err);
                let text = match err.hint() {
                    Some(hint) => format!("{err}. {hint}"),
                    None => err.to_string(),
                };
                self.result.append(decoder.supervisor_line(text));
                let status = self.result.finish(RunStatus::Failed, None);
                log_run_event!(run_id, "finished", status = %status);
                return;
            }
            Some(Ok(process)) => process,
        };

        self.process_alive.store(true, Ordering::SeqCst);
        log_run_event!(run_id, "launched", pid = ?process.pid());

        let ending = self.supervise(&mut process, &mut decoder).await;

        let status = match ending {
            Ending::Exited => {
                for record in decoder.flush() {
                    self.result.append(record);
                }
                match process.exit_status() {
                    Some(exit) if exit.success() => RunStatus::Completed,
                    _ => RunStatus::Failed,
                }
            }
            Ending::Canceled => {
                info!("Run {} canceled, terminating process", run_id);
                RunStatus::Canceled
            }
            Ending::TimedOut => {
                warn!(
                    "Run {} exceeded timeout {:?}, terminating process",
                    run_id, self.config.timeout
                );
                RunStatus::TimedOut
            }
            Ending::Lost => RunStatus::Failed,
        };

        let exit = match process.terminate().await {
            Ok(exit) => Some(exit),
            Err(e) => {
                error!("Failed to terminate process for run {}: {}", run_id, e);
                process.exit_status()
            }
        };
        self.process_alive.store(false, Ordering::SeqCst);

        let status = self.result.finish(status, exit);
        log_run_event!(
            run_id,
            "finished",
            status = %status,
            exit = ?exit,
            records = self.result.len()
        );
    }

    async fn supervise(&self, process: &mut ProcessHandle, decoder: &mut EventDecoder) -> Ending {
        let mut output: Option<ProcessOutput> = process.take_output();
        let deadline = self.config.timeout.map(|limit| Instant::now() + limit);
        let mut drain_deadline: Option<Instant> = None;
        let mut exited: Option<ExitStatus> = None;

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => return Ending::Canceled,

                () = sleep_until(deadline), if exited.is_none() => return Ending::TimedOut,

                chunk = next_chunk(&mut output) => match chunk {
                    Some(OutputChunk::Data { stream, bytes }) => {
                        for record in decoder.feed_stream(stream, &bytes) {
                            self.result.append(record);
                        }
                    }
                    Some(OutputChunk::Closed(stream)) => {
                        for record in decoder.flush_stream(stream) {
                            self.result.append(record);
                        }
                    }
                    None => {
                        output = None;
                        if exited.is_some() {
                            return Ending::Exited;
                        }
                    }
                },

                status = process.wait_exit(), if exited.is_none() => match status {
                    Ok(exit) => {
                        debug!("Process exited with {}", exit);
                        exited = Some(exit);
                        self.process_alive.store(false, Ordering::SeqCst);
                        if output.is_none() {
                            return Ending::Exited;
                        }
                        drain_deadline = Some(Instant::now() + self.drain_timeout);
                    }
                    Err(e) => {
                        error!("Failed waiting for process: {}", e);
                        return Ending::Lost;
                    }
                },

                () = sleep_until(drain_deadline) => {
                    warn!("Output still open {:?} after exit, closing", self.drain_timeout);
                    return Ending::Exited;
                }
            }
        }
    }
}

async fn next_chunk(output: &mut Option<ProcessOutput>) -> Option<OutputChunk> {
    match output {
        Some(output) => output.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use navigator_core::{EventPayload, LineOrigin};

    fn sh(script: &str) -> RunConfiguration {
        RunConfiguration::new("/bin/sh").with_args(["-c", script])
    }

    #[tokio::test]
    async fn test_completed_run_collects_records_in_order() {
        let script = r#"printf '{"event":"play-start","play_id":"p1","name":"all"}\n'; printf 'warn\n' >&2; printf 'tail'"#;
        let mut handle = Orchestrator::new().start(sh(script));
        let result = handle.await_completion(Some(Duration::from_secs(10))).await;

        assert_eq!(result.status(), RunStatus::Completed);
        assert_eq!(result.exit_status(), Some(ExitStatus::Code(0)));
        let records = result.snapshot();
        assert_eq!(records.len(), 3);
        assert!(records.windows(2).all(|w| w[0].seq < w[1].seq));
        assert!(records.iter().any(|r| matches!(
            r.payload,
            EventPayload::RawText {
                origin: LineOrigin::Stderr,
                ..
            }
        )));
        assert!(!handle.is_process_alive());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failed() {
        let mut handle = Orchestrator::new().start(sh("echo oops; exit 4"));
        let result = handle.await_completion(Some(Duration::from_secs(10))).await;
        assert_eq!(result.status(), RunStatus::Failed);
        assert_eq!(result.exit_status(), Some(ExitStatus::Code(4)));
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn test_launch_failure_is_failed_with_diagnostic() {
        let config = RunConfiguration::new("/nonexistent/navigator-test-binary");
        let mut handle = Orchestrator::new().start(config);
        let result = handle.await_completion(Some(Duration::from_secs(10))).await;

        assert_eq!(result.status(), RunStatus::Failed);
        let records = result.snapshot();
        assert_eq!(records.len(), 1);
        assert!(matches!(
            &records[0].payload,
            EventPayload::RawText { origin: LineOrigin::Supervisor, line } if line.contains("not found")
        ));
    }

    #[tokio::test]
    async fn test_poll_returns_each_record_once() {
        let mut handle = Orchestrator::new().start(sh("for i in 1 2 3 4 5; do echo $i; done"));
        handle.await_completion(Some(Duration::from_secs(10))).await;

        let first = handle.poll();
        assert_eq!(first.records.len(), 5);
        assert_eq!(first.status, RunStatus::Completed);
        let second = handle.poll();
        assert!(second.records.is_empty());
    }

    #[tokio::test]
    async fn test_await_completion_limit_cancels() {
        let config = RunConfiguration::new("sleep")
            .with_args(["10"])
            .with_grace_period(Duration::from_millis(500));
        let mut handle = Orchestrator::new().start(config);
        let result = handle
            .await_completion(Some(Duration::from_millis(200)))
            .await;
        assert_eq!(result.status(), RunStatus::Canceled);
        assert!(!handle.is_process_alive());
    }
}
