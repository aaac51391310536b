//! Process launcher implementation using tokio::process.
//!
//! [`ProcessLauncher::launch`] starts a child, either directly or through a
//! container engine, and returns a [`ProcessHandle`] that owns it. The
//! child's stdout and stderr are read by background tasks and delivered over
//! two bounded channels, so a slow consumer applies backpressure to the child
//! instead of growing memory.
//!
//! On Unix the child is placed in its own process group and signals are
//! delivered to the whole group, so helpers spawned by the command are torn
//! down with it.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, instrument, trace, warn};

use crate::command::{self, CommandLine};
use crate::config::RunConfiguration;
use crate::error::{LaunchError, LaunchResult};
use crate::puller::{CliImageEngine, ImageEngine, ImagePuller};

/// Bytes requested per read from a child stream.
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Default capacity of each output channel, in chunks.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Time allowed for `<engine> rm -f` after a forced kill.
const CONTAINER_REMOVE_TIMEOUT: Duration = Duration::from_secs(10);

/// How often a terminated process group is checked for survivors.
#[cfg(unix)]
const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// One of the child's output streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// A unit delivered by [`ProcessOutput::next`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    /// Bytes read from a stream
    Data { stream: StreamKind, bytes: Vec<u8> },
    /// The stream reached end of file
    Closed(StreamKind),
}

/// Signals that can be sent to a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGINT
    Interrupt,
    /// SIGTERM
    Terminate,
    /// SIGKILL
    Kill,
}

impl SignalKind {
    #[cfg(unix)]
    fn as_raw(&self) -> libc::c_int {
        match self {
            Self::Interrupt => libc::SIGINT,
            Self::Terminate => libc::SIGTERM,
            Self::Kill => libc::SIGKILL,
        }
    }
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// Exited with a code
    Code(i32),
    /// Terminated by a signal
    Signal(i32),
}

impl ExitStatus {
    /// Returns true for exit code 0.
    pub fn success(&self) -> bool {
        matches!(self, Self::Code(0))
    }

    /// Exit code, if the process exited normally.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Code(code) => Some(*code),
            Self::Signal(_) => None,
        }
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signal(signal);
            }
        }
        Self::Code(-1)
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit code {code}"),
            Self::Signal(signal) => write!(f, "signal {signal}"),
        }
    }
}

/// Receiving side of a child's two output streams.
#[derive(Debug)]
pub struct ProcessOutput {
    stdout: mpsc::Receiver<Vec<u8>>,
    stderr: mpsc::Receiver<Vec<u8>>,
    stdout_open: bool,
    stderr_open: bool,
}

impl ProcessOutput {
    fn new(stdout: mpsc::Receiver<Vec<u8>>, stderr: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            stdout,
            stderr,
            stdout_open: true,
            stderr_open: true,
        }
    }

    /// Next chunk from either stream.
    ///
    /// Each stream yields its data followed by exactly one
    /// [`OutputChunk::Closed`]. Returns `None` once both streams are closed.
    /// Cancel safe.
    pub async fn next(&mut self) -> Option<OutputChunk> {
        if !self.stdout_open && !self.stderr_open {
            return None;
        }

        tokio::select! {
            chunk = self.stdout.recv(), if self.stdout_open => Some(match chunk {
                Some(bytes) => OutputChunk::Data { stream: StreamKind::Stdout, bytes },
                None => {
                    self.stdout_open = false;
                    OutputChunk::Closed(StreamKind::Stdout)
                }
            }),
            chunk = self.stderr.recv(), if self.stderr_open => Some(match chunk {
                Some(bytes) => OutputChunk::Data { stream: StreamKind::Stderr, bytes },
                None => {
                    self.stderr_open = false;
                    OutputChunk::Closed(StreamKind::Stderr)
                }
            }),
        }
    }

    /// Returns true while either stream may still deliver data.
    pub fn is_open(&self) -> bool {
        self.stdout_open || self.stderr_open
    }
}

/// Container created for a run, removed after a forced kill.
#[derive(Debug, Clone)]
struct ContainerRef {
    engine: String,
    name: String,
}

/// Owner of a running child process.
///
/// Signalling or waiting on a process that has already been reaped is a
/// no-op. Dropping a handle whose process is still alive kills the process
/// group.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    pid: Option<u32>,
    command: String,
    container: Option<ContainerRef>,
    grace_period: Duration,
    exit: Option<ExitStatus>,
    output: Option<ProcessOutput>,
    readers: Vec<JoinHandle<()>>,
}

impl ProcessHandle {
    /// OS process id, if the process was started.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Shell-quoted command line of the process.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Name of the container, for containerized runs.
    pub fn container_name(&self) -> Option<&str> {
        self.container.as_ref().map(|c| c.name.as_str())
    }

    /// Exit status, once the process has been reaped.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit
    }

    /// Take the output streams. Returns `None` on the second call.
    pub fn take_output(&mut self) -> Option<ProcessOutput> {
        self.output.take()
    }

    /// Check whether the process is still running, reaping it if it exited.
    pub fn is_alive(&mut self) -> bool {
        if self.exit.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.record_exit(status.into());
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!("Failed to query process {:?}: {}", self.pid, e);
                false
            }
        }
    }

    /// Send a signal to the process group.
    pub fn signal(&mut self, kind: SignalKind) -> std::io::Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        debug!(pid = ?self.pid, signal = ?kind, "Signalling process group");

        #[cfg(unix)]
        {
            let Some(pid) = self.pid else {
                return Ok(());
            };
            // SAFETY: killpg only reads its integer arguments.
            let rc = unsafe { libc::killpg(pid as libc::pid_t, kind.as_raw()) };
            if rc == -1 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::ESRCH) {
                    return Err(err);
                }
            }
            Ok(())
        }

        #[cfg(not(unix))]
        {
            let _ = kind;
            self.child.start_kill()
        }
    }

    /// Wait for the process to exit.
    ///
    /// With a timeout, returns `Ok(None)` if the process is still running
    /// when it elapses.
    pub async fn wait(&mut self, limit: Option<Duration>) -> std::io::Result<Option<ExitStatus>> {
        if let Some(exit) = self.exit {
            return Ok(Some(exit));
        }

        let status = match limit {
            Some(limit) => match timeout(limit, self.child.wait()).await {
                Ok(status) => status?,
                Err(_) => return Ok(None),
            },
            None => self.child.wait().await?,
        };

        let exit = ExitStatus::from(status);
        self.record_exit(exit);
        Ok(Some(exit))
    }

    /// Wait for exit without a limit. Cancel safe.
    pub async fn wait_exit(&mut self) -> std::io::Result<ExitStatus> {
        if let Some(exit) = self.exit {
            return Ok(exit);
        }
        let exit = ExitStatus::from(self.child.wait().await?);
        self.record_exit(exit);
        Ok(exit)
    }

    /// Interrupt, then kill after the grace period.
    ///
    /// A container whose client had to be killed is removed with
    /// `<engine> rm -f`. Members of the process group that outlive the
    /// leader are swept as well. Returns the final exit status.
    #[instrument(level = "info", skip(self), fields(pid = ?self.pid))]
    pub async fn terminate(&mut self) -> std::io::Result<ExitStatus> {
        let exit = match self.exit {
            Some(exit) => exit,
            None => self.stop_leader().await?,
        };
        self.sweep_group().await;
        Ok(exit)
    }

    async fn stop_leader(&mut self) -> std::io::Result<ExitStatus> {
        self.signal(SignalKind::Interrupt)?;
        if let Some(exit) = self.wait(Some(self.grace_period)).await? {
            info!("Process exited after interrupt ({})", exit);
            return Ok(exit);
        }

        warn!(
            "Process still alive {:?} after interrupt, killing",
            self.grace_period
        );
        self.signal(SignalKind::Kill)?;
        if let Some(container) = self.container.clone() {
            remove_container(&container).await;
        }

        self.wait_exit().await
    }

    /// Terminate what is left of the process group once the leader is gone.
    ///
    /// The group id stays valid while any member is alive, so a reaped
    /// leader does not stop background children from being found.
    async fn sweep_group(&self) {
        #[cfg(unix)]
        {
            let Some(pid) = self.pid else {
                return;
            };
            if !signal_group(pid, libc::SIGTERM) {
                return;
            }
            debug!(pid, "Process group outlived its leader, terminating");

            let deadline = tokio::time::Instant::now() + self.grace_period;
            while tokio::time::Instant::now() < deadline {
                tokio::time::sleep(GROUP_POLL_INTERVAL).await;
                if !signal_group(pid, 0) {
                    return;
                }
            }
            warn!(pid, "Process group survived SIGTERM, killing");
            signal_group(pid, libc::SIGKILL);
        }
    }

    fn record_exit(&mut self, exit: ExitStatus) {
        if self.exit.is_none() {
            debug!(pid = ?self.pid, %exit, "Process exited");
            self.exit = Some(exit);
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.is_alive() {
            warn!(pid = ?self.pid, "Process handle dropped while alive, killing");
            let _ = self.signal(SignalKind::Kill);
            if let Some(container) = &self.container {
                let _ = std::process::Command::new(&container.engine)
                    .args(["rm", "-f", &container.name])
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .spawn();
            }
        }
        for reader in &self.readers {
            reader.abort();
        }
    }
}

/// Send `sig` to the group led by `pid`. Returns false once the group is gone.
#[cfg(unix)]
fn signal_group(pid: u32, sig: libc::c_int) -> bool {
    // SAFETY: killpg only reads its integer arguments.
    unsafe { libc::killpg(pid as libc::pid_t, sig) == 0 }
}

async fn remove_container(container: &ContainerRef) {
    let removal = Command::new(&container.engine)
        .args(["rm", "-f", &container.name])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match timeout(CONTAINER_REMOVE_TIMEOUT, removal).await {
        Ok(Ok(status)) if status.success() => {
            info!("Removed container {}", container.name);
        }
        Ok(Ok(status)) => warn!("Removing container {} exited with {}", container.name, status),
        Ok(Err(e)) => warn!("Failed to remove container {}: {}", container.name, e),
        Err(_) => warn!("Timed out removing container {}", container.name),
    }
}

fn spawn_reader<R>(mut reader: R, tx: mpsc::Sender<Vec<u8>>, stream: StreamKind) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Error reading child {}: {}", stream, e);
                    break;
                }
            }
        }
        trace!("Reader for {} finished", stream);
    })
}

/// Starts child processes for run configurations.
#[derive(Clone)]
pub struct ProcessLauncher {
    channel_capacity: usize,
    image_engine: Option<Arc<dyn ImageEngine>>,
}

impl std::fmt::Debug for ProcessLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessLauncher")
            .field("channel_capacity", &self.channel_capacity)
            .field("custom_image_engine", &self.image_engine.is_some())
            .finish()
    }
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessLauncher {
    /// Create a launcher that uses the engine command line for images.
    pub fn new() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            image_engine: None,
        }
    }

    /// Set the capacity of each output channel.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Use a custom image engine instead of the engine command line.
    pub fn with_image_engine(mut self, engine: Arc<dyn ImageEngine>) -> Self {
        self.image_engine = Some(engine);
        self
    }

    /// Launch a child process for `config`.
    ///
    /// This will:
    /// 1. Validate the configuration and working directory
    /// 2. For containerized runs, locate the engine and apply the pull policy
    /// 3. Build the command line and spawn the child with piped output
    #[instrument(level = "info", skip(self, config), fields(command = %config.command, engine = %config.engine))]
    pub async fn launch(&self, config: &RunConfiguration) -> LaunchResult<ProcessHandle> {
        config.validate()?;

        if let Some(dir) = &config.working_dir {
            if !config.engine.is_container() && !dir.is_dir() {
                return Err(LaunchError::WorkingDirectoryMissing { path: dir.clone() });
            }
        }

        let container = match config.engine.binary() {
            Some(engine) => {
                self.prepare_container(config, engine).await?;
                Some(ContainerRef {
                    engine: engine.to_string(),
                    name: command::container_name(),
                })
            }
            None => None,
        };

        let line = command::build(config, container.as_ref().map(|c| c.name.as_str()))?;
        self.spawn(config, line, container)
    }

    async fn prepare_container(&self, config: &RunConfiguration, engine: &str) -> LaunchResult<()> {
        let image_engine: Arc<dyn ImageEngine> = match &self.image_engine {
            Some(custom) => Arc::clone(custom),
            None => {
                which::which(engine).map_err(|_| LaunchError::EngineNotFound {
                    engine: engine.to_string(),
                })?;
                Arc::new(CliImageEngine::new(config.engine)?)
            }
        };

        let image = config
            .image
            .as_deref()
            .ok_or_else(|| LaunchError::invalid("container run without an image"))?;
        ImagePuller::new(image_engine)
            .ensure(image, config.pull_policy, &config.pull_arguments)
            .await?;
        Ok(())
    }

    fn spawn(
        &self,
        config: &RunConfiguration,
        line: CommandLine,
        container: Option<ContainerRef>,
    ) -> LaunchResult<ProcessHandle> {
        let shown = line.display();
        let mut cmd: Command = line.to_command();
        cmd.kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        if !config.engine.is_container() {
            if let Some(dir) = &config.working_dir {
                cmd.current_dir(dir);
            }
            cmd.envs(&config.environment);
        }

        debug!("Spawning: {}", shown);
        let mut child = cmd
            .spawn()
            .map_err(|e| LaunchError::from_spawn(line.program.clone(), e))?;
        let pid = child.id();

        let stdout = child.stdout.take().ok_or_else(|| LaunchError::Spawn {
            command: shown.clone(),
            source: std::io::Error::other("stdout was not captured"),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| LaunchError::Spawn {
            command: shown.clone(),
            source: std::io::Error::other("stderr was not captured"),
        })?;

        let (stdout_tx, stdout_rx) = mpsc::channel(self.channel_capacity);
        let (stderr_tx, stderr_rx) = mpsc::channel(self.channel_capacity);
        let readers = vec![
            spawn_reader(stdout, stdout_tx, StreamKind::Stdout),
            spawn_reader(stderr, stderr_tx, StreamKind::Stderr),
        ];

        info!("Launched {} (PID: {:?})", shown, pid);

        Ok(ProcessHandle {
            child,
            pid,
            command: shown,
            container,
            grace_period: config.grace_period,
            exit: None,
            output: Some(ProcessOutput::new(stdout_rx, stderr_rx)),
            readers,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    async fn collect(output: &mut ProcessOutput) -> (Vec<u8>, Vec<u8>, usize) {
        let (mut out, mut err, mut closed) = (Vec::new(), Vec::new(), 0);
        while let Some(chunk) = output.next().await {
            match chunk {
                OutputChunk::Data { stream: StreamKind::Stdout, bytes } => out.extend(bytes),
                OutputChunk::Data { stream: StreamKind::Stderr, bytes } => err.extend(bytes),
                OutputChunk::Closed(_) => closed += 1,
            }
        }
        (out, err, closed)
    }

    #[tokio::test]
    async fn test_launch_captures_both_streams() {
        let config = RunConfiguration::new("/bin/sh")
            .with_args(["-c", "printf 'out\\n'; printf 'err\\n' >&2"]);
        let mut handle = ProcessLauncher::new().launch(&config).await.unwrap();
        let mut output = handle.take_output().unwrap();
        assert!(handle.take_output().is_none());

        let (out, err, closed) = collect(&mut output).await;
        assert_eq!(out, b"out\n");
        assert_eq!(err, b"err\n");
        assert_eq!(closed, 2);

        let exit = handle.wait(Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(exit, Some(ExitStatus::Code(0)));
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn test_launch_applies_environment() {
        let config = RunConfiguration::new("/bin/sh")
            .with_args(["-c", "printf '%s' \"$NAV_TEST\""])
            .with_env("NAV_TEST", "value");
        let mut handle = ProcessLauncher::new().launch(&config).await.unwrap();
        let mut output = handle.take_output().unwrap();
        let (out, _, _) = collect(&mut output).await;
        assert_eq!(out, b"value");
    }

    #[tokio::test]
    async fn test_nonzero_exit_code() {
        let config = RunConfiguration::new("/bin/sh").with_args(["-c", "exit 3"]);
        let mut handle = ProcessLauncher::new().launch(&config).await.unwrap();
        let exit = handle.wait(None).await.unwrap();
        assert_eq!(exit, Some(ExitStatus::Code(3)));
        assert_eq!(exit.and_then(|e| e.code()), Some(3));
    }

    #[tokio::test]
    async fn test_wait_timeout_returns_none() {
        let config = RunConfiguration::new("sleep").with_args(["10"]);
        let mut handle = ProcessLauncher::new().launch(&config).await.unwrap();
        let exit = handle.wait(Some(Duration::from_millis(50))).await.unwrap();
        assert_eq!(exit, None);
        assert!(handle.is_alive());
        handle.terminate().await.unwrap();
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn test_terminate_interrupts_then_kills() {
        // The trap ignores SIGINT so only the kill ends the group.
        let config = RunConfiguration::new("/bin/sh")
            .with_args(["-c", "trap '' INT; sleep 10"])
            .with_grace_period(Duration::from_millis(200));
        let mut handle = ProcessLauncher::new().launch(&config).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let exit = handle.terminate().await.unwrap();
        assert_eq!(exit, ExitStatus::Signal(libc::SIGKILL));
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn test_signal_after_exit_is_noop() {
        let config = RunConfiguration::new("true");
        let mut handle = ProcessLauncher::new().launch(&config).await.unwrap();
        handle.wait(None).await.unwrap();
        handle.signal(SignalKind::Kill).unwrap();
        handle.signal(SignalKind::Interrupt).unwrap();
        assert_eq!(handle.terminate().await.unwrap(), ExitStatus::Code(0));
    }

    /// Zombies count as dead, init may reap them late.
    fn running(pid: &str) -> bool {
        std::fs::read_to_string(format!("/proc/{pid}/stat"))
            .ok()
            .and_then(|stat| {
                let (_, rest) = stat.rsplit_once(')')?;
                rest.split_whitespace().next().map(|state| state != "Z" && state != "X")
            })
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_terminate_after_exit_sweeps_group() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("bg.pid");
        let script = format!("sleep 30 & echo $! > {}", pid_file.display());
        let config = RunConfiguration::new("/bin/sh")
            .with_args(["-c", &script])
            .with_grace_period(Duration::from_millis(500));
        let mut handle = ProcessLauncher::new().launch(&config).await.unwrap();
        assert_eq!(handle.wait(None).await.unwrap(), Some(ExitStatus::Code(0)));

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        assert!(running(pid.trim()), "background sleeper should outlive the shell");

        assert_eq!(handle.terminate().await.unwrap(), ExitStatus::Code(0));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!running(pid.trim()), "background sleeper survived terminate");
    }

    #[tokio::test]
    async fn test_command_not_found() {
        let config = RunConfiguration::new("/nonexistent/navigator-test-binary");
        let err = ProcessLauncher::new().launch(&config).await.unwrap_err();
        assert!(matches!(err, LaunchError::CommandNotFound { .. }));
    }

    #[tokio::test]
    async fn test_missing_working_directory() {
        let config = RunConfiguration::new("true").with_working_dir("/nonexistent/navigator-dir");
        let err = ProcessLauncher::new().launch(&config).await.unwrap_err();
        assert!(matches!(err, LaunchError::WorkingDirectoryMissing { .. }));
    }
}
