//! navigator - terminal front-end for automation runs
//!
//! Runs a command directly or inside an execution environment container,
//! and lets the operator browse its plays, tasks and host results while it
//! runs. Finished runs are saved as artifacts that can be replayed later.
//!
//! ## Usage
//!
//! ```bash
//! # Run a playbook inside the default execution environment
//! navigator run -- ansible-playbook -i inventory site.yml
//!
//! # Run on the host, printing events instead of opening the UI
//! navigator run --no-ee --mode stdout -- ansible-playbook site.yml
//!
//! # Browse a saved run
//! navigator replay site-artifact-2024-03-01T12:30:00.000000+00:00.json
//! ```

use std::io::Write;
use std::panic;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use navigator_core::{
    EventPayload, EventRecord, LogGuard, NavigatorError, PullPolicy, RunStatus, init_logging,
};
use navigator_runner::settings::{Settings, SettingsOverrides, parse_timeout};
use navigator_runner::{ExitStatus, Mode, Orchestrator, RunConfiguration, RunHandle, RunResult, artifact};
use navigator_tui::{App, ArtifactTarget, Theme, ThemeName};
use tracing::{error, info, warn};

/// How often stdout mode checks the run for new records.
const STDOUT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound on waiting for a run after the UI closes.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(30);

/// Terminal navigator for automation runs
#[derive(Parser, Debug)]
#[command(name = "navigator")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging (increases log level)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Directory for log files (defaults to ~/.navigator/logs/)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Color theme: default, dark or none
    #[arg(long, global = true, value_parser = parse_theme)]
    theme: Option<ThemeName>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a command and follow its events
    Run(RunArgs),
    /// Browse a saved playbook artifact
    Replay(ReplayArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Settings file (defaults to ./navigator.yml, then ~/.navigator/navigator.yml)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Interactive UI or plain stdout
    #[arg(short, long)]
    mode: Option<Mode>,

    /// Run directly on the host instead of in an execution environment
    #[arg(long = "no-ee", conflicts_with_all = ["engine", "image"])]
    no_execution_environment: bool,

    /// Container engine: auto, podman or docker
    #[arg(long)]
    engine: Option<String>,

    /// Execution environment image
    #[arg(long)]
    image: Option<String>,

    /// Image pull policy: always, missing, never or tag
    #[arg(long)]
    pull_policy: Option<PullPolicy>,

    /// Extra argument for the image pull (repeatable)
    #[arg(long = "pull-arg", allow_hyphen_values = true)]
    pull_arguments: Vec<String>,

    /// Volume mount as src:dest[:options] (repeatable)
    #[arg(long = "volume")]
    volume_mounts: Vec<String>,

    /// Set an environment variable as NAME=value (repeatable)
    #[arg(short = 'e', long = "env")]
    set_environment: Vec<String>,

    /// Pass a host environment variable into the container (repeatable)
    #[arg(long = "pass-env")]
    pass_environment: Vec<String>,

    /// Extra option for the container engine run command (repeatable)
    #[arg(long = "container-option", allow_hyphen_values = true)]
    container_options: Vec<String>,

    /// Stop the run after this long, e.g. 90s or 30m
    #[arg(long, value_parser = parse_timeout_arg)]
    timeout: Option<Duration>,

    /// Working directory of the run
    #[arg(long = "cwd")]
    working_dir: Option<PathBuf>,

    /// Directory for playbook artifacts
    #[arg(long)]
    artifact_dir: Option<PathBuf>,

    /// Do not save an artifact when the run ends
    #[arg(long)]
    no_artifact: bool,

    /// Wrap the command in a shell
    #[arg(long)]
    shell: bool,

    /// Name used in the UI and for the artifact file
    #[arg(long)]
    name: Option<String>,

    /// Command to run and its arguments
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

#[derive(Args, Debug)]
struct ReplayArgs {
    /// Path of the artifact
    artifact: PathBuf,

    /// Interactive UI or plain stdout
    #[arg(short, long, default_value_t = Mode::Interactive)]
    mode: Mode,
}

fn parse_timeout_arg(value: &str) -> Result<Duration, String> {
    parse_timeout(value).map_err(|e| e.to_string())
}

fn parse_theme(value: &str) -> Result<ThemeName, String> {
    ThemeName::parse(value).ok_or_else(|| format!("unknown theme '{value}'"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let console = match &cli.command {
        Command::Run(args) => args.mode == Some(Mode::Stdout),
        Command::Replay(args) => args.mode == Mode::Stdout,
    };
    let _guard = match setup_logging(&cli, console) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::from(1);
        }
    };

    install_panic_hook();

    let theme = theme_for(cli.theme);
    let outcome = match cli.command {
        Command::Run(args) => run_command(args, theme),
        Command::Replay(args) => replay_artifact(args, theme),
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            error!("navigator error: {:#}", e);
            eprintln!("Error: {:#}", e);
            if let Some(hint) = e
                .downcast_ref::<NavigatorError>()
                .and_then(NavigatorError::guidance)
            {
                eprintln!("Hint: {hint}");
            }
            ExitCode::from(1)
        }
    }
}

/// Install a panic hook that restores the terminal before printing the panic message.
fn install_panic_hook() {
    let original_hook = panic::take_hook();

    panic::set_hook(Box::new(move |panic_info| {
        let _ = restore_terminal();
        original_hook(panic_info);
    }));
}

/// Restore terminal to its normal state.
fn restore_terminal() -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    let _ = crossterm::terminal::disable_raw_mode();
    crossterm::execute!(
        stdout,
        crossterm::terminal::LeaveAlternateScreen,
        crossterm::cursor::Show
    )?;
    stdout.flush()
}

fn setup_logging(cli: &Cli, console: bool) -> navigator_core::Result<LogGuard> {
    init_logging(cli.log_dir.clone(), cli.verbose > 0, console)
}

/// NO_COLOR wins over the requested theme.
fn theme_for(requested: Option<ThemeName>) -> Theme {
    if std::env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty()) {
        return Theme::from_name(ThemeName::Monochrome);
    }
    Theme::from_name(requested.unwrap_or_default())
}

fn run_command(args: RunArgs, theme: Theme) -> anyhow::Result<ExitCode> {
    let (mut settings, source) = Settings::discover(args.settings.as_deref())?;
    if let Some(path) = &source {
        info!("Settings loaded from {}", path.display());
    }

    settings.apply(SettingsOverrides {
        execution_environment: args.no_execution_environment.then_some(false),
        container_engine: args.engine,
        image: args.image,
        pull_policy: args.pull_policy,
        pull_arguments: args.pull_arguments,
        volume_mounts: args.volume_mounts,
        set_environment: args.set_environment,
        pass_environment: args.pass_environment,
        container_options: args.container_options,
        timeout: args.timeout,
        mode: args.mode,
        working_dir: args.working_dir,
        artifact_enable: args.no_artifact.then_some(false),
        artifact_dir: args.artifact_dir,
    })?;

    let (command, command_args) = args
        .command
        .split_first()
        .ok_or(NavigatorError::MissingCommand)?;
    let mut config = settings
        .resolve(command, command_args)?
        .with_shell_wrap(args.shell);
    if let Some(name) = args.name {
        config = config.with_name(name);
    }

    let target = artifact_target(&settings, &config)?;
    info!(
        engine = %config.engine,
        command = %config.command,
        mode = %settings.mode,
        "Starting run"
    );

    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    let _enter = runtime.enter();
    let handle = Orchestrator::new().start(config.clone());

    let (result, saved) = match settings.mode {
        Mode::Stdout => {
            let result = runtime.block_on(follow_stdout(handle));
            (result, None)
        }
        Mode::Interactive => {
            let mut app =
                App::live(handle, config.display_name(), Some(target.clone())).with_theme(theme);
            let ui = app.run();
            let _ = restore_terminal();
            ui.map_err(|e| NavigatorError::TerminalInit {
                message: e.to_string(),
            })?;

            let saved = app.final_artifact().cloned();
            let mut handle = app
                .take_run()
                .ok_or_else(|| NavigatorError::internal("run handle missing after UI exit"))?;
            if !handle.is_finished() {
                info!("UI closed while the run was active, canceling");
                handle.cancel();
            }
            let result = runtime.block_on(handle.await_completion(Some(SHUTDOWN_WAIT)));
            (result, saved)
        }
    };

    if target.auto_save && saved.is_none() {
        let path =
            artifact::default_artifact_path(&target.dir, &target.name, navigator_core::types::now());
        match artifact::save(&result, &path, Some(&target.name)) {
            Ok(()) => eprintln!("Artifact saved to {}", path.display()),
            Err(e) => warn!("Failed to save artifact: {}", e),
        }
    }

    Ok(exit_code(result.status(), result.exit_status()))
}

fn replay_artifact(args: ReplayArgs, theme: Theme) -> anyhow::Result<ExitCode> {
    let result = artifact::load(&args.artifact)?;
    info!(
        "Replaying {} ({} records)",
        args.artifact.display(),
        result.len()
    );

    match args.mode {
        Mode::Stdout => {
            for record in result.snapshot() {
                print_record(&record);
            }
        }
        Mode::Interactive => {
            let mut app = App::replay(result.clone(), &args.artifact).with_theme(theme);
            let ui = app.run();
            let _ = restore_terminal();
            ui.map_err(|e| NavigatorError::TerminalInit {
                message: e.to_string(),
            })?;
        }
    }

    Ok(exit_code(result.status(), result.exit_status()))
}

/// Artifacts go to the configured directory, else the run's working directory.
fn artifact_target(settings: &Settings, config: &RunConfiguration) -> anyhow::Result<ArtifactTarget> {
    let dir = match (&settings.artifact.save_as, &settings.working_dir) {
        (Some(dir), _) => dir.clone(),
        (None, Some(dir)) => dir.clone(),
        (None, None) => std::env::current_dir().context("reading current directory")?,
    };
    Ok(ArtifactTarget {
        dir,
        name: config.display_name(),
        auto_save: settings.artifact.enable,
    })
}

/// Print records as they arrive until the run ends. Ctrl+C cancels the run.
async fn follow_stdout(mut handle: RunHandle) -> RunResult {
    let mut interrupted = false;
    loop {
        let poll = handle.poll();
        for record in &poll.records {
            print_record(record);
        }
        if poll.status.is_terminal() {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(STDOUT_POLL_INTERVAL) => {}
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                warn!("Interrupted, canceling run {}", handle.run_id());
                interrupted = true;
                handle.cancel();
            }
        }
    }
    handle.await_completion(Some(SHUTDOWN_WAIT)).await
}

fn print_record(record: &EventRecord) {
    match &record.payload {
        EventPayload::PlayStarted { name, .. } => println!("\nPLAY [{name}]"),
        EventPayload::TaskStarted { name, .. } => println!("\nTASK [{name}]"),
        EventPayload::TaskResult {
            host,
            outcome,
            detail,
            ..
        } => match detail.get("msg").and_then(|m| m.as_str()) {
            Some(msg) => println!("{outcome}: [{host}] => {msg}"),
            None => println!("{outcome}: [{host}]"),
        },
        EventPayload::RunStats { stats } => {
            println!("\nPLAY RECAP");
            for (key, value) in stats {
                println!("  {key}: {value}");
            }
        }
        EventPayload::RawText { line, .. } => println!("{line}"),
        EventPayload::DecodeError { line, reason } => {
            eprintln!("[undecodable event: {reason}] {line}")
        }
    }
}

fn exit_code(status: RunStatus, exit: Option<ExitStatus>) -> ExitCode {
    let code = status.exit_code(exit.and_then(|e| e.code()));
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
