//! Settings file support.
//!
//! Settings are read from YAML and supply defaults for everything a run
//! needs. Command line flags are applied on top as [`SettingsOverrides`], and
//! [`Settings::resolve`] produces the final [`RunConfiguration`].
//!
//! ```yaml
//! execution_environment:
//!   enabled: true
//!   container_engine: auto
//!   image: quay.io/ansible/creator-ee:v24.2.0
//!   pull:
//!     policy: missing
//!     arguments: ["--tls-verify=false"]
//!   volume_mounts:
//!     - "/home/user/.ssh:/root/.ssh:ro,Z"
//!     - src: /srv/collections
//!       dest: /usr/share/ansible/collections
//!       options: ro
//!   container_options: ["--net=host"]
//!   environment_variables:
//!     set:
//!       ANSIBLE_NOCOLOR: "1"
//!     pass: [SSH_AUTH_SOCK]
//! timeout: 30m
//! mode: interactive
//! artifact:
//!   enable: true
//!   save_as: /tmp/artifacts
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use navigator_core::logging::navigator_home;
use navigator_core::{EngineKind, NavigatorError, PullPolicy, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{RunConfiguration, VolumeMount, parse_env_assignment};
use crate::puller::normalize_image;

/// Settings file name looked up in the current directory and `~/.navigator`.
pub const SETTINGS_FILE_NAME: &str = "navigator.yml";

/// Image used when the execution environment is enabled without one.
pub const DEFAULT_IMAGE: &str = "ghcr.io/ansible/community-ansible-dev-tools:latest";

/// How results are presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Full screen navigation
    #[default]
    Interactive,
    /// Print records as they arrive and exit with the run's status
    Stdout,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interactive => write!(f, "interactive"),
            Self::Stdout => write!(f, "stdout"),
        }
    }
}

impl FromStr for Mode {
    type Err = NavigatorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "interactive" | "i" => Ok(Self::Interactive),
            "stdout" | "s" => Ok(Self::Stdout),
            other => Err(NavigatorError::settings_value(
                "mode",
                format!("unknown mode '{other}', expected interactive or stdout"),
            )),
        }
    }
}

/// A volume mount as written in the settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MountSetting {
    /// `src:dest[:options]`
    Short(String),
    /// Explicit fields
    Long {
        src: PathBuf,
        dest: PathBuf,
        #[serde(default)]
        options: Option<String>,
    },
}

impl MountSetting {
    fn to_mount(&self) -> Result<VolumeMount> {
        match self {
            Self::Short(spec) => spec.parse(),
            Self::Long { src, dest, options } => {
                let mount = VolumeMount::new(src, dest);
                match options {
                    Some(options) => mount.with_options(options),
                    None => Ok(mount),
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PullSettings {
    pub policy: PullPolicy,
    pub arguments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EnvironmentSettings {
    /// Variables set inside the run
    pub set: BTreeMap<String, String>,
    /// Host variables passed through by name
    pub pass: Vec<String>,
}

/// The `execution_environment` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionEnvironmentSettings {
    pub enabled: bool,
    /// `auto`, `podman`, `docker` or `none`
    pub container_engine: String,
    pub image: Option<String>,
    pub pull: PullSettings,
    pub volume_mounts: Vec<MountSetting>,
    pub container_options: Vec<String>,
    pub environment_variables: EnvironmentSettings,
}

impl Default for ExecutionEnvironmentSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            container_engine: "auto".into(),
            image: None,
            pull: PullSettings::default(),
            volume_mounts: Vec::new(),
            container_options: Vec::new(),
            environment_variables: EnvironmentSettings::default(),
        }
    }
}

/// The `artifact` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactSettings {
    /// Save an artifact automatically when a run ends
    pub enable: bool,
    /// Directory for saved artifacts; the working directory when unset
    pub save_as: Option<PathBuf>,
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self {
            enable: true,
            save_as: None,
        }
    }
}

/// Top level settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub execution_environment: ExecutionEnvironmentSettings,
    /// Run timeout such as `90s` or `30m`
    pub timeout: Option<String>,
    pub mode: Mode,
    pub working_dir: Option<PathBuf>,
    pub artifact: ArtifactSettings,
}

/// Values given on the command line. `None` leaves the settings value alone.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub execution_environment: Option<bool>,
    pub container_engine: Option<String>,
    pub image: Option<String>,
    pub pull_policy: Option<PullPolicy>,
    pub pull_arguments: Vec<String>,
    pub volume_mounts: Vec<String>,
    pub set_environment: Vec<String>,
    pub pass_environment: Vec<String>,
    pub container_options: Vec<String>,
    pub timeout: Option<Duration>,
    pub mode: Option<Mode>,
    pub working_dir: Option<PathBuf>,
    pub artifact_enable: Option<bool>,
    pub artifact_dir: Option<PathBuf>,
}

impl Settings {
    /// Load settings from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => NavigatorError::SettingsNotFound {
                path: path.to_path_buf(),
            },
            _ => NavigatorError::io("reading settings", path, e),
        })?;

        let settings: Settings =
            serde_yaml::from_str(&content).map_err(|e| NavigatorError::SettingsInvalid {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Find and load the settings file.
    ///
    /// An explicit path must exist. Otherwise `./navigator.yml` and then
    /// `~/.navigator/navigator.yml` are tried, and defaults are used when
    /// neither exists. Returns the settings and the file they came from.
    pub fn discover(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }

        let mut candidates = vec![PathBuf::from(SETTINGS_FILE_NAME)];
        if let Ok(home) = navigator_home() {
            candidates.push(home.join(SETTINGS_FILE_NAME));
        }

        for candidate in candidates {
            if candidate.is_file() {
                info!("Using settings file {}", candidate.display());
                return Ok((Self::load(&candidate)?, Some(candidate)));
            }
        }

        debug!("No settings file found, using defaults");
        Ok((Self::default(), None))
    }

    /// Apply command line values on top of the file values.
    pub fn apply(&mut self, overrides: SettingsOverrides) -> Result<()> {
        let ee = &mut self.execution_environment;

        if let Some(enabled) = overrides.execution_environment {
            ee.enabled = enabled;
        }
        if let Some(engine) = overrides.container_engine {
            ee.container_engine = engine;
        }
        if let Some(image) = overrides.image {
            ee.image = Some(image);
        }
        if let Some(policy) = overrides.pull_policy {
            ee.pull.policy = policy;
        }
        if !overrides.pull_arguments.is_empty() {
            ee.pull.arguments = overrides.pull_arguments;
        }
        ee.volume_mounts
            .extend(overrides.volume_mounts.into_iter().map(MountSetting::Short));
        for entry in &overrides.set_environment {
            let (name, value) = parse_env_assignment(entry)?;
            ee.environment_variables.set.insert(name, value);
        }
        ee.environment_variables
            .pass
            .extend(overrides.pass_environment);
        ee.container_options.extend(overrides.container_options);

        if let Some(timeout) = overrides.timeout {
            self.timeout = Some(humantime::format_duration(timeout).to_string());
        }
        if let Some(mode) = overrides.mode {
            self.mode = mode;
        }
        if let Some(dir) = overrides.working_dir {
            self.working_dir = Some(dir);
        }
        if let Some(enable) = overrides.artifact_enable {
            self.artifact.enable = enable;
        }
        if let Some(dir) = overrides.artifact_dir {
            self.artifact.save_as = Some(dir);
        }

        Ok(())
    }

    /// Run timeout, if one is configured.
    pub fn timeout(&self) -> Result<Option<Duration>> {
        self.timeout.as_deref().map(parse_timeout).transpose()
    }

    /// Produce the run configuration for `command args`.
    pub fn resolve(&self, command: &str, args: &[String]) -> Result<RunConfiguration> {
        self.resolve_with(command, args, |binary| which::which(binary).is_ok())
    }

    /// Like [`Settings::resolve`], with an explicit probe for engine binaries.
    pub fn resolve_with(
        &self,
        command: &str,
        args: &[String],
        engine_available: impl Fn(&str) -> bool,
    ) -> Result<RunConfiguration> {
        if command.trim().is_empty() {
            return Err(NavigatorError::MissingCommand);
        }

        let ee = &self.execution_environment;
        let engine = resolve_engine(ee.enabled, &ee.container_engine, engine_available)?;

        let working_dir = match &self.working_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()
                .map_err(|e| NavigatorError::io("reading current directory", ".", e))?,
        };

        let mut config = RunConfiguration::new(command)
            .with_args(args.iter().cloned())
            .with_working_dir(working_dir.clone());
        config.environment = ee.environment_variables.set.clone();
        if let Some(timeout) = self.timeout()? {
            config.timeout = Some(timeout);
        }

        if engine.is_container() {
            let image = ee.image.as_deref().unwrap_or(DEFAULT_IMAGE);
            config = config
                .with_container(engine, normalize_image(image))
                .with_pull_policy(ee.pull.policy, ee.pull.arguments.clone());

            for mount in &ee.volume_mounts {
                config.volume_mounts.push(mount.to_mount()?);
            }
            if !config
                .volume_mounts
                .iter()
                .any(|m| m.container_path == working_dir)
            {
                config
                    .volume_mounts
                    .push(VolumeMount::new(&working_dir, &working_dir));
            }

            config.pass_environment = ee.environment_variables.pass.clone();
            config.container_options = ee.container_options.clone();
        }

        debug!(
            engine = %config.engine,
            image = config.image.as_deref().unwrap_or("-"),
            mounts = config.volume_mounts.len(),
            "Resolved run configuration"
        );
        Ok(config)
    }
}

/// Pick the engine for a run.
///
/// `auto` prefers podman over docker.
pub fn resolve_engine(
    enabled: bool,
    setting: &str,
    engine_available: impl Fn(&str) -> bool,
) -> Result<EngineKind> {
    if !enabled {
        return Ok(EngineKind::None);
    }

    if setting.eq_ignore_ascii_case("auto") {
        return [EngineKind::Podman, EngineKind::Docker]
            .into_iter()
            .find(|engine| engine.binary().is_some_and(&engine_available))
            .ok_or_else(|| {
                NavigatorError::settings_value(
                    "container_engine",
                    "no container engine found; install podman or docker, or disable the execution environment",
                )
            });
    }

    setting.parse()
}

/// Parse a timeout such as `30`, `90s` or `1h 30m`. A bare number is seconds.
pub fn parse_timeout(value: &str) -> Result<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(value)
        .map_err(|e| NavigatorError::settings_value("timeout", format!("'{value}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MountAccess;
    use std::io::Write;

    fn no_engines(_: &str) -> bool {
        false
    }

    #[test]
    fn test_parse_yaml_settings() {
        let yaml = r#"
execution_environment:
  container_engine: podman
  image: quay.io/ansible/ee
  pull:
    policy: tag
  volume_mounts:
    - "/a:/b:ro"
    - src: /c
      dest: /d
      options: Z
  environment_variables:
    set:
      ANSIBLE_NOCOLOR: "1"
    pass: [SSH_AUTH_SOCK]
timeout: 90s
mode: stdout
"#;
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.mode, Mode::Stdout);
        assert_eq!(settings.execution_environment.pull.policy, PullPolicy::Tag);
        assert_eq!(settings.execution_environment.volume_mounts.len(), 2);
        assert_eq!(settings.timeout().unwrap(), Some(Duration::from_secs(90)));
        assert!(settings.artifact.enable);
    }

    #[test]
    fn test_resolve_container_run() {
        let yaml = r#"
execution_environment:
  container_engine: podman
  image: quay.io/ansible/ee
  volume_mounts: ["/a:/b:ro"]
  environment_variables:
    set: {A: "1"}
    pass: [HOME]
working_dir: /work
"#;
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        let config = settings
            .resolve_with("ansible-playbook", &["site.yml".into()], no_engines)
            .unwrap();

        assert_eq!(config.engine, EngineKind::Podman);
        assert_eq!(config.image.as_deref(), Some("quay.io/ansible/ee:latest"));
        assert_eq!(config.volume_mounts[0].access, MountAccess::ReadOnly);
        assert_eq!(config.volume_mounts[1], VolumeMount::new("/work", "/work"));
        assert_eq!(config.environment["A"], "1");
        assert_eq!(config.pass_environment, vec!["HOME"]);
        assert_eq!(config.working_dir, Some(PathBuf::from("/work")));
    }

    #[test]
    fn test_resolve_auto_engine() {
        assert_eq!(
            resolve_engine(true, "auto", |b| b == "docker").unwrap(),
            EngineKind::Docker
        );
        assert_eq!(
            resolve_engine(true, "auto", |_| true).unwrap(),
            EngineKind::Podman
        );
        assert!(resolve_engine(true, "auto", no_engines).is_err());
        assert_eq!(
            resolve_engine(false, "podman", no_engines).unwrap(),
            EngineKind::None
        );
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut settings = Settings::default();
        settings
            .apply(SettingsOverrides {
                execution_environment: Some(false),
                set_environment: vec!["FOO=bar".into()],
                timeout: Some(Duration::from_secs(5)),
                mode: Some(Mode::Stdout),
                ..Default::default()
            })
            .unwrap();

        let config = settings
            .resolve_with("echo", &["hi".into()], no_engines)
            .unwrap();
        assert_eq!(config.engine, EngineKind::None);
        assert_eq!(config.environment["FOO"], "bar");
        assert_eq!(config.timeout, Some(Duration::from_secs(5)));
        assert!(config.volume_mounts.is_empty());
        assert_eq!(settings.mode, Mode::Stdout);
    }

    #[test]
    fn test_bad_override_rejected() {
        let mut settings = Settings::default();
        let err = settings
            .apply(SettingsOverrides {
                set_environment: vec!["NOEQUALS".into()],
                ..Default::default()
            })
            .unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_missing_command() {
        let settings = Settings::default();
        assert!(matches!(
            settings.resolve_with("", &[], no_engines),
            Err(NavigatorError::MissingCommand)
        ));
    }

    #[test]
    fn test_load_errors() {
        let err = Settings::load(Path::new("/nonexistent/navigator.yml")).unwrap_err();
        assert!(matches!(err, NavigatorError::SettingsNotFound { .. }));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "execution_environment: [not, a, map]").unwrap();
        let err = Settings::load(file.path()).unwrap_err();
        assert!(matches!(err, NavigatorError::SettingsInvalid { .. }));
    }

    #[test]
    fn test_discover_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "mode: stdout").unwrap();
        let (settings, source) = Settings::discover(Some(file.path())).unwrap();
        assert_eq!(settings.mode, Mode::Stdout);
        assert_eq!(source.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout("30").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_timeout("2m").unwrap(), Duration::from_secs(120));
        assert!(parse_timeout("soon").is_err());
    }
}
