//! Run configuration types.
//!
//! A [`RunConfiguration`] is fully resolved before it reaches the launcher.
//! It is built either from a settings file (see [`crate::settings`]) or
//! directly with the builder methods, and is not modified once a run starts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use navigator_core::{EngineKind, NavigatorError, PullPolicy};
use serde::{Deserialize, Serialize};

use crate::error::{LaunchError, LaunchResult};

/// Default time between the interrupt and the forced kill.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Read/write access of a volume mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MountAccess {
    #[default]
    ReadWrite,
    ReadOnly,
}

/// SELinux relabeling requested for a volume mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountLabel {
    /// `z`: content shared between containers
    Shared,
    /// `Z`: content private to this container
    Private,
}

/// A host path made visible inside the execution environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub host_path: PathBuf,
    pub container_path: PathBuf,
    #[serde(default)]
    pub access: MountAccess,
    #[serde(default)]
    pub label: Option<MountLabel>,
}

impl VolumeMount {
    /// Create a read-write mount without relabeling.
    pub fn new(host_path: impl Into<PathBuf>, container_path: impl Into<PathBuf>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            access: MountAccess::ReadWrite,
            label: None,
        }
    }

    /// Make the mount read-only.
    pub fn read_only(mut self) -> Self {
        self.access = MountAccess::ReadOnly;
        self
    }

    /// Request SELinux relabeling.
    pub fn with_label(mut self, label: MountLabel) -> Self {
        self.label = Some(label);
        self
    }

    /// Apply a comma separated option list such as `ro,Z`.
    pub fn with_options(mut self, options: &str) -> Result<Self, NavigatorError> {
        for option in options.split(',').map(str::trim).filter(|o| !o.is_empty()) {
            match option {
                "ro" => self.access = MountAccess::ReadOnly,
                "rw" => self.access = MountAccess::ReadWrite,
                "z" => self.label = Some(MountLabel::Shared),
                "Z" => self.label = Some(MountLabel::Private),
                other => {
                    return Err(NavigatorError::settings_value(
                        "volume_mounts",
                        format!("unsupported mount option '{other}', expected ro, rw, z or Z"),
                    ));
                }
            }
        }
        Ok(self)
    }

    /// Render as the value of an engine `-v` argument.
    pub fn to_arg(&self) -> String {
        let mut options = Vec::new();
        if self.access == MountAccess::ReadOnly {
            options.push("ro");
        }
        match self.label {
            Some(MountLabel::Shared) => options.push("z"),
            Some(MountLabel::Private) => options.push("Z"),
            None => {}
        }

        let mut arg = format!(
            "{}:{}",
            self.host_path.display(),
            self.container_path.display()
        );
        if !options.is_empty() {
            arg.push(':');
            arg.push_str(&options.join(","));
        }
        arg
    }
}

impl FromStr for VolumeMount {
    type Err = NavigatorError;

    /// Parse `src:dest[:options]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let (src, dest, options) = match parts.as_slice() {
            [src, dest] => (*src, *dest, None),
            [src, dest, options] => (*src, *dest, Some(*options)),
            _ => {
                return Err(NavigatorError::settings_value(
                    "volume_mounts",
                    format!("'{s}' is not in the form 'src:dest[:label]'"),
                ));
            }
        };

        if src.is_empty() || dest.is_empty() {
            return Err(NavigatorError::settings_value(
                "volume_mounts",
                format!("'{s}' has an empty source or destination"),
            ));
        }

        let mount = VolumeMount::new(src, dest);
        match options {
            Some(options) => mount.with_options(options),
            None => Ok(mount),
        }
    }
}

/// Everything needed to launch one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfiguration {
    /// Program to execute
    pub command: String,
    /// Arguments passed to the program
    #[serde(default)]
    pub args: Vec<String>,
    /// Execute `command args` through `/bin/bash -c`
    #[serde(default)]
    pub shell_wrap: bool,
    #[serde(default)]
    pub engine: EngineKind,
    /// Execution environment image, required when `engine` is a container engine
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMount>,
    /// Variables set in the child environment
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Host variables passed through into the container by name
    #[serde(default)]
    pub pass_environment: Vec<String>,
    /// Extra engine arguments placed before the image
    #[serde(default)]
    pub container_options: Vec<String>,
    #[serde(default)]
    pub pull_policy: PullPolicy,
    #[serde(default)]
    pub pull_arguments: Vec<String>,
    #[serde(default)]
    pub timeout: Option<Duration>,
    #[serde(default = "default_grace_period")]
    pub grace_period: Duration,
    /// Display name used for artifacts; derived from the arguments if unset
    #[serde(default)]
    pub name: Option<String>,
}

fn default_grace_period() -> Duration {
    DEFAULT_GRACE_PERIOD
}

impl RunConfiguration {
    /// Create a configuration that runs `command` directly on the host.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            shell_wrap: false,
            engine: EngineKind::None,
            image: None,
            working_dir: None,
            volume_mounts: Vec::new(),
            environment: BTreeMap::new(),
            pass_environment: Vec::new(),
            container_options: Vec::new(),
            pull_policy: PullPolicy::default(),
            pull_arguments: Vec::new(),
            timeout: None,
            grace_period: DEFAULT_GRACE_PERIOD,
            name: None,
        }
    }

    /// Set the arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Run inside a container started by `engine` from `image`.
    pub fn with_container(mut self, engine: EngineKind, image: impl Into<String>) -> Self {
        self.engine = engine;
        self.image = Some(image.into());
        self
    }

    /// Set the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add a volume mount.
    pub fn with_mount(mut self, mount: VolumeMount) -> Self {
        self.volume_mounts.push(mount);
        self
    }

    /// Set an environment variable. A repeated key replaces the earlier value.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Pass a host environment variable into the container.
    pub fn with_pass_env(mut self, name: impl Into<String>) -> Self {
        self.pass_environment.push(name.into());
        self
    }

    /// Add a raw container engine option.
    pub fn with_container_option(mut self, option: impl Into<String>) -> Self {
        self.container_options.push(option.into());
        self
    }

    /// Set the image pull policy and extra pull arguments.
    pub fn with_pull_policy(mut self, policy: PullPolicy, arguments: Vec<String>) -> Self {
        self.pull_policy = policy;
        self.pull_arguments = arguments;
        self
    }

    /// Set the run timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the grace period between interrupt and kill.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Execute through `/bin/bash -c`.
    pub fn with_shell_wrap(mut self, shell_wrap: bool) -> Self {
        self.shell_wrap = shell_wrap;
        self
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Name used for artifacts and logs.
    ///
    /// Falls back to the stem of the first playbook-like argument, then to the
    /// command's file name.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }

        let playbook = self
            .args
            .iter()
            .map(Path::new)
            .find(|arg| {
                arg.extension()
                    .is_some_and(|ext| ext == "yml" || ext == "yaml")
            });

        playbook
            .or_else(|| Some(Path::new(&self.command)))
            .and_then(|path| path.file_stem())
            .map(|stem| stem.to_string_lossy().into_owned())
            .filter(|stem| !stem.is_empty())
            .unwrap_or_else(|| "run".to_string())
    }

    /// Check the configuration describes a launchable invocation.
    pub fn validate(&self) -> LaunchResult<()> {
        if self.command.trim().is_empty() {
            return Err(LaunchError::invalid("command is empty"));
        }

        if self.engine.is_container() && self.image.as_deref().is_none_or(str::is_empty) {
            return Err(LaunchError::invalid(format!(
                "engine '{}' requires an image",
                self.engine
            )));
        }

        if let Some(key) = self
            .environment
            .keys()
            .find(|key| key.is_empty() || key.contains('='))
        {
            return Err(LaunchError::invalid(format!(
                "invalid environment variable name '{key}'"
            )));
        }

        Ok(())
    }
}

/// Parse a `NAME=VALUE` environment assignment.
pub fn parse_env_assignment(entry: &str) -> Result<(String, String), NavigatorError> {
    match entry.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(NavigatorError::settings_value(
            "environment_variables",
            format!("'{entry}' is not in the form 'NAME=VALUE'"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_parse_two_parts() {
        let mount: VolumeMount = "/srv/data:/data".parse().unwrap();
        assert_eq!(mount.host_path, PathBuf::from("/srv/data"));
        assert_eq!(mount.container_path, PathBuf::from("/data"));
        assert_eq!(mount.access, MountAccess::ReadWrite);
        assert_eq!(mount.label, None);
        assert_eq!(mount.to_arg(), "/srv/data:/data");
    }

    #[test]
    fn test_mount_parse_with_options() {
        let mount: VolumeMount = "/srv/data:/data:ro,Z".parse().unwrap();
        assert_eq!(mount.access, MountAccess::ReadOnly);
        assert_eq!(mount.label, Some(MountLabel::Private));
        assert_eq!(mount.to_arg(), "/srv/data:/data:ro,Z");
    }

    #[test]
    fn test_mount_parse_rejects_extra_parts() {
        let err = "/a:/b:z:extra".parse::<VolumeMount>().unwrap_err();
        assert!(err.is_config_error());
        assert!("/a".parse::<VolumeMount>().is_err());
        assert!(":/b".parse::<VolumeMount>().is_err());
        assert!("/a:/b:q".parse::<VolumeMount>().is_err());
    }

    #[test]
    fn test_env_assignment() {
        assert_eq!(
            parse_env_assignment("A=b=c").unwrap(),
            ("A".to_string(), "b=c".to_string())
        );
        assert_eq!(
            parse_env_assignment("EMPTY=").unwrap(),
            ("EMPTY".to_string(), String::new())
        );
        assert!(parse_env_assignment("NOVALUE").is_err());
        assert!(parse_env_assignment("=x").is_err());
    }

    #[test]
    fn test_environment_keys_are_unique() {
        let config = RunConfiguration::new("env")
            .with_env("A", "1")
            .with_env("A", "2");
        assert_eq!(config.environment.len(), 1);
        assert_eq!(config.environment["A"], "2");
    }

    #[test]
    fn test_validate() {
        assert!(RunConfiguration::new("true").validate().is_ok());
        assert!(RunConfiguration::new("  ").validate().is_err());

        let mut config = RunConfiguration::new("ansible-playbook");
        config.engine = EngineKind::Podman;
        assert!(matches!(
            config.validate(),
            Err(LaunchError::InvalidConfiguration { .. })
        ));

        let config = config.with_container(EngineKind::Podman, "quay.io/ansible/ee:latest");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_display_name() {
        let config = RunConfiguration::new("ansible-playbook").with_args(["-i", "hosts", "site.yml"]);
        assert_eq!(config.display_name(), "site");

        let config = RunConfiguration::new("/usr/bin/ansible-lint");
        assert_eq!(config.display_name(), "ansible-lint");

        let config = RunConfiguration::new("true").with_name("nightly");
        assert_eq!(config.display_name(), "nightly");
    }
}
