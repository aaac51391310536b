//! Command line generation.
//!
//! Turns a [`RunConfiguration`] into the exact argument vector that is
//! executed: the command itself for direct runs, or an engine `run`
//! invocation wrapping it for containerized runs.

use std::process::Stdio;

use tokio::process::Command;
use uuid::Uuid;

use crate::config::RunConfiguration;
use crate::error::{LaunchError, LaunchResult};

/// Shell used when a command is wrapped.
pub const WRAP_SHELL: &str = "/bin/bash";

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Full argument vector including the program.
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }

    /// Shell-quoted rendering for logs and error messages.
    pub fn display(&self) -> String {
        shlex::try_join(self.argv()).unwrap_or_else(|_| self.argv().join(" "))
    }

    /// A tokio command with piped output and a null stdin.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

/// Split a command string into program and arguments using shell rules.
pub fn split_command(line: &str) -> LaunchResult<CommandLine> {
    let mut words = shlex::split(line)
        .ok_or_else(|| LaunchError::invalid(format!("unbalanced quotes in '{line}'")))?
        .into_iter();
    let program = words
        .next()
        .ok_or_else(|| LaunchError::invalid("command is empty"))?;
    Ok(CommandLine::new(program, words.collect()))
}

/// Wrap `command args` as `/bin/bash -c "<command args>"`.
pub fn shell_wrap(command: &str, args: &[String]) -> LaunchResult<CommandLine> {
    let words = std::iter::once(command).chain(args.iter().map(String::as_str));
    let script = shlex::try_join(words)
        .map_err(|e| LaunchError::invalid(format!("cannot quote command: {e}")))?;
    Ok(CommandLine::new(WRAP_SHELL, vec!["-c".to_string(), script]))
}

/// Unique container name for one run.
pub fn container_name() -> String {
    format!("navigator_{}", Uuid::new_v4())
}

/// Build the command line for a configuration.
///
/// `container_name` is required for containerized runs so the container can
/// be removed if the engine client is killed.
pub fn build(config: &RunConfiguration, container_name: Option<&str>) -> LaunchResult<CommandLine> {
    config.validate()?;

    let inner = if config.shell_wrap {
        shell_wrap(&config.command, &config.args)?
    } else {
        CommandLine::new(config.command.clone(), config.args.clone())
    };

    let Some(engine) = config.engine.binary() else {
        return Ok(inner);
    };

    let image = config
        .image
        .as_deref()
        .ok_or_else(|| LaunchError::invalid("container run without an image"))?;
    let name =
        container_name.ok_or_else(|| LaunchError::invalid("container run without a name"))?;

    let mut args: Vec<String> = vec!["run".into(), "--rm".into(), "--name".into(), name.into()];

    for mount in &config.volume_mounts {
        args.push("-v".into());
        args.push(mount.to_arg());
    }

    for (key, value) in &config.environment {
        args.push("-e".into());
        args.push(format!("{key}={value}"));
    }

    for key in &config.pass_environment {
        args.push("-e".into());
        args.push(key.clone());
    }

    if let Some(dir) = &config.working_dir {
        args.push("--workdir".into());
        args.push(dir.display().to_string());
    }

    args.extend(config.container_options.iter().cloned());
    args.push(image.to_string());
    args.push(inner.program);
    args.extend(inner.args);

    Ok(CommandLine::new(engine, args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VolumeMount;
    use navigator_core::EngineKind;

    #[test]
    fn test_direct_command_is_unmodified() {
        let config = RunConfiguration::new("ansible-playbook")
            .with_args(["-i", "inventory", "site.yml"])
            .with_env("ANSIBLE_NOCOLOR", "1");
        let line = build(&config, None).unwrap();
        assert_eq!(line.argv(), vec!["ansible-playbook", "-i", "inventory", "site.yml"]);
    }

    #[test]
    fn test_container_command_layout() {
        let config = RunConfiguration::new("ansible-playbook")
            .with_args(["site.yml"])
            .with_container(EngineKind::Podman, "quay.io/ansible/ee:v1")
            .with_working_dir("/work")
            .with_mount(VolumeMount::new("/work", "/work"))
            .with_env("ANSIBLE_FORCE_COLOR", "0")
            .with_pass_env("SSH_AUTH_SOCK")
            .with_container_option("--net=host");

        let line = build(&config, Some("navigator_test")).unwrap();
        assert_eq!(line.program, "podman");
        assert_eq!(
            line.args,
            vec![
                "run",
                "--rm",
                "--name",
                "navigator_test",
                "-v",
                "/work:/work",
                "-e",
                "ANSIBLE_FORCE_COLOR=0",
                "-e",
                "SSH_AUTH_SOCK",
                "--workdir",
                "/work",
                "--net=host",
                "quay.io/ansible/ee:v1",
                "ansible-playbook",
                "site.yml",
            ]
        );
    }

    #[test]
    fn test_container_requires_name() {
        let config = RunConfiguration::new("ls").with_container(EngineKind::Docker, "ee:latest");
        assert!(build(&config, None).is_err());
    }

    #[test]
    fn test_shell_wrap_quotes_arguments() {
        let line = shell_wrap("echo", &["hello world".to_string()]).unwrap();
        assert_eq!(line.program, WRAP_SHELL);
        assert_eq!(line.args[0], "-c");
        assert_eq!(
            shlex::split(&line.args[1]).unwrap(),
            vec!["echo", "hello world"]
        );
    }

    #[test]
    fn test_split_command() {
        let line = split_command("ansible-doc -t module 'ansible.builtin.copy'").unwrap();
        assert_eq!(line.program, "ansible-doc");
        assert_eq!(line.args, vec!["-t", "module", "ansible.builtin.copy"]);
        assert!(split_command("echo 'open").is_err());
        assert!(split_command("   ").is_err());
    }

    #[test]
    fn test_container_names_are_unique() {
        let a = container_name();
        let b = container_name();
        assert!(a.starts_with("navigator_"));
        assert_ne!(a, b);
    }
}
