//! Subprocess execution
//!
//! Task handlers never spawn processes directly; they go through a
//! [`ProcessRunner`] so tests can substitute a scripted runner.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use flotilla_core::error::{PluginError, Result};

/// A command line to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Full command line, interpreted by the shell
    pub command: String,
    /// Working directory
    pub cwd: PathBuf,
    /// Extra environment variables
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            cwd: cwd.into(),
            env: BTreeMap::new(),
        }
    }

    /// Add environment variables
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    /// First word of the command line, used to name the tool in errors
    pub fn program(&self) -> &str {
        self.command.split_whitespace().next().unwrap_or("")
    }
}

/// Exit status and captured output of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs external commands
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run a command to completion, capturing its output.
    ///
    /// A non-zero exit is not an error here; only failing to start is.
    async fn run(&self, spec: &CommandSpec) -> Result<ProcessOutput>;
}

/// Runs commands through the platform shell
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellRunner;

impl ShellRunner {
    fn command(line: &str) -> Command {
        if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(line);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(line);
            cmd
        }
    }
}

async fn collect_lines<R>(reader: Option<R>, program: &str, stream: &'static str) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return String::new();
    };
    // Drain to EOF even past undecodable bytes; closing the pipe early
    // would kill the child with SIGPIPE.
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut collected = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let end = buf
                    .iter()
                    .rposition(|b| *b != b'\n' && *b != b'\r')
                    .map_or(0, |i| i + 1);
                let line = String::from_utf8_lossy(&buf[..end]).into_owned();
                debug!(program, stream, "{}", line);
                collected.push(line);
            }
            Err(e) => {
                warn!(program, stream, error = %e, "failed to read output");
                break;
            }
        }
    }
    collected.join("\n")
}

#[async_trait]
impl ProcessRunner for ShellRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<ProcessOutput> {
        info!(command = %spec.command, cwd = %spec.cwd.display(), "running command");
        let mut child = Self::command(&spec.command)
            .current_dir(&spec.cwd)
            .envs(&spec.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PluginError::Spawn {
                command: spec.command.clone(),
                message: e.to_string(),
            })?;

        let program = spec.program();
        let (stdout, stderr) = tokio::join!(
            collect_lines(child.stdout.take(), program, "stdout"),
            collect_lines(child.stderr.take(), program, "stderr"),
        );

        let status = child.wait().await.map_err(|e| PluginError::Spawn {
            command: spec.command.clone(),
            message: e.to_string(),
        })?;

        debug!(command = %spec.command, code = ?status.code(), "command finished");
        Ok(ProcessOutput {
            exit_code: status.code(),
            stdout,
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_name() {
        let spec = CommandSpec::new("  tsc -p tsconfig.json", ".");
        assert_eq!(spec.program(), "tsc");
        assert_eq!(CommandSpec::new("", ".").program(), "");
    }

    #[test]
    fn test_output_success() {
        let ok = ProcessOutput {
            exit_code: Some(0),
            ..Default::default()
        };
        assert!(ok.success());
        assert!(!ProcessOutput::default().success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_runner_captures_output() {
        let temp = tempfile::TempDir::new().unwrap();
        let spec = CommandSpec::new("echo out; echo err >&2; echo $FLOTILLA_TEST", temp.path())
            .with_env(BTreeMap::from([(
                "FLOTILLA_TEST".to_string(),
                "from-env".to_string(),
            )]));

        let output = ShellRunner.run(&spec).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "out\nfrom-env");
        assert_eq!(output.stderr, "err");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_runner_reports_exit_code() {
        let temp = tempfile::TempDir::new().unwrap();
        let output = ShellRunner
            .run(&CommandSpec::new("exit 3", temp.path()))
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_runner_keeps_reading_past_invalid_utf8() {
        let temp = tempfile::TempDir::new().unwrap();
        let spec = CommandSpec::new(
            "printf '\\377\\n'; head -c 300000 /dev/zero | tr '\\0' a; echo done",
            temp.path(),
        );

        let output = ShellRunner.run(&spec).await.unwrap();
        assert!(output.success());
        assert!(output.stdout.starts_with('\u{FFFD}'));
        assert!(output.stdout.ends_with("done"));
        assert_eq!(output.stdout.len(), 3 + 1 + 300_000 + 4);
    }

    #[tokio::test]
    async fn test_shell_runner_missing_cwd_is_spawn_error() {
        let spec = CommandSpec::new("echo hi", "/definitely/not/a/dir");
        let err = ShellRunner.run(&spec).await.unwrap_err();
        assert!(matches!(
            err,
            flotilla_core::FlotillaError::Plugin(PluginError::Spawn { .. })
        ));
    }
}
