//! Structured external commands
//!
//! Every external invocation (remote shell line or local process) is built
//! as a program plus an argument list. Local processes are spawned with an
//! argv and never go through a shell. The remote channel only accepts a
//! command string, so [`CommandSpec::to_shell_line`] quotes each argument
//! at that boundary.
//!
//! Secret arguments (tokens) are rendered as `****` by `Display`, which is
//! what every log line and error message uses.

use crate::error::{BackupError, Result};
use async_trait::async_trait;
use std::borrow::Cow;
use std::fmt;
use tracing::{debug, error, info};

/// Exit code reported when a local program cannot be spawned at all
/// (same convention as a shell's "command not found")
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

const REDACTED: &str = "****";

#[derive(Clone, PartialEq, Eq)]
enum Arg {
    Plain(String),
    Secret(String),
}

impl Arg {
    fn value(&self) -> &str {
        match self {
            Arg::Plain(v) | Arg::Secret(v) => v,
        }
    }

    fn shown(&self) -> &str {
        match self {
            Arg::Plain(v) => v,
            Arg::Secret(_) => REDACTED,
        }
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Plain(v) => write!(f, "{:?}", v),
            Arg::Secret(_) => write!(f, "Secret({})", REDACTED),
        }
    }
}

/// Program + argument list, optionally run via `sudo`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<Arg>,
    privileged: bool,
    stamp_completion: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            privileged: false,
            stamp_completion: false,
        }
    }

    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(Arg::Plain(value.into()));
        self
    }

    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args
            .extend(values.into_iter().map(|v| Arg::Plain(v.into())));
        self
    }

    /// `--name value`
    pub fn flag(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.arg(name).arg(value)
    }

    /// `--name value`, with the value hidden from logs
    pub fn secret_flag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.push(Arg::Plain(name.into()));
        self.args.push(Arg::Secret(value.into()));
        self
    }

    /// Prefix with `sudo`
    pub fn privileged(mut self, enabled: bool) -> Self {
        self.privileged = enabled;
        self
    }

    /// Append `&& date` so the output records when the command finished.
    /// Only meaningful for the remote shell line.
    pub fn stamp_completion(mut self) -> Self {
        self.stamp_completion = true;
        self
    }

    /// Argument values, secrets included
    pub fn argv(&self) -> Vec<&str> {
        self.args.iter().map(Arg::value).collect()
    }

    /// Program and argv to spawn locally (`sudo` becomes the program when privileged)
    pub fn invocation(&self) -> (&str, Vec<&str>) {
        if self.privileged {
            let mut argv = vec![self.program.as_str()];
            argv.extend(self.argv());
            ("sudo", argv)
        } else {
            (self.program.as_str(), self.argv())
        }
    }

    /// Shell line for the remote exec channel (secrets included)
    pub fn to_shell_line(&self) -> String {
        self.render(Arg::value)
    }

    fn render(&self, pick: fn(&Arg) -> &str) -> String {
        let mut words: Vec<Cow<'_, str>> = Vec::with_capacity(self.args.len() + 2);
        if self.privileged {
            words.push(Cow::Borrowed("sudo"));
        }
        words.push(shell_quote(&self.program));
        words.extend(self.args.iter().map(|a| shell_quote(pick(a))));

        let mut line = words.join(" ");
        if self.stamp_completion {
            line.push_str(" && date");
        }
        line
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(Arg::shown))
    }
}

/// Quote a word for a POSIX shell; safe words pass through unchanged
pub fn shell_quote(word: &str) -> Cow<'_, str> {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@%+,".contains(c));

    if safe {
        Cow::Borrowed(word)
    } else {
        Cow::Owned(format!("'{}'", word.replace('\'', r"'\''")))
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs local processes (`influx write`, `influx query`)
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run to completion; a non-zero exit is reported in the output, not as an error
    async fn run(&self, command: &CommandSpec) -> Result<ProcessOutput>;
}

/// Spawns real processes with tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessRunner;

#[async_trait]
impl ProcessRunner for SystemProcessRunner {
    async fn run(&self, command: &CommandSpec) -> Result<ProcessOutput> {
        let (program, argv) = command.invocation();
        debug!(command = %command, "Spawning local process");

        let output = tokio::process::Command::new(program)
            .args(&argv)
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) => Ok(ProcessOutput {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                // Killed by signal
                exit_code: output.status.code().unwrap_or(-1),
            }),
            Err(e) => Ok(ProcessOutput {
                stdout: String::new(),
                stderr: format!("failed to spawn {}: {}", program, e),
                exit_code: SPAWN_FAILURE_EXIT_CODE,
            }),
        }
    }
}

/// Run a local command and return its stdout, failing on a non-zero exit
pub async fn run_checked<R>(runner: &R, command: &CommandSpec) -> Result<String>
where
    R: ProcessRunner + ?Sized,
{
    info!(command = %command, "Executing local command");
    let output = runner.run(command).await?;

    if !output.success() {
        error!(
            command = %command,
            exit_code = output.exit_code,
            stderr = %output.stderr.trim(),
            "Local command failed"
        );
        return Err(BackupError::Command {
            command: command.to_string(),
            exit_code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        });
    }

    Ok(output.stdout)
}
