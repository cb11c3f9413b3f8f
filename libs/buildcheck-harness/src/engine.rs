//! Process Engine - runs one external command and captures what it did.
//!
//! The engine knows HOW to execute (spawn, feed stdin, enforce the timeout,
//! collect output). It does NOT know what the output should be; judging it
//! is the evaluator's job.

use crate::evaluator::normalize_line_endings;
use async_trait::async_trait;
use buildcheck_common::types::ExecutionOutput;
use buildcheck_common::HarnessError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Inputs larger than this are refused before anything is spawned
pub const MAX_STDIN_BYTES: usize = 10 * 1024 * 1024; // 10MB

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub stdin: Option<String>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn stdin(mut self, input: Option<String>) -> Self {
        self.stdin = input;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Bare file name of the program, e.g. `make` for `/usr/bin/make`
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    /// Shell-like rendering used in logs and failure messages
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .map(|part| {
                if part.is_empty() || part.contains(char::is_whitespace) {
                    format!("\"{}\"", part.replace('"', "\\\""))
                } else {
                    part
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Seam between the harness and the operating system.
///
/// Production uses [`ProcessEngine`]; tests substitute a scripted runner so
/// the pipeline can be exercised without a real toolchain.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the command to completion (or until its timeout expires).
    ///
    /// A timeout is not an error here: it comes back as an output with
    /// `timed_out` set so the caller can classify it.
    async fn run(&self, spec: &CommandSpec) -> Result<ExecutionOutput, HarnessError>;

    /// Find `program` the way `run` would; `None` means it is not installed
    fn locate(&self, program: &str) -> Option<PathBuf> {
        resolve_program(program)
    }
}

pub struct ProcessEngine {
    universal_newlines: bool,
}

impl ProcessEngine {
    pub fn new(universal_newlines: bool) -> Self {
        Self { universal_newlines }
    }

    fn decode(&self, bytes: &[u8]) -> String {
        let text = String::from_utf8_lossy(bytes);
        if self.universal_newlines {
            normalize_line_endings(&text).into_owned()
        } else {
            text.into_owned()
        }
    }
}

impl Default for ProcessEngine {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl CommandRunner for ProcessEngine {
    async fn run(&self, spec: &CommandSpec) -> Result<ExecutionOutput, HarnessError> {
        if let Some(input) = &spec.stdin {
            if input.len() > MAX_STDIN_BYTES {
                return Err(HarnessError::Spawn {
                    program: spec.program_name(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("stdin exceeds maximum size of {} bytes", MAX_STDIN_BYTES),
                    ),
                });
            }
        }

        debug!(command = %spec.command_line(), cwd = ?spec.cwd, "Spawning process");

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            // Dropping the wait future (timeout, Ctrl-C) must not leak the child
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let start_time = Instant::now();
        let mut child = command.spawn().map_err(|source| HarnessError::Spawn {
            program: spec.program_name(),
            source,
        })?;

        if let (Some(input), Some(mut pipe)) = (spec.stdin.clone(), child.stdin.take()) {
            // Feed stdin concurrently; a child that never reads it must not
            // block output collection.
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(input.as_bytes()).await {
                    debug!(error = %e, "Child closed stdin early");
                }
            });
        }

        let wait = child.wait_with_output();
        let result = match spec.timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await,
            None => Ok(wait.await),
        };
        let execution_time_ms = start_time.elapsed().as_millis() as u64;

        match result {
            Err(_) => {
                let timeout_ms = spec.timeout.map(|t| t.as_millis() as u64).unwrap_or_default();
                warn!(
                    command = %spec.command_line(),
                    timeout_ms,
                    "Process timed out - killed"
                );
                Ok(ExecutionOutput {
                    stdout: String::new(),
                    stderr: "[Execution timed out]".to_string(),
                    exit_code: None,
                    signal: None,
                    timed_out: true,
                    execution_time_ms,
                })
            }
            Ok(Err(source)) => Err(HarnessError::Spawn {
                program: spec.program_name(),
                source,
            }),
            Ok(Ok(output)) => {
                let stdout = self.decode(&output.stdout);
                let mut stderr = self.decode(&output.stderr);
                let exit_code = output.status.code();
                let signal = exit_signal(&output.status);

                match signal {
                    Some(9) => stderr.push_str("\n[Process killed]"),
                    Some(11) => stderr.push_str("\n[Process killed: segmentation fault]"),
                    _ => {}
                }

                debug!(
                    program = %spec.program_name(),
                    exit_code = ?exit_code,
                    signal = ?signal,
                    execution_time_ms,
                    "Process finished"
                );

                Ok(ExecutionOutput {
                    stdout,
                    stderr,
                    exit_code,
                    signal,
                    timed_out: false,
                    execution_time_ms,
                })
            }
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Locate an executable. Paths with a directory component are taken as
/// given; bare names are searched for on `PATH`.
pub fn resolve_program(program: &str) -> Option<PathBuf> {
    let path = Path::new(program);
    if path.components().count() > 1 || path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }
    which::which(program).ok()
}


#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").arg("-c").arg(script)
    }

    #[tokio::test]
    async fn test_captures_stdout_and_status() {
        let engine = ProcessEngine::default();
        let output = engine.run(&sh("printf 'Hello, world!\\n'")).await.unwrap();

        assert_eq!(output.stdout, "Hello, world!\n");
        assert_eq!(output.exit_code, Some(0));
        assert!(output.success());
        assert!(!output.timed_out);
    }

    #[tokio::test]
    async fn test_nonzero_exit_and_stderr() {
        let engine = ProcessEngine::default();
        let output = engine.run(&sh("echo boom >&2; exit 3")).await.unwrap();

        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stderr, "boom\n");
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_feeds_stdin() {
        let engine = ProcessEngine::default();
        let spec = CommandSpec::new("cat").stdin(Some("line one\nline two\n".to_string()));
        let output = engine.run(&spec).await.unwrap();

        assert_eq!(output.stdout, "line one\nline two\n");
    }

    #[tokio::test]
    async fn test_passes_explicit_env_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = BTreeMap::new();
        env.insert("BUILDCHECK_PROBE".to_string(), "toolchain-x".to_string());
        let spec = sh("echo $BUILDCHECK_PROBE; pwd").envs(&env).cwd(dir.path());
        let output = engine_run(spec).await;

        let mut lines = output.stdout.lines();
        assert_eq!(lines.next(), Some("toolchain-x"));
        let cwd = std::fs::canonicalize(lines.next().unwrap()).unwrap();
        assert_eq!(cwd, std::fs::canonicalize(dir.path()).unwrap());
    }

    async fn engine_run(spec: CommandSpec) -> ExecutionOutput {
        ProcessEngine::default().run(&spec).await.unwrap()
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let spec = sh("sleep 5").timeout(Duration::from_millis(100));
        let output = engine_run(spec).await;

        assert!(output.timed_out);
        assert_eq!(output.exit_code, None);
        assert!(output.execution_time_ms < 5000);
    }

    #[tokio::test]
    async fn test_universal_newlines() {
        let output = engine_run(sh("printf 'a\\r\\nb\\r\\n'")).await;
        assert_eq!(output.stdout, "a\nb\n");

        let raw = ProcessEngine::new(false)
            .run(&sh("printf 'a\\r\\nb\\r\\n'"))
            .await
            .unwrap();
        assert_eq!(raw.stdout, "a\r\nb\r\n");
    }

    #[tokio::test]
    async fn test_signal_is_reported() {
        let output = engine_run(sh("kill -9 $$")).await;

        assert_eq!(output.signal, Some(9));
        assert_eq!(output.exit_code, None);
        assert!(output.stderr.contains("[Process killed]"));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let err = ProcessEngine::default()
            .run(&CommandSpec::new("/nonexistent/buildcheck-tool"))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_oversized_stdin_rejected() {
        let spec = CommandSpec::new("cat").stdin(Some("x".repeat(MAX_STDIN_BYTES + 1)));
        let err = ProcessEngine::default().run(&spec).await.unwrap_err();
        assert!(err.to_string().contains("maximum size"));
    }

    #[test]
    fn test_command_line_quotes_spaces() {
        let spec = CommandSpec::new("gyp").arg("--depth=.").arg("my file.gyp");
        assert_eq!(spec.command_line(), "gyp --depth=. \"my file.gyp\"");
        assert_eq!(CommandSpec::new("/usr/bin/make").program_name(), "make");
    }

    #[test]
    fn test_resolve_program() {
        assert!(resolve_program("sh").is_some());
        assert!(resolve_program("definitely-not-a-real-tool-buildcheck").is_none());
        assert!(resolve_program("/nonexistent/dir/tool").is_none());
    }
}
