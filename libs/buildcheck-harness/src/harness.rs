//! Harness - one test case's view of the world.
//!
//! A `Harness` owns an isolated workspace, the selected backend and an
//! explicit copy of the configuration. It drives the generator and the
//! build tool through a `CommandRunner` and offers the assertions a test
//! case is written in.
//!
//! **Stages:** START -> GENERATE -> BUILD -> EXECUTE -> FINISHED. Moving
//! backwards is refused; repeating a stage (two builds, several runs) is
//! fine. Assertions never move the stage.

use crate::backend::{tool_for, BuildContext, BuildTool};
use crate::engine::{CommandRunner, CommandSpec};
use crate::evaluator::{self, check_status, normalize_line_endings, StatusCheck};
use crate::workspace::Workspace;
use buildcheck_common::config::HarnessConfig;
use buildcheck_common::types::{ArtifactKind, Backend, ExecutionOutput, Expected, Outcome, Stage, Target};
use buildcheck_common::HarnessError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

type Result<T> = std::result::Result<T, HarnessError>;

/// What the generator was asked to do and what it did
#[derive(Debug, Clone)]
pub struct GeneratorResult {
    pub command: CommandSpec,
    pub output: ExecutionOutput,
}

#[derive(Debug, Clone)]
pub struct BuildResult {
    pub command: CommandSpec,
    pub output: ExecutionOutput,
}

pub struct Harness {
    config: HarnessConfig,
    backend: Backend,
    tool: Box<dyn BuildTool>,
    workspace: Workspace,
    runner: Arc<dyn CommandRunner>,
    /// Working directory for generate/build/run, relative to the workspace
    chdir: PathBuf,
    /// Last spec handed to the generator or build tool, relative to `chdir`
    spec: PathBuf,
    stage: Stage,
    history: Vec<ExecutionOutput>,
}

impl Harness {
    pub fn new(
        config: HarnessConfig,
        backend: Backend,
        workspace: Workspace,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            config,
            backend,
            tool: tool_for(backend),
            workspace,
            runner,
            chdir: PathBuf::new(),
            spec: PathBuf::new(),
            stage: Stage::Start,
            history: Vec::new(),
        }
    }

    /// Run generation and builds from `dir` inside the workspace
    pub fn set_chdir(&mut self, dir: impl Into<PathBuf>) {
        self.chdir = dir.into();
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Absolute directory commands run in
    pub fn work_dir(&self) -> PathBuf {
        self.workspace.workpath(&self.chdir)
    }

    fn advance(&mut self, to: Stage) -> Result<()> {
        if to < self.stage {
            return Err(HarnessError::Stage {
                from: self.stage,
                to,
            });
        }
        if to != self.stage {
            debug!(from = %self.stage, to = %to, "Stage transition");
        }
        self.stage = to;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    fn command(&self, program: &str) -> CommandSpec {
        let resolved = self
            .runner
            .locate(program)
            .unwrap_or_else(|| PathBuf::from(program));
        CommandSpec::new(resolved)
            .cwd(self.work_dir())
            .envs(&self.config.env)
            .timeout(self.timeout())
    }

    /// Run a command and record its output. A timeout is an error.
    async fn execute(&mut self, spec: &CommandSpec) -> Result<ExecutionOutput> {
        let output = self.runner.run(spec).await?;
        self.history.push(output.clone());
        if output.timed_out {
            return Err(HarnessError::Timeout {
                program: spec.program_name(),
                timeout_ms: self.config.timeout_ms,
            });
        }
        Ok(output)
    }

    fn remember_spec(&mut self, spec: &Path) {
        self.spec = spec.to_path_buf();
    }

    /// Invoke the generator on `spec` and require the declared exit status
    #[instrument(skip(self, flags), fields(backend = %self.backend))]
    pub async fn run_generator(&mut self, spec: &Path, flags: &[String], status: i32) -> Result<GeneratorResult> {
        self.advance(Stage::Generate)?;
        self.remember_spec(spec);

        let generator = &self.config.generator;
        let command = self
            .command(&generator.program)
            .args(generator.args.iter().cloned())
            .arg(format!("--format={}", self.backend))
            .arg(format!("--depth={}", generator.depth))
            .args(flags.iter().cloned())
            .arg(spec.display().to_string());

        info!(command = %command.command_line(), "Running generator");
        let output = self.execute(&command).await?;

        match check_status(status, &output) {
            StatusCheck::Ok => Ok(GeneratorResult { command, output }),
            StatusCheck::TimedOut | StatusCheck::Mismatch { .. } => Err(HarnessError::Generation {
                spec: spec.to_path_buf(),
                expected: status,
                actual: output.exit_code,
                stderr: output.stderr,
            }),
        }
    }

    /// Build `target` with the backend's tool and require the declared exit
    /// status. A success where failure was declared is an error too.
    #[instrument(skip(self, args), fields(backend = %self.backend, target = %target))]
    pub async fn build(&mut self, spec: &Path, target: &Target, args: &[String], status: i32) -> Result<BuildResult> {
        self.advance(Stage::Build)?;
        self.remember_spec(spec);

        let settings = self.config.backend_settings(self.backend).ok();
        let program = settings
            .and_then(|s| s.program.clone())
            .unwrap_or_else(|| self.tool.default_program().to_string());
        let extra = settings.map(|s| s.args.clone()).unwrap_or_default();

        let ctx = BuildContext {
            spec,
            target,
            configuration: &self.config.configuration,
            depth: &self.config.generator.depth,
        };
        let command = self
            .command(&program)
            .args(extra)
            .args(self.tool.build_args(&ctx))
            .args(args.iter().cloned());

        info!(command = %command.command_line(), "Running build");
        let output = self.execute(&command).await?;

        match check_status(status, &output) {
            StatusCheck::Ok => Ok(BuildResult { command, output }),
            StatusCheck::TimedOut | StatusCheck::Mismatch { .. } => Err(HarnessError::Build {
                target: target.to_string(),
                expected: status,
                actual: output.exit_code,
                stderr: output.stderr,
            }),
        }
    }

    /// Rebuild and require the tool to report that nothing was done
    pub async fn up_to_date(&mut self, spec: &Path, target: &Target) -> Result<()> {
        self.build(spec, target, &[], 0).await?;
        let signature = self.tool.up_to_date_signature(target);
        let stdout = self.stdout(0).unwrap_or_default();
        evaluator::assert_output_matches("up-to-date rebuild output", stdout, &signature)
    }

    /// Absolute path of a built file under the backend's output layout
    pub fn built_file_path(&self, name: &str, kind: ArtifactKind) -> PathBuf {
        self.work_dir()
            .join(self.tool.output_root(&self.spec, &self.config.generator.depth))
            .join(self.tool.built_file_path(name, kind, &self.config.configuration))
    }

    /// Run a built executable without judging the result
    #[instrument(skip(self, args, stdin), fields(backend = %self.backend))]
    pub async fn run_artifact(&mut self, name: &str, args: &[String], stdin: Option<String>) -> Result<ExecutionOutput> {
        self.advance(Stage::Execute)?;
        let program = self.built_file_path(name, ArtifactKind::Executable);
        let command = CommandSpec::new(program)
            .args(args.iter().cloned())
            .stdin(stdin)
            .cwd(self.work_dir())
            .envs(&self.config.env)
            .timeout(self.timeout());
        self.execute(&command).await
    }

    /// Run a built executable and check its status and output
    pub async fn run_built_executable(
        &mut self,
        name: &str,
        args: &[String],
        stdin: Option<String>,
        status: i32,
        stdout: Option<&Expected>,
        stderr: Option<&Expected>,
    ) -> Result<ExecutionOutput> {
        let output = self.run_artifact(name, args, stdin).await?;

        if let StatusCheck::Mismatch { actual } = check_status(status, &output) {
            return Err(HarnessError::assertion(
                format!("exit status of '{}'", name),
                format!(
                    "expected {}, got {}\n{}",
                    status,
                    actual.map(|c| c.to_string()).unwrap_or_else(|| "no status".to_string()),
                    output.stderr
                ),
            ));
        }
        if let Some(expected) = stdout {
            self.assert_output_matches(&format!("stdout of '{}'", name), &output.stdout, expected)?;
        }
        if let Some(expected) = stderr {
            self.assert_output_matches(&format!("stderr of '{}'", name), &output.stderr, expected)?;
        }
        Ok(output)
    }

    pub fn assert_output_matches(&self, label: &str, actual: &str, expected: &Expected) -> Result<()> {
        evaluator::assert_output_matches(label, actual, expected)
    }

    pub fn assert_file_exists(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = self.workspace.workpath(path);
        if path.exists() {
            Ok(())
        } else {
            Err(HarnessError::assertion(
                format!("{} does not exist", path.display()),
                String::new(),
            ))
        }
    }

    pub fn assert_file_absent(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = self.workspace.workpath(path);
        if path.exists() {
            Err(HarnessError::assertion(
                format!("{} exists but should not", path.display()),
                String::new(),
            ))
        } else {
            Ok(())
        }
    }

    /// Compare a file's contents with line endings normalized on both sides
    pub fn assert_file_matches(&self, path: impl AsRef<Path>, expected: &Expected) -> Result<()> {
        let path = path.as_ref();
        self.assert_file_exists(path)?;
        let actual = self.workspace.read_text(path)?;
        let expected = match expected {
            Expected::Exact(text) => Expected::Exact(normalize_line_endings(text).into_owned()),
            other => other.clone(),
        };
        evaluator::assert_output_matches(&format!("contents of {}", path.display()), &actual, &expected)
    }

    /// Move a directory inside the workspace. A working directory inside
    /// `from` moves along with it; otherwise later commands run from `to`.
    pub fn relocate(&mut self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<()> {
        let (from, to) = (from.as_ref(), to.as_ref());
        self.workspace.relocate(from, to)?;
        self.chdir = match self.chdir.strip_prefix(from) {
            Ok(rest) if !from.as_os_str().is_empty() => to.join(rest),
            _ => to.to_path_buf(),
        };
        Ok(())
    }

    fn history_index(&self, run: isize) -> Option<usize> {
        let len = self.history.len() as isize;
        let n = match run {
            0 => len,
            r if r < 0 => len + r,
            r => r,
        };
        (1..=len).contains(&n).then(|| (n - 1) as usize)
    }

    /// Stdout of a recorded run: 0 is the last, `n > 0` the n-th (1-based),
    /// negative values count back from the last
    pub fn stdout(&self, run: isize) -> Option<&str> {
        self.history_index(run).map(|i| self.history[i].stdout.as_str())
    }

    pub fn stderr(&self, run: isize) -> Option<&str> {
        self.history_index(run).map(|i| self.history[i].stderr.as_str())
    }

    /// End the case. The workspace is removed unless the preserve policy
    /// keeps it for this outcome.
    pub fn finish(mut self, result: &Result<()>) -> (Outcome, Option<PathBuf>) {
        let outcome = match result {
            Ok(()) => Outcome::Pass,
            Err(e) => e.outcome(),
        };
        self.stage = Stage::Finished;
        let kept = self.workspace.finish(outcome, &self.config.preserve);
        (outcome, kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{output, ScriptedRunner};
    use assert_matches::assert_matches;

    fn harness(runner: Arc<ScriptedRunner>, backend: Backend) -> Harness {
        let workspace = Workspace::create("buildcheck-test-").unwrap();
        Harness::new(HarnessConfig::default(), backend, workspace, runner)
    }

    #[tokio::test]
    async fn test_generator_command_line() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond_ok("gyp", "");
        let mut h = harness(runner.clone(), Backend::Ninja);

        h.run_generator(Path::new("hello.gyp"), &["-Dfoo=1".to_string()], 0)
            .await
            .unwrap();

        let calls = runner.calls_to("gyp");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args, vec!["--format=ninja", "--depth=.", "-Dfoo=1", "hello.gyp"]);
        assert_eq!(calls[0].cwd.as_deref(), Some(h.workspace().root()));
        assert_eq!(h.stage(), Stage::Generate);
    }

    #[tokio::test]
    async fn test_generator_status_mismatch() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond_status("gyp", 1, "Undefined target");
        let mut h = harness(runner, Backend::Make);

        let err = h.run_generator(Path::new("bad.gyp"), &[], 0).await.unwrap_err();
        assert_matches!(err, HarnessError::Generation { expected: 0, actual: Some(1), .. });
        // Output is still available for inspection
        assert_eq!(h.stderr(0), Some("Undefined target"));
    }

    #[tokio::test]
    async fn test_declared_build_failure() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond_status("make", 2, "error").respond_ok("make", "");
        let mut h = harness(runner, Backend::Make);
        let spec = Path::new("hello.gyp");
        let target = Target::Named("hello".into());

        assert!(h.build(spec, &target, &[], 2).await.is_ok());
        let err = h.build(spec, &target, &[], 2).await.unwrap_err();
        assert_matches!(err, HarnessError::Build { expected: 2, actual: Some(0), .. });
    }

    #[tokio::test]
    async fn test_build_uses_configured_program_and_args() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond_ok("ninja-build", "");
        let workspace = Workspace::create("buildcheck-test-").unwrap();
        let mut config = HarnessConfig::default();
        for settings in &mut config.backends {
            if settings.name == Backend::Ninja {
                settings.program = Some("ninja-build".to_string());
                settings.args = vec!["-v".to_string()];
            }
        }
        let mut h = Harness::new(config, Backend::Ninja, workspace, runner.clone());

        h.build(Path::new("hello.gyp"), &Target::All, &["-j1".to_string()], 0)
            .await
            .unwrap();

        let call = &runner.calls_to("ninja-build")[0];
        let out = Path::new("out").join("Default").display().to_string();
        assert_eq!(call.args, vec!["-v".to_string(), "-C".to_string(), out, "all".to_string(), "-j1".to_string()]);
    }

    #[tokio::test]
    async fn test_stage_never_moves_backwards() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond_ok("make", "").respond("hello", output(0, "Hello, world!\n", ""));
        let mut h = harness(runner, Backend::Make);
        let spec = Path::new("hello.gyp");

        h.build(spec, &Target::Default, &[], 0).await.unwrap();
        h.run_artifact("hello", &[], None).await.unwrap();
        assert_eq!(h.stage(), Stage::Execute);

        let err = h.build(spec, &Target::Default, &[], 0).await.unwrap_err();
        assert_matches!(err, HarnessError::Stage { from: Stage::Execute, to: Stage::Build });

        // Assertions do not move the stage
        h.assert_output_matches("stdout", "x", &Expected::Exact("x".into())).unwrap();
        assert_eq!(h.stage(), Stage::Execute);
    }

    #[tokio::test]
    async fn test_run_built_executable_checks_status_and_stdout() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .respond("hello", output(0, "Hello, world!\n", ""))
            .respond("hello", output(3, "", "crash"));
        let mut h = harness(runner.clone(), Backend::Make);
        let expected = Expected::Exact("Hello, world!\n".to_string());

        h.run_built_executable("hello", &[], None, 0, Some(&expected), None)
            .await
            .unwrap();
        let err = h
            .run_built_executable("hello", &[], None, 0, None, None)
            .await
            .unwrap_err();
        assert_matches!(err, HarnessError::Assertion { .. });

        let call = &runner.calls_to("hello")[0];
        assert_eq!(call.program, h.built_file_path("hello", ArtifactKind::Executable));
        assert!(call.program.ends_with("out/Default/hello"));
    }

    #[tokio::test]
    async fn test_timeout_is_an_error() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond(
            "gyp",
            ExecutionOutput {
                timed_out: true,
                ..Default::default()
            },
        );
        let mut h = harness(runner, Backend::Make);

        let err = h.run_generator(Path::new("hello.gyp"), &[], 0).await.unwrap_err();
        assert_matches!(err, HarnessError::Timeout { .. });
        assert_eq!(err.outcome(), Outcome::Fail);
    }

    #[tokio::test]
    async fn test_run_history_indexing() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .respond_ok("gyp", "first")
            .respond_ok("make", "second")
            .respond_ok("make", "third");
        let mut h = harness(runner, Backend::Make);
        let spec = Path::new("hello.gyp");

        h.run_generator(spec, &[], 0).await.unwrap();
        h.build(spec, &Target::Default, &[], 0).await.unwrap();
        h.build(spec, &Target::Default, &[], 0).await.unwrap();

        assert_eq!(h.stdout(0), Some("third"));
        assert_eq!(h.stdout(1), Some("first"));
        assert_eq!(h.stdout(2), Some("second"));
        assert_eq!(h.stdout(-1), Some("second"));
        assert_eq!(h.stdout(-2), Some("first"));
        assert_eq!(h.stdout(4), None);
        assert_eq!(h.stdout(-3), None);
    }

    #[tokio::test]
    async fn test_up_to_date_requires_noop_signature() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .respond_ok("ninja", "ninja: Entering directory `out/Default'\nninja: no work to do.\n")
            .respond_ok("ninja", "[1/1] LINK hello\n");
        let mut h = harness(runner, Backend::Ninja);
        let spec = Path::new("hello.gyp");

        h.up_to_date(spec, &Target::All).await.unwrap();
        let err = h.up_to_date(spec, &Target::All).await.unwrap_err();
        assert_matches!(err, HarnessError::Assertion { .. });
    }

    #[tokio::test]
    async fn test_file_assertions_and_relocate() {
        let runner = Arc::new(ScriptedRunner::new());
        let mut h = harness(runner, Backend::Make);
        h.workspace().write("src/out.txt", "a\r\nb\r\n").unwrap();

        h.assert_file_exists("src/out.txt").unwrap();
        h.assert_file_absent("src/missing.txt").unwrap();
        h.assert_file_matches("src/out.txt", &Expected::Exact("a\r\nb\r\n".into()))
            .unwrap();
        h.assert_file_matches("src/out.txt", &Expected::Exact("a\nb\n".into()))
            .unwrap();
        assert!(h.assert_file_matches("src/out.txt", &Expected::Exact("a\nc\n".into())).is_err());

        h.relocate("src", "relocated/src").unwrap();
        assert_eq!(h.work_dir(), h.workspace().workpath("relocated/src"));
        h.assert_file_exists("relocated/src/out.txt").unwrap();
        h.assert_file_absent("src").unwrap();
    }

    #[tokio::test]
    async fn test_relocate_keeps_nested_chdir() {
        let runner = Arc::new(ScriptedRunner::new());
        let mut h = harness(runner, Backend::Make);
        h.workspace().write("work/sub/hello.gyp", "{}").unwrap();
        h.set_chdir("work/sub");

        h.relocate("work", "moved").unwrap();
        assert_eq!(h.work_dir(), h.workspace().workpath("moved/sub"));
        h.assert_file_exists("moved/sub/hello.gyp").unwrap();

        // A chdir outside the moved tree follows the destination
        h.set_chdir("elsewhere");
        h.relocate("moved", "again").unwrap();
        assert_eq!(h.work_dir(), h.workspace().workpath("again"));
    }

    #[tokio::test]
    async fn test_nested_spec_builds_from_depth_dir() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond_ok("make", "").respond_ok("ninja", "");
        let spec = Path::new("src/hello.gyp");
        let target = Target::Named("hello".into());

        let mut make = harness(runner.clone(), Backend::Make);
        make.build(spec, &target, &[], 0).await.unwrap();
        assert_eq!(runner.calls_to("make")[0].args, vec!["BUILDTYPE=Default", "hello"]);
        assert_eq!(
            make.built_file_path("hello", ArtifactKind::Executable),
            make.workspace().workpath("out/Default/hello")
        );

        let mut ninja = harness(runner.clone(), Backend::Ninja);
        ninja.build(spec, &target, &[], 0).await.unwrap();
        let call = &runner.calls_to("ninja")[0];
        assert_eq!(call.args[1], Path::new("out").join("Default").display().to_string());
        assert_eq!(call.cwd.as_deref(), Some(ninja.workspace().root()));
        assert_eq!(
            ninja.built_file_path("hello", ArtifactKind::Executable),
            ninja.workspace().workpath("out/Default/hello")
        );

        // Xcode keeps its project and build dir beside the spec
        let mut xcode = harness(runner, Backend::Xcode);
        xcode.remember_spec(spec);
        assert_eq!(
            xcode.built_file_path("hello", ArtifactKind::Executable),
            xcode.workspace().workpath("src/build/Default/hello")
        );
    }

    #[tokio::test]
    async fn test_finish_maps_outcome() {
        let runner = Arc::new(ScriptedRunner::new());
        let h = harness(runner.clone(), Backend::Make);
        assert_eq!(h.finish(&Ok(())), (Outcome::Pass, None));

        let h = harness(runner, Backend::Make);
        let (outcome, kept) = h.finish(&Err(HarnessError::skip("no xcode")));
        assert_eq!(outcome, Outcome::NoResult);
        assert!(kept.is_none());
    }
}
