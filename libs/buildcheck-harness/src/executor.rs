/// Case Executor - High-Level Orchestration
///
/// **Responsibility:**
/// Turn one declarative `TestCase` into a `CaseReport`.
///
/// **Architecture:**
/// 1. Decide whether the case applies here at all (skip rules)
/// 2. Build a `Harness` around a fresh workspace
/// 3. Walk the linear pipeline: generate, relocate, build, up-to-date,
///    run, file checks
/// 4. Map the first error to an outcome and dispose of the workspace
///
/// This module is the glue layer - it knows nothing about:
/// - How commands execute (engine's job)
/// - How output is compared (evaluator's job)
use crate::backend::tool_for;
use crate::engine::CommandRunner;
use crate::harness::Harness;
use crate::workspace::Workspace;
use buildcheck_common::config::HarnessConfig;
use buildcheck_common::types::{Backend, CaseReport, ExecutionOutput, Expected, Outcome, Stage, TestCase};
use buildcheck_common::HarnessError;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Load a case file. A relative `fixture` is resolved against the case
/// file's directory.
pub fn load_case(path: &Path) -> Result<TestCase, HarnessError> {
    let content = fs::read_to_string(path).map_err(|e| HarnessError::Case {
        path: path.to_path_buf(),
        message: format!("cannot read: {}", e),
    })?;
    let mut case: TestCase = serde_json::from_str(&content).map_err(|e| HarnessError::Case {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    if let Some(fixture) = case.fixture.take() {
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        case.fixture = Some(if fixture.is_absolute() {
            fixture
        } else {
            base.join(fixture)
        });
    }
    Ok(case)
}

/// Why `case` cannot run on this host with `backend`, if it cannot
pub fn skip_reason(
    case: &TestCase,
    backend: Backend,
    config: &HarnessConfig,
    runner: &dyn CommandRunner,
) -> Option<String> {
    let rules = &case.skip;
    let declared = || rules.reason.clone();

    if rules.platforms.iter().any(|p| p == std::env::consts::OS) {
        return declared().or_else(|| Some(format!("not supported on {}", std::env::consts::OS)));
    }
    if rules.formats.contains(&backend) {
        return declared().or_else(|| Some(format!("not supported by the {} format", backend)));
    }

    let tool = tool_for(backend);
    if !tool.host_supported() {
        return Some(format!("{} builds are not available on {}", backend, std::env::consts::OS));
    }

    if runner.locate(&config.generator.program).is_none() {
        return Some(format!("generator '{}' not found", config.generator.program));
    }
    if case.build.is_some() {
        let program = config
            .backend_settings(backend)
            .ok()
            .and_then(|s| s.program.clone())
            .unwrap_or_else(|| tool.default_program().to_string());
        if runner.locate(&program).is_none() {
            return Some(format!("build tool '{}' not found", program));
        }
    }
    None
}

fn check_streams(
    harness: &Harness,
    label: &str,
    output: &ExecutionOutput,
    stdout: Option<&Expected>,
    stderr: Option<&Expected>,
) -> Result<(), HarnessError> {
    if let Some(expected) = stdout {
        harness.assert_output_matches(&format!("{} stdout", label), &output.stdout, expected)?;
    }
    if let Some(expected) = stderr {
        harness.assert_output_matches(&format!("{} stderr", label), &output.stderr, expected)?;
    }
    Ok(())
}

async fn run_pipeline(harness: &mut Harness, case: &TestCase) -> Result<(), HarnessError> {
    if let Some(fixture) = &case.fixture {
        harness.workspace().copy_fixture(fixture)?;
    }

    let generate = &case.generate;
    let generated = harness
        .run_generator(&case.spec, &generate.flags, generate.status)
        .await?;
    check_streams(
        harness,
        "generator",
        &generated.output,
        generate.stdout.as_ref(),
        generate.stderr.as_ref(),
    )?;

    if let Some(relocation) = &case.relocate {
        harness.relocate(&relocation.from, &relocation.to)?;
    }

    if let Some(build) = &case.build {
        let built = harness
            .build(&case.spec, &case.target, &build.args, build.status)
            .await?;
        check_streams(harness, "build", &built.output, build.stdout.as_ref(), build.stderr.as_ref())?;

        if case.up_to_date && build.status == 0 {
            harness.up_to_date(&case.spec, &case.target).await?;
        }
    }

    for step in &case.run {
        harness
            .run_built_executable(
                &step.artifact,
                &step.args,
                step.stdin.clone(),
                step.status,
                step.stdout.as_ref(),
                step.stderr.as_ref(),
            )
            .await?;
    }

    for check in &case.files {
        let path = if check.built {
            harness.built_file_path(&check.path.to_string_lossy(), check.kind)
        } else {
            harness.workspace().workpath(&check.path)
        };
        if !check.exists {
            harness.assert_file_absent(&path)?;
            continue;
        }
        match &check.content {
            Some(expected) => harness.assert_file_matches(&path, expected)?,
            None => harness.assert_file_exists(&path)?,
        }
    }

    Ok(())
}

fn log_unpassed(case: &TestCase, stage: Stage, e: &HarnessError) {
    if e.is_skip() {
        info!(case_id = %case.id, reason = %e, "Case skipped");
    } else {
        warn!(
            case_id = %case.id,
            stage = %stage,
            outcome = %e.outcome(),
            error = %e,
            "Case did not pass"
        );
    }
}

/// Execute one case against one backend.
///
/// Never fails: every problem ends up in the report's outcome and message.
pub async fn execute_case(
    case: &TestCase,
    source: Option<&Path>,
    backend: Backend,
    config: &HarnessConfig,
    runner: Arc<dyn CommandRunner>,
) -> CaseReport {
    let started_at = Utc::now();
    let start = Instant::now();
    let report = |outcome: Outcome, stage: Stage, message: Option<String>, workdir: Option<PathBuf>| CaseReport {
        case_id: case.id,
        description: case.description.clone(),
        source: source.map(Path::to_path_buf),
        backend,
        outcome,
        stage,
        message,
        workdir,
        started_at,
        duration_ms: start.elapsed().as_millis() as u64,
    };

    info!(
        case_id = %case.id,
        backend = %backend,
        description = %case.description,
        "Starting case"
    );

    if let Some(reason) = skip_reason(case, backend, config, runner.as_ref()) {
        let skip = HarnessError::skip(reason);
        log_unpassed(case, Stage::Start, &skip);
        return report(skip.outcome(), Stage::Start, Some(skip.to_string()), None);
    }

    let workspace = match Workspace::create(&config.workdir_prefix) {
        Ok(workspace) => workspace,
        Err(e) => {
            warn!(case_id = %case.id, error = %e, "Could not create workspace");
            return report(e.outcome(), Stage::Start, Some(e.to_string()), None);
        }
    };

    let mut harness = Harness::new(config.clone(), backend, workspace, runner);
    if let Some(dir) = &case.chdir {
        harness.set_chdir(dir);
    }

    let result = run_pipeline(&mut harness, case).await;
    let stage = match &result {
        Ok(()) => Stage::Finished,
        Err(_) => harness.stage(),
    };

    if let Err(e) = &result {
        log_unpassed(case, stage, e);
    }

    let message = result.as_ref().err().map(ToString::to_string);
    let (outcome, workdir) = harness.finish(&result);

    info!(case_id = %case.id, outcome = %outcome, "Case finished");
    report(outcome, stage, message, workdir)
}

/// Load and execute a case file; a malformed file reports FAILED
pub async fn run_case_file(
    path: &Path,
    backend: Backend,
    config: &HarnessConfig,
    runner: Arc<dyn CommandRunner>,
) -> CaseReport {
    match load_case(path) {
        Ok(case) => execute_case(&case, Some(path), backend, config, runner).await,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Invalid test case");
            CaseReport {
                case_id: Uuid::new_v4(),
                description: path.display().to_string(),
                source: Some(path.to_path_buf()),
                backend,
                outcome: e.outcome(),
                stage: Stage::Start,
                message: Some(e.to_string()),
                workdir: None,
                started_at: Utc::now(),
                duration_ms: 0,
            }
        }
    }
}
