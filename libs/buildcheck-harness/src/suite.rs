//! Suite runner: discover case files and execute them concurrently.

use crate::engine::CommandRunner;
use crate::executor::run_case_file;
use buildcheck_common::config::HarnessConfig;
use buildcheck_common::types::{Backend, SuiteSummary};
use buildcheck_common::HarnessError;
use futures_util::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use walkdir::WalkDir;

pub const CASE_SUFFIX: &str = ".case.json";

/// Every `*.case.json` file under `dir`, sorted by path
pub fn discover_cases(dir: &Path) -> Result<Vec<PathBuf>, HarnessError> {
    let mut cases = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
            HarnessError::workspace("discover", path, e.into())
        })?;
        let is_case = entry.file_type().is_file()
            && entry.file_name().to_string_lossy().ends_with(CASE_SUFFIX);
        if is_case {
            cases.push(entry.into_path());
        }
    }
    cases.sort();
    Ok(cases)
}

/// Run every case with at most `jobs` in flight. Reports come back in the
/// order of `paths`, whatever order the cases finished in.
pub async fn run_suite(
    paths: &[PathBuf],
    backend: Backend,
    config: &HarnessConfig,
    runner: Arc<dyn CommandRunner>,
    jobs: usize,
) -> SuiteSummary {
    let jobs = jobs.max(1);
    info!(cases = paths.len(), backend = %backend, jobs, "Starting suite");

    let mut reports: Vec<_> = stream::iter(paths.iter().enumerate())
        .map(|(index, path)| {
            let runner = Arc::clone(&runner);
            async move { (index, run_case_file(path, backend, config, runner).await) }
        })
        .buffer_unordered(jobs)
        .collect()
        .await;
    reports.sort_by_key(|(index, _)| *index);

    let summary = SuiteSummary::from_reports(reports.into_iter().map(|(_, report)| report).collect());
    info!(
        passed = summary.passed,
        failed = summary.failed,
        no_result = summary.no_result,
        "Suite finished"
    );
    summary
}
