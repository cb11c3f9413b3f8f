use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Native build system a generator can emit project files for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Make,
    Ninja,
    Msvs,
    Xcode,
}

impl Backend {
    pub const ALL: [Backend; 4] = [Backend::Make, Backend::Ninja, Backend::Msvs, Backend::Xcode];

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Make => "make",
            Backend::Ninja => "ninja",
            Backend::Msvs => "msvs",
            Backend::Xcode => "xcode",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "make" => Ok(Backend::Make),
            "ninja" => Ok(Backend::Ninja),
            "msvs" => Ok(Backend::Msvs),
            "xcode" => Ok(Backend::Xcode),
            other => Err(format!(
                "Invalid format: {} (valid options: make, ninja, msvs, xcode)",
                other
            )),
        }
    }
}

/// Build target selector. `ALL` builds everything, `DEFAULT` lets the
/// build tool pick its default goal.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Target {
    All,
    #[default]
    Default,
    Named(String),
}

impl From<String> for Target {
    fn from(value: String) -> Self {
        match value.as_str() {
            "ALL" => Target::All,
            "DEFAULT" | "" => Target::Default,
            _ => Target::Named(value),
        }
    }
}

impl From<&str> for Target {
    fn from(value: &str) -> Self {
        Target::from(value.to_string())
    }
}

impl From<Target> for String {
    fn from(value: Target) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::All => f.write_str("ALL"),
            Target::Default => f.write_str("DEFAULT"),
            Target::Named(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    #[default]
    Executable,
    StaticLibrary,
    SharedLibrary,
}

/// Literal fixture an observed output is compared against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expected {
    Exact(String),
    Regex(String),
    RegexDotall(String),
    Contains(String),
}

impl Expected {
    pub fn text(&self) -> &str {
        match self {
            Expected::Exact(s)
            | Expected::Regex(s)
            | Expected::RegexDotall(s)
            | Expected::Contains(s) => s,
        }
    }
}

fn zero_status() -> i32 {
    0
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateStep {
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default = "zero_status")]
    pub status: i32,
    #[serde(default)]
    pub stdout: Option<Expected>,
    #[serde(default)]
    pub stderr: Option<Expected>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildStep {
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "zero_status")]
    pub status: i32,
    #[serde(default)]
    pub stdout: Option<Expected>,
    #[serde(default)]
    pub stderr: Option<Expected>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStep {
    pub artifact: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default = "zero_status")]
    pub status: i32,
    #[serde(default)]
    pub stdout: Option<Expected>,
    #[serde(default)]
    pub stderr: Option<Expected>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileCheck {
    pub path: PathBuf,
    /// Resolve `path` through the backend's build output layout
    #[serde(default)]
    pub built: bool,
    #[serde(default)]
    pub kind: ArtifactKind,
    #[serde(default = "default_true")]
    pub exists: bool,
    #[serde(default)]
    pub content: Option<Expected>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relocation {
    pub from: PathBuf,
    pub to: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkipRules {
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default)]
    pub formats: Vec<Backend>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// One declarative test case, loaded from a `*.case.json` file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub description: String,
    pub spec: PathBuf,
    #[serde(default)]
    pub fixture: Option<PathBuf>,
    #[serde(default)]
    pub chdir: Option<PathBuf>,
    #[serde(default)]
    pub target: Target,
    #[serde(default)]
    pub generate: GenerateStep,
    #[serde(default)]
    pub build: Option<BuildStep>,
    #[serde(default)]
    pub relocate: Option<Relocation>,
    #[serde(default)]
    pub up_to_date: bool,
    #[serde(default)]
    pub run: Vec<RunStep>,
    #[serde(default)]
    pub files: Vec<FileCheck>,
    #[serde(default)]
    pub skip: SkipRules,
}

/// Captured result of one subprocess invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub timed_out: bool,
    pub execution_time_ms: u64,
}

impl ExecutionOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pass,
    Fail,
    NoResult,
}

impl Outcome {
    /// Process exit status for a single test: PASSED 0, FAILED 1, NO RESULT 2
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Pass => 0,
            Outcome::Fail => 1,
            Outcome::NoResult => 2,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Pass => f.write_str("PASSED"),
            Outcome::Fail => f.write_str("FAILED"),
            Outcome::NoResult => f.write_str("NO RESULT"),
        }
    }
}

/// Pipeline position of a test case. Ordered; a case never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    Generate,
    Build,
    Execute,
    Finished,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Start => "START",
            Stage::Generate => "GENERATE",
            Stage::Build => "BUILD",
            Stage::Execute => "EXECUTE",
            Stage::Finished => "FINISHED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseReport {
    pub case_id: Uuid,
    pub description: String,
    pub source: Option<PathBuf>,
    pub backend: Backend,
    pub outcome: Outcome,
    pub stage: Stage,
    pub message: Option<String>,
    pub workdir: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuiteSummary {
    pub passed: usize,
    pub failed: usize,
    pub no_result: usize,
    pub reports: Vec<CaseReport>,
}

impl SuiteSummary {
    pub fn from_reports(reports: Vec<CaseReport>) -> Self {
        let mut summary = SuiteSummary::default();
        for report in &reports {
            match report.outcome {
                Outcome::Pass => summary.passed += 1,
                Outcome::Fail => summary.failed += 1,
                Outcome::NoResult => summary.no_result += 1,
            }
        }
        summary.reports = reports;
        summary
    }

    pub fn total(&self) -> usize {
        self.reports.len()
    }

    /// Skipped cases never fail a suite
    pub fn exit_code(&self) -> i32 {
        if self.failed > 0 {
            1
        } else {
            0
        }
    }
}
