// CLI commands for buildcheck projects
use anyhow::{Context, Result};
use buildcheck_common::config::{HarnessConfig, PreservePolicy, DEFAULT_CONFIG_PATH};
use buildcheck_common::types::{Backend, CaseReport, Outcome};
use buildcheck_harness::backend::tool_for;
use buildcheck_harness::engine::resolve_program;
use buildcheck_harness::executor::{execute_case, load_case};
use buildcheck_harness::ProcessEngine;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Fold the `PRESERVE*` switches into a policy. `lookup` reads one variable.
fn preserve_from(policy: PreservePolicy, lookup: impl Fn(&str) -> Option<String>) -> PreservePolicy {
    policy.with_overrides(
        lookup("PRESERVE").as_deref(),
        lookup("PRESERVE_PASS").as_deref(),
        lookup("PRESERVE_FAIL").as_deref(),
        lookup("PRESERVE_NO_RESULT").as_deref(),
    )
}

/// Load the config (defaults when the file is absent) and apply the
/// environment overrides
pub fn load_config(config_path: &Path) -> Result<HarnessConfig> {
    let mut config = HarnessConfig::load_or_default(config_path)?;
    config.preserve = preserve_from(config.preserve, |name| std::env::var(name).ok());
    Ok(config)
}

/// Initialize a new buildcheck project
pub fn init_project(path: &str) -> Result<()> {
    println!("🚀 Initializing buildcheck project at: {}", path);

    let project_path = Path::new(path);

    let dirs = ["config", "cases", "cases/hello", "cases/hello/fixture"];
    for dir in &dirs {
        let dir_path = project_path.join(dir);
        fs::create_dir_all(&dir_path)
            .with_context(|| format!("Failed to create directory: {}", dir))?;
        println!("  ✅ Created: {}", dir);
    }

    let config_path = project_path.join(DEFAULT_CONFIG_PATH);
    if !config_path.exists() {
        HarnessConfig::default().save(&config_path)?;
        println!("  ✅ Created: {}", DEFAULT_CONFIG_PATH);
    }

    create_sample_case(project_path)?;

    println!("✅ Project initialized successfully!");
    println!("\n📋 Next steps:");
    println!("  1. Check which build tools were found: buildcheck-cli backends");
    println!("  2. Run the sample: buildcheck-cli run cases/hello/hello.case.json --format make");
    println!("  3. Run everything: buildcheck-runner cases");

    Ok(())
}

/// Write the hello-world case and its fixture
fn create_sample_case(project_path: &Path) -> Result<()> {
    let files = [
        (
            "cases/hello/hello.case.json",
            include_str!("../../../cases/hello/hello.case.json"),
        ),
        (
            "cases/hello/fixture/hello.gyp",
            include_str!("../../../cases/hello/fixture/hello.gyp"),
        ),
        (
            "cases/hello/fixture/hello.c",
            include_str!("../../../cases/hello/fixture/hello.c"),
        ),
    ];

    for (rel, content) in files {
        let file_path = project_path.join(rel);
        if !file_path.exists() {
            fs::write(&file_path, content)
                .with_context(|| format!("Failed to write {}", file_path.display()))?;
            println!("  ✅ Created: {}", rel);
        }
    }

    Ok(())
}

/// Print every configured backend and whether its tool can run here
pub fn list_backends(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;

    let generator = resolve_program(&config.generator.program);
    println!(
        "Generator: {} → {}",
        config.generator.program,
        generator
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "not found".to_string())
    );
    println!();
    println!("{:<8} {:<12} {:<6} {}", "FORMAT", "PROGRAM", "HOST", "FOUND");

    for settings in &config.backends {
        let tool = tool_for(settings.name);
        let program = settings
            .program
            .clone()
            .unwrap_or_else(|| tool.default_program().to_string());
        let found = resolve_program(&program)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<8} {:<12} {:<6} {}",
            settings.name,
            program,
            if tool.host_supported() { "yes" } else { "no" },
            found
        );
    }

    Ok(())
}

pub fn show_config(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let json = serde_json::to_string_pretty(&config).context("Failed to serialize config")?;
    println!("{}", json);
    Ok(())
}

fn print_report(report: &CaseReport) {
    let icon = match report.outcome {
        Outcome::Pass => "✅",
        Outcome::Fail => "❌",
        Outcome::NoResult => "⚠️ ",
    };
    let name = if report.description.is_empty() {
        report.case_id.to_string()
    } else {
        report.description.clone()
    };
    println!(
        "{} {} {} [{}] ({}ms)",
        icon, report.outcome, name, report.backend, report.duration_ms
    );
    if let Some(message) = &report.message {
        for line in message.lines() {
            println!("    {}", line);
        }
    }
    if let Some(workdir) = &report.workdir {
        println!("  → Preserved directory: {}", workdir.display());
    }
}

/// Execute one case file and report it
pub async fn run_case(case_path: &Path, backend: Backend, config_path: &Path, json: bool) -> Result<Outcome> {
    let config = load_config(config_path)?;
    let case = load_case(case_path)?;
    let runner = Arc::new(ProcessEngine::new(config.universal_newlines));

    info!(case = %case_path.display(), backend = %backend, "Running case");
    let report = execute_case(&case, Some(case_path), backend, &config, runner).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(report.outcome)
}
