//! Build once, or rebuild on change with `--watchwrite`

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use colored::Colorize;
use tracing::info;

use crate::config::Options;
use crate::error::BuildError;
use crate::executor::{BuildExecutor, BuildReport};
use crate::plan::BuildPlan;
use crate::utils::format_duration;

/// Stylesheet written during development so the html never links a missing file
pub const STYLE_PLACEHOLDER: &str = "/* css gets only generated for production bundle */";

const ERROR_SEPARATOR: &str = "\n\n\n------\n\n";

pub async fn run(options: &Options, plan: &BuildPlan, executor: &dyn BuildExecutor) -> Result<()> {
    if options.watchwrite {
        return watch_write(options, plan, executor).await;
    }

    let start = Instant::now();
    eprintln!("{} Building {}...", "→".blue(), options.src.cyan());

    let report = match executor.run(plan).await {
        Ok(report) => report,
        Err(e) => {
            report_failure(options, &[e.to_string()]);
            return Err(e.into());
        }
    };

    if report.has_errors() {
        report_failure(options, &report.errors);
        return Err(BuildError::Compilation {
            errors: report.errors,
        }
        .into());
    }

    report_success(options, &report);
    let stats = write_stats(options, &report)?;
    info!("Wrote {}", stats.display());

    eprintln!(
        "{} Finished in {}\n",
        "✓".green().bold(),
        format_duration(start.elapsed())
    );

    Ok(())
}

/// Report every rebuild; compile errors are printed but keep the watcher alive
async fn watch_write(
    options: &Options,
    plan: &BuildPlan,
    executor: &dyn BuildExecutor,
) -> Result<()> {
    let mut builds = executor.watch(plan).await?;
    eprintln!("{} Watching {}...", "→".blue(), options.src.cyan());

    while let Some(report) = builds.recv().await {
        if report.has_errors() {
            report_failure(options, &report.errors);
            continue;
        }

        write_style_placeholder(options)?;
        report_success(options, &report);
    }

    Err(BuildError::Executor("watcher stopped".to_string()).into())
}

fn report_failure(options: &Options, errors: &[String]) {
    eprintln!(
        "{}",
        format!("\n\n\n------ build failed for {} ------", options.src).red().bold()
    );
    eprintln!("{}", errors.join(ERROR_SEPARATOR).red());
}

fn report_success(options: &Options, report: &BuildReport) {
    eprintln!(
        "{}",
        format!("\n\n\n------ build succeeded for {} ------", options.src).green().bold()
    );
    for warning in &report.warnings {
        eprintln!("{} {}", "⚠".yellow(), warning.yellow());
    }
    if !report.summary.is_empty() {
        println!("{}", report.summary);
    }
}

/// Persist the full stats as `<dist>/stats.json`
pub fn write_stats(options: &Options, report: &BuildReport) -> Result<PathBuf> {
    let dist = options.dist_dir();
    fs::create_dir_all(&dist).with_context(|| format!("Failed to create {}", dist.display()))?;

    let path = dist.join("stats.json");
    let content = serde_json::to_string_pretty(&report.stats)?;
    fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(path)
}

fn write_style_placeholder(options: &Options) -> Result<PathBuf> {
    let path = options
        .dist_dir()
        .join(format!("{}{}.css", options.prefix("css"), options.bundle));

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    fs::write(&path, STYLE_PLACEHOLDER)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(path)
}
