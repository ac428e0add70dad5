//! Test runner mode

use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;
use globset::Glob;
use tracing::debug;
use walkdir::WalkDir;

use crate::config::Options;
use crate::error::TestFailure;
use crate::executor::{BuildExecutor, TestSetup};
use crate::plan::BuildPlan;

const TEST_PATTERN: &str = "**/*test.js";

/// Every `*test.js` below the source directory, outside `node_modules`
pub fn collect_test_files(options: &Options) -> Result<Vec<PathBuf>> {
    let src = options.src_dir();
    let matcher = Glob::new(TEST_PATTERN)
        .context("Invalid test pattern")?
        .compile_matcher();

    let mut files: Vec<PathBuf> = WalkDir::new(&src)
        .into_iter()
        .filter_entry(|e| e.file_name() != "node_modules")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .strip_prefix(&src)
                .map(|rel| matcher.is_match(rel))
                .unwrap_or(false)
        })
        .map(|e| e.into_path())
        .collect();

    files.sort();
    Ok(files)
}

pub async fn run(options: &Options, plan: &BuildPlan, executor: &dyn BuildExecutor) -> Result<()> {
    let files = collect_test_files(options)?;
    debug!("Found {} test files", files.len());

    let setup = TestSetup {
        react: options.react,
    };
    let report = executor.test(plan, &files, &setup).await?;

    if report.failed == 0 {
        println!("{}", "\n\n\n------ tests passed ------".green().bold());
        Ok(())
    } else {
        eprintln!(
            "{}",
            format!("\n\n\n------ {} tests failed ------", report.failed).red().bold()
        );
        Err(TestFailure {
            count: report.failed,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Layer, OptionResolver};
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_collect_test_files() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        for file in [
            "main.test.js",
            "components/App.test.js",
            "components/App.js",
            "util/latest.js",
            "node_modules/dep/dep.test.js",
        ] {
            let path = src.join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "").unwrap();
        }

        let cli: Layer = json!({ "test": true }).as_object().cloned().unwrap();
        let options = OptionResolver::new().resolve(&cli, None, temp.path()).unwrap();

        assert_eq!(
            collect_test_files(&options).unwrap(),
            vec![
                src.join("components/App.test.js"),
                src.join("main.test.js"),
                src.join("util/latest.js"),
            ]
        );
    }
}
