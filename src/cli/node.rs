//! Node watch mode: rebuild and restart the server bundle

use anyhow::Result;
use colored::Colorize;

use crate::error::BuildError;
use crate::executor::BuildExecutor;
use crate::plan::BuildPlan;
use crate::supervisor;

pub async fn watch(plan: &BuildPlan, executor: &dyn BuildExecutor) -> Result<()> {
    let bundle = plan.bundle_path();
    let builds = executor.watch(plan).await?;

    eprintln!("{} Watching, running {}", "→".blue(), bundle.display().to_string().cyan());
    supervisor::run(builds, &[supervisor::NODE.to_string()], &bundle).await;

    Err(BuildError::Executor("watcher stopped".to_string()).into())
}
