//! Development server mode

use anyhow::Result;
use colored::Colorize;
use tracing::{debug, info};

use crate::config::Options;
use crate::error::BuildError;
use crate::executor::{BuildExecutor, DevServerSettings, ExecutorEvent};
use crate::plan::BuildPlan;

/// Serve with hot reloading until the executor stops
pub async fn serve(
    options: &Options,
    plan: &BuildPlan,
    executor: &dyn BuildExecutor,
) -> Result<()> {
    let settings = DevServerSettings::from_options(options);
    debug!("Dev server settings: {:?}", settings);

    let mut events = executor.serve(plan, &settings).await?;
    let mut announced = false;

    while let Some(event) = events.recv().await {
        match event {
            ExecutorEvent::Listening { url } => {
                debug!("Executor listening on {}", url);
                if !announced {
                    announced = true;
                    println!("{}", settings.url());
                    if let Some(proxy) = &settings.proxy {
                        eprintln!("  {} Proxying to {}", "•".dimmed(), proxy.target.cyan());
                    }
                    eprintln!("  {} Press {} to stop\n", "•".dimmed(), "Ctrl+C".yellow());
                }
            }
            ExecutorEvent::Build(report) if report.has_errors() => {
                eprintln!("{}", "\n------ compile failed ------".red().bold());
                eprintln!("{}", report.errors.join("\n\n\n------\n\n").red());
            }
            ExecutorEvent::Build(report) => info!("Compiled {}", report.hash),
            ExecutorEvent::Log { message } => println!("{}", message),
            ExecutorEvent::Tests(_) => {}
        }
    }

    Err(BuildError::Executor("development server stopped".to_string()).into())
}
