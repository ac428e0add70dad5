//! Build executor adapter
//!
//! Bundling, dev serving and test running happen in an external toolchain.
//! pack hands it the serialized `BuildPlan` and reads back one JSON event
//! per line on stdout.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info};
use url::Url;

use crate::config::Options;
use crate::error::BuildError;
use crate::plan::BuildPlan;
use crate::utils::path_string;

/// Outcome of one compilation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildReport {
    pub hash: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Human readable stats table
    pub summary: String,
    /// Full stats, persisted as `stats.json`
    pub stats: Value,
}

impl BuildReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestReport {
    pub passed: usize,
    pub failed: usize,
}

/// Globals the test runner installs before loading test files
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestSetup {
    /// Provide `mount` and a DOM for component tests
    pub react: bool,
}

/// One line of executor output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ExecutorEvent {
    Build(BuildReport),
    Listening { url: String },
    Tests(TestReport),
    Log { message: String },
}

impl ExecutorEvent {
    /// Anything that is not a JSON event is relayed as a log line
    pub fn parse(line: &str) -> Self {
        serde_json::from_str(line).unwrap_or_else(|_| ExecutorEvent::Log {
            message: line.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryFallback {
    pub index: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyRule {
    pub target: String,
    /// Accept self-signed certificates on the target
    pub secure: bool,
}

/// Development server settings derived from options
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevServerSettings {
    pub public_path: String,
    pub host: String,
    pub port: u16,
    pub https: bool,
    pub hot: bool,
    pub inline: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_api_fallback: Option<HistoryFallback>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyRule>,
}

impl DevServerSettings {
    pub fn from_options(options: &Options) -> Self {
        let proxy = options.proxy_target().map(|address| ProxyRule {
            target: proxy_url(address, options.secure),
            secure: false,
        });

        let history_api_fallback = proxy.is_none().then(|| HistoryFallback {
            index: format!("{}index.html", options.assets),
        });

        Self {
            public_path: options.assets.clone(),
            host: "0.0.0.0".to_string(),
            port: options.port,
            https: options.secure,
            hot: true,
            inline: true,
            history_api_fallback,
            proxy,
        }
    }

    /// Address printed for the user
    pub fn url(&self) -> String {
        format!("http{}://localhost:{}", if self.https { "s" } else { "" }, self.port)
    }
}

/// Bare ports proxy to localhost; anything else is taken as an address
pub fn proxy_url(address: &str, secure: bool) -> String {
    let scheme = if secure { "https" } else { "http" };

    if !address.is_empty() && address.chars().all(|c| c.is_ascii_digit()) {
        return format!("{}://localhost:{}", scheme, address);
    }

    match Url::parse(address) {
        Ok(url) if url.has_host() => address.to_string(),
        _ => format!("{}://{}", scheme, address),
    }
}

/// The external toolchain doing the actual bundling
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    /// Compile once
    async fn run(&self, plan: &BuildPlan) -> Result<BuildReport, BuildError>;

    /// Compile on every change; the channel closes when the executor stops
    async fn watch(&self, plan: &BuildPlan) -> Result<mpsc::Receiver<BuildReport>, BuildError>;

    /// Run the development server
    async fn serve(
        &self,
        plan: &BuildPlan,
        settings: &DevServerSettings,
    ) -> Result<mpsc::Receiver<ExecutorEvent>, BuildError>;

    /// Run the given test files
    async fn test(
        &self,
        plan: &BuildPlan,
        files: &[PathBuf],
        setup: &TestSetup,
    ) -> Result<TestReport, BuildError>;
}

/// Runs an adapter process: `<command> <run|watch|serve|test> <plan.json> [settings.json]`
pub struct ExternalExecutor {
    command: Vec<String>,
    work_dir: PathBuf,
}

impl ExternalExecutor {
    pub fn new(command: Vec<String>, root: &Path) -> Self {
        Self {
            command,
            work_dir: root.join("node_modules").join(".cache").join("pack"),
        }
    }

    async fn write_json<T: Serialize + ?Sized>(
        &self,
        name: &str,
        value: &T,
    ) -> Result<PathBuf, BuildError> {
        let path = self.work_dir.join(name);
        let content = serde_json::to_string_pretty(value)
            .map_err(|e| BuildError::Executor(format!("Failed to serialize {}: {}", name, e)))?;

        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|e| {
                BuildError::Executor(format!(
                    "Failed to create {}: {}",
                    self.work_dir.display(),
                    e
                ))
            })?;
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| {
                BuildError::Executor(format!("Failed to write {}: {}", path.display(), e))
            })?;

        Ok(path)
    }

    fn spawn(
        &self,
        subcommand: &str,
        files: &[PathBuf],
    ) -> Result<(Child, mpsc::Receiver<ExecutorEvent>), BuildError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| BuildError::Executor("no executor command configured".to_string()))?;

        debug!("Spawning executor: {} {} {}", program, args.join(" "), subcommand);

        let mut child = Command::new(program)
            .args(args)
            .arg(subcommand)
            .args(files.iter().map(|f| path_string(f)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BuildError::Executor(format!("Failed to start {}: {}", program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BuildError::Executor("executor stdout unavailable".to_string()))?;

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                if tx.send(ExecutorEvent::parse(&line)).await.is_err() {
                    break;
                }
            }
        });

        Ok((child, rx))
    }

    async fn finish(mut child: Child) -> Result<(), BuildError> {
        let status = child
            .wait()
            .await
            .map_err(|e| BuildError::Executor(e.to_string()))?;

        if status.success() {
            Ok(())
        } else {
            Err(BuildError::Executor(format!("executor exited with {}", status)))
        }
    }
}

#[async_trait]
impl BuildExecutor for ExternalExecutor {
    async fn run(&self, plan: &BuildPlan) -> Result<BuildReport, BuildError> {
        let plan_file = self.write_json("plan.json", plan).await?;
        let (child, mut events) = self.spawn("run", &[plan_file])?;

        let mut report = None;
        while let Some(event) = events.recv().await {
            match event {
                ExecutorEvent::Build(build) => report = Some(build),
                ExecutorEvent::Log { message } => info!("{}", message),
                other => debug!("Ignoring executor event {:?}", other),
            }
        }

        let exit = Self::finish(child).await;
        match (report, exit) {
            (Some(report), _) => Ok(report),
            (None, Err(e)) => Err(e),
            (None, Ok(())) => Err(BuildError::Executor("no build report received".to_string())),
        }
    }

    async fn watch(&self, plan: &BuildPlan) -> Result<mpsc::Receiver<BuildReport>, BuildError> {
        let plan_file = self.write_json("plan.json", plan).await?;
        let (child, mut events) = self.spawn("watch", &[plan_file])?;

        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            // the child lives as long as this task
            let _child = child;
            while let Some(event) = events.recv().await {
                match event {
                    ExecutorEvent::Build(report) => {
                        if tx.send(report).await.is_err() {
                            break;
                        }
                    }
                    ExecutorEvent::Log { message } => info!("{}", message),
                    other => debug!("Ignoring executor event {:?}", other),
                }
            }
        });

        Ok(rx)
    }

    async fn serve(
        &self,
        plan: &BuildPlan,
        settings: &DevServerSettings,
    ) -> Result<mpsc::Receiver<ExecutorEvent>, BuildError> {
        let plan_file = self.write_json("plan.json", plan).await?;
        let settings_file = self.write_json("server.json", settings).await?;
        let (child, mut events) = self.spawn("serve", &[plan_file, settings_file])?;

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let _child = child;
            while let Some(event) = events.recv().await {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }

    async fn test(
        &self,
        plan: &BuildPlan,
        files: &[PathBuf],
        setup: &TestSetup,
    ) -> Result<TestReport, BuildError> {
        let plan_file = self.write_json("plan.json", plan).await?;
        let settings = serde_json::json!({
            "files": files.iter().map(|f| path_string(f)).collect::<Vec<_>>(),
            "setup": setup,
        });
        let settings_file = self.write_json("test.json", &settings).await?;
        let (child, mut events) = self.spawn("test", &[plan_file, settings_file])?;

        let mut report = None;
        while let Some(event) = events.recv().await {
            match event {
                ExecutorEvent::Tests(tests) => report = Some(tests),
                ExecutorEvent::Build(build) if build.has_errors() => {
                    return Err(BuildError::Compilation {
                        errors: build.errors,
                    });
                }
                ExecutorEvent::Log { message } => println!("{}", message),
                other => debug!("Ignoring executor event {:?}", other),
            }
        }

        // a failing test run may exit non-zero after reporting
        let exit = Self::finish(child).await;
        match (report, exit) {
            (Some(report), _) => Ok(report),
            (None, Err(e)) => Err(e),
            (None, Ok(())) => Err(BuildError::Executor("no test report received".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Layer, OptionResolver};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn options(cli: Value) -> Options {
        let cli: Layer = cli.as_object().cloned().unwrap();
        OptionResolver::new().resolve(&cli, None, Path::new("/project")).unwrap()
    }

    #[test]
    fn test_parse_events() {
        assert_eq!(
            ExecutorEvent::parse(r#"{"type":"build","hash":"abc","errors":["boom"]}"#),
            ExecutorEvent::Build(BuildReport {
                hash: "abc".to_string(),
                errors: vec!["boom".to_string()],
                ..Default::default()
            })
        );
        assert_eq!(
            ExecutorEvent::parse(r#"{"type":"listening","url":"http://localhost:8080"}"#),
            ExecutorEvent::Listening {
                url: "http://localhost:8080".to_string()
            }
        );
        assert_eq!(
            ExecutorEvent::parse(r#"{"type":"tests","passed":3,"failed":1}"#),
            ExecutorEvent::Tests(TestReport { passed: 3, failed: 1 })
        );
    }

    #[test]
    fn test_parse_plain_line_is_log() {
        assert_eq!(
            ExecutorEvent::parse("webpack: Compiled successfully."),
            ExecutorEvent::Log {
                message: "webpack: Compiled successfully.".to_string()
            }
        );
        assert!(matches!(
            ExecutorEvent::parse(r#"{"type":"unknown"}"#),
            ExecutorEvent::Log { .. }
        ));
    }

    #[test]
    fn test_proxy_url() {
        assert_eq!(proxy_url("3000", false), "http://localhost:3000");
        assert_eq!(proxy_url("3000", true), "https://localhost:3000");
        assert_eq!(proxy_url("http://api.local:9000", true), "http://api.local:9000");
        assert_eq!(proxy_url("api.local:9000", false), "http://api.local:9000");
    }

    #[test]
    fn test_dev_server_settings_without_proxy() {
        let settings =
            DevServerSettings::from_options(&options(json!({ "watch": true, "port": 3000 })));

        assert_eq!(settings.public_path, "/assets/");
        assert_eq!(settings.host, "0.0.0.0");
        assert_eq!(settings.port, 3000);
        assert!(!settings.https);
        assert_eq!(
            settings.history_api_fallback,
            Some(HistoryFallback {
                index: "/assets/index.html".to_string()
            })
        );
        assert_eq!(settings.proxy, None);
        assert_eq!(settings.url(), "http://localhost:3000");
    }

    #[test]
    fn test_dev_server_settings_with_proxy() {
        let settings = DevServerSettings::from_options(&options(
            json!({ "watch": true, "proxy": "4000", "secure": true }),
        ));

        assert_eq!(settings.history_api_fallback, None);
        assert_eq!(settings.proxy.as_ref().unwrap().target, "https://localhost:4000");
        assert!(settings.https);
        assert_eq!(settings.url(), "https://localhost:8080");

        let value = serde_json::to_value(&settings).unwrap();
        assert_eq!(value["publicPath"], json!("/assets/"));
        assert!(value.get("historyApiFallback").is_none());
    }
}
