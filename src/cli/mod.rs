//! Command-line interface for pack
//!
//! A single flat set of flags. The merged options select one of five modes:
//! - scaffold (`--init`)
//! - test runner (`--test`)
//! - development server (`--watch`)
//! - node watch and restart (`--node --watch`)
//! - build once (default)

mod build;
mod dev;
mod init;
mod node;
mod test;

use std::env;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::{load_file_config, Layer, OptionResolver, Options, DEFAULT_SRC};
use crate::executor::ExternalExecutor;
use crate::plan::ConfigBuilder;
use crate::toolchain::{HostEnv, Toolchain};

pub use init::scaffold;
pub use test::collect_test_files;

/// pack a bundle
#[derive(Parser, Debug, Default)]
#[command(name = "pack")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Hot reload on file change (development)
    #[arg(short, long)]
    pub watch: bool,

    /// Run tests matching <src>/**/*test.js
    #[arg(short, long)]
    pub test: bool,

    /// Render "export default <Component />" from the main file
    #[arg(short, long)]
    pub react: bool,

    /// Use react-lite in production builds
    #[arg(short, long)]
    pub lite: bool,

    /// Enable css modules
    #[arg(short, long)]
    pub cssmodules: bool,

    /// Build for node
    #[arg(short, long)]
    pub node: bool,

    /// Prevent subfolders in output
    #[arg(short, long)]
    pub flatten: bool,

    /// Port of the development server [8080]
    #[arg(short, long, value_name = "NUMBER")]
    pub port: Option<u16>,

    /// Public assets path on the server [/assets/]
    #[arg(short, long, value_name = "DIRECTORY")]
    pub assets: Option<String>,

    /// Source directory [src]
    #[arg(short, long, value_name = "DIRECTORY")]
    pub src: Option<String>,

    /// Entry file in src [main]
    #[arg(short, long, value_name = "FILENAME")]
    pub main: Option<String>,

    /// Output directory [dist]
    #[arg(short, long, value_name = "DIRECTORY")]
    pub dist: Option<String>,

    /// Output bundle name in dist [bundle]
    #[arg(short, long, value_name = "FILENAME")]
    pub bundle: Option<String>,

    /// File with environment variables (.json or KEY=value lines)
    #[arg(long, value_name = "FILENAME")]
    pub env: Option<String>,

    /// Quick compile a single file
    #[arg(short, long, value_name = "FILENAME")]
    pub quick: Option<String>,

    /// Proxy port or address for the development server
    #[arg(long, value_name = "ADDRESS")]
    pub proxy: Option<String>,

    /// Serve and proxy over https
    #[arg(long)]
    pub secure: bool,

    /// Write the bundle on file change (development)
    #[arg(long)]
    pub watchwrite: bool,

    /// Additional extensions to resolve, e.g. "ts tsx"
    #[arg(long, value_name = "EXTENSIONS")]
    pub resolve: Option<String>,

    /// HTML template file in src [index.html]
    #[arg(long, value_name = "FILENAME")]
    pub index: Option<String>,

    /// Scaffold a new project in the current directory
    #[arg(long)]
    pub init: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Print the build configuration as JSON and exit
    #[arg(long)]
    pub print_config: bool,
}

/// What one invocation does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Scaffold,
    Test,
    Serve,
    NodeWatch,
    BuildOnce,
}

impl Mode {
    pub fn select(options: &Options) -> Self {
        if options.init {
            Mode::Scaffold
        } else if options.test {
            Mode::Test
        } else if options.watch && !options.node {
            Mode::Serve
        } else if options.watch && options.node {
            Mode::NodeWatch
        } else {
            Mode::BuildOnce
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Mode::Scaffold => "scaffold",
            Mode::Test => "test",
            Mode::Serve => "serve",
            Mode::NodeWatch => "node watch",
            Mode::BuildOnce => "build",
        }
    }
}

impl Cli {
    /// The flags the user actually passed, keyed by option name
    pub fn flags(&self) -> Layer {
        let switches = [
            ("watch", self.watch),
            ("test", self.test),
            ("react", self.react),
            ("lite", self.lite),
            ("cssmodules", self.cssmodules),
            ("node", self.node),
            ("flatten", self.flatten),
            ("secure", self.secure),
            ("watchwrite", self.watchwrite),
            ("init", self.init),
        ];

        let values = [
            ("assets", &self.assets),
            ("src", &self.src),
            ("main", &self.main),
            ("dist", &self.dist),
            ("bundle", &self.bundle),
            ("env", &self.env),
            ("quick", &self.quick),
            ("proxy", &self.proxy),
            ("resolve", &self.resolve),
            ("index", &self.index),
        ];

        let mut layer = Layer::new();
        for (name, _) in switches.iter().filter(|(_, on)| *on) {
            layer.insert(name.to_string(), Value::Bool(true));
        }
        for (name, value) in values {
            if let Some(value) = value {
                layer.insert(name.to_string(), Value::String(value.clone()));
            }
        }
        if let Some(port) = self.port {
            layer.insert("port".to_string(), Value::from(port));
        }

        layer
    }

    /// Execute the CLI command
    pub async fn execute(&self) -> Result<()> {
        let cwd = env::current_dir().context("Failed to read the working directory")?;

        let src = self.src.as_deref().unwrap_or(DEFAULT_SRC);
        let file = load_file_config(&cwd, src)?;
        let options = OptionResolver::new().resolve(&self.flags(), file.as_ref(), &cwd)?;
        let mode = Mode::select(&options);

        print_banner(mode);
        debug!("Resolved options: {:?}", options);

        if mode == Mode::Scaffold {
            return scaffold(&options);
        }

        let toolchain = Toolchain::discover();
        let builder = ConfigBuilder::new(options, toolchain.clone(), HostEnv::from_process());
        let plan = builder.build().await?;
        let options = builder.options();

        if self.print_config {
            println!("{}", serde_json::to_string_pretty(&plan)?);
            return Ok(());
        }

        if options.react && !options.node {
            let entry = toolchain.install_runtime()?;
            debug!("React entry at {}", entry.display());
        }

        info!("Running in {} mode", mode.describe());
        let executor = ExternalExecutor::new(toolchain.executor_command(), &options.root);

        match mode {
            Mode::Test => test::run(options, &plan, &executor).await,
            Mode::Serve => dev::serve(options, &plan, &executor).await,
            Mode::NodeWatch => node::watch(&plan, &executor).await,
            Mode::BuildOnce => build::run(options, &plan, &executor).await,
            Mode::Scaffold => Ok(()),
        }
    }
}

/// Print the pack banner
fn print_banner(mode: Mode) {
    eprintln!(
        "\n{} {} {}\n",
        "▲".cyan(),
        "pack".bold().cyan(),
        format!("v{} · {}", env!("CARGO_PKG_VERSION"), mode.describe()).dimmed()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::path::Path;

    fn options(cli: Value) -> Options {
        let cli: Layer = cli.as_object().cloned().unwrap();
        OptionResolver::new().resolve(&cli, None, Path::new("/project")).unwrap()
    }

    #[test]
    fn test_flags_only_contain_passed_values() {
        let cli = Cli::parse_from(["pack", "-w", "-p", "3000", "--src", "lib"]);
        let flags = cli.flags();

        assert_eq!(
            Value::Object(flags),
            json!({ "watch": true, "port": 3000, "src": "lib" })
        );
    }

    #[test]
    fn test_flags_empty_by_default() {
        let cli = Cli::parse_from(["pack"]);
        assert!(cli.flags().is_empty());
    }

    #[test]
    fn test_short_flags() {
        let cli = Cli::parse_from(["pack", "-rlcnf", "-q", "demo.js", "-b", "app", "-d", "out"]);

        assert!(cli.react && cli.lite && cli.cssmodules && cli.node && cli.flatten);
        assert_eq!(cli.quick.as_deref(), Some("demo.js"));
        assert_eq!(cli.bundle.as_deref(), Some("app"));
        assert_eq!(cli.dist.as_deref(), Some("out"));
    }

    #[test]
    fn test_mode_priority() {
        assert_eq!(Mode::select(&options(json!({}))), Mode::BuildOnce);
        assert_eq!(Mode::select(&options(json!({ "watchwrite": true }))), Mode::BuildOnce);
        assert_eq!(Mode::select(&options(json!({ "watch": true }))), Mode::Serve);
        assert_eq!(
            Mode::select(&options(json!({ "watch": true, "node": true }))),
            Mode::NodeWatch
        );
        assert_eq!(
            Mode::select(&options(json!({ "test": true, "watch": true }))),
            Mode::Test
        );
        assert_eq!(
            Mode::select(&options(json!({ "init": true, "test": true }))),
            Mode::Scaffold
        );
    }
}
