//! Build plan assembly
//!
//! Derives the declarative bundler configuration from resolved `Options`.
//! Everything here is deterministic; the only I/O is probing for files
//! (templates, module directories) and collecting the environment.

mod plugins;
mod rules;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use walkdir::WalkDir;

use crate::config::{environment, Environment, Options};
use crate::error::ConfigError;
use crate::toolchain::{HostEnv, Toolchain};
use crate::utils::{existing, path_string, relative_path};

pub use plugins::PluginSpec;
pub use rules::{babel_options, LoaderSpec, Rule, RuleSet};

/// Extensions that can always be omitted in imports
const BASE_EXTENSIONS: [&str; 4] = [".js", ".jsx", ".json", ".coffee"];

/// Module directory entries that are not packages
const IGNORED_MODULE_DIRS: [&str; 2] = [".bin", ".cache"];

/// Keep the values whose gate is open, in order
pub(crate) fn gated<T>(candidates: impl IntoIterator<Item = (bool, T)>) -> Vec<T> {
    candidates
        .into_iter()
        .filter_map(|(enabled, value)| enabled.then_some(value))
        .collect()
}

/// Platform the bundle runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Node,
    Web,
}

/// Source map strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Devtool {
    EvalSourceMap,
    SourceMap,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Output {
    pub path: String,
    pub public_path: String,
    pub filename: String,
    pub pathinfo: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolve {
    pub extensions: Vec<String>,
    pub modules: Vec<String>,
    pub alias: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolveLoader {
    pub modules: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleConfig {
    pub rules: Vec<RuleSet>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Performance {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hints: Option<String>,
}

/// The declarative configuration handed to the build executor
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildPlan {
    pub entry: Vec<String>,
    pub output: Output,
    pub target: Target,
    pub externals: BTreeMap<String, Value>,
    pub context: String,
    pub resolve: Resolve,
    pub resolve_loader: ResolveLoader,
    pub module: ModuleConfig,
    pub devtool: Devtool,
    pub plugins: Vec<PluginSpec>,
    pub watch: bool,
    pub bail: bool,
    pub performance: Performance,
    pub environment: Environment,
}

impl BuildPlan {
    /// The emitted JavaScript bundle
    pub fn bundle_path(&self) -> PathBuf {
        PathBuf::from(&self.output.path).join(&self.output.filename)
    }

    /// The rule a file would be handled by
    pub fn rule_for(&self, file: &str) -> Option<&Rule> {
        self.module.rules.iter().find_map(|set| set.resolve(file))
    }

    /// How many top-level rule sets claim a file
    pub fn claims(&self, file: &str) -> usize {
        self.module
            .rules
            .iter()
            .filter(|set| set.resolve(file).is_some())
            .count()
    }

    pub fn plugin(&self, name: &str) -> Option<&PluginSpec> {
        self.plugins.iter().find(|p| p.name == name)
    }

    pub fn has_plugin(&self, name: &str) -> bool {
        self.plugin(name).is_some()
    }
}

/// Derives a `BuildPlan` from `Options`
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    options: Options,
    toolchain: Toolchain,
    host: HostEnv,
}

impl ConfigBuilder {
    pub fn new(options: Options, toolchain: Toolchain, host: HostEnv) -> Self {
        Self {
            options,
            toolchain,
            host,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Collect the environment, then assemble the plan
    pub async fn build(&self) -> Result<BuildPlan, ConfigError> {
        let environment = environment::collect(&self.options).await?;
        Ok(self.plan(environment))
    }

    /// Assemble the plan for a known environment
    pub fn plan(&self, environment: Environment) -> BuildPlan {
        let dev_mode = self.options.dev_mode();
        debug!(dev_mode, node = self.options.node, "Assembling build plan");

        BuildPlan {
            entry: self.entries(),
            output: self.output(),
            target: if self.options.node { Target::Node } else { Target::Web },
            externals: self.externals(),
            context: path_string(&self.options.root),
            resolve: Resolve {
                extensions: self.extensions(),
                modules: self.resolve_modules(),
                alias: self.alias(),
            },
            resolve_loader: ResolveLoader {
                modules: self.loader_modules(),
            },
            module: ModuleConfig {
                rules: self.module_rules(),
            },
            devtool: if dev_mode && !self.options.node {
                Devtool::EvalSourceMap
            } else {
                Devtool::SourceMap
            },
            plugins: self.plugins(&environment),
            watch: dev_mode,
            bail: !dev_mode,
            performance: Performance {
                hints: (!dev_mode).then(|| "warning".to_string()),
            },
            environment,
        }
    }

    /// URL the browser reload client connects to
    pub fn hostname(&self) -> String {
        match &self.host.hosting_hostname {
            Some(host) => format!("http://{}", host),
            None => format!(
                "http{}://localhost:{}/",
                if self.options.secure { "s" } else { "" },
                self.options.port
            ),
        }
    }

    fn entries(&self) -> Vec<String> {
        let o = &self.options;
        let browser_reload = !o.node && o.watch && !o.watchwrite;

        // reload machinery has to be initialized before user code runs
        gated([
            (o.node && o.watch, "webpack/hot/poll?1000".to_string()),
            (o.react && browser_reload, "react-hot-loader/patch".to_string()),
            (browser_reload, format!("webpack-dev-server/client?{}", self.hostname())),
            (browser_reload, "webpack/hot/dev-server".to_string()),
            (!o.node, "whatwg-fetch".to_string()),
            (o.node || !o.react, path_string(&o.main_path())),
            (!o.node && o.react, path_string(&self.toolchain.react_entry())),
        ])
    }

    fn output(&self) -> Output {
        let o = &self.options;
        let js_prefix = if o.node { String::new() } else { o.prefix("js") };

        Output {
            path: path_string(&o.dist_dir()),
            public_path: o.assets.clone(),
            filename: format!("{}{}.js", js_prefix, o.bundle),
            pathinfo: o.dev_mode(),
        }
    }

    /// Server bundles keep every installed package external
    fn externals(&self) -> BTreeMap<String, Value> {
        if !self.options.node {
            return self.options.externals.clone();
        }

        let mut dirs = self.toolchain.node_modules_dirs();
        dirs.extend(existing(self.options.root.join("node_modules")));
        dirs.extend(self.host.node_paths.iter().cloned());

        let mut externals = BTreeMap::new();
        for dir in dirs {
            let entries = WalkDir::new(&dir)
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok());

            for entry in entries {
                let name = entry.file_name().to_string_lossy().into_owned();
                if IGNORED_MODULE_DIRS.contains(&name.as_str()) {
                    continue;
                }
                externals.insert(name.clone(), Value::String(format!("commonjs {}", name)));
            }
        }

        debug!("{} externals for node target", externals.len());
        externals
    }

    fn extensions(&self) -> Vec<String> {
        let mut extensions: Vec<String> = BASE_EXTENSIONS.iter().map(|e| e.to_string()).collect();

        let additional = self
            .options
            .resolve
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|word| !word.is_empty())
            .map(|word| format!(".{}", word));

        for extension in additional {
            if !extensions.contains(&extension) {
                extensions.push(extension);
            }
        }

        extensions
    }

    fn toolchain_modules(&self) -> Vec<String> {
        self.toolchain
            .node_modules_dirs()
            .iter()
            .filter_map(|dir| relative_path(&self.options.root, dir))
            .filter(|rel| !rel.is_empty())
            .collect()
    }

    fn resolve_modules(&self) -> Vec<String> {
        let components = self
            .options
            .react
            .then(|| existing(self.options.src_dir().join("components")))
            .flatten()
            .map(|p| path_string(&p));

        let mut modules: Vec<String> = components.into_iter().collect();
        modules.extend(self.toolchain_modules());
        modules.push("node_modules".to_string());
        modules.extend(
            self.host
                .node_paths
                .iter()
                .filter_map(|p| relative_path(&self.options.root, p)),
        );
        modules
    }

    fn loader_modules(&self) -> Vec<String> {
        let mut modules = self.toolchain_modules();
        modules.push("node_modules".to_string());
        modules
    }

    fn alias(&self) -> BTreeMap<String, String> {
        let o = &self.options;
        let lite = !o.watch && !o.node && o.lite;

        let mut alias = BTreeMap::new();
        // the react bootstrap imports the user's component through `main`
        alias.insert("main".to_string(), path_string(&o.main_path()));
        alias.insert("src".to_string(), path_string(&o.src_dir()));
        if lite {
            alias.insert("react".to_string(), "react-lite".to_string());
            alias.insert("react-dom".to_string(), "react-lite".to_string());
        }
        alias
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Layer, OptionResolver};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    pub(super) fn builder_at(root: &Path, cli: Value) -> ConfigBuilder {
        let cli: Layer = cli.as_object().cloned().unwrap();
        let options = OptionResolver::new().resolve(&cli, None, root).unwrap();
        ConfigBuilder::new(options, Toolchain::new("/opt/pack"), HostEnv::default())
    }

    pub(super) fn plan_for(cli: Value) -> BuildPlan {
        builder_at(Path::new("/project"), cli).plan(Environment::new())
    }

    #[test]
    fn test_gated_keeps_order() {
        assert_eq!(gated([(true, 1), (false, 2), (true, 3)]), vec![1, 3]);
    }

    #[test]
    fn test_entries_production_browser() {
        let plan = plan_for(json!({}));
        assert_eq!(plan.entry, vec!["whatwg-fetch", "/project/src/main"]);
    }

    #[test]
    fn test_entries_watch_browser() {
        let plan = plan_for(json!({ "watch": true, "port": 3000 }));
        assert_eq!(
            plan.entry,
            vec![
                "webpack-dev-server/client?http://localhost:3000/",
                "webpack/hot/dev-server",
                "whatwg-fetch",
                "/project/src/main",
            ]
        );
    }

    #[test]
    fn test_entries_react_watch() {
        let plan = plan_for(json!({ "watch": true, "react": true }));

        assert_eq!(plan.entry[0], "react-hot-loader/patch");
        assert_eq!(plan.entry.last().unwrap(), "/opt/pack/runtime/react.js");
        assert!(!plan.entry.contains(&"/project/src/main".to_string()));
    }

    #[test]
    fn test_entries_watchwrite_has_no_reload_client() {
        let plan = plan_for(json!({ "watchwrite": true, "react": true }));
        assert_eq!(plan.entry, vec!["whatwg-fetch", "/opt/pack/runtime/react.js"]);
    }

    #[test]
    fn test_entries_node() {
        let plan = plan_for(json!({ "node": true, "watch": true, "react": true }));
        assert_eq!(plan.entry, vec!["webpack/hot/poll?1000", "/project/src/main"]);
    }

    #[test]
    fn test_hostname_prefers_hosting_platform() {
        let mut builder = builder_at(Path::new("/project"), json!({ "secure": true }));
        assert_eq!(builder.hostname(), "https://localhost:8080/");

        builder.host.hosting_hostname = Some("ws-1.c9users.io".to_string());
        assert_eq!(builder.hostname(), "http://ws-1.c9users.io");
    }

    #[test]
    fn test_output_filename() {
        assert_eq!(plan_for(json!({})).output.filename, "js/bundle.js");
        assert_eq!(plan_for(json!({ "flatten": true })).output.filename, "bundle.js");
        let server = plan_for(json!({ "node": true, "bundle": "server" }));
        assert_eq!(server.output.filename, "server.js");
    }

    #[test]
    fn test_output_paths() {
        let plan = plan_for(json!({ "dist": "build", "assets": "static" }));
        assert_eq!(plan.output.path, "/project/build");
        assert_eq!(plan.output.public_path, "/static/");
        assert_eq!(plan.bundle_path(), PathBuf::from("/project/build/js/bundle.js"));
    }

    #[test]
    fn test_target_and_devtool() {
        let browser = plan_for(json!({ "watch": true }));
        assert_eq!(browser.target, Target::Web);
        assert_eq!(browser.devtool, Devtool::EvalSourceMap);

        let node = plan_for(json!({ "node": true, "watch": true }));
        assert_eq!(node.target, Target::Node);
        assert_eq!(node.devtool, Devtool::SourceMap);

        assert_eq!(plan_for(json!({})).devtool, Devtool::SourceMap);
    }

    #[test]
    fn test_dev_switches() {
        let dev = plan_for(json!({ "watchwrite": true }));
        assert!(dev.watch);
        assert!(!dev.bail);
        assert_eq!(dev.performance.hints, None);
        assert!(dev.output.pathinfo);

        let prod = plan_for(json!({}));
        assert!(!prod.watch);
        assert!(prod.bail);
        assert_eq!(prod.performance.hints.as_deref(), Some("warning"));
    }

    #[test]
    fn test_extensions() {
        let plan = plan_for(json!({ "resolve": "ts, .tsx js" }));
        assert_eq!(
            plan.resolve.extensions,
            vec![".js", ".jsx", ".json", ".coffee", ".ts", ".tsx"]
        );
    }

    #[test]
    fn test_alias() {
        let plan = plan_for(json!({ "lite": true }));
        assert_eq!(plan.resolve.alias["main"], "/project/src/main");
        assert_eq!(plan.resolve.alias["src"], "/project/src");
        assert_eq!(plan.resolve.alias["react"], "react-lite");
        assert_eq!(plan.resolve.alias["react-dom"], "react-lite");

        let watching = plan_for(json!({ "lite": true, "watch": true }));
        assert!(!watching.resolve.alias.contains_key("react"));
    }

    #[test]
    fn test_browser_externals_are_user_supplied() {
        let temp = TempDir::new().unwrap();
        let cli: Layer = Layer::new();
        let file = crate::config::FileConfig {
            path: temp.path().join("pack.json"),
            values: json!({ "externals": { "jquery": "jQuery" } })
                .as_object()
                .cloned()
                .unwrap(),
        };
        let options = OptionResolver::new().resolve(&cli, Some(&file), temp.path()).unwrap();
        let plan = ConfigBuilder::new(options, Toolchain::new(temp.path()), HostEnv::default())
            .plan(Environment::new());

        assert_eq!(plan.externals.len(), 1);
        assert_eq!(plan.externals["jquery"], json!("jQuery"));
    }

    #[test]
    fn test_node_externals_list_installed_modules() {
        let temp = TempDir::new().unwrap();
        let modules = temp.path().join("node_modules");
        for name in ["express", "lodash", ".bin", ".cache"] {
            fs::create_dir_all(modules.join(name)).unwrap();
        }

        let plan = builder_at(temp.path(), json!({ "node": true })).plan(Environment::new());

        assert_eq!(plan.externals.len(), 2);
        assert_eq!(plan.externals["express"], json!("commonjs express"));
        assert_eq!(plan.externals["lodash"], json!("commonjs lodash"));
    }

    #[test]
    fn test_resolve_modules() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("project");
        fs::create_dir_all(root.join("src").join("components")).unwrap();
        let home = temp.path().join("pack");
        fs::create_dir_all(home.join("node_modules")).unwrap();
        let global = temp.path().join("global");

        let cli: Layer = json!({ "react": true }).as_object().cloned().unwrap();
        let options = OptionResolver::new().resolve(&cli, None, &root).unwrap();
        let host = HostEnv {
            hosting_hostname: None,
            node_paths: vec![global],
        };
        let plan =
            ConfigBuilder::new(options, Toolchain::new(&home), host).plan(Environment::new());

        assert_eq!(
            plan.resolve.modules,
            vec![
                path_string(&root.join("src").join("components")),
                "../pack/node_modules".to_string(),
                "node_modules".to_string(),
                "../global".to_string(),
            ]
        );
        assert_eq!(
            plan.resolve_loader.modules,
            vec!["../pack/node_modules", "node_modules"]
        );
    }

    #[test]
    fn test_environment_carried_into_plan() {
        let mut environment = Environment::new();
        environment.insert("NODE_ENV".to_string(), json!("production"));

        let plan = builder_at(Path::new("/project"), json!({})).plan(environment);
        assert_eq!(plan.environment["NODE_ENV"], json!("production"));
    }

    #[test]
    fn test_plan_serializes_camel_case() {
        let value = serde_json::to_value(plan_for(json!({}))).unwrap();

        assert_eq!(value["output"]["publicPath"], json!("/assets/"));
        assert_eq!(value["target"], json!("web"));
        assert_eq!(value["devtool"], json!("source-map"));
        assert!(value.get("resolveLoader").is_some());
        assert!(value["module"]["rules"].is_array());
    }
}
