//! Option resolution for pack
//!
//! Merges defaults, quick-mode overrides, the project config file
//! (`pack.json` / `.packrc`) and command-line flags into one `Options` record.

pub mod environment;
mod schema;

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use figment::providers::Serialized;
use figment::Figment;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::ConfigError;
use crate::utils::clean_path;

pub use environment::Environment;
pub use schema::*;

/// Source directory used when looking for a config file before options are known
pub const DEFAULT_SRC: &str = "src";

/// Config file names, in lookup order
const CONFIG_FILE_NAMES: [&str; 2] = ["pack.json", ".packrc"];

/// The merged options driving one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Options {
    pub watch: bool,
    pub test: bool,
    pub react: bool,
    pub lite: bool,
    pub cssmodules: bool,
    pub node: bool,
    pub flatten: bool,
    #[serde(deserialize_with = "deserialize_port")]
    pub port: u16,
    pub assets: String,
    pub src: String,
    pub main: String,
    pub dist: String,
    pub bundle: String,
    pub env: String,
    pub proxy: String,
    pub secure: bool,
    pub watchwrite: bool,
    pub resolve: String,
    pub index: String,
    #[serde(default)]
    pub quick: Option<String>,
    pub init: bool,
    #[serde(default)]
    pub externals: BTreeMap<String, Value>,
    pub root: PathBuf,
}

impl Options {
    /// Live reload or write-on-change both mean development
    pub fn dev_mode(&self) -> bool {
        self.watch || self.watchwrite
    }

    /// The requested env file, if any
    pub fn env_file(&self) -> Option<&str> {
        Some(self.env.as_str()).filter(|e| !e.is_empty())
    }

    /// The dev-server proxy target, if any
    pub fn proxy_target(&self) -> Option<&str> {
        Some(self.proxy.as_str()).filter(|p| !p.is_empty())
    }

    pub fn src_dir(&self) -> PathBuf {
        self.root.join(&self.src)
    }

    pub fn main_path(&self) -> PathBuf {
        self.src_dir().join(&self.main)
    }

    pub fn dist_dir(&self) -> PathBuf {
        self.root.join(&self.dist)
    }

    /// Output sub-directory for a kind of asset, or nothing when flattened
    pub fn prefix(&self, dir: &str) -> String {
        if self.flatten {
            String::new()
        } else {
            format!("{}/", dir)
        }
    }
}

fn deserialize_port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    struct PortVisitor;

    impl<'de> Visitor<'de> for PortVisitor {
        type Value = u16;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a port number")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u16, E> {
            u16::try_from(v).map_err(|_| E::custom(format!("port {} out of range", v)))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<u16, E> {
            u16::try_from(v).map_err(|_| E::custom(format!("port {} out of range", v)))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<u16, E> {
            v.trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid port '{}'", v)))
        }
    }

    deserializer.deserialize_any(PortVisitor)
}

/// A config file that was found and parsed
#[derive(Debug, Clone)]
pub struct FileConfig {
    pub path: PathBuf,
    pub values: Layer,
}

/// Find and parse the project config file.
///
/// Candidates are `<src>/pack.json`, `./pack.json`, `<src>/.packrc` and
/// `./.packrc`. The first readable one wins; a readable file with invalid
/// JSON is an error rather than a reason to try the next candidate.
pub fn load_file_config(cwd: &Path, src: &str) -> Result<Option<FileConfig>, ConfigError> {
    let candidates = CONFIG_FILE_NAMES
        .iter()
        .flat_map(|name| [cwd.join(src).join(name), cwd.join(name)]);

    for path in candidates {
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(_) => continue,
        };

        let value: Value = serde_json::from_slice(&content).map_err(|e| ConfigError::Parse {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        return match value {
            Value::Object(values) => {
                debug!("Using config file {}", path.display());
                Ok(Some(FileConfig { path, values }))
            }
            _ => Err(ConfigError::Parse {
                path,
                reason: "expected an object".to_string(),
            }),
        };
    }

    Ok(None)
}

/// Collapse an asset URL prefix to `/` or `/<segments>/`
pub fn normalize_assets(assets: &str) -> String {
    let cleaned = clean_path(assets);
    let trimmed = cleaned.trim_matches('/');

    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", trimmed)
    }
}

/// Options implied by compiling a single file
pub fn quick_layer(quick: &str) -> Layer {
    let path = Path::new(quick);
    let src = match path.parent().map(|p| p.to_string_lossy().into_owned()) {
        Some(dir) if !dir.is_empty() => dir,
        _ => ".".to_string(),
    };
    let main = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let layer = json!({
        "src": src,
        "main": main,
        "flatten": true,
        "assets": "",
    });

    match layer {
        Value::Object(map) => map,
        _ => Layer::new(),
    }
}

/// Merges option layers into `Options`
pub struct OptionResolver {
    schema: &'static OptionSchema,
}

impl Default for OptionResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl OptionResolver {
    pub fn new() -> Self {
        Self {
            schema: OptionSchema::global(),
        }
    }

    /// Resolve the final options.
    ///
    /// Precedence, lowest first: defaults, quick mode, file config, CLI
    /// flags, then `root` from `cwd`.
    pub fn resolve(
        &self,
        cli: &Layer,
        file: Option<&FileConfig>,
        cwd: &Path,
    ) -> Result<Options, ConfigError> {
        let file_values = file.map(|f| f.values.clone()).unwrap_or_default();

        let unknown = self.schema.unknown_keys(&file_values);
        if !unknown.is_empty() {
            return Err(ConfigError::InvalidOptions { keys: unknown });
        }

        let cli_values = self.schema.pick(cli, Source::Cli);
        let quick = cli_values
            .get("quick")
            .and_then(Value::as_str)
            .map(quick_layer)
            .unwrap_or_default();

        if !quick.is_empty() {
            debug!("Quick mode layer: {:?}", quick);
        }

        let figment = Figment::new()
            .merge(Serialized::defaults(self.schema.defaults()))
            .merge(Serialized::defaults(quick))
            .merge(Serialized::defaults(self.schema.pick(&file_values, Source::File)))
            .merge(Serialized::defaults(cli_values))
            .merge(Serialized::default("root", cwd));

        let mut options: Options = figment
            .extract()
            .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;

        options.assets = normalize_assets(&options.assets);

        Ok(options)
    }
}
