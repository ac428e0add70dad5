//! Bundler plugin list

use serde::Serialize;
use serde_json::{json, Map, Value};

use super::{gated, ConfigBuilder};
use crate::config::Environment;
use crate::utils::{existing, path_string};

/// Browsers targeted by the css prefixer
const AUTOPREFIXER_BROWSERS: [&str; 4] = [">1%", "last 4 versions", "Firefox ESR", "not ie < 9"];

/// A named plugin and its options
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginSpec {
    pub name: String,
    pub options: Value,
}

impl PluginSpec {
    fn new(name: &str, options: Value) -> Self {
        Self {
            name: name.to_string(),
            options,
        }
    }
}

impl ConfigBuilder {
    pub(super) fn plugins(&self, environment: &Environment) -> Vec<PluginSpec> {
        let o = &self.options;
        let dev_mode = o.dev_mode();

        let template = existing(o.src_dir().join(&o.index));
        let html = !o.node
            && (dev_mode || template.is_some() || o.quick.is_some())
            && o.proxy_target().is_none();

        let html_options = match &template {
            Some(path) => json!({ "template": path_string(path), "inject": true }),
            None => json!({}),
        };

        gated([
            (dev_mode, PluginSpec::new("HotModuleReplacementPlugin", json!({}))),
            (dev_mode, PluginSpec::new("NamedModulesPlugin", json!({}))),
            (
                true,
                PluginSpec::new(
                    "LoaderOptionsPlugin",
                    json!({
                        "minimize": !dev_mode,
                        "debug": dev_mode,
                        "options": {
                            "postcss": [{ "autoprefixer": { "browsers": AUTOPREFIXER_BROWSERS } }],
                        },
                    }),
                ),
            ),
            (true, PluginSpec::new("DefinePlugin", Value::Object(definitions(environment)))),
            (
                !dev_mode,
                PluginSpec::new(
                    "UglifyJsPlugin",
                    json!({
                        "sourceMap": true,
                        "compress": { "screw_ie8": true, "warnings": false },
                        "mangle": { "screw_ie8": true },
                        "output": { "comments": false, "screw_ie8": true },
                    }),
                ),
            ),
            (
                !o.node && !dev_mode,
                PluginSpec::new(
                    "ExtractTextPlugin",
                    json!({ "filename": format!("{}{}.css", o.prefix("css"), o.bundle) }),
                ),
            ),
            (html, PluginSpec::new("HtmlWebpackPlugin", html_options)),
            (dev_mode, PluginSpec::new("CaseSensitivePathsPlugin", json!({}))),
        ])
    }
}

/// `process.env.KEY` replacements; every value is inlined as JSON source
pub fn definitions(environment: &Environment) -> Map<String, Value> {
    environment
        .iter()
        .map(|(key, value)| {
            (
                format!("process.env.{}", key),
                Value::String(value.to_string()),
            )
        })
        .collect()
}
