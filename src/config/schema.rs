//! Option schema definitions
//!
//! Every option pack understands is registered here together with its
//! default and the sources (command line, config file) allowed to set it.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use serde_json::{json, Map, Value};

use crate::error::SchemaError;

/// A single layer of raw option values, keyed by option name
pub type Layer = Map<String, Value>;

/// Where a layer of options came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cli,
    File,
}

/// Which sources may set an option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Both,
    CliOnly,
    FileOnly,
}

/// A registered option
#[derive(Debug, Clone)]
pub struct SchemaEntry {
    pub name: &'static str,
    pub default: Value,
    pub validity: Validity,
}

impl SchemaEntry {
    fn new(name: &'static str, default: Value, validity: Validity) -> Self {
        Self { name, default, validity }
    }

    pub fn valid_for_cli(&self) -> bool {
        matches!(self.validity, Validity::Both | Validity::CliOnly)
    }

    pub fn valid_for_file(&self) -> bool {
        matches!(self.validity, Validity::Both | Validity::FileOnly)
    }

    fn valid_for(&self, source: Source) -> bool {
        match source {
            Source::Cli => self.valid_for_cli(),
            Source::File => self.valid_for_file(),
        }
    }
}

static BUILTIN: Lazy<OptionSchema> = Lazy::new(OptionSchema::builtin);

/// The set of recognized options
#[derive(Debug, Clone)]
pub struct OptionSchema {
    entries: Vec<SchemaEntry>,
}

impl OptionSchema {
    /// The schema of all options pack supports
    pub fn global() -> &'static OptionSchema {
        &BUILTIN
    }

    fn builtin() -> Self {
        use Validity::*;

        let entries = vec![
            // development modes only make sense per invocation
            SchemaEntry::new("watch", json!(false), CliOnly),
            SchemaEntry::new("test", json!(false), CliOnly),
            SchemaEntry::new("react", json!(false), Both),
            SchemaEntry::new("lite", json!(false), Both),
            SchemaEntry::new("cssmodules", json!(false), Both),
            SchemaEntry::new("node", json!(false), Both),
            SchemaEntry::new("flatten", json!(false), Both),
            SchemaEntry::new("port", json!(8080), Both),
            SchemaEntry::new("assets", json!("/assets/"), Both),
            SchemaEntry::new("src", json!("src"), Both),
            SchemaEntry::new("main", json!("main"), Both),
            SchemaEntry::new("dist", json!("dist"), Both),
            SchemaEntry::new("bundle", json!("bundle"), Both),
            SchemaEntry::new("env", json!(""), Both),
            SchemaEntry::new("proxy", json!(""), Both),
            SchemaEntry::new("secure", json!(false), Both),
            SchemaEntry::new("watchwrite", json!(false), CliOnly),
            SchemaEntry::new("resolve", json!(""), Both),
            SchemaEntry::new("index", json!("index.html"), Both),
            SchemaEntry::new("quick", Value::Null, CliOnly),
            SchemaEntry::new("init", json!(false), CliOnly),
            // a mapping can't be expressed as a flag
            SchemaEntry::new("externals", json!({}), FileOnly),
        ];

        Self { entries }
    }

    /// All registered entries in registration order
    pub fn entries(&self) -> &[SchemaEntry] {
        &self.entries
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    fn entry(&self, name: &str) -> Result<&SchemaEntry, SchemaError> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| SchemaError::Unregistered(name.to_string()))
    }

    pub fn is_valid_for_file(&self, name: &str) -> Result<bool, SchemaError> {
        Ok(self.entry(name)?.valid_for_file())
    }

    pub fn is_valid_for_cli(&self, name: &str) -> Result<bool, SchemaError> {
        Ok(self.entry(name)?.valid_for_cli())
    }

    pub fn default_of(&self, name: &str) -> Result<&Value, SchemaError> {
        Ok(&self.entry(name)?.default)
    }

    /// The lowest layer: every option with a non-null default
    pub fn defaults(&self) -> Layer {
        self.entries
            .iter()
            .filter(|e| !e.default.is_null())
            .map(|e| (e.name.to_string(), e.default.clone()))
            .collect()
    }

    /// Keep only the keys a source is allowed to set.
    ///
    /// Null values count as absent so they never erase a lower layer.
    pub fn pick(&self, layer: &Layer, source: Source) -> Layer {
        self.entries
            .iter()
            .filter(|e| e.valid_for(source))
            .filter_map(|e| {
                layer
                    .get(e.name)
                    .filter(|v| !v.is_null())
                    .map(|v| (e.name.to_string(), v.clone()))
            })
            .collect()
    }

    /// Keys of `layer` that are not registered, sorted
    pub fn unknown_keys(&self, layer: &Layer) -> Vec<String> {
        layer
            .keys()
            .filter(|k| !self.is_registered(k))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(value: Value) -> Layer {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_validity_per_source() {
        let schema = OptionSchema::global();

        assert_eq!(schema.is_valid_for_file("watch"), Ok(false));
        assert_eq!(schema.is_valid_for_cli("watch"), Ok(true));
        assert_eq!(schema.is_valid_for_file("externals"), Ok(true));
        assert_eq!(schema.is_valid_for_cli("externals"), Ok(false));
        assert_eq!(schema.is_valid_for_file("react"), Ok(true));
        assert_eq!(schema.is_valid_for_cli("react"), Ok(true));
    }

    #[test]
    fn test_unregistered_names_fail() {
        let schema = OptionSchema::global();

        assert_eq!(
            schema.default_of("bogus"),
            Err(SchemaError::Unregistered("bogus".to_string()))
        );
        assert!(schema.is_valid_for_cli("bogus").is_err());
    }

    #[test]
    fn test_defaults_skip_null() {
        let defaults = OptionSchema::global().defaults();

        assert_eq!(defaults.get("port"), Some(&json!(8080)));
        assert_eq!(defaults.get("assets"), Some(&json!("/assets/")));
        assert!(!defaults.contains_key("quick"));
    }

    #[test]
    fn test_pick_filters_by_source() {
        let schema = OptionSchema::global();
        let raw = layer(json!({
            "watch": true,
            "react": true,
            "externals": { "jquery": "jQuery" },
            "env": null,
        }));

        let file = schema.pick(&raw, Source::File);
        assert!(!file.contains_key("watch"));
        assert!(file.contains_key("react"));
        assert!(file.contains_key("externals"));
        assert!(!file.contains_key("env"));

        let cli = schema.pick(&raw, Source::Cli);
        assert!(cli.contains_key("watch"));
        assert!(!cli.contains_key("externals"));
    }

    #[test]
    fn test_unknown_keys_collects_all() {
        let schema = OptionSchema::global();
        let raw = layer(json!({ "zeta": 1, "bogus": true, "react": true }));

        assert_eq!(schema.unknown_keys(&raw), vec!["bogus", "zeta"]);
    }
}
