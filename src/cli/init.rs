//! Project scaffolding

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::{json, Map, Value};

use crate::config::{OptionSchema, Options, DEFAULT_SRC};
use crate::error::ScaffoldConflict;

/// Version range written for every generated dependency
const DEPENDENCY_VERSION: &str = "latest";

const DEV_DEPENDENCIES: [&str; 7] = [
    "babel-eslint",
    "eslint",
    "eslint-config-airbnb",
    "eslint-plugin-import",
    "eslint-plugin-jsx-a11y",
    "eslint-plugin-react",
    "pack-cli",
];

/// Create a new project in an empty root
pub fn scaffold(options: &Options) -> Result<()> {
    if !is_empty_project(&options.root)? {
        return Err(ScaffoldConflict {
            root: options.root.clone(),
        }
        .into());
    }

    eprintln!("{} Initializing new project...\n", "→".blue());

    let src = options.src_dir();
    fs::create_dir_all(&src).with_context(|| format!("Failed to create {}", src.display()))?;

    let pack_json_dir = if options.src == DEFAULT_SRC {
        src.clone()
    } else {
        options.root.clone()
    };

    let files = [
        (options.root.join("package.json"), to_json(&package_json(options))?),
        (options.root.join(".eslintrc"), to_json(&eslintrc(options))?),
        (pack_json_dir.join("pack.json"), to_json(&pack_json(options)?)?),
        (src.join(format!("{}.test.js", options.main)), test_source(options)),
        (src.join(format!("{}.js", options.main)), main_source(options)),
    ];

    for (path, content) in &files {
        write_file(path, content)?;
        let shown = path.strip_prefix(&options.root).unwrap_or(path.as_path());
        eprintln!("  {} Created {}", "✓".green(), shown.display().to_string().cyan());
    }

    eprintln!("\n{} Project initialized successfully!\n", "✓".green().bold());
    eprintln!("  Next steps:");
    eprintln!("    {} npm install", "→".dimmed());
    eprintln!("    {} npm start", "→".dimmed());
    eprintln!();

    Ok(())
}

/// Hidden entries such as `.git` do not count
fn is_empty_project(root: &Path) -> Result<bool> {
    let entries = fs::read_dir(root).with_context(|| format!("Failed to read {}", root.display()))?;

    for entry in entries {
        let entry = entry?;
        if !entry.file_name().to_string_lossy().starts_with('.') {
            return Ok(false);
        }
    }

    Ok(true)
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

fn to_json(value: &Value) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn versioned<'a>(names: impl IntoIterator<Item = &'a str>) -> Map<String, Value> {
    names
        .into_iter()
        .map(|name| (name.to_string(), json!(DEPENDENCY_VERSION)))
        .collect()
}

pub fn package_json(options: &Options) -> Value {
    let dependencies = versioned(crate::plan::gated([
        (options.node, "babel-runtime"),
        (options.react, "react"),
    ]));

    json!({
        "scripts": {
            "start": "pack -w",
            "test": format!("eslint {} && pack -t", options.src),
            "build": "pack",
        },
        "dependencies": dependencies,
        "devDependencies": versioned(DEV_DEPENDENCIES),
    })
}

fn flags<'a>(names: impl IntoIterator<Item = (bool, &'a str)>) -> Map<String, Value> {
    crate::plan::gated(names)
        .into_iter()
        .map(|name| (name.to_string(), Value::Bool(true)))
        .collect()
}

pub fn eslintrc(options: &Options) -> Value {
    json!({
        "parser": "babel-eslint",
        "extends": "airbnb",
        "env": flags([
            (true, "mocha"),
            (!options.node, "browser"),
            (options.node, "node"),
        ]),
        "parserOptions": { "ecmaVersion": 8 },
        "rules": {
            "global-require": 0,
            "import/no-unresolved": 0,
            "import/no-absolute-path": 0,
            "react/jsx-filename-extension": 0,
            "import/extensions": 0,
        },
        "globals": flags([
            (true, "expect"),
            (true, "process"),
            (options.react, "mount"),
            (!options.node, "fetch"),
        ]),
    })
}

/// File-valid options that differ from their defaults
pub fn pack_json(options: &Options) -> Result<Value> {
    let schema = OptionSchema::global();
    let current = serde_json::to_value(options)?;

    let mut values = Map::new();
    for entry in schema.entries().iter().filter(|e| e.valid_for_file()) {
        let value = current.get(entry.name).cloned().unwrap_or(Value::Null);
        if value != entry.default {
            values.insert(entry.name.to_string(), value);
        }
    }

    Ok(Value::Object(values))
}

fn main_source(options: &Options) -> String {
    if options.react {
        "import React from 'react';\n\nexport default () => (\n  <h1>example</h1>\n);\n".to_string()
    } else {
        "// eslint-disable-next-line no-console\nconsole.log('example');\n".to_string()
    }
}

fn test_source(options: &Options) -> String {
    if options.react {
        format!(
            "import React from 'react';\nimport Component from './{main}';\n\n\
             describe('{main}', () => {{\n  const wrapper = mount(<Component />);\n  \
             it('mounts component', () => {{\n    expect(wrapper).to.be.present();\n  }});\n}});\n",
            main = options.main
        )
    } else {
        "describe('main', () => {\n  it('runs a test', () => {\n    \
         expect(true).to.equal(true);\n  });\n});\n"
            .to_string()
    }
}
