//! Locations of pack's own support files and of the host environment

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::utils::existing;

/// Entry point rendering `export default <Component />` from the `main` alias
const REACT_BOOTSTRAP: &str = r#"/* global document */
import React from 'react';
import { render } from 'react-dom';
import App from 'main';

const target = document.getElementById('render') || document.createElement('div');
if (!document.body.contains(target)) {
  document.body.appendChild(target);
}

const mount = (Component) => {
  if (process.env.NODE_ENV === 'production') {
    render(React.createElement(Component, null), target);
    return;
  }
  const { AppContainer } = require('react-hot-loader');
  render(React.createElement(AppContainer, null, React.createElement(Component, null)), target);
};

mount(App);

if (module.hot) {
  module.hot.accept('main', () => mount(require('main').default));
}
"#;

/// Where pack's runtime files and executor adapter live
#[derive(Debug, Clone)]
pub struct Toolchain {
    home: PathBuf,
}

impl Toolchain {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// `PACK_HOME`, else the directory above the executable
    pub fn discover() -> Self {
        if let Some(home) = env::var_os("PACK_HOME") {
            return Self::new(home);
        }

        let home = env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().and_then(Path::parent).map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));

        debug!("Toolchain home: {}", home.display());
        Self::new(home)
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// The react bootstrap entry
    pub fn react_entry(&self) -> PathBuf {
        self.home.join("runtime").join("react.js")
    }

    /// Write the react bootstrap entry unless it is already current
    pub fn install_runtime(&self) -> Result<PathBuf> {
        let path = self.react_entry();

        if fs::read_to_string(&path).ok().as_deref() == Some(REACT_BOOTSTRAP) {
            return Ok(path);
        }

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        fs::write(&path, REACT_BOOTSTRAP)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(path)
    }

    /// pack's own module directories that exist on disk
    pub fn node_modules_dirs(&self) -> Vec<PathBuf> {
        let local = self.home.join("node_modules");
        let global = self.home.join("..").join("node_modules");

        [local, global].into_iter().filter_map(existing).collect()
    }

    /// Command line of the executor adapter
    pub fn executor_command(&self) -> Vec<String> {
        match env::var("PACK_EXECUTOR") {
            Ok(command) if !command.trim().is_empty() => {
                command.split_whitespace().map(str::to_string).collect()
            }
            _ => vec![
                "node".to_string(),
                self.home.join("executor.js").display().to_string(),
            ],
        }
    }
}

/// Facts about the host read once from the process environment
#[derive(Debug, Clone, Default)]
pub struct HostEnv {
    /// Public hostname on hosted IDEs (Cloud9)
    pub hosting_hostname: Option<String>,

    /// Global module directories from `NODE_PATH`
    pub node_paths: Vec<PathBuf>,
}

impl HostEnv {
    pub fn from_process() -> Self {
        let hosting_hostname = env::var("C9_HOSTNAME").ok().filter(|h| !h.is_empty());
        let node_paths = env::var_os("NODE_PATH")
            .map(|paths| Self::split_node_path(&paths))
            .unwrap_or_default();

        Self {
            hosting_hostname,
            node_paths,
        }
    }

    /// Split with the platform separator and make every entry absolute
    pub fn split_node_path(paths: &std::ffi::OsStr) -> Vec<PathBuf> {
        let cwd = env::current_dir().unwrap_or_default();

        env::split_paths(paths)
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| if p.is_absolute() { p } else { cwd.join(p) })
            .collect()
    }
}
