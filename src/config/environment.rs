//! Build-time environment injected into bundles as `process.env.*`

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, warn};

use super::Options;
use crate::error::EnvError;

/// Environment variables keyed by name
pub type Environment = BTreeMap<String, Value>;

static ENV_KEY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.\-]*$").unwrap());

/// Collect the full environment for a build.
///
/// Git metadata is best effort; a missing or failing git yields empty
/// strings. User values from the env file override computed ones.
pub async fn collect(options: &Options) -> Result<Environment, EnvError> {
    let commit = git_output(&options.root, &["rev-parse", "HEAD"]).await;
    let branch = git_output(&options.root, &["rev-parse", "--abbrev-ref", "HEAD"]).await;

    let mut environment = computed(options, commit, branch);

    if let Some(name) = options.env_file() {
        let path = find_env_file(options, name)?;
        debug!("Loading environment from {}", path.display());
        environment.extend(load_env_file(&path)?);
    }

    Ok(environment)
}

/// The variables pack provides on its own
pub fn computed(options: &Options, commit: String, branch: String) -> Environment {
    let mut environment = Environment::new();
    environment.insert("GIT_COMMIT_HASH".to_string(), Value::String(commit));
    environment.insert("GIT_BRANCH_NAME".to_string(), Value::String(branch));
    environment.insert(
        "BUILD_TARGET".to_string(),
        Value::String(if options.node { "node" } else { "browser" }.to_string()),
    );
    environment.insert(
        "NODE_ENV".to_string(),
        Value::String(node_env(options).to_string()),
    );
    environment
}

/// `test` wins over development, anything else is a production build
pub fn node_env(options: &Options) -> &'static str {
    if options.test {
        "test"
    } else if options.dev_mode() {
        "development"
    } else {
        "production"
    }
}

async fn git_output(root: &Path, args: &[&str]) -> String {
    let output = match Command::new("git").args(args).current_dir(root).output().await {
        Ok(output) => output,
        Err(e) => {
            debug!("git {} unavailable: {}", args.join(" "), e);
            return String::new();
        }
    };

    if !output.status.success() || !output.stderr.is_empty() {
        warn!("git {} failed, leaving it empty", args.join(" "));
        return String::new();
    }

    String::from_utf8_lossy(&output.stdout).lines().collect()
}

/// Locate the env file: absolute paths as given, relative ones in `src` then root
pub fn find_env_file(options: &Options, name: &str) -> Result<PathBuf, EnvError> {
    let requested = Path::new(name);
    let candidates = if requested.is_absolute() {
        vec![requested.to_path_buf()]
    } else {
        vec![options.src_dir().join(name), options.root.join(name)]
    };

    candidates
        .into_iter()
        .find(|p| p.exists())
        .ok_or_else(|| EnvError::NotFound {
            name: name.to_string(),
        })
}

/// Read a `.json` or dotenv style file
pub fn load_env_file(path: &Path) -> Result<Environment, EnvError> {
    let is_json = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let content = fs::read_to_string(path).map_err(|e| EnvError::Malformed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    if is_json {
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => Ok(map.into_iter().collect()),
            _ => Err(EnvError::Malformed {
                path: path.to_path_buf(),
                reason: "invalid json".to_string(),
            }),
        }
    } else {
        parse_dotenv(&content).map_err(|line| {
            debug!("Rejected env line {}", line);
            EnvError::Malformed {
                path: path.to_path_buf(),
                reason: "bad format".to_string(),
            }
        })
    }
}

/// Parse `KEY=value` lines; returns the 1-based number of the first bad line
pub fn parse_dotenv(content: &str) -> Result<Environment, usize> {
    let mut environment = Environment::new();

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.strip_prefix("export ").unwrap_or(line);
        let (key, value) = line.split_once('=').ok_or(index + 1)?;
        let key = key.trim();
        if !ENV_KEY_REGEX.is_match(key) {
            return Err(index + 1);
        }

        environment.insert(key.to_string(), Value::String(unquote(value.trim()).to_string()));
    }

    Ok(environment)
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2
        && (bytes[0] == b'"' || bytes[0] == b'\'')
        && bytes[bytes.len() - 1] == bytes[0]
    {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Layer, OptionResolver};
    use serde_json::json;
    use tempfile::TempDir;

    fn options(root: &Path, cli: Value) -> Options {
        let cli: Layer = cli.as_object().cloned().unwrap();
        OptionResolver::new().resolve(&cli, None, root).unwrap()
    }

    #[test]
    fn test_node_env_priority() {
        let root = Path::new("/project");
        assert_eq!(node_env(&options(root, json!({}))), "production");
        assert_eq!(node_env(&options(root, json!({ "watch": true }))), "development");
        assert_eq!(node_env(&options(root, json!({ "watchwrite": true }))), "development");
        assert_eq!(node_env(&options(root, json!({ "test": true, "watch": true }))), "test");
    }

    #[test]
    fn test_computed_build_target() {
        let root = Path::new("/project");
        let env = computed(&options(root, json!({ "node": true })), "abc".into(), "main".into());

        assert_eq!(env["BUILD_TARGET"], json!("node"));
        assert_eq!(env["GIT_COMMIT_HASH"], json!("abc"));
        assert_eq!(env["GIT_BRANCH_NAME"], json!("main"));
    }

    #[test]
    fn test_parse_dotenv() {
        let env = parse_dotenv(
            "# comment\nAPI_KEY=secret\nexport NAME = \"quoted value\"\n\nEMPTY=\nSINGLE='x=y'\n",
        )
        .unwrap();

        assert_eq!(env["API_KEY"], json!("secret"));
        assert_eq!(env["NAME"], json!("quoted value"));
        assert_eq!(env["EMPTY"], json!(""));
        assert_eq!(env["SINGLE"], json!("x=y"));
    }

    #[test]
    fn test_parse_dotenv_rejects_garbage() {
        assert_eq!(parse_dotenv("GOOD=1\nthis is not an assignment\n"), Err(2));
        assert_eq!(parse_dotenv("1BAD=1"), Err(1));
    }

    #[test]
    fn test_find_env_file_prefers_src() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("env"), "A=root").unwrap();
        fs::write(root.join("src").join("env"), "A=src").unwrap();

        let opts = options(root, json!({ "env": "env" }));
        assert_eq!(find_env_file(&opts, "env").unwrap(), root.join("src").join("env"));
    }

    #[test]
    fn test_find_env_file_missing() {
        let temp = TempDir::new().unwrap();
        let opts = options(temp.path(), json!({ "env": "nope.env" }));

        let err = find_env_file(&opts, "nope.env").unwrap_err();
        assert_eq!(err.to_string(), "env file nope.env not found");
    }

    #[test]
    fn test_load_env_file_json() {
        let temp = TempDir::new().unwrap();
        let good = temp.path().join("env.json");
        fs::write(&good, r#"{ "UNIQ": "UNIQID2", "COUNT": 3 }"#).unwrap();
        let env = load_env_file(&good).unwrap();
        assert_eq!(env["UNIQ"], json!("UNIQID2"));
        assert_eq!(env["COUNT"], json!(3));

        let bad = temp.path().join("bad.json");
        fs::write(&bad, "[1, 2").unwrap();
        let err = load_env_file(&bad).unwrap_err();
        assert!(err.to_string().starts_with("invalid json in"));
    }

    #[tokio::test]
    async fn test_collect_user_values_override() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(".env"), "NODE_ENV=staging\nEXTRA=1").unwrap();
        let opts = options(temp.path(), json!({ "env": ".env" }));

        let env = collect(&opts).await.unwrap();
        assert_eq!(env["NODE_ENV"], json!("staging"));
        assert_eq!(env["EXTRA"], json!("1"));
        assert_eq!(env["BUILD_TARGET"], json!("browser"));
        assert!(env.contains_key("GIT_COMMIT_HASH"));
    }
}
