//! Configuration types and loading for clitree.
//!
//! Two concerns live here:
//! - [`ExecutorConfig`]: knobs for the job runtime (tick cadence, limits)
//! - argument sources: plain-text config files and `PREFIX_NAME` environment
//!   overrides, merged by [`resolve_arguments`]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::model::Field;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to resolve path {path}: {source}")]
    Resolve {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}:{line}: malformed entry '{text}'")]
    Malformed {
        path: PathBuf,
        line: usize,
        text: String,
    },
}

/// Runtime parameters for the job manager.
///
/// ```rust
/// use clitree::ExecutorConfig;
/// use std::time::Duration;
///
/// let config = ExecutorConfig::default()
///     .with_tick_interval(Duration::from_millis(200))
///     .with_max_concurrent_jobs(2);
/// assert_eq!(config.max_concurrent_jobs, 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Cadence at which jobs tick (default: 1s)
    pub tick_interval: Duration,
    /// Jobs allowed to run at once; others wait in `Pending` (default: 8)
    pub max_concurrent_jobs: usize,
    /// Finished jobs kept for status queries before the oldest are evicted (default: 256)
    pub max_retained_jobs: usize,
    /// Deadline applied when an invocation does not carry one (default: unbounded)
    pub default_deadline: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            max_concurrent_jobs: 8,
            max_retained_jobs: 256,
            default_deadline: None,
        }
    }
}

impl ExecutorConfig {
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    pub fn with_max_retained_jobs(mut self, max: usize) -> Self {
        self.max_retained_jobs = max;
        self
    }

    /// Zero means unbounded.
    pub fn with_default_deadline(mut self, deadline: Duration) -> Self {
        self.default_deadline = (!deadline.is_zero()).then_some(deadline);
        self
    }
}

pub fn expand_path(raw: impl AsRef<str>) -> PathBuf {
    let s = raw.as_ref();
    if let Some(stripped) = s.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return PathBuf::from(home).join(stripped);
    }
    PathBuf::from(s)
}

/// `name value` pairs read from a plain-text config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlainConfig {
    values: HashMap<String, String>,
}

impl PlainConfig {
    /// Parse config text.
    ///
    /// One entry per line as `name value` or `name=value`; a bare `name` is a
    /// boolean switch set to `true`. Blank lines and `#` comments are skipped,
    /// a leading `--` on the name is tolerated. Later lines win.
    pub fn parse(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let mut values = HashMap::new();
        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let split_at = line.find(|c: char| c == '=' || c.is_whitespace());
            let (name, value) = match split_at {
                Some(at) => {
                    let (name, rest) = line.split_at(at);
                    let mut rest = rest.chars();
                    rest.next();
                    (name, rest.as_str().trim())
                }
                None => (line, "true"),
            };
            let name = name.trim_start_matches("--");
            if name.is_empty() {
                return Err(ConfigError::Malformed {
                    path: origin.to_path_buf(),
                    line: index + 1,
                    text: raw.to_string(),
                });
            }
            values.insert(name.to_string(), unquote(value).to_string());
        }
        Ok(Self { values })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn unquote(value: &str) -> &str {
    let quoted = value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')));
    if quoted {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

/// Load a plain-text config file. The file must exist.
pub fn load_plain_config(path: &Path) -> Result<PlainConfig, ConfigError> {
    let expanded = path
        .to_str()
        .map(expand_path)
        .unwrap_or_else(|| path.to_path_buf());
    let canonical = fs::canonicalize(&expanded).map_err(|source| ConfigError::Resolve {
        path: expanded.clone(),
        source,
    })?;
    let text = fs::read_to_string(&canonical).map_err(|source| ConfigError::Read {
        path: canonical.clone(),
        source,
    })?;
    PlainConfig::parse(&text, &canonical)
}

/// Environment overrides under a common prefix (`CLITREE_MAX_DURATION`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    prefix: String,
    vars: HashMap<String, String>,
}

impl EnvOverrides {
    /// Capture the current process environment.
    pub fn from_env(prefix: &str) -> Self {
        Self::from_vars(prefix, std::env::vars())
    }

    /// Build from explicit variables, keeping only those under the prefix.
    pub fn from_vars<I, K, V>(prefix: &str, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let prefix = prefix.trim_end_matches('_').to_ascii_uppercase();
        let marker = format!("{prefix}_");
        let vars = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| k.starts_with(&marker))
            .collect();
        Self { prefix, vars }
    }

    /// Variable name consulted for a field, e.g. `max-duration` → `CLITREE_MAX_DURATION`.
    pub fn var_name(&self, field: &str) -> String {
        let suffix: String = field
            .chars()
            .map(|c| match c {
                '-' | '.' => '_',
                other => other.to_ascii_uppercase(),
            })
            .collect();
        format!("{}_{}", self.prefix, suffix)
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.vars.get(&self.var_name(field)).map(String::as_str)
    }
}

/// Merge argument sources for a command's fields.
///
/// Precedence: explicit values > environment > config file. Fields with no
/// value from any source are left out; binding falls back to their default.
/// Explicit values for names the command does not declare are kept so binding
/// can reject them.
pub fn resolve_arguments(
    fields: &[Field],
    explicit: &HashMap<String, String>,
    env: &EnvOverrides,
    file: Option<&PlainConfig>,
) -> HashMap<String, String> {
    let mut resolved = explicit.clone();
    for field in fields {
        if resolved.contains_key(&field.name) {
            continue;
        }
        let value = env
            .get(&field.name)
            .or_else(|| file.and_then(|cfg| cfg.get(&field.name)));
        if let Some(value) = value {
            resolved.insert(field.name.clone(), value.to_string());
        }
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldType;
    use std::io::Write;

    fn field(name: &str) -> Field {
        Field {
            name: name.into(),
            default: String::new(),
            description: String::new(),
            field_type: FieldType::Text,
        }
    }

    #[test]
    fn plain_config_parses_pairs_switches_and_comments() {
        let text = "# comment\n\nattempts 3\nprice=1.5\n--debug\nconfig \"a b.txt\"\nattempts 4\n";
        let cfg = PlainConfig::parse(text, Path::new("test.conf")).unwrap();
        assert_eq!(cfg.get("attempts"), Some("4"));
        assert_eq!(cfg.get("price"), Some("1.5"));
        assert_eq!(cfg.get("debug"), Some("true"));
        assert_eq!(cfg.get("config"), Some("a b.txt"));
        assert_eq!(cfg.len(), 4);
    }

    #[test]
    fn plain_config_rejects_nameless_entries() {
        let err = PlainConfig::parse("=5\n", Path::new("bad.conf")).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { line: 1, .. }));
    }

    #[test]
    fn load_plain_config_reads_file_and_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.conf");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "attempts 2").unwrap();

        let cfg = load_plain_config(&path).unwrap();
        assert_eq!(cfg.get("attempts"), Some("2"));

        let missing = load_plain_config(&dir.path().join("nope.conf")).unwrap_err();
        assert!(matches!(missing, ConfigError::Resolve { .. }));
    }

    #[test]
    fn env_overrides_use_prefixed_upper_snake_names() {
        let env = EnvOverrides::from_vars(
            "clitree",
            [("CLITREE_MAX_DURATION", "5s"), ("OTHER_ATTEMPTS", "9")],
        );
        assert_eq!(env.var_name("max-duration"), "CLITREE_MAX_DURATION");
        assert_eq!(env.get("max-duration"), Some("5s"));
        assert_eq!(env.get("attempts"), None);
    }

    #[test]
    fn explicit_beats_env_beats_file() {
        let fields = vec![field("attempts"), field("price"), field("debug"), field("config")];
        let explicit = HashMap::from([("attempts".to_string(), "1".to_string())]);
        let env = EnvOverrides::from_vars(
            "CLITREE_",
            [("CLITREE_ATTEMPTS", "2"), ("CLITREE_PRICE", "3.5")],
        );
        let file =
            PlainConfig::parse("attempts 9\nprice 9\ndebug\n", Path::new("x.conf")).unwrap();

        let resolved = resolve_arguments(&fields, &explicit, &env, Some(&file));
        assert_eq!(resolved["attempts"], "1");
        assert_eq!(resolved["price"], "3.5");
        assert_eq!(resolved["debug"], "true");
        assert!(!resolved.contains_key("config"));
    }

    #[test]
    fn executor_config_builder_clamps_and_maps_zero_deadline() {
        let cfg = ExecutorConfig::default()
            .with_max_concurrent_jobs(0)
            .with_default_deadline(Duration::ZERO);
        assert_eq!(cfg.max_concurrent_jobs, 1);
        assert_eq!(cfg.default_deadline, None);

        let cfg = cfg.with_default_deadline(Duration::from_secs(3));
        assert_eq!(cfg.default_deadline, Some(Duration::from_secs(3)));
    }
}
