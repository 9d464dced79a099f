use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dispense::DispensePolicy;
use crate::item_types::{FetchLimit, Manager};
use crate::session::SessionPaths;

pub(crate) const DEFAULT_BATCH_LIMIT: i64 = 10;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
const DEFAULT_SETTLE_DELAY_SECS: u64 = 2;

const TOP_LEVEL_KEYS: [&str; 9] = [
    "state_dir",
    "tasks_file",
    "scenarios_file",
    "results_file",
    "batch_limit",
    "scenarios_batch_limit",
    "max_same_fetches",
    "log_path",
    "supervisor",
];
const SUPERVISOR_KEYS: [&str; 4] = [
    "poll_interval_secs",
    "settle_delay_secs",
    "on_restart",
    "prompt_path",
];

#[derive(Debug, Deserialize)]
pub(crate) struct Config {
    #[serde(default)]
    pub(crate) state_dir: Option<String>,
    #[serde(default)]
    pub(crate) tasks_file: Option<String>,
    #[serde(default)]
    pub(crate) scenarios_file: Option<String>,
    #[serde(default)]
    pub(crate) results_file: Option<String>,
    #[serde(default = "default_batch_limit")]
    pub(crate) batch_limit: i64,
    #[serde(default)]
    pub(crate) scenarios_batch_limit: Option<i64>,
    #[serde(default)]
    pub(crate) max_same_fetches: FetchLimit,
    #[serde(default)]
    pub(crate) log_path: Option<String>,
    #[serde(default)]
    pub(crate) supervisor: SupervisorConfig,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SupervisorConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub(crate) poll_interval_secs: u64,
    #[serde(default = "default_settle_delay_secs")]
    pub(crate) settle_delay_secs: u64,
    #[serde(default)]
    pub(crate) on_restart: Option<String>,
    #[serde(default)]
    pub(crate) prompt_path: Option<String>,
}

fn default_batch_limit() -> i64 {
    DEFAULT_BATCH_LIMIT
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_settle_delay_secs() -> u64 {
    DEFAULT_SETTLE_DELAY_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: None,
            tasks_file: None,
            scenarios_file: None,
            results_file: None,
            batch_limit: DEFAULT_BATCH_LIMIT,
            scenarios_batch_limit: None,
            max_same_fetches: FetchLimit::default(),
            log_path: None,
            supervisor: SupervisorConfig::default(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            settle_delay_secs: DEFAULT_SETTLE_DELAY_SECS,
            on_restart: None,
            prompt_path: None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct LoadedConfig {
    pub(crate) config: Config,
    pub(crate) warnings: Vec<String>,
}

pub(crate) fn load_config(path: &Path) -> Result<LoadedConfig, String> {
    let content = fs::read_to_string(path)
        .map_err(|err| format!("Failed to read config {}: {}", path.display(), err))?;
    let value: Value = serde_yaml::from_str(&content)
        .map_err(|err| format!("Failed to parse config {}: {}", path.display(), err))?;
    let mapping = match value {
        Value::Mapping(mapping) => mapping,
        // An empty file means "all defaults".
        Value::Null => Mapping::new(),
        _ => {
            return Err(format!(
                "Config {} must be a YAML mapping",
                path.display()
            ))
        }
    };

    let warnings = unknown_keys(&mapping);
    emit_unknown_key_warnings(&warnings);
    validate_fields(&mapping)?;

    let config: Config = serde_path_to_error::deserialize(Value::Mapping(mapping))
        .map_err(|err| format!("Failed to parse config {}: {}", path.display(), err))?;

    Ok(LoadedConfig { config, warnings })
}

fn emit_unknown_key_warnings(keys: &[String]) {
    for key in keys {
        eprintln!("Warning: unknown config key: {}", key);
    }
}

fn unknown_keys(mapping: &Mapping) -> Vec<String> {
    let mut unknown: Vec<String> = mapping
        .keys()
        .filter_map(|key| key.as_str().map(|value| value.to_string()))
        .filter(|key| !TOP_LEVEL_KEYS.contains(&key.as_str()))
        .collect();

    if let Some(Value::Mapping(supervisor)) = mapping.get("supervisor") {
        unknown.extend(
            supervisor
                .keys()
                .filter_map(|key| key.as_str())
                .filter(|key| !SUPERVISOR_KEYS.contains(key))
                .map(|key| format!("supervisor.{}", key)),
        );
    }
    unknown
}

fn validate_fields(mapping: &Mapping) -> Result<(), String> {
    for key in [
        "state_dir",
        "tasks_file",
        "scenarios_file",
        "results_file",
        "log_path",
    ] {
        optional_non_empty_string(mapping, key, key)?;
    }

    let Some(supervisor) = optional_mapping(mapping, "supervisor", "supervisor")? else {
        return Ok(());
    };
    optional_non_empty_string(supervisor, "on_restart", "supervisor.on_restart")?;
    optional_non_empty_string(supervisor, "prompt_path", "supervisor.prompt_path")?;
    if let Some(Value::Number(interval)) = supervisor.get("poll_interval_secs") {
        if interval.as_u64() == Some(0) {
            return Err(
                "supervisor.poll_interval_secs must be a positive integer (got 0)".to_string(),
            );
        }
    }
    Ok(())
}

fn optional_mapping<'a>(
    mapping: &'a Mapping,
    key_name: &str,
    label: &str,
) -> Result<Option<&'a Mapping>, String> {
    let key = Value::String(key_name.to_string());
    match mapping.get(&key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Mapping(value)) => Ok(Some(value)),
        Some(_) => Err(format!("{} must be a mapping", label)),
    }
}

fn optional_non_empty_string(mapping: &Mapping, key_name: &str, label: &str) -> Result<(), String> {
    let key = Value::String(key_name.to_string());
    match mapping.get(&key) {
        None | Some(Value::Null) => Ok(()),
        Some(Value::String(value)) => {
            if value.trim().is_empty() {
                Err(format!("{} must not be empty", label))
            } else {
                Ok(())
            }
        }
        Some(_) => Err(format!("{} must be a string", label)),
    }
}

/// Parses `TASKGATE_SCENARIOS_BATCH_LIMIT`. Empty means unset.
pub(crate) fn parse_batch_limit_override(raw: Option<&str>) -> Result<Option<i64>, String> {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    raw.parse::<i64>()
        .map(Some)
        .map_err(|_| format!("ignoring invalid scenarios batch limit override {:?}", raw))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SupervisorSettings {
    pub(crate) poll_interval: Duration,
    pub(crate) settle_delay: Duration,
    pub(crate) on_restart: Option<String>,
    pub(crate) prompt_path: Option<PathBuf>,
}

/// Configuration with every path resolved and every override applied. This
/// is what the commands receive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Settings {
    pub(crate) base_dir: PathBuf,
    pub(crate) tasks_file: PathBuf,
    pub(crate) scenarios_file: PathBuf,
    pub(crate) results_file: PathBuf,
    pub(crate) session: SessionPaths,
    pub(crate) batch_limit: i64,
    pub(crate) scenarios_batch_limit: i64,
    pub(crate) max_same_fetches: FetchLimit,
    pub(crate) log_path: Option<PathBuf>,
    pub(crate) supervisor: SupervisorSettings,
}

impl Settings {
    pub(crate) fn resolve(
        config: &Config,
        base_dir: &Path,
        scenarios_batch_limit_override: Option<i64>,
    ) -> Self {
        let resolve = |value: &Option<String>, default: &str| -> PathBuf {
            base_dir.join(value.as_deref().unwrap_or(default))
        };
        let state_dir = config
            .state_dir
            .as_ref()
            .map_or_else(|| base_dir.to_path_buf(), |dir| base_dir.join(dir));

        Self {
            base_dir: base_dir.to_path_buf(),
            tasks_file: resolve(&config.tasks_file, "TASKS.md"),
            scenarios_file: resolve(&config.scenarios_file, "SCENARIOS.md"),
            results_file: resolve(&config.results_file, "TEST-RESULTS.md"),
            session: SessionPaths::in_dir(&state_dir),
            batch_limit: config.batch_limit,
            scenarios_batch_limit: scenarios_batch_limit_override
                .or(config.scenarios_batch_limit)
                .unwrap_or(config.batch_limit),
            max_same_fetches: config.max_same_fetches,
            log_path: config.log_path.as_ref().map(|path| base_dir.join(path)),
            supervisor: SupervisorSettings {
                poll_interval: Duration::from_secs(config.supervisor.poll_interval_secs),
                settle_delay: Duration::from_secs(config.supervisor.settle_delay_secs),
                on_restart: config.supervisor.on_restart.clone(),
                prompt_path: config
                    .supervisor
                    .prompt_path
                    .as_ref()
                    .map(|path| base_dir.join(path)),
            },
        }
    }

    pub(crate) fn policy(&self, manager: Manager) -> DispensePolicy {
        DispensePolicy {
            batch_limit: match manager {
                Manager::Tasks => self.batch_limit,
                Manager::Scenarios => self.scenarios_batch_limit,
            },
            max_same_fetches: self.max_same_fetches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::NamedTempFile;

    fn write_temp_config(contents: &str) -> NamedTempFile {
        let file = NamedTempFile::new().expect("create temp file");
        fs::write(file.path(), contents).expect("write temp config");
        file
    }

    #[test]
    fn empty_config_uses_defaults() {
        let file = write_temp_config("");
        let loaded = load_config(file.path()).expect("config should load");
        assert!(loaded.warnings.is_empty());
        assert_eq!(loaded.config.batch_limit, 10);
        assert_eq!(loaded.config.max_same_fetches.get(), 3);
        assert_eq!(loaded.config.supervisor.poll_interval_secs, 2);
        assert_eq!(loaded.config.supervisor.on_restart, None);
    }

    #[test]
    fn full_config_loads() {
        let config = r#"
state_dir: ".taskgate"
tasks_file: "docs/TASKS.md"
scenarios_file: "docs/SCENARIOS.md"
results_file: "docs/TEST-RESULTS.md"
batch_limit: 5
scenarios_batch_limit: 0
max_same_fetches: 2
log_path: "taskgate.log"
supervisor:
  poll_interval_secs: 1
  settle_delay_secs: 0
  on_restart: "echo restart"
  prompt_path: "prompt.md"
"#;
        let file = write_temp_config(config);
        let loaded = load_config(file.path()).expect("config should load");
        let settings = Settings::resolve(&loaded.config, Path::new("/work"), None);

        assert_eq!(settings.tasks_file, PathBuf::from("/work/docs/TASKS.md"));
        assert_eq!(
            settings.session.batch_count,
            PathBuf::from("/work/.taskgate/.batch_count")
        );
        assert_eq!(settings.batch_limit, 5);
        assert_eq!(settings.scenarios_batch_limit, 0);
        assert_eq!(settings.max_same_fetches.get(), 2);
        assert_eq!(settings.log_path, Some(PathBuf::from("/work/taskgate.log")));
        assert_eq!(settings.supervisor.poll_interval, Duration::from_secs(1));
        assert_eq!(
            settings.supervisor.on_restart.as_deref(),
            Some("echo restart")
        );
        assert_eq!(
            settings.supervisor.prompt_path,
            Some(PathBuf::from("/work/prompt.md"))
        );
    }

    #[test]
    fn default_settings_share_session_files_in_base_dir() {
        let settings = Settings::resolve(&Config::default(), Path::new("/work"), None);
        assert_eq!(settings.tasks_file, PathBuf::from("/work/TASKS.md"));
        assert_eq!(settings.scenarios_file, PathBuf::from("/work/SCENARIOS.md"));
        assert_eq!(
            settings.session.restart_signal,
            PathBuf::from("/work/.batch_complete")
        );
        assert_eq!(settings.policy(Manager::Tasks).batch_limit, 10);
        assert_eq!(settings.policy(Manager::Scenarios).batch_limit, 10);
    }

    #[test]
    fn scenarios_override_wins_over_config() {
        let mut config = Config::default();
        config.scenarios_batch_limit = Some(4);
        let settings = Settings::resolve(&config, Path::new("/work"), Some(0));
        assert_eq!(settings.policy(Manager::Scenarios).batch_limit, 0);
        assert_eq!(settings.policy(Manager::Tasks).batch_limit, 10);

        let settings = Settings::resolve(&config, Path::new("/work"), None);
        assert_eq!(settings.policy(Manager::Scenarios).batch_limit, 4);
    }

    #[test]
    fn batch_limit_override_parsing() {
        assert_eq!(parse_batch_limit_override(None), Ok(None));
        assert_eq!(parse_batch_limit_override(Some("  ")), Ok(None));
        assert_eq!(parse_batch_limit_override(Some("0")), Ok(Some(0)));
        assert_eq!(parse_batch_limit_override(Some(" 999 ")), Ok(Some(999)));
        let err = parse_batch_limit_override(Some("lots")).expect_err("invalid");
        assert!(err.contains("lots"), "got: {err}");
    }

    #[test]
    fn invalid_yaml_includes_path() {
        let file = write_temp_config("batch_limit: [");
        let err = load_config(file.path()).expect_err("expected parse error");
        let path = file.path().display().to_string();
        assert!(
            err.contains(&path),
            "error should include path {path}, got: {err}"
        );
    }

    #[test]
    fn non_mapping_config_is_rejected() {
        let file = write_temp_config("- a\n- b\n");
        let err = load_config(file.path()).expect_err("expected mapping error");
        assert!(err.contains("must be a YAML mapping"), "got: {err}");
    }

    #[test]
    fn type_errors_name_the_key_path() {
        let file = write_temp_config("supervisor:\n  settle_delay_secs: soon\n");
        let err = load_config(file.path()).expect_err("expected type error");
        assert!(
            err.contains("supervisor.settle_delay_secs"),
            "error should name the key path, got: {err}"
        );
    }

    #[test]
    fn zero_fetch_limit_and_poll_interval_are_rejected() {
        let file = write_temp_config("max_same_fetches: 0\n");
        let err = load_config(file.path()).expect_err("expected fetch limit error");
        assert!(err.contains("positive integer"), "got: {err}");

        let file = write_temp_config("supervisor:\n  poll_interval_secs: 0\n");
        let err = load_config(file.path()).expect_err("expected interval error");
        assert!(err.contains("supervisor.poll_interval_secs"), "got: {err}");
    }

    #[test]
    fn empty_strings_are_rejected() {
        let file = write_temp_config("tasks_file: \"  \"\n");
        let err = load_config(file.path()).expect_err("expected empty error");
        assert!(err.contains("tasks_file must not be empty"), "got: {err}");

        let file = write_temp_config("supervisor:\n  on_restart: 3\n");
        let err = load_config(file.path()).expect_err("expected type error");
        assert!(err.contains("supervisor.on_restart must be a string"), "got: {err}");
    }

    #[test]
    fn unknown_keys_reported() {
        let config = r#"
batch_limit: 3
extra_key: true
supervisor:
  hotkey: "ctrl+l"
"#;
        let file = write_temp_config(config);
        let loaded = load_config(file.path()).expect("config should load");
        assert_eq!(
            loaded.warnings,
            vec!["extra_key".to_string(), "supervisor.hotkey".to_string()]
        );
    }
}
