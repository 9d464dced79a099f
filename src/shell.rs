use shell_escape::unix::escape;
use std::env;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::logger::{sanitize_log_value, Logger};

pub(crate) fn render_args(args: &[String]) -> String {
    let mut rendered = String::new();
    for arg in args {
        rendered.push_str(escape(arg.into()).as_ref());
        rendered.push(' ');
    }
    rendered
}

/// Environment handed to the restart hook.
#[derive(Debug, Clone, Default)]
pub(crate) struct CommandEnv {
    pub(crate) cwd: Option<PathBuf>,
    pub(crate) config_path: Option<String>,
    pub(crate) prompt: Option<String>,
    pub(crate) payload_path: Option<String>,
    pub(crate) restart_number: Option<String>,
}

impl CommandEnv {
    pub(crate) fn apply(&self, cmd: &mut Command) {
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        Self::apply_optional(cmd, "TASKGATE_CONFIG_PATH", &self.config_path);
        Self::apply_optional(cmd, "TASKGATE_PROMPT", &self.prompt);
        Self::apply_optional(cmd, "TASKGATE_RESTART_PAYLOAD", &self.payload_path);
        Self::apply_optional(cmd, "TASKGATE_RESTART_NUMBER", &self.restart_number);
    }

    fn apply_optional(cmd: &mut Command, key: &str, value: &Option<String>) {
        match value {
            Some(value) => {
                cmd.env(key, value);
            }
            None => {
                cmd.env_remove(key);
            }
        }
    }
}

/// Runs `command` through `bash -lc`, inheriting stdio, and returns its
/// exit code. `args` become `$1`, `$2`, ... inside the command.
pub(crate) fn run_shell_command_status(
    command: &str,
    log_label: &str,
    args: &[String],
    env: &CommandEnv,
    logger: &Logger,
) -> Result<i32, String> {
    logger.log_transition(&format!(
        "cmd start label={} mode=bash_lc command={} args={}",
        log_label,
        sanitize_log_value(command),
        sanitize_log_value(&render_args(args))
    ));

    let mut cmd = Command::new("bash");
    cmd.arg("-lc").arg(command);
    if !args.is_empty() {
        cmd.arg("--");
        cmd.args(args);
    }
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::inherit());
    cmd.stderr(Stdio::inherit());
    env.apply(&mut cmd);
    let status = cmd
        .status()
        .map_err(|err| format!("Failed to run command '{}': {}", command, err))?;

    let exit_code = status.code().unwrap_or(1);
    logger.log_transition(&format!(
        "cmd exit label={} exit={}",
        log_label, exit_code
    ));

    Ok(exit_code)
}

pub(crate) fn command_exists(name: &str) -> bool {
    let Some(paths) = env::var_os("PATH") else {
        return false;
    };
    env::split_paths(&paths).any(|path| {
        let full = path.join(name);
        full.is_file() || full.is_symlink()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn render_args_quotes_shell_metacharacters() {
        let args = vec![
            "plain".to_string(),
            "with space".to_string(),
            "foo$bar".to_string(),
        ];
        assert_eq!(render_args(&args), "plain 'with space' 'foo$bar' ");
        assert_eq!(render_args(&[]), "");
    }

    #[cfg(unix)]
    #[test]
    fn run_shell_command_passes_env_and_reports_exit_code() {
        let temp = TempDir::new().expect("temp dir");
        let out = temp.path().join("out.txt");
        let log_path = temp.path().join("taskgate.log");
        let logger = Logger::new(Some(log_path.clone()));
        let env = CommandEnv {
            cwd: Some(temp.path().to_path_buf()),
            prompt: Some("hello prompt".to_string()),
            restart_number: Some("3".to_string()),
            ..CommandEnv::default()
        };

        let exit = run_shell_command_status(
            "printf '%s|%s|%s' \"$TASKGATE_PROMPT\" \"$TASKGATE_RESTART_NUMBER\" \"$1\" > out.txt; exit 7",
            "on_restart",
            &["arg one".to_string()],
            &env,
            &logger,
        )
        .expect("run command");

        assert_eq!(exit, 7);
        assert_eq!(
            fs::read_to_string(&out).expect("read output"),
            "hello prompt|3|arg one"
        );
        let log = fs::read_to_string(&log_path).expect("read log");
        assert!(log.contains("cmd start label=on_restart"), "got: {log}");
        assert!(log.contains("args='arg one'"), "got: {log}");
        assert!(log.contains("cmd exit label=on_restart exit=7"), "got: {log}");
    }
}
