//! Restart supervisor.
//!
//! Polls for the restart signal raised when a batch limit is reached and
//! hands off to a [`RestartActuator`], which is responsible for resetting the
//! consuming agent and re-prompting it. The supervisor owns clearing the
//! signal.

use chrono::Local;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::logger::{sanitize_log_value, Logger};
use crate::restart_payload::RestartPayload;
use crate::session::SessionStore;
use crate::shell::{run_shell_command_status, CommandEnv};

const INTERRUPT_CHECK_STEP: Duration = Duration::from_millis(100);

pub(crate) const DEFAULT_RESTART_PROMPT: &str = "You are in an INFINITE EXECUTION LOOP.
Your job is not to plan. Your job is to execute what the task script hands you.

Look only at the current task. Do not read ahead in the task list.

Repeat forever:

STEP A: Run `taskgate tasks next`.
- If it prints a task, go straight to STEP B. Do not announce a plan.

STEP B: Implement the task fully. No mocks, no placeholders.

STEP C: Run `taskgate tasks done \"<TASK TEXT>\"`, quoting the task exactly as printed.
- As soon as it reports success, return to STEP A without asking and without summarizing.

Never stop after a few tasks, never ask whether to continue, never keep a to-do list in the chat.

Next -> Code -> Done -> Next -> Code -> Done...
START.";

/// Whatever resets the consuming agent when a batch completes.
pub(crate) trait RestartActuator {
    fn on_restart_requested(&mut self, restart_number: u64, prompt: &str) -> Result<(), String>;
}

/// Runs the configured `on_restart` shell command. The restart number and
/// the JSON payload path are passed as `$1` and `$2`, and also exported
/// along with the prompt.
pub(crate) struct ShellActuator<'a> {
    command: String,
    cwd: PathBuf,
    config_path: Option<String>,
    logger: &'a Logger,
}

impl<'a> ShellActuator<'a> {
    pub(crate) fn new(
        command: String,
        cwd: PathBuf,
        config_path: Option<String>,
        logger: &'a Logger,
    ) -> Self {
        Self {
            command,
            cwd,
            config_path,
            logger,
        }
    }
}

impl RestartActuator for ShellActuator<'_> {
    fn on_restart_requested(&mut self, restart_number: u64, prompt: &str) -> Result<(), String> {
        let payload = RestartPayload::new(
            restart_number,
            self.cwd.display().to_string(),
            prompt.to_string(),
        );
        let payload_file = payload.write_to_temp_file()?;
        let payload_path = payload_file.path().display().to_string();
        let env = CommandEnv {
            cwd: Some(self.cwd.clone()),
            config_path: self.config_path.clone(),
            prompt: Some(prompt.to_string()),
            payload_path: Some(payload_path.clone()),
            restart_number: Some(restart_number.to_string()),
        };
        let args = [restart_number.to_string(), payload_path];
        let exit = run_shell_command_status(&self.command, "on_restart", &args, &env, self.logger)?;
        if exit != 0 {
            return Err(format!("on_restart failed with exit code {}", exit));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SupervisorOptions {
    pub(crate) poll_interval: Duration,
    pub(crate) settle_delay: Duration,
    /// Single poll pass; stale signals are not cleared first.
    pub(crate) once: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SupervisorExit {
    Finished { restarts: u64 },
    Interrupted { restarts: u64 },
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

/// Sleeps for `duration`; returns false if interrupted first.
fn sleep_interruptible(duration: Duration, interrupt: &AtomicBool) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if interrupt.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(INTERRUPT_CHECK_STEP.min(deadline - now));
    }
}

pub(crate) fn run_supervisor(
    store: &dyn SessionStore,
    actuator: &mut dyn RestartActuator,
    prompt: &str,
    options: &SupervisorOptions,
    interrupt: &AtomicBool,
    logger: &Logger,
) -> Result<SupervisorExit, String> {
    let mut restarts = 0u64;

    if !options.once && store.clear_restart_signal()? {
        logger.log_transition("supervisor cleared_stale_signal");
    }
    logger.log_transition(&format!(
        "supervisor start interval_ms={} once={}",
        options.poll_interval.as_millis(),
        options.once
    ));

    loop {
        if interrupt.load(Ordering::SeqCst) {
            logger.log_transition(&format!("supervisor interrupted restarts={}", restarts));
            return Ok(SupervisorExit::Interrupted { restarts });
        }

        if store.restart_signal_raised() {
            println!("[{}] Batch complete: restart signal detected.", timestamp());
            logger.log_transition("supervisor signal_detected");
            if !sleep_interruptible(options.settle_delay, interrupt) {
                continue;
            }
            store.clear_restart_signal()?;
            restarts += 1;
            println!("[{}] Restarting agent (restart #{}).", timestamp(), restarts);
            match actuator.on_restart_requested(restarts, prompt) {
                Ok(()) => logger.log_transition(&format!("supervisor restarted number={}", restarts)),
                Err(err) => {
                    eprintln!("Restart failed: {}", err);
                    logger.log_transition(&format!(
                        "supervisor restart_failed number={} err={}",
                        restarts,
                        sanitize_log_value(&err)
                    ));
                }
            }
        }

        if options.once {
            logger.log_transition(&format!("supervisor finished restarts={}", restarts));
            return Ok(SupervisorExit::Finished { restarts });
        }
        sleep_interruptible(options.poll_interval, interrupt);
    }
}
