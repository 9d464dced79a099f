use clap::Parser;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::checklist::TaskList;
use crate::cli::{Cli, CliCommand, ScenarioCommand, TaskCommand};
use crate::config::{load_config, parse_batch_limit_override, Config, Settings};
use crate::dispense::{complete, dispense_next, Checklist, CompleteOutcome, NextOutcome};
use crate::doctor::run_doctor;
use crate::item_types::{Manager, MarkOutcome, ResultStatus};
use crate::ledger::ResultLedger;
use crate::logger::{sanitize_log_value, Logger};
use crate::scenarios::ScenarioList;
use crate::session::{reset_session, FileSessionStore, SessionStore};
use crate::supervisor::{
    run_supervisor, ShellActuator, SupervisorExit, SupervisorOptions, DEFAULT_RESTART_PROMPT,
};

const DEFAULT_CONFIG_NAME: &str = "taskgate.yml";
pub(crate) const SCENARIOS_BATCH_LIMIT_ENV: &str = "TASKGATE_SCENARIOS_BATCH_LIMIT";

pub(crate) const EXIT_SAFETY_STOP: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug)]
pub(crate) struct Quit {
    pub(crate) code: i32,
    pub(crate) reason: String,
}

impl Quit {
    pub(crate) fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.code as u8)
    }
}

pub(crate) fn quit(logger: &Logger, reason: &str, code: i32) -> Quit {
    let sanitized = if reason.trim().is_empty() {
        "unknown".to_string()
    } else {
        sanitize_log_value(reason)
    };
    logger.log_transition(&format!("quit reason={} code={}", sanitized, code));
    Quit {
        code,
        reason: reason.to_string(),
    }
}

/// Reports `message` on stderr and turns it into an exit-code-1 quit.
fn fail(logger: &Logger, message: String) -> Quit {
    eprintln!("{}", message);
    quit(logger, &message, 1)
}

/// Everything a command needs, resolved once per invocation.
pub(crate) struct Context {
    pub(crate) settings: Settings,
    pub(crate) config_path: Option<PathBuf>,
    pub(crate) logger: Logger,
    pub(crate) store: FileSessionStore,
}

impl Context {
    pub(crate) fn new(settings: Settings, config_path: Option<PathBuf>) -> Self {
        let logger = Logger::new(settings.log_path.clone());
        let store = FileSessionStore::new(settings.session.clone());
        Self {
            settings,
            config_path,
            logger,
            store,
        }
    }
}

pub(crate) fn require_file(path: &Path, label: &str) -> Result<(), String> {
    if !path.is_file() {
        return Err(format!("Missing {}: {}", label, path.display()));
    }
    Ok(())
}

/// Reads the restart prompt. A leading `---` YAML frontmatter block is not
/// part of the text sent to the agent; an unterminated block swallows the
/// whole file.
pub(crate) fn render_prompt(path: &Path) -> Result<String, String> {
    let content = fs::read_to_string(path)
        .map_err(|err| format!("Failed to read prompt {}: {}", path.display(), err))?;
    let mut lines = content.lines().peekable();
    if lines.peek() == Some(&"---") {
        lines.next();
        lines.by_ref().find(|line| *line == "---");
    }
    Ok(lines.collect::<Vec<_>>().join("\n"))
}

/// Finds and loads configuration. An explicit `--config` must exist; the
/// default `./taskgate.yml` is optional.
pub(crate) fn load_context(
    config_flag: Option<PathBuf>,
    cwd: &Path,
    scenarios_limit_env: Option<&str>,
) -> Result<Context, Quit> {
    let bootstrap_logger = Logger::disabled();
    let config_path = match config_flag {
        Some(path) => {
            let path = cwd.join(path);
            if !path.is_file() {
                return Err(fail(
                    &bootstrap_logger,
                    format!("Missing config file: {}", path.display()),
                ));
            }
            Some(path)
        }
        None => Some(cwd.join(DEFAULT_CONFIG_NAME)).filter(|path| path.is_file()),
    };

    let (config, base_dir) = match &config_path {
        Some(path) => {
            let loaded = load_config(path).map_err(|message| fail(&bootstrap_logger, message))?;
            let base_dir = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| cwd.to_path_buf());
            (loaded.config, base_dir)
        }
        None => (Config::default(), cwd.to_path_buf()),
    };

    let scenarios_override = match parse_batch_limit_override(scenarios_limit_env) {
        Ok(value) => value,
        Err(message) => {
            eprintln!("Warning: {} ({})", message, SCENARIOS_BATCH_LIMIT_ENV);
            None
        }
    };

    let settings = Settings::resolve(&config, &base_dir, scenarios_override);
    Ok(Context::new(settings, config_path))
}

fn run_tasks(ctx: &Context, command: TaskCommand) -> Result<(), Quit> {
    let list = TaskList::new(&ctx.settings.tasks_file);
    let logger = &ctx.logger;
    match command {
        TaskCommand::Next => {
            let policy = ctx.settings.policy(Manager::Tasks);
            let outcome = dispense_next(&list, &ctx.store, Manager::Tasks, &policy, logger)
                .map_err(|err| fail(logger, err))?;
            match outcome {
                NextOutcome::Item {
                    item, fetch_count, ..
                } => {
                    println!("YOUR TASK: {}", item.description);
                    note_repeat_fetch(ctx, fetch_count);
                }
                NextOutcome::Exhausted { .. } => println!("DONE: No tasks left."),
                NextOutcome::BatchLimitReached { limit } => print_batch_limit(limit),
                NextOutcome::SafetyStop { key, fetch_count } => {
                    eprintln!(
                        "SAFETY STOP: Task fetched {} times without success.",
                        fetch_count
                    );
                    eprintln!("Stuck on: {}", key);
                    eprintln!("Stopping so the agent does not burn tokens.");
                    return Err(quit(logger, "safety_stop", EXIT_SAFETY_STOP));
                }
            }
            Ok(())
        }
        TaskCommand::Done { task } => {
            let outcome = complete(&list, &ctx.store, Manager::Tasks, &task, logger, |_| Ok(()))
                .map_err(|err| fail(logger, err))?;
            match outcome {
                CompleteOutcome::Completed { mark, .. } => {
                    if mark == MarkOutcome::AlreadyDone {
                        println!("SUCCESS: Task was already marked as [x].");
                    } else {
                        println!("SUCCESS: Task marked as [x].");
                    }
                    Ok(())
                }
                CompleteOutcome::NotFound => Err(fail(
                    logger,
                    format!(
                        "ERROR: Task not found in {}: '{}'",
                        file_name(list.path()),
                        task
                    ),
                )),
            }
        }
        TaskCommand::Stats => {
            let progress = list.progress().map_err(|err| fail(logger, err))?;
            println!("TASK STATS:");
            println!("  Done: {}", progress.done);
            println!("  Remaining: {}", progress.remaining());
            println!("  Total: {}", progress.total);
            println!("  Progress: {}%", progress.percent());
            print_batch_status(ctx, ctx.settings.batch_limit);
            Ok(())
        }
        TaskCommand::Reset => {
            reset_session(&ctx.store, Manager::Tasks).map_err(|err| fail(logger, err))?;
            logger.log_transition("reset manager=tasks");
            println!("RESET: Task manager state cleared.");
            Ok(())
        }
    }
}

fn run_scenarios(ctx: &Context, command: ScenarioCommand) -> Result<(), Quit> {
    let list = ScenarioList::new(&ctx.settings.scenarios_file);
    let logger = &ctx.logger;
    match command {
        ScenarioCommand::Next => {
            let policy = ctx.settings.policy(Manager::Scenarios);
            let outcome = dispense_next(&list, &ctx.store, Manager::Scenarios, &policy, logger)
                .map_err(|err| fail(logger, err))?;
            match outcome {
                NextOutcome::Item {
                    item,
                    fetch_count,
                    progress,
                } => {
                    println!("[{}/{}] YOUR SCENARIO:", progress.done + 1, progress.total);
                    println!("ID: {}", item.id);
                    for (label, value) in [
                        ("Name", &item.name),
                        ("Steps", &item.steps),
                        ("Risk/Expected", &item.risk),
                    ] {
                        if !value.is_empty() {
                            println!("{}: {}", label, value);
                        }
                    }
                    note_repeat_fetch(ctx, fetch_count);
                }
                NextOutcome::Exhausted { progress } => {
                    println!("DONE: All scenarios completed ({}).", progress)
                }
                NextOutcome::BatchLimitReached { limit } => print_batch_limit(limit),
                NextOutcome::SafetyStop { key, fetch_count } => {
                    eprintln!(
                        "SAFETY STOP: Scenario fetched {} times without success.",
                        fetch_count
                    );
                    eprintln!("Stuck on: {}", key);
                    return Err(quit(logger, "safety_stop", EXIT_SAFETY_STOP));
                }
            }
            Ok(())
        }
        ScenarioCommand::Done { id, status, details } => {
            record_scenario(ctx, &list, id.trim(), status, &details.details)
        }
        ScenarioCommand::Skip { id, details } => {
            record_scenario(ctx, &list, id.trim(), ResultStatus::Skip, &details.details)
        }
        ScenarioCommand::Stats => {
            let progress = list.progress().map_err(|err| fail(logger, err))?;
            println!("SCENARIO STATS:");
            println!("  Done: {}", progress.done);
            println!("  Remaining: {}", progress.remaining());
            println!("  Total: {}", progress.total);
            println!("  Progress: {}%", progress.percent());
            print_batch_status(ctx, ctx.settings.scenarios_batch_limit);

            let ledger = ResultLedger::new(&ctx.settings.results_file);
            if let Some(stats) = ledger.stats().map_err(|err| fail(logger, err))? {
                println!();
                println!("RESULTS:");
                for status in ResultStatus::ALL {
                    println!("  {}: {}", status.marker(), stats.get(status));
                }
            }
            Ok(())
        }
        ScenarioCommand::Reset => {
            reset_session(&ctx.store, Manager::Scenarios).map_err(|err| fail(logger, err))?;
            logger.log_transition("reset manager=scenarios");
            println!("RESET: Scenario manager state cleared.");
            Ok(())
        }
    }
}

fn record_scenario(
    ctx: &Context,
    list: &ScenarioList,
    id: &str,
    status: ResultStatus,
    details: &str,
) -> Result<(), Quit> {
    let logger = &ctx.logger;
    let ledger = ResultLedger::new(&ctx.settings.results_file);
    let name = list.name_of(id).map_err(|err| fail(logger, err))?;

    let outcome = complete(list, &ctx.store, Manager::Scenarios, id, logger, |_| {
        ledger.append(id, &name, status, details)
    })
    .map_err(|err| fail(logger, err))?;

    match outcome {
        CompleteOutcome::Completed { progress, .. } => {
            println!("SUCCESS: {} marked as [x]. Status: {}", id, status);
            println!("PROGRESS: {} ({}%)", progress, progress.percent());
            Ok(())
        }
        CompleteOutcome::NotFound => Err(fail(
            logger,
            format!(
                "ERROR: Scenario ID={} not found in {}",
                id,
                file_name(list.path())
            ),
        )),
    }
}

fn run_supervise(ctx: &Context, once: bool) -> Result<(), Quit> {
    let logger = &ctx.logger;
    let supervisor = &ctx.settings.supervisor;
    let Some(on_restart) = supervisor.on_restart.clone() else {
        return Err(fail(
            logger,
            "supervisor.on_restart must be set in the config to run the supervisor.".to_string(),
        ));
    };
    let prompt = match &supervisor.prompt_path {
        Some(path) => render_prompt(path).map_err(|err| fail(logger, err))?,
        None => DEFAULT_RESTART_PROMPT.to_string(),
    };

    let interrupt_flag = Arc::new(AtomicBool::new(false));
    if let Err(err) = ctrlc::set_handler({
        let interrupt_flag = Arc::clone(&interrupt_flag);
        move || {
            interrupt_flag.store(true, Ordering::SeqCst);
        }
    }) {
        eprintln!("Failed to set interrupt handler: {}", err);
    }

    println!(
        "taskgate supervisor watching {}",
        ctx.store.paths().restart_signal.display()
    );
    let mut actuator = ShellActuator::new(
        on_restart,
        ctx.settings.base_dir.clone(),
        ctx.config_path.as_ref().map(|path| path.display().to_string()),
        logger,
    );
    let options = SupervisorOptions {
        poll_interval: supervisor.poll_interval,
        settle_delay: supervisor.settle_delay,
        once,
    };
    let exit = run_supervisor(
        &ctx.store,
        &mut actuator,
        &prompt,
        &options,
        &interrupt_flag,
        logger,
    )
    .map_err(|err| fail(logger, err))?;

    match exit {
        SupervisorExit::Finished { .. } => Ok(()),
        SupervisorExit::Interrupted { restarts } => {
            println!("Supervisor stopped after {} restart(s).", restarts);
            Err(quit(logger, "interrupted", EXIT_INTERRUPTED))
        }
    }
}

/// Warns on stderr when the agent fetched the same item again without
/// completing it.
fn note_repeat_fetch(ctx: &Context, fetch_count: u32) {
    if fetch_count > 1 {
        eprintln!(
            "Note: same item fetched {} of {} allowed times without completion.",
            fetch_count, ctx.settings.max_same_fetches
        );
    }
}

fn print_batch_limit(limit: i64) {
    println!("BATCH LIMIT ({}) REACHED. REQUESTING RESTART...", limit);
}

fn print_batch_status(ctx: &Context, limit: i64) {
    let count = ctx.store.batch_count();
    if limit <= 0 {
        println!("  Batch: {} (limit disabled)", count);
    } else {
        println!("  Batch: {}/{}", count, limit);
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub(crate) fn run_with_cli_in(
    cli: Cli,
    cwd: &Path,
    scenarios_limit_env: Option<&str>,
) -> Result<(), Quit> {
    let ctx = load_context(cli.config, cwd, scenarios_limit_env)?;
    match cli.command {
        CliCommand::Tasks { command } => run_tasks(&ctx, command.unwrap_or(TaskCommand::Next)),
        CliCommand::Scenarios { command } => {
            run_scenarios(&ctx, command.unwrap_or(ScenarioCommand::Next))
        }
        CliCommand::Supervise { once } => run_supervise(&ctx, once),
        CliCommand::Doctor => run_doctor(&ctx),
    }
}

pub(crate) fn run_with_cli(cli: Cli) -> Result<(), Quit> {
    let cwd = env::current_dir().map_err(|err| Quit {
        code: 1,
        reason: format!("Failed to determine working directory: {}", err),
    })?;
    let scenarios_limit_env = env::var(SCENARIOS_BATCH_LIMIT_ENV).ok();
    run_with_cli_in(cli, &cwd, scenarios_limit_env.as_deref())
}

pub(crate) fn run_with_args(args: Vec<OsString>) -> Result<(), Quit> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(err) => {
            // Usage errors exit 1; exit 2 is reserved for the safety stop.
            if err.use_stderr() {
                eprintln!("{err}");
                return Err(Quit {
                    code: 1,
                    reason: "cli_parse".to_string(),
                });
            }
            print!("{err}");
            return Ok(());
        }
    };
    run_with_cli(cli)
}

pub(crate) fn main_with_args(args: Vec<OsString>) -> ExitCode {
    match run_with_args(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(quit) => quit.exit_code(),
    }
}

pub(crate) fn main() -> ExitCode {
    main_with_args(env::args_os().collect())
}
