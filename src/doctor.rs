use std::path::Path;

use crate::app::{quit, render_prompt, require_file, Context, Quit};
use crate::checklist::TaskList;
use crate::dispense::Checklist;
use crate::item_types::{Manager, ResultStatus};
use crate::ledger::ResultLedger;
use crate::scenarios::ScenarioList;
use crate::session::SessionStore;
use crate::shell::command_exists;

fn describe_limit(limit: i64) -> String {
    if limit <= 0 {
        "disabled".to_string()
    } else {
        limit.to_string()
    }
}

fn report_checklist<C: Checklist>(label: &str, list: &C) -> Result<(), String> {
    let path = list.path();
    if !path.is_file() {
        println!("  {}: {} (missing, reads as empty)", label, path.display());
        return Ok(());
    }
    let progress = list.progress()?;
    println!(
        "  {}: {} ({} done, {}%)",
        label,
        path.display(),
        progress,
        progress.percent()
    );
    Ok(())
}

fn report_tracker(ctx: &Context, manager: Manager) {
    let state = ctx.store.fetch_state(manager);
    let path = ctx.store.paths().fetch_state(manager).display().to_string();
    match state.last {
        Some(last) => println!(
            "  {} tracker: {} fetch(es) of {:?} ({})",
            manager, state.count, last, path
        ),
        None => println!("  {} tracker: empty ({})", manager, path),
    }
}

fn check_supervisor(ctx: &Context) -> Result<(), String> {
    let supervisor = &ctx.settings.supervisor;
    match &supervisor.on_restart {
        Some(_) if !command_exists("bash") => {
            return Err("supervisor.on_restart is set but bash was not found on PATH.".to_string())
        }
        Some(command) => println!("  on_restart: {}", command),
        None => println!("  on_restart: not configured (supervise is unavailable)"),
    }
    match &supervisor.prompt_path {
        Some(path) => {
            require_file(path, "supervisor.prompt_path")?;
            let prompt = render_prompt(path)?;
            if prompt.trim().is_empty() {
                return Err(format!("Prompt file {} is empty.", path.display()));
            }
            println!("  prompt: {}", path.display());
        }
        None => println!("  prompt: built-in"),
    }
    println!(
        "  poll interval: {}s, settle delay: {}s",
        supervisor.poll_interval.as_secs(),
        supervisor.settle_delay.as_secs()
    );
    Ok(())
}

fn run_doctor_checks(ctx: &Context) -> Result<(), String> {
    let settings = &ctx.settings;
    match &ctx.config_path {
        Some(path) => println!("config: {}", path.display()),
        None => println!("config: none (built-in defaults)"),
    }

    println!("checklists:");
    report_checklist("tasks", &TaskList::new(&settings.tasks_file))?;
    report_checklist("scenarios", &ScenarioList::new(&settings.scenarios_file))?;

    println!("session:");
    println!(
        "  batch: {} (tasks limit {}, scenarios limit {})",
        ctx.store.batch_count(),
        describe_limit(settings.batch_limit),
        describe_limit(settings.scenarios_batch_limit)
    );
    println!("  max same fetches: {}", settings.max_same_fetches);
    report_tracker(ctx, Manager::Tasks);
    report_tracker(ctx, Manager::Scenarios);
    println!(
        "  restart signal: {}",
        if ctx.store.restart_signal_raised() {
            "raised"
        } else {
            "clear"
        }
    );

    println!("results:");
    let ledger = ResultLedger::new(&settings.results_file);
    match ledger.stats()? {
        Some(stats) => {
            let tallies: Vec<String> = ResultStatus::ALL
                .iter()
                .map(|status| format!("{}={}", status, stats.get(*status)))
                .collect();
            println!("  {}: {}", display(ledger.path()), tallies.join(" "));
        }
        None => println!("  {}: no results yet", display(ledger.path())),
    }

    println!("supervisor:");
    check_supervisor(ctx)
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

pub(crate) fn run_doctor(ctx: &Context) -> Result<(), Quit> {
    ctx.logger.log_transition("doctor start");
    if let Err(message) = run_doctor_checks(ctx) {
        eprintln!("{}", message);
        return Err(quit(&ctx.logger, &message, 1));
    }
    println!("doctor: ok");
    ctx.logger.log_transition("doctor ok");
    Ok(())
}
