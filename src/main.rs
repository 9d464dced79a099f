use std::process::ExitCode;

mod app;
mod checklist;
mod cli;
mod config;
mod dispense;
mod doctor;
mod files;
mod item_types;
mod ledger;
mod logger;
mod restart_payload;
mod scenarios;
mod session;
mod shell;
mod supervisor;


fn main() -> ExitCode {
    app::main()
}
