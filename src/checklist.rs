//! Plain checkbox task list (`- [ ] task` / `- [x] task`).
//!
//! A task's identity is its exact text. Completion requires the caller to
//! quote the task exactly as listed; a near miss is reported as not found
//! instead of guessing.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::dispense::{Checklist, WorkItem};
use crate::files;
use crate::item_types::{MarkOutcome, Progress};

const UNDONE_PREFIX: &str = "- [ ] ";
const DONE_PREFIXES: [&str; 2] = ["- [x] ", "- [X] "];

fn re_unchecked() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-\s+\[\s\]\s+(.+)$").expect("valid unchecked task regex"))
}

fn re_checkbox() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-\s+\[([ xX])\]\s+\S").expect("valid checkbox regex"))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct TaskItem {
    pub(crate) description: String,
}

impl WorkItem for TaskItem {
    fn fetch_key(&self) -> String {
        self.description.clone()
    }

    fn label(&self) -> &str {
        &self.description
    }
}

#[derive(Clone, Debug)]
pub(crate) struct TaskList {
    path: PathBuf,
}

impl TaskList {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read(&self) -> Result<String, String> {
        Ok(files::read_optional(&self.path)?.unwrap_or_default())
    }
}

impl Checklist for TaskList {
    type Item = TaskItem;

    fn path(&self) -> &Path {
        &self.path
    }

    fn first_unchecked(&self) -> Result<Option<TaskItem>, String> {
        Ok(first_unchecked_task(&self.read()?))
    }

    fn mark_done(&self, identity: &str) -> Result<MarkOutcome, String> {
        let Some(content) = files::read_optional(&self.path)? else {
            return Ok(MarkOutcome::NotFound);
        };
        let (updated, outcome) = mark_task_done(&content, identity);
        if let Some(updated) = updated {
            files::write(&self.path, &updated)?;
        }
        Ok(outcome)
    }

    fn progress(&self) -> Result<Progress, String> {
        Ok(task_progress(&self.read()?))
    }
}

pub(crate) fn first_unchecked_task(content: &str) -> Option<TaskItem> {
    content.lines().find_map(|line| {
        let captures = re_unchecked().captures(line)?;
        let description = captures.get(1)?.as_str().trim();
        if description.is_empty() {
            return None;
        }
        Some(TaskItem {
            description: description.to_string(),
        })
    })
}

/// Returns the rewritten document (when anything changed) and the outcome.
pub(crate) fn mark_task_done(content: &str, description: &str) -> (Option<String>, MarkOutcome) {
    // An empty description would match the prefix of every unchecked task.
    if description.trim().is_empty() {
        return (None, MarkOutcome::NotFound);
    }
    let undone = format!("{UNDONE_PREFIX}{description}");
    if content.contains(&undone) {
        let done = format!("- [x] {description}");
        return (Some(content.replacen(&undone, &done, 1)), MarkOutcome::Marked);
    }
    // Only a whole checked line counts; a checked task that merely starts
    // with `description` is a different task.
    let already_done = content.lines().any(|line| {
        DONE_PREFIXES
            .iter()
            .any(|prefix| line.trim_end().strip_prefix(prefix) == Some(description))
    });
    if already_done {
        return (None, MarkOutcome::AlreadyDone);
    }
    (None, MarkOutcome::NotFound)
}

pub(crate) fn task_progress(content: &str) -> Progress {
    let mut progress = Progress::default();
    for line in content.lines() {
        let Some(captures) = re_checkbox().captures(line) else {
            continue;
        };
        progress.total += 1;
        if captures.get(1).is_some_and(|mark| mark.as_str() != " ") {
            progress.done += 1;
        }
    }
    progress
}
