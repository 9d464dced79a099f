//! QA scenario document.
//!
//! Two row syntaxes may be mixed in one file:
//!
//! ```text
//! | A2 | Name | Steps | Risk/expected | [ ] |
//! - [ ] A2.1 Name
//! ```
//!
//! Every other line (headings, prose, table separators) is ignored. The
//! scenario ID is the identity used for matching.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::dispense::{Checklist, WorkItem};
use crate::files;
use crate::item_types::{MarkOutcome, Progress};

pub(crate) const UNNAMED_SCENARIO: &str = "(no name)";

fn re_table_row() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\|\s*(?P<id>[A-Za-z0-9]+(?:\.[A-Za-z0-9]+)*)\s*\|\s*(?P<name>.*?)\|\s*(?P<steps>.*?)\|\s*(?P<risk>.*?)\|\s*\[\s*(?P<done>[xX ]?)\s*\]\s*\|\s*$",
        )
        .expect("valid table row regex")
    })
}

fn re_list_row() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^-\s+\[\s*(?P<done>[xX ]?)\s*\]\s*(?P<id>[A-Za-z0-9]+(?:\.[A-Za-z0-9]+)*)\b(?P<rest>.*)$",
        )
        .expect("valid list row regex")
    })
}

fn re_table_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\s*\]\s*\|\s*$").expect("valid table marker regex"))
}

fn re_list_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-\s+\[\s*\]\s*").expect("valid list marker regex"))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RowKind {
    Table,
    List,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Scenario {
    pub(crate) kind: RowKind,
    pub(crate) line_index: usize,
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) steps: String,
    pub(crate) risk: String,
    pub(crate) done: bool,
}

impl WorkItem for Scenario {
    /// `"{id} | {name}"`, with trailing blanks dropped so an unnamed row
    /// reads back from the tracker file unchanged.
    fn fetch_key(&self) -> String {
        format!("{} | {}", self.id, self.name).trim_end().to_string()
    }

    fn label(&self) -> &str {
        &self.id
    }
}

fn is_done_marker(raw: Option<regex::Match<'_>>) -> bool {
    raw.is_some_and(|mark| mark.as_str().trim().eq_ignore_ascii_case("x"))
}

fn capture(captures: &regex::Captures<'_>, name: &str) -> String {
    captures
        .name(name)
        .map(|value| value.as_str().trim().to_string())
        .unwrap_or_default()
}

fn parse_table_row(line_index: usize, line: &str) -> Option<Scenario> {
    let captures = re_table_row().captures(line)?;
    Some(Scenario {
        kind: RowKind::Table,
        line_index,
        id: capture(&captures, "id"),
        name: capture(&captures, "name"),
        steps: capture(&captures, "steps"),
        risk: capture(&captures, "risk"),
        done: is_done_marker(captures.name("done")),
    })
}

fn parse_list_row(line_index: usize, line: &str) -> Option<Scenario> {
    let captures = re_list_row().captures(line)?;
    Some(Scenario {
        kind: RowKind::List,
        line_index,
        id: capture(&captures, "id"),
        name: capture(&captures, "rest"),
        steps: String::new(),
        risk: String::new(),
        done: is_done_marker(captures.name("done")),
    })
}

/// All recognized rows in document order.
pub(crate) fn parse_scenarios(content: &str) -> Vec<Scenario> {
    content
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            parse_table_row(index, line).or_else(|| parse_list_row(index, line))
        })
        .collect()
}

pub(crate) fn scenario_progress(scenarios: &[Scenario]) -> Progress {
    Progress {
        done: scenarios.iter().filter(|scenario| scenario.done).count(),
        total: scenarios.len(),
    }
}

/// Table rows are matched before list rows. Returns the rewritten document
/// when a marker was flipped.
pub(crate) fn mark_scenario_done(content: &str, id: &str) -> (Option<String>, MarkOutcome) {
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();

    let found = lines
        .iter()
        .enumerate()
        .find_map(|(index, line)| parse_table_row(index, line).filter(|row| row.id == id))
        .or_else(|| {
            lines
                .iter()
                .enumerate()
                .find_map(|(index, line)| parse_list_row(index, line).filter(|row| row.id == id))
        });

    let Some(row) = found else {
        return (None, MarkOutcome::NotFound);
    };
    if row.done {
        return (None, MarkOutcome::AlreadyDone);
    }

    let line = &lines[row.line_index];
    let rewritten = match row.kind {
        RowKind::Table => re_table_marker().replace(line, "[x] |").into_owned(),
        RowKind::List => re_list_marker().replace(line, "- [x] ").into_owned(),
    };
    lines[row.line_index] = rewritten;

    let mut updated = lines.join("\n");
    updated.push('\n');
    (Some(updated), MarkOutcome::Marked)
}

#[derive(Clone, Debug)]
pub(crate) struct ScenarioList {
    path: PathBuf,
}

impl ScenarioList {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub(crate) fn all(&self) -> Result<Vec<Scenario>, String> {
        let content = files::read_optional(&self.path)?.unwrap_or_default();
        Ok(parse_scenarios(&content))
    }

    /// Name used in ledger entries; falls back to a placeholder when the
    /// scenario is unknown or unnamed.
    pub(crate) fn name_of(&self, id: &str) -> Result<String, String> {
        let name = self
            .all()?
            .into_iter()
            .find(|scenario| scenario.id == id)
            .map(|scenario| scenario.name)
            .unwrap_or_default();
        if name.is_empty() {
            return Ok(UNNAMED_SCENARIO.to_string());
        }
        Ok(name)
    }
}

impl Checklist for ScenarioList {
    type Item = Scenario;

    fn path(&self) -> &Path {
        &self.path
    }

    fn first_unchecked(&self) -> Result<Option<Scenario>, String> {
        Ok(self.all()?.into_iter().find(|scenario| !scenario.done))
    }

    fn mark_done(&self, identity: &str) -> Result<MarkOutcome, String> {
        let Some(content) = files::read_optional(&self.path)? else {
            return Ok(MarkOutcome::NotFound);
        };
        let (updated, outcome) = mark_scenario_done(&content, identity);
        if let Some(updated) = updated {
            files::write(&self.path, &updated)?;
        }
        Ok(outcome)
    }

    fn progress(&self) -> Result<Progress, String> {
        Ok(scenario_progress(&self.all()?))
    }
}
