//! Append-only record of scenario results.

use chrono::Local;
use std::path::{Path, PathBuf};

use crate::files;
use crate::item_types::ResultStatus;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const RESULT_LINE_PREFIX: &str = "- Result: ";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct LedgerStats {
    pub(crate) pass: usize,
    pub(crate) fail: usize,
    pub(crate) skip: usize,
}

impl LedgerStats {
    pub(crate) fn get(&self, status: ResultStatus) -> usize {
        match status {
            ResultStatus::Pass => self.pass,
            ResultStatus::Fail => self.fail,
            ResultStatus::Skip => self.skip,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct ResultLedger {
    path: PathBuf,
}

impl ResultLedger {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn append(
        &self,
        id: &str,
        name: &str,
        status: ResultStatus,
        details: &str,
    ) -> Result<(), String> {
        let now = Local::now().format(TIMESTAMP_FORMAT).to_string();
        if !self.path.exists() {
            files::write(&self.path, &render_header(&now))?;
        }
        files::append(&self.path, &render_entry(id, name, status, &now, details))
    }

    /// `None` when no ledger has been written yet.
    pub(crate) fn stats(&self) -> Result<Option<LedgerStats>, String> {
        Ok(files::read_optional(&self.path)?.map(|content| tally(&content)))
    }
}

pub(crate) fn render_header(started_at: &str) -> String {
    format!("# TEST RESULTS\n\nStarted: {started_at}\n\n---\n\n")
}

pub(crate) fn render_entry(
    id: &str,
    name: &str,
    status: ResultStatus,
    timestamp: &str,
    details: &str,
) -> String {
    let mut entry = format!(
        "**[{id}]** {name}\n{RESULT_LINE_PREFIX}{}\n- Time: {timestamp}\n",
        status.marker()
    );
    if !details.is_empty() {
        let details = details.replace(['\r', '\n'], " ");
        entry.push_str(&format!("- Details: {details}\n"));
    }
    entry.push('\n');
    entry
}

/// Counts only `- Result:` lines so status words inside details are not
/// tallied.
pub(crate) fn tally(content: &str) -> LedgerStats {
    let mut stats = LedgerStats::default();
    for line in content.lines() {
        let Some(rest) = line.strip_prefix(RESULT_LINE_PREFIX) else {
            continue;
        };
        let rest = rest.trim_end();
        if rest == ResultStatus::Pass.marker() {
            stats.pass += 1;
        } else if rest == ResultStatus::Fail.marker() {
            stats.fail += 1;
        } else if rest == ResultStatus::Skip.marker() {
            stats.skip += 1;
        }
    }
    stats
}
