use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

/// Which checklist a command operates on. Each manager owns its own fetch
/// tracker; the batch counter and restart signal are shared.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Manager {
    Tasks,
    Scenarios,
}

impl Manager {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Tasks => "tasks",
            Self::Scenarios => "scenarios",
        }
    }
}

impl fmt::Display for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum ResultStatus {
    Pass,
    Fail,
    Skip,
}

impl ResultStatus {
    pub(crate) const ALL: [ResultStatus; 3] = [Self::Pass, Self::Fail, Self::Skip];

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Skip => "SKIP",
        }
    }

    pub(crate) fn glyph(self) -> &'static str {
        match self {
            Self::Pass => "✓",
            Self::Fail => "✗",
            Self::Skip => "⊘",
        }
    }

    /// Glyph and label as they appear in the result ledger, e.g. `✗ FAIL`.
    pub(crate) fn marker(self) -> String {
        format!("{} {}", self.glyph(), self.as_str())
    }
}

impl FromStr for ResultStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PASS" => Ok(Self::Pass),
            "FAIL" => Ok(Self::Fail),
            "SKIP" => Ok(Self::Skip),
            _ => Err(format!(
                "status must be PASS, FAIL or SKIP (got {:?})",
                value
            )),
        }
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(done, total)` over the rows a checklist recognizes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Progress {
    pub(crate) done: usize,
    pub(crate) total: usize,
}

impl Progress {
    pub(crate) fn remaining(self) -> usize {
        self.total.saturating_sub(self.done)
    }

    pub(crate) fn percent(self) -> usize {
        if self.total == 0 {
            return 0;
        }
        self.done * 100 / self.total
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.done, self.total)
    }
}

/// How many consecutive times the same unresolved item may be handed out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct FetchLimit(NonZeroU32);

impl FetchLimit {
    pub(crate) const DEFAULT: FetchLimit = match NonZeroU32::new(3) {
        Some(value) => FetchLimit(value),
        None => unreachable!(),
    };

    pub(crate) fn new(value: u32) -> Result<Self, String> {
        let Some(value) = NonZeroU32::new(value) else {
            return Err("must be a positive integer (got 0)".to_string());
        };
        Ok(Self(value))
    }

    pub(crate) fn get(self) -> u32 {
        self.0.get()
    }
}

impl Default for FetchLimit {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl<'de> Deserialize<'de> for FetchLimit {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = u32::deserialize(deserializer)?;
        FetchLimit::new(value).map_err(D::Error::custom)
    }
}

impl fmt::Display for FetchLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// Result of flipping an item's marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MarkOutcome {
    Marked,
    AlreadyDone,
    NotFound,
}
