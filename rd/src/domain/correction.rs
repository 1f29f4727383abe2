//! Ralph-Loop records: error analyses, correction plans and attempts

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Closed set of failure classes the analyzer can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Syntax,
    Type,
    MissingDependency,
    AssertionFailure,
    Timeout,
    #[default]
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Syntax => write!(f, "syntax"),
            Self::Type => write!(f, "type"),
            Self::MissingDependency => write!(f, "missing-dependency"),
            Self::AssertionFailure => write!(f, "assertion-failure"),
            Self::Timeout => write!(f, "timeout"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Structured view of a failed command's output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ErrorAnalysis {
    pub kind: ErrorKind,

    /// Offending file, verified to exist on disk
    pub file: Option<PathBuf>,

    pub line: Option<u32>,
    pub column: Option<u32>,

    /// Most relevant error line
    pub message: String,

    /// Short query suitable for a web/doc search
    pub search_query: String,
}

impl ErrorAnalysis {
    /// An analysis the generator cannot act on: unknown kind and no file
    pub fn is_actionable(&self) -> bool {
        !(self.kind == ErrorKind::Unknown && self.file.is_none())
    }

    /// One-line summary for logs and attempt records
    pub fn summary(&self) -> String {
        let location = match (&self.file, self.line, self.column) {
            (Some(file), Some(line), Some(col)) => format!(" at {}:{}:{}", file.display(), line, col),
            (Some(file), Some(line), None) => format!(" at {}:{}", file.display(), line),
            (Some(file), None, _) => format!(" in {}", file.display()),
            _ => String::new(),
        };
        format!("{}{}: {}", self.kind, location, self.message)
    }
}

/// Where a correction plan came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "name")]
pub enum PlanSource {
    /// A deterministic pattern rule
    Rule(String),
    /// The external text-generation collaborator
    Llm,
    /// Comment out the offending line and annotate it
    Fallback,
}

/// A proposed search/replace edit against one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionPlan {
    pub target_file: PathBuf,

    /// 1-indexed line the search text must start on; None lets it match
    /// anywhere, but only once
    #[serde(default)]
    pub line: Option<u32>,

    /// Text that must be present verbatim in the current content
    pub search: String,

    pub replace: String,
    pub rationale: String,
    pub source: PlanSource,
}

impl CorrectionPlan {
    /// A plan whose replacement equals its search text changes nothing
    pub fn is_noop(&self) -> bool {
        self.search == self.replace
    }

    /// Render as a minimal unified-style diff for the attempt history
    pub fn to_diff(&self) -> String {
        let mut diff = format!("--- {}\n+++ {}\n", self.target_file.display(), self.target_file.display());
        if let Some(line) = self.line {
            diff.push_str(&format!("@@ line {} @@\n", line));
        }
        for line in self.search.lines() {
            diff.push_str(&format!("-{}\n", line));
        }
        for line in self.replace.lines() {
            diff.push_str(&format!("+{}\n", line));
        }
        diff
    }
}

/// How a single correction attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionOutcome {
    /// Re-execution passed
    Success,
    /// Plan applied, re-execution still failed
    StillFailing,
    /// Search text absent; nothing written, re-analysis forced
    PatchMismatch,
    /// Analysis or generator produced nothing to apply
    NoActionableFix,
    /// The write itself failed; original left unchanged
    ApplyFailed,
}

impl std::fmt::Display for CorrectionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::StillFailing => write!(f, "still_failing"),
            Self::PatchMismatch => write!(f, "patch_mismatch"),
            Self::NoActionableFix => write!(f, "no_actionable_fix"),
            Self::ApplyFailed => write!(f, "apply_failed"),
        }
    }
}

/// One full analyze → generate → apply → re-execute cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionAttempt {
    pub task_id: String,

    /// 1-indexed, never exceeds the configured maximum
    pub attempt: u32,

    pub analysis_summary: String,
    pub proposed_diff: Option<String>,
    pub applied: bool,
    pub backup_id: Option<String>,
    pub outcome: CorrectionOutcome,
    pub timestamp: DateTime<Utc>,
}

impl CorrectionAttempt {
    /// Start a record for `task_id`'s attempt number `attempt`
    pub fn new(task_id: impl Into<String>, attempt: u32, analysis: &ErrorAnalysis) -> Self {
        let task_id = task_id.into();
        debug!(%task_id, attempt, "CorrectionAttempt::new: called");
        Self {
            task_id,
            attempt,
            analysis_summary: analysis.summary(),
            proposed_diff: None,
            applied: false,
            backup_id: None,
            outcome: CorrectionOutcome::NoActionableFix,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis(kind: ErrorKind, file: Option<&str>) -> ErrorAnalysis {
        ErrorAnalysis {
            kind,
            file: file.map(PathBuf::from),
            line: Some(3),
            column: Some(11),
            message: "Unexpected token ';'".to_string(),
            search_query: String::new(),
        }
    }

    #[test]
    fn test_unknown_without_file_is_not_actionable() {
        assert!(!analysis(ErrorKind::Unknown, None).is_actionable());
        assert!(analysis(ErrorKind::Unknown, Some("a.js")).is_actionable());
        assert!(analysis(ErrorKind::Timeout, None).is_actionable());
    }

    #[test]
    fn test_summary_includes_location() {
        let summary = analysis(ErrorKind::Syntax, Some("src/a.js")).summary();
        assert_eq!(summary, "syntax at src/a.js:3:11: Unexpected token ';'");
    }

    #[test]
    fn test_plan_diff_and_noop() {
        let plan = CorrectionPlan {
            target_file: PathBuf::from("a.js"),
            line: Some(4),
            search: "const x = ;".to_string(),
            replace: "const x = 0;".to_string(),
            rationale: "default value".to_string(),
            source: PlanSource::Rule("incomplete-assignment".to_string()),
        };
        assert!(!plan.is_noop());
        let diff = plan.to_diff();
        assert!(diff.contains("@@ line 4 @@\n"));
        assert!(diff.contains("-const x = ;\n"));
        assert!(diff.contains("+const x = 0;\n"));
    }

    #[test]
    fn test_error_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::MissingDependency).unwrap(),
            r#""missing-dependency""#
        );
        assert_eq!(ErrorKind::AssertionFailure.to_string(), "assertion-failure");
    }
}
