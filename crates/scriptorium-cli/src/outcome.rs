//! Graded exit codes

use scriptorium_domain::Severity;
use serde::Serialize;

/// How a command ended, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Nothing to report
    Success,
    /// Findings worth a look
    Warnings,
    /// Errors, or a command that could not finish its work
    Errors,
    /// Critical findings
    Critical,
}

impl Outcome {
    /// Grade by the worst finding; no finding is a success
    pub fn from_severity(worst: Option<Severity>) -> Self {
        match worst {
            None => Outcome::Success,
            Some(Severity::Critical) => Outcome::Critical,
            Some(Severity::High) => Outcome::Errors,
            Some(_) => Outcome::Warnings,
        }
    }

    /// The worse of two outcomes
    pub fn worst(self, other: Outcome) -> Outcome {
        self.max(other)
    }

    /// Process exit code
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::Success => 0,
            Outcome::Warnings => 1,
            Outcome::Errors => 2,
            Outcome::Critical => 3,
        }
    }

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Warnings => "warnings",
            Outcome::Errors => "errors",
            Outcome::Critical => "critical",
        }
    }
}
