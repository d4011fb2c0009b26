//! Corpus version module - semantic versions advanced by snapshots

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which component of the version a snapshot advances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BumpKind {
    /// Incompatible corpus restructuring
    Major,
    /// New sources or knowledge
    Minor,
    /// Corrections, backups and calibration
    Patch,
}

impl BumpKind {
    /// Get the bump kind as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            BumpKind::Major => "major",
            BumpKind::Minor => "minor",
            BumpKind::Patch => "patch",
        }
    }
}

impl std::str::FromStr for BumpKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "major" => Ok(BumpKind::Major),
            "minor" => Ok(BumpKind::Minor),
            "patch" => Ok(BumpKind::Patch),
            _ => Err(format!("Invalid bump kind: {}", s)),
        }
    }
}

/// Semantic version of the corpus
///
/// Ordering compares major, then minor, then patch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CorpusVersion {
    /// Major component
    pub major: u32,
    /// Minor component
    pub minor: u32,
    /// Patch component
    pub patch: u32,
}

impl CorpusVersion {
    /// Create a version
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// The next version for the given bump
    ///
    /// # Examples
    ///
    /// ```
    /// use scriptorium_domain::{BumpKind, CorpusVersion};
    ///
    /// let v = CorpusVersion::new(1, 4, 2);
    /// assert_eq!(v.bump(BumpKind::Patch), CorpusVersion::new(1, 4, 3));
    /// assert_eq!(v.bump(BumpKind::Minor), CorpusVersion::new(1, 5, 0));
    /// assert_eq!(v.bump(BumpKind::Major), CorpusVersion::new(2, 0, 0));
    /// ```
    pub fn bump(&self, kind: BumpKind) -> Self {
        match kind {
            BumpKind::Major => Self::new(self.major + 1, 0, 0),
            BumpKind::Minor => Self::new(self.major, self.minor + 1, 0),
            BumpKind::Patch => Self::new(self.major, self.minor, self.patch + 1),
        }
    }
}

impl fmt::Display for CorpusVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl std::str::FromStr for CorpusVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches(['v', 'V']);
        let parts: Vec<&str> = trimmed.split('.').collect();
        if parts.len() != 3 {
            return Err(format!("Invalid version '{}': expected MAJOR.MINOR.PATCH", s));
        }
        let parse = |p: &str| {
            p.parse::<u32>()
                .map_err(|e| format!("Invalid version component '{}': {}", p, e))
        };
        Ok(Self::new(parse(parts[0])?, parse(parts[1])?, parse(parts[2])?))
    }
}
