use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::models::{IncidentCounts, Selection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Comparator {
    LessThan,
    GreaterThan,
}

impl Comparator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Comparator::LessThan => "<",
            Comparator::GreaterThan => ">",
        }
    }

    /// Strict inequality: a count equal to the threshold never matches.
    pub fn matches(&self, count: u32, threshold: u32) -> bool {
        match self {
            Comparator::LessThan => count < threshold,
            Comparator::GreaterThan => count > threshold,
        }
    }
}

impl FromStr for Comparator {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "<" | "lt" | "less_than" => Ok(Comparator::LessThan),
            ">" | "gt" | "greater_than" => Ok(Comparator::GreaterThan),
            other => Err(format!("unrecognised comparator `{other}`")),
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

pub fn evaluate(counts: &IncidentCounts, threshold: u32, comparator: Comparator) -> Selection {
    counts
        .iter()
        .filter(|(_, count)| comparator.matches(**count, threshold))
        .map(|(student_id, count)| (*student_id, *count))
        .collect()
}
