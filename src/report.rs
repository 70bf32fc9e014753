use std::fmt::Write;

use crate::models::{OutcomeStatus, PassReport};

pub fn build_report(report: &PassReport) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Attendance Group Recompute");
    let _ = writeln!(output, "Pass started at {}", report.started_at.to_rfc3339());
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    for status in [
        OutcomeStatus::Ok,
        OutcomeStatus::SkippedConfigError,
        OutcomeStatus::Failed,
        OutcomeStatus::Cancelled,
    ] {
        let count = report.count(status);
        if count > 0 {
            let _ = writeln!(output, "- {}: {} groups", status, count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Groups");

    if report.outcomes.is_empty() {
        let _ = writeln!(output, "No groups are defined.");
        return output;
    }

    for outcome in &report.outcomes {
        match &outcome.reason {
            Some(reason) => {
                let _ = writeln!(
                    output,
                    "- {} ({}): {}, {} members kept, {}",
                    outcome.group_name, outcome.group_id, outcome.status, outcome.member_count, reason
                );
            }
            None => {
                let _ = writeln!(
                    output,
                    "- {} ({}): {}, {} members",
                    outcome.group_name, outcome.group_id, outcome.status, outcome.member_count
                );
            }
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GroupOutcome;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn outcome(name: &str, status: OutcomeStatus, count: u32, reason: Option<&str>) -> GroupOutcome {
        GroupOutcome {
            group_id: Uuid::new_v4(),
            group_name: name.to_string(),
            status,
            member_count: count,
            reason: reason.map(str::to_string),
        }
    }

    #[test]
    fn lists_each_group_with_its_status() {
        let report = PassReport {
            started_at: Utc.with_ymd_and_hms(2026, 3, 16, 15, 0, 0).unwrap(),
            outcomes: vec![
                outcome("Chronic absence", OutcomeStatus::Ok, 4, None),
                outcome("Broken", OutcomeStatus::SkippedConfigError, 2, Some("no comparator")),
            ],
        };

        let text = build_report(&report);
        assert!(text.contains("2026-03-16T15:00:00+00:00"));
        assert!(text.contains("- OK: 1 groups"));
        assert!(text.contains("- SKIPPED_CONFIG_ERROR: 1 groups"));
        assert!(!text.contains("FAILED"));
        assert!(text.contains("Chronic absence"));
        assert!(text.contains("4 members"));
        assert!(text.contains("2 members kept, no comparator"));
    }

    #[test]
    fn empty_pass_says_so() {
        let report = PassReport {
            started_at: Utc::now(),
            outcomes: Vec::new(),
        };
        assert!(build_report(&report).contains("No groups are defined."));
    }
}
