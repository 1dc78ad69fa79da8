//! Walk report models, mutable report builder and progress accumulator.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use crate::location::Location;
use crate::spec::{EnumEntryAction, EnumOperationKind};

////////////////////////////////////////////////////////////////////////////////
// #region ReportWalk

/// Aggregate counters for one tree operation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportWalk {
    /// Operation the counters belong to.
    pub kind: EnumOperationKind,
    /// Total visited file entries.
    pub cnt_scanned: u64,
    /// Visited file entries accepted by the pattern set.
    pub cnt_matched: u64,
    pub cnt_copied: u64,
    pub cnt_moved: u64,
    /// Deleted files and directories (sync deletions included).
    pub cnt_deleted: u64,
    /// Entries reported without mutation.
    pub cnt_observed: u64,
    /// Entries kept by the conflict policy.
    pub cnt_skipped: u64,
    /// Entries rejected by [`crate::EnumConflictPolicy::FailIfExisting`].
    pub cnt_failed: u64,
    /// Whether the run stopped at a disposal.
    pub if_cancelled: bool,
}

impl ReportWalk {
    /// Machine-readable counters.
    pub fn to_dict(&self) -> BTreeMap<String, u64> {
        let mut dict_counts = BTreeMap::new();
        dict_counts.insert("cnt_scanned".to_string(), self.cnt_scanned);
        dict_counts.insert("cnt_matched".to_string(), self.cnt_matched);
        dict_counts.insert("cnt_copied".to_string(), self.cnt_copied);
        dict_counts.insert("cnt_moved".to_string(), self.cnt_moved);
        dict_counts.insert("cnt_deleted".to_string(), self.cnt_deleted);
        dict_counts.insert("cnt_observed".to_string(), self.cnt_observed);
        dict_counts.insert("cnt_skipped".to_string(), self.cnt_skipped);
        dict_counts.insert("cnt_failed".to_string(), self.cnt_failed);
        dict_counts
    }

    /// Human-readable one-line summary.
    pub fn format(&self, prefix: &str) -> String {
        let dict_counts = self.to_dict();
        let mut txt = format!(
            "{prefix} scanned={} matched={} copied={} moved={} deleted={} observed={} skipped={} failed={}",
            dict_counts["cnt_scanned"],
            dict_counts["cnt_matched"],
            dict_counts["cnt_copied"],
            dict_counts["cnt_moved"],
            dict_counts["cnt_deleted"],
            dict_counts["cnt_observed"],
            dict_counts["cnt_skipped"],
            dict_counts["cnt_failed"],
        );
        if self.if_cancelled {
            txt.push_str(" cancelled");
        }
        txt
    }
}

impl fmt::Display for ReportWalk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = format!("[{}]", self.kind.as_str().to_uppercase());
        write!(f, "{}", self.format(&prefix))
    }
}

/// Mutable accumulator for walk statistics.
#[derive(Debug, Clone)]
pub struct ReportWalkBuilder {
    kind: EnumOperationKind,
    cnt_scanned: u64,
    cnt_matched: u64,
    dict_actions: BTreeMap<&'static str, u64>,
    if_cancelled: bool,
}

fn _action_key(action: EnumEntryAction) -> &'static str {
    match action {
        EnumEntryAction::Copied => "cnt_copied",
        EnumEntryAction::Moved => "cnt_moved",
        EnumEntryAction::Deleted => "cnt_deleted",
        EnumEntryAction::Observed => "cnt_observed",
        EnumEntryAction::Skipped => "cnt_skipped",
        EnumEntryAction::Failed => "cnt_failed",
    }
}

impl ReportWalkBuilder {
    pub fn new(kind: EnumOperationKind) -> Self {
        Self {
            kind,
            cnt_scanned: 0,
            cnt_matched: 0,
            dict_actions: BTreeMap::new(),
            if_cancelled: false,
        }
    }

    pub fn add_scanned(&mut self) {
        self.cnt_scanned += 1;
    }

    pub fn add_matched(&mut self) {
        self.cnt_matched += 1;
    }

    /// Count one emitted entry action.
    pub fn add_action(&mut self, action: EnumEntryAction) {
        *self.dict_actions.entry(_action_key(action)).or_insert(0) += 1;
    }

    /// Fold the counters of a finished run into this accumulator.
    pub fn merge(&mut self, report: &ReportWalk) {
        self.cnt_scanned += report.cnt_scanned;
        self.cnt_matched += report.cnt_matched;
        let l_actions = [
            ("cnt_copied", report.cnt_copied),
            ("cnt_moved", report.cnt_moved),
            ("cnt_deleted", report.cnt_deleted),
            ("cnt_observed", report.cnt_observed),
            ("cnt_skipped", report.cnt_skipped),
            ("cnt_failed", report.cnt_failed),
        ];
        for (key_action, value) in l_actions.into_iter().filter(|(_, v)| *v > 0) {
            *self.dict_actions.entry(key_action).or_insert(0) += value;
        }
        if report.if_cancelled {
            self.if_cancelled = true;
        }
    }

    pub fn mark_cancelled(&mut self) {
        self.if_cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.if_cancelled
    }

    /// Finalize builder into immutable report.
    pub fn build(self) -> ReportWalk {
        let count = |key: &str| self.dict_actions.get(key).copied().unwrap_or(0);
        ReportWalk {
            kind: self.kind,
            cnt_scanned: self.cnt_scanned,
            cnt_matched: self.cnt_matched,
            cnt_copied: count("cnt_copied"),
            cnt_moved: count("cnt_moved"),
            cnt_deleted: count("cnt_deleted"),
            cnt_observed: count("cnt_observed"),
            cnt_skipped: count("cnt_skipped"),
            cnt_failed: count("cnt_failed"),
            if_cancelled: self.if_cancelled,
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Progress

/// Completion statistics accumulated from a tracked operation.
#[derive(Debug, Clone)]
pub struct Progress {
    /// Files the operation is expected to touch.
    pub total_files: u64,
    /// Bytes the operation is expected to touch.
    pub total_size: u64,
    completed_files: u64,
    completed_size: u64,
    location_current: Option<Location>,
    size_current: u64,
    time_started: Instant,
}

impl Progress {
    pub fn new(total_files: u64, total_size: u64) -> Self {
        Self {
            total_files,
            total_size,
            completed_files: 0,
            completed_size: 0,
            location_current: None,
            size_current: 0,
            time_started: Instant::now(),
        }
    }

    /// Mark `location` as current and the previous current entry as complete.
    pub fn update(&mut self, location: Location, size: u64) {
        self.complete_current();
        self.location_current = Some(location);
        self.size_current = size;
    }

    /// Complete the last current entry.
    pub fn finish(&mut self) {
        self.complete_current();
    }

    fn complete_current(&mut self) {
        if self.location_current.take().is_some() {
            self.completed_files = (self.completed_files + 1).min(self.total_files);
            self.completed_size = (self.completed_size + self.size_current).min(self.total_size);
            self.size_current = 0;
        }
    }

    pub fn location(&self) -> Option<&Location> {
        self.location_current.as_ref()
    }

    pub fn completed_files(&self) -> u64 {
        self.completed_files
    }

    pub fn completed_size(&self) -> u64 {
        self.completed_size
    }

    pub fn remaining_files(&self) -> u64 {
        self.total_files - self.completed_files
    }

    pub fn remaining_size(&self) -> u64 {
        self.total_size - self.completed_size
    }

    /// Completed share of files, 0 to 100.
    pub fn rate_by_files(&self) -> f64 {
        _rate(self.completed_files, self.total_files)
    }

    /// Completed share of bytes, 0 to 100.
    pub fn rate_by_size(&self) -> f64 {
        _rate(self.completed_size, self.total_size)
    }

    pub fn elapsed(&self) -> Duration {
        self.time_started.elapsed()
    }

    /// Linear estimate from the byte rate so far; zero until bytes complete.
    pub fn remaining_time(&self) -> Duration {
        if self.completed_size == 0 {
            return Duration::ZERO;
        }
        let secs = self.elapsed().as_secs_f64() * self.remaining_size() as f64
            / self.completed_size as f64;
        Duration::from_secs_f64(secs)
    }
}

fn _rate(completed: u64, total: u64) -> f64 {
    if total == 0 {
        100.0
    } else {
        completed as f64 * 100.0 / total as f64
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "files={}/{} ({:.1}%) size={}/{} ({:.1}%)",
            self.completed_files,
            self.total_files,
            self.rate_by_files(),
            self.completed_size,
            self.total_size,
            self.rate_by_size()
        )
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Progress, ReportWalkBuilder};
    use crate::location::{File, Location};
    use crate::spec::{EnumEntryAction, EnumOperationKind};

    #[test]
    fn report_walk_to_dict_and_format() {
        let mut builder = ReportWalkBuilder::new(EnumOperationKind::Copy);
        for _ in 0..4 {
            builder.add_scanned();
        }
        builder.add_matched();
        builder.add_matched();
        builder.add_action(EnumEntryAction::Copied);
        builder.add_action(EnumEntryAction::Skipped);
        let report = builder.build();

        let dict_counts = report.to_dict();
        assert_eq!(dict_counts["cnt_scanned"], 4);
        assert_eq!(dict_counts["cnt_matched"], 2);
        assert_eq!(dict_counts["cnt_copied"], 1);
        assert_eq!(dict_counts["cnt_skipped"], 1);
        assert_eq!(dict_counts["cnt_failed"], 0);

        assert_eq!(
            report.to_string(),
            "[COPY] scanned=4 matched=2 copied=1 moved=0 deleted=0 observed=0 skipped=1 failed=0"
        );
    }

    #[test]
    fn cancelled_runs_are_flagged_in_summary() {
        let mut builder = ReportWalkBuilder::new(EnumOperationKind::ScanFiles);
        builder.mark_cancelled();
        let report = builder.build();
        assert!(report.if_cancelled);
        assert!(report.to_string().starts_with("[SCAN_FILES]"));
        assert!(report.to_string().ends_with(" cancelled"));
    }

    #[test]
    fn merge_sums_counters_of_several_runs() {
        let mut builder_first = ReportWalkBuilder::new(EnumOperationKind::Copy);
        builder_first.add_scanned();
        builder_first.add_matched();
        builder_first.add_action(EnumEntryAction::Copied);
        let mut builder_second = ReportWalkBuilder::new(EnumOperationKind::Delete);
        builder_second.add_action(EnumEntryAction::Deleted);
        builder_second.mark_cancelled();

        let mut builder = ReportWalkBuilder::new(EnumOperationKind::Copy);
        builder.add_action(EnumEntryAction::Copied);
        builder.merge(&builder_first.build());
        builder.merge(&builder_second.build());
        let report = builder.build();
        assert_eq!(report.kind, EnumOperationKind::Copy);
        assert_eq!(report.cnt_scanned, 1);
        assert_eq!(report.cnt_copied, 2);
        assert_eq!(report.cnt_deleted, 1);
        assert!(report.if_cancelled);
    }

    fn file(name: &str) -> Location {
        Location::File(File::new(name))
    }

    #[test]
    fn progress_completes_previous_entry_on_update() {
        let mut progress = Progress::new(2, 30);
        assert_eq!(progress.rate_by_files(), 0.0);

        progress.update(file("a"), 10);
        assert_eq!(progress.completed_files(), 0);
        progress.update(file("b"), 20);
        assert_eq!(progress.completed_files(), 1);
        assert_eq!(progress.completed_size(), 10);
        assert_eq!(progress.remaining_size(), 20);

        progress.finish();
        assert_eq!(progress.completed_files(), 2);
        assert_eq!(progress.rate_by_files(), 100.0);
        assert_eq!(progress.rate_by_size(), 100.0);
        assert!(progress.location().is_none());
    }

    #[test]
    fn progress_is_clamped_and_saturates_for_empty_totals() {
        let mut progress = Progress::new(1, 5);
        for name in ["a", "b", "c"] {
            progress.update(file(name), 100);
        }
        progress.finish();
        assert_eq!(progress.completed_files(), 1);
        assert_eq!(progress.completed_size(), 5);
        assert_eq!(progress.remaining_files(), 0);

        let empty = Progress::new(0, 0);
        assert_eq!(empty.rate_by_files(), 100.0);
        assert_eq!(empty.rate_by_size(), 100.0);
        assert_eq!(empty.remaining_time(), Duration::ZERO);
    }
}
