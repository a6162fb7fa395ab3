//! Failure-streak reconstruction.
//!
//! Turns a series of CI check events for one branch into the set of calendar
//! days each job spent broken. A job that fails and is never seen passing
//! again is assumed to stay broken up to "today": no further runs is not
//! evidence of recovery.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, warn};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    /// Cancelled, skipped, neutral... anything that neither breaks nor fixes a job.
    Other,
}

impl Outcome {
    /// Maps a GitHub Actions job `conclusion`.
    pub fn from_github_conclusion(conclusion: Option<&str>) -> Self {
        match conclusion {
            Some("failure") => Self::Failure,
            Some("success") => Self::Success,
            _ => Self::Other,
        }
    }

    /// Maps a Buildkite build `state`.
    pub fn from_buildkite_state(state: &str) -> Self {
        match state {
            "FAILED" => Self::Failure,
            "PASSED" => Self::Success,
            _ => Self::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Other => "other",
        }
    }
}

/// One observed CI run or build result.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckEvent {
    pub job_key: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
    /// Raw provider status, shown as the "latest" annotation.
    pub status: String,
    pub url: Option<String>,
}

impl CheckEvent {
    pub fn new(job_key: impl Into<String>, timestamp: DateTime<Utc>, outcome: Outcome) -> Self {
        Self {
            job_key: job_key.into(),
            timestamp,
            outcome,
            status: outcome.as_str().to_string(),
            url: None,
        }
    }

    /// Builds an event from a provider's RFC 3339 timestamp.
    ///
    /// An unparseable timestamp is logged and yields `None`: the event can't be
    /// placed on the calendar, so it has no effect on failure state.
    pub fn parse(
        job_key: impl Into<String>,
        raw_timestamp: &str,
        outcome: Outcome,
        status: impl Into<String>,
    ) -> Option<Self> {
        let job_key = job_key.into();
        match DateTime::parse_from_rfc3339(raw_timestamp) {
            Ok(timestamp) => Some(
                Self::new(job_key, timestamp.with_timezone(&Utc), outcome).with_status(status),
            ),
            Err(e) => {
                warn!("Skipping event for {job_key}: invalid timestamp '{raw_timestamp}' ({e})");
                None
            }
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LatestStatus {
    pub status: String,
    pub checked_at: DateTime<Utc>,
}

/// Days on which one job was broken, plus the last thing we saw it do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FailureWindow {
    pub dates: BTreeSet<NaiveDate>,
    pub latest: Option<LatestStatus>,
    pub url: Option<String>,
}

impl FailureWindow {
    pub fn broken_days(&self) -> usize {
        self.dates.len()
    }
}

/// Job key to failure window, ordered by job key.
pub type FailureWindows = BTreeMap<String, FailureWindow>;

/// Reconstructs failure windows for every job seen in `events`.
///
/// Events dated before `window_start` are ignored outright; they neither add
/// dates nor seed a pending failure. Only jobs with at least one in-window
/// failure appear in the result.
pub fn reconstruct(
    events: &[CheckEvent],
    window_start: NaiveDate,
    today: NaiveDate,
) -> FailureWindows {
    let mut by_job: HashMap<&str, Vec<&CheckEvent>> = HashMap::new();
    for event in events {
        by_job.entry(event.job_key.as_str()).or_default().push(event);
    }

    by_job
        .into_iter()
        .filter_map(|(job_key, mut job_events)| {
            // Stable: identical timestamps keep their input order.
            job_events.sort_by_key(|e| e.timestamp);
            let window = reconstruct_job(job_key, &job_events, window_start, today);
            (!window.dates.is_empty()).then(|| (job_key.to_string(), window))
        })
        .collect()
}

fn reconstruct_job(
    job_key: &str,
    events: &[&CheckEvent],
    window_start: NaiveDate,
    today: NaiveDate,
) -> FailureWindow {
    let mut window = FailureWindow::default();
    let mut last_failure: Option<NaiveDate> = None;

    for event in events {
        let date = event.date();
        if date < window_start {
            continue;
        }

        window.latest = Some(LatestStatus {
            status: event.status.clone(),
            checked_at: event.timestamp,
        });
        if let Some(url) = &event.url {
            window.url = Some(url.clone());
        }

        match event.outcome {
            Outcome::Failure => {
                debug!("Marking {job_key} as failed ({date})");
                window.dates.insert(date);
                last_failure = Some(date);
            }
            Outcome::Success => match last_failure {
                Some(failed_on) if failed_on <= date => {
                    debug!("Unmarking {job_key} as failed ({date})");
                    last_failure = None;
                }
                Some(_) => {
                    debug!("Ignoring {job_key} success dated before its last failure ({date})");
                }
                None => {}
            },
            Outcome::Other => {}
        }
    }

    if let Some(failed_on) = last_failure {
        window
            .dates
            .extend(failed_on.iter_days().skip(1).take_while(|d| *d <= today));
    }

    window
}

/// Unions `from` into `into`. Providers use disjoint key namespaces, so a
/// collision points at bad data: it is logged and the incoming window wins.
pub fn merge_windows(into: &mut FailureWindows, from: FailureWindows) {
    for (job_key, window) in from {
        if into.contains_key(&job_key) {
            warn!("Job '{job_key}' was reported by more than one source, keeping the last one");
        }
        into.insert(job_key, window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    // 2024-03-10 is a US daylight-saving switch; date arithmetic must not care.
    fn d0() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
    }

    fn day(offset: i64) -> NaiveDate {
        d0() + Duration::days(offset)
    }

    fn event(job: &str, offset: i64, hour: u32, outcome: Outcome) -> CheckEvent {
        let ts = day(offset).and_hms_opt(hour, 0, 0).unwrap().and_utc();
        CheckEvent::new(job, ts, outcome)
    }

    fn dates(offsets: &[i64]) -> BTreeSet<NaiveDate> {
        offsets.iter().map(|&o| day(o)).collect()
    }

    #[test]
    fn test_no_events_is_empty() {
        assert!(reconstruct(&[], d0(), day(5)).is_empty());
    }

    #[test]
    fn test_unresolved_failure_propagates_to_today() {
        let events = vec![event("job", 0, 12, Outcome::Failure)];
        let result = reconstruct(&events, d0(), day(3));

        assert_eq!(result.len(), 1);
        assert_eq!(result["job"].dates, dates(&[0, 1, 2, 3]));
        assert_eq!(result["job"].broken_days(), 4);
    }

    #[test]
    fn test_later_success_stops_propagation() {
        let events = vec![
            event("job", 0, 12, Outcome::Failure),
            event("job", 1, 12, Outcome::Success),
        ];
        let result = reconstruct(&events, d0(), day(5));

        assert_eq!(result["job"].dates, dates(&[0]));
    }

    #[test]
    fn test_failure_after_recovery_reopens_propagation() {
        let events = vec![
            event("job", 0, 12, Outcome::Failure),
            event("job", 1, 12, Outcome::Success),
            event("job", 2, 12, Outcome::Failure),
        ];
        let result = reconstruct(&events, d0(), day(4));

        assert_eq!(result["job"].dates, dates(&[0, 2, 3, 4]));
    }

    #[test]
    fn test_pre_window_failure_is_excluded() {
        let events = vec![event("job", -10, 12, Outcome::Failure)];
        assert!(reconstruct(&events, d0(), day(2)).is_empty());
    }

    #[test]
    fn test_pre_window_failure_does_not_seed_propagation() {
        let events = vec![
            event("job", -3, 12, Outcome::Failure),
            event("job", 1, 12, Outcome::Failure),
            event("job", 2, 12, Outcome::Success),
        ];
        let result = reconstruct(&events, d0(), day(4));

        assert_eq!(result["job"].dates, dates(&[1]));
    }

    #[test]
    fn test_jobs_are_independent() {
        let events = vec![
            event("A", 0, 10, Outcome::Failure),
            event("B", 0, 11, Outcome::Failure),
            event("B", 1, 10, Outcome::Success),
            event("A", 2, 10, Outcome::Other),
        ];
        let result = reconstruct(&events, d0(), day(3));

        assert_eq!(result["A"].dates, dates(&[0, 1, 2, 3]));
        assert_eq!(result["B"].dates, dates(&[0]));
    }

    #[test]
    fn test_reconstruction_is_idempotent() {
        let events = vec![
            event("A", 0, 10, Outcome::Failure),
            event("B", 1, 10, Outcome::Success),
            event("A", 2, 10, Outcome::Success),
            event("C", 3, 10, Outcome::Failure),
        ];

        let first = reconstruct(&events, d0(), day(6));
        let second = reconstruct(&events, d0(), day(6));

        assert_eq!(first, second);
    }

    #[test]
    fn test_passing_only_jobs_are_omitted() {
        let events = vec![
            event("green", 0, 10, Outcome::Success),
            event("green", 1, 10, Outcome::Success),
            event("cancelled", 1, 10, Outcome::Other),
            event("red", 1, 10, Outcome::Failure),
        ];
        let result = reconstruct(&events, d0(), day(1));

        assert_eq!(result.keys().collect::<Vec<_>>(), vec!["red"]);
    }

    #[test]
    fn test_unsorted_input_is_sorted_before_walking() {
        let events = vec![
            event("job", 3, 10, Outcome::Success),
            event("job", 0, 10, Outcome::Failure),
            event("job", 1, 10, Outcome::Failure),
        ];
        let result = reconstruct(&events, d0(), day(6));

        assert_eq!(result["job"].dates, dates(&[0, 1]));
    }

    #[test]
    fn test_same_day_failure_then_success_recovers() {
        let events = vec![
            event("job", 0, 9, Outcome::Failure),
            event("job", 0, 17, Outcome::Success),
        ];
        let result = reconstruct(&events, d0(), day(3));

        assert_eq!(result["job"].dates, dates(&[0]));
    }

    #[test]
    fn test_same_day_success_then_failure_keeps_failing() {
        let events = vec![
            event("job", 0, 9, Outcome::Success),
            event("job", 0, 17, Outcome::Failure),
        ];
        let result = reconstruct(&events, d0(), day(2));

        assert_eq!(result["job"].dates, dates(&[0, 1, 2]));
    }

    #[test]
    fn test_identical_timestamps_keep_input_order() {
        let events = vec![
            event("job", 0, 12, Outcome::Failure),
            event("job", 0, 12, Outcome::Success),
        ];
        let result = reconstruct(&events, d0(), day(3));

        assert_eq!(result["job"].dates, dates(&[0]));
        assert_eq!(result["job"].latest.as_ref().unwrap().status, "success");
    }

    #[test]
    fn test_other_outcome_does_not_clear_failure() {
        let events = vec![
            event("job", 0, 12, Outcome::Failure),
            event("job", 1, 12, Outcome::Other),
        ];
        let result = reconstruct(&events, d0(), day(2));

        assert_eq!(result["job"].dates, dates(&[0, 1, 2]));
    }

    #[test]
    fn test_propagation_spans_month_boundary() {
        let start = NaiveDate::from_ymd_opt(2024, 2, 27).unwrap();
        let ts = start.and_hms_opt(8, 0, 0).unwrap().and_utc();
        let events = vec![CheckEvent::new("job", ts, Outcome::Failure)];

        let today = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        let result = reconstruct(&events, start, today);

        // 2024 is a leap year: Feb 27, 28, 29, Mar 1, 2
        assert_eq!(result["job"].broken_days(), 5);
    }

    #[test]
    fn test_latest_status_tracks_most_recent_in_window_event() {
        let events = vec![
            event("job", -2, 12, Outcome::Success).with_status("PASSED"),
            event("job", 0, 12, Outcome::Failure).with_status("FAILED"),
            event("job", 1, 12, Outcome::Other).with_status("CANCELED"),
        ];
        let result = reconstruct(&events, d0(), day(1));

        let latest = result["job"].latest.clone().unwrap();
        assert_eq!(latest.status, "CANCELED");
        assert_eq!(latest.checked_at, day(1).and_hms_opt(12, 0, 0).unwrap().and_utc());
    }

    #[test]
    fn test_url_is_carried_from_events() {
        let events = vec![event("job", 0, 12, Outcome::Failure).with_url("https://ci.example/job")];
        let result = reconstruct(&events, d0(), day(0));

        assert_eq!(result["job"].url.as_deref(), Some("https://ci.example/job"));
    }

    #[test]
    fn test_parse_rejects_malformed_timestamp() {
        assert!(CheckEvent::parse("job", "not-a-date", Outcome::Failure, "failure").is_none());
    }

    #[test]
    fn test_parse_accepts_rfc3339_with_offset() {
        let event =
            CheckEvent::parse("job", "2024-03-10T23:30:00-05:00", Outcome::Failure, "FAILED")
                .unwrap();

        assert_eq!(event.date(), day(1));
        assert_eq!(event.status, "FAILED");
    }

    #[test]
    fn test_malformed_events_do_not_abort_the_rest() {
        let raw = [
            ("2024-03-10T10:00:00Z", Outcome::Failure),
            ("garbage", Outcome::Success),
            ("2024-03-11T10:00:00Z", Outcome::Failure),
        ];
        let events: Vec<_> = raw
            .iter()
            .filter_map(|(ts, outcome)| CheckEvent::parse("job", ts, *outcome, outcome.as_str()))
            .collect();
        let result = reconstruct(&events, d0(), day(2));

        assert_eq!(events.len(), 2);
        assert_eq!(result["job"].dates, dates(&[0, 1, 2]));
    }

    #[test]
    fn test_github_conclusion_mapping() {
        assert_eq!(Outcome::from_github_conclusion(Some("failure")), Outcome::Failure);
        assert_eq!(Outcome::from_github_conclusion(Some("success")), Outcome::Success);
        assert_eq!(Outcome::from_github_conclusion(Some("cancelled")), Outcome::Other);
        assert_eq!(Outcome::from_github_conclusion(Some("skipped")), Outcome::Other);
        assert_eq!(Outcome::from_github_conclusion(None), Outcome::Other);
    }

    #[test]
    fn test_buildkite_state_mapping() {
        assert_eq!(Outcome::from_buildkite_state("FAILED"), Outcome::Failure);
        assert_eq!(Outcome::from_buildkite_state("PASSED"), Outcome::Success);
        assert_eq!(Outcome::from_buildkite_state("CANCELED"), Outcome::Other);
        assert_eq!(Outcome::from_buildkite_state("failed"), Outcome::Other);
    }

    #[test]
    fn test_merge_unions_disjoint_keys() {
        let gh = reconstruct(&[event("ci / test", 0, 1, Outcome::Failure)], d0(), day(0));
        let bk = reconstruct(&[event("[BK] org/pipe", 0, 1, Outcome::Failure)], d0(), day(0));

        let mut merged = gh;
        merge_windows(&mut merged, bk);

        assert_eq!(
            merged.keys().collect::<Vec<_>>(),
            vec!["[BK] org/pipe", "ci / test"]
        );
    }

    #[test]
    fn test_merge_collision_last_write_wins() {
        let mut first = reconstruct(&[event("job", 0, 1, Outcome::Failure)], d0(), day(0));
        let second = reconstruct(&[event("job", 1, 1, Outcome::Failure)], d0(), day(1));

        merge_windows(&mut first, second);

        assert_eq!(first.len(), 1);
        assert_eq!(first["job"].dates, dates(&[1]));
    }
}
