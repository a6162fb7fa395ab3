//! Narrows a report to the repositories that rank worst on at least one
//! configured axis.

use std::collections::BTreeSet;

use log::debug;

use crate::config::{Modes, TopN, TopNConfig};
use crate::insights::RepoReport;
use crate::repo_stats::ItemStats;

type Metric = fn(&RepoReport) -> f64;
type Axis = (&'static str, Option<TopN>, bool, Metric);

#[allow(clippy::cast_precision_loss)]
fn stale(s: &ItemStats) -> f64 {
    s.stale_count as f64
}

#[allow(clippy::cast_precision_loss)]
fn oldest(s: &ItemStats) -> f64 {
    s.oldest_open_days as f64
}

fn time_to_close(s: &ItemStats) -> f64 {
    s.avg_time_to_close_hours
}

fn pr_metric(r: &RepoReport, field: fn(&ItemStats) -> f64) -> f64 {
    r.pr.as_ref().map_or(0.0, field)
}

fn issue_metric(r: &RepoReport, field: fn(&ItemStats) -> f64) -> f64 {
    r.issue.as_ref().map_or(0.0, field)
}

fn either_metric(r: &RepoReport, field: fn(&ItemStats) -> f64) -> f64 {
    pr_metric(r, field).max(issue_metric(r, field))
}

#[allow(clippy::cast_precision_loss)]
fn broken_ci_days(r: &RepoReport) -> f64 {
    r.broken_ci_days() as f64
}

#[allow(clippy::cast_precision_loss)]
fn broken_ci_jobs(r: &RepoReport) -> f64 {
    r.broken_ci_jobs() as f64
}

/// Every axis with its value, whether the run's modes activate it, and its
/// metric.
fn axes(top_n: &TopNConfig, modes: Modes) -> [Axis; 11] {
    let stats = modes.any_repo_stats();
    [
        ("stale", top_n.stale, stats, |r| either_metric(r, stale)),
        ("oldest", top_n.oldest, stats, |r| either_metric(r, oldest)),
        ("time_to_close", top_n.time_to_close, stats, |r| {
            either_metric(r, time_to_close)
        }),
        ("stale_pr", top_n.stale_pr, modes.pr, |r| pr_metric(r, stale)),
        ("oldest_pr", top_n.oldest_pr, modes.pr, |r| pr_metric(r, oldest)),
        ("time_to_close_pr", top_n.time_to_close_pr, modes.pr, |r| {
            pr_metric(r, time_to_close)
        }),
        ("stale_issue", top_n.stale_issue, modes.issue, |r| {
            issue_metric(r, stale)
        }),
        ("oldest_issue", top_n.oldest_issue, modes.issue, |r| {
            issue_metric(r, oldest)
        }),
        ("time_to_close_issue", top_n.time_to_close_issue, modes.issue, |r| {
            issue_metric(r, time_to_close)
        }),
        ("most_broken_ci_days", top_n.most_broken_ci_days, modes.ci, broken_ci_days),
        ("most_broken_ci_jobs", top_n.most_broken_ci_jobs, modes.ci, broken_ci_jobs),
    ]
}

/// Keeps a repository if it is in the top N of any active axis with a
/// positive value there. With no axis configured everything is kept.
/// Surviving repositories keep their original order.
pub fn select(repos: Vec<RepoReport>, top_n: &TopNConfig, modes: Modes) -> Vec<RepoReport> {
    if top_n.is_empty() {
        return repos;
    }

    let total = repos.len();
    let mut keep = BTreeSet::new();

    for (name, value, active, metric) in axes(top_n, modes) {
        let Some(value) = value else {
            continue;
        };
        if !active {
            debug!("Ignoring top-N axis {name}: its mode is not enabled");
            continue;
        }

        let n = value.resolve(total);
        let mut ranked: Vec<(usize, f64)> =
            repos.iter().map(metric).enumerate().collect();
        // Stable: ties keep report order.
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let picked: Vec<usize> = ranked
            .into_iter()
            .take(n)
            .filter(|(_, score)| *score > 0.0)
            .map(|(i, _)| i)
            .collect();
        debug!("Top {n} by {name}: {} repositories", picked.len());
        keep.extend(picked);
    }

    debug!("Selected {} of {total} repositories after filtering", keep.len());
    repos
        .into_iter()
        .enumerate()
        .filter(|(i, _)| keep.contains(i))
        .map(|(_, r)| r)
        .collect()
}
