use std::time::Duration;

use chrono::{Days, NaiveDate};
use indexmap::IndexMap;
use log::{error, info, warn};

use crate::config::{Modes, RepoSettings};
use crate::insights::{CiReport, RepoReport};
use crate::providers::buildkite::BuildkiteProvider;
use crate::providers::github::GitHubProvider;
use crate::repo_stats;
use crate::streaks::{merge_windows, FailureWindows};

/// Gathers one report section per enabled mode for each repository.
pub struct Collector {
    pub github: GitHubProvider,
    pub buildkite: Option<BuildkiteProvider>,
    pub modes: Modes,
    pub ci_timeout: Duration,
    pub count_unmerged_prs: bool,
}

impl Collector {
    /// Repositories are processed one after the other, in configuration order.
    pub async fn collect(&self, repos: Vec<RepoSettings>, today: NaiveDate) -> Vec<RepoReport> {
        let mut reports = Vec::with_capacity(repos.len());
        for settings in repos {
            if let Some(report) = self.collect_repo(settings, today).await {
                reports.push(report);
            }
        }
        reports
    }

    /// `None` when the window reaches past the supported calendar.
    pub async fn collect_repo(
        &self,
        settings: RepoSettings,
        today: NaiveDate,
    ) -> Option<RepoReport> {
        let Some(window_start) = today.checked_sub_days(Days::new(u64::from(settings.days)))
        else {
            error!(
                "Skipping {}: a window of {} days before {today} is out of range",
                settings.full_name(),
                settings.days
            );
            return None;
        };
        info!(
            "Collecting {} since {window_start} (branches: {})",
            settings.full_name(),
            settings.branches.join(", ")
        );
        let mut report = RepoReport::new(settings, window_start);

        if self.modes.any_repo_stats() {
            match self
                .github
                .issue_items(&report.settings, window_start)
                .await
            {
                Ok(items) => {
                    let stats =
                        repo_stats::compute(&items, window_start, today, self.count_unmerged_prs);
                    report.pr = self.modes.pr.then_some(stats.pr);
                    report.issue = self.modes.issue.then_some(stats.issue);
                }
                Err(e) => error!(
                    "Error fetching issues and PRs for {}: {e}",
                    report.full_name()
                ),
            }
        }

        if self.modes.ci {
            let ci = tokio::time::timeout(
                self.ci_timeout,
                self.collect_ci(&report.settings, window_start, today),
            )
            .await;
            report.ci = Some(match ci {
                Ok(branches) => CiReport::Collected { branches },
                Err(_) => {
                    warn!(
                        "CI collection for {} timed out after {}s",
                        report.full_name(),
                        self.ci_timeout.as_secs()
                    );
                    CiReport::TimedOut {
                        after_seconds: self.ci_timeout.as_secs(),
                    }
                }
            });
        }

        Some(report)
    }

    async fn collect_ci(
        &self,
        settings: &RepoSettings,
        window_start: NaiveDate,
        today: NaiveDate,
    ) -> IndexMap<String, FailureWindows> {
        let mut branches = self
            .github
            .collect_failures(settings, window_start, today)
            .await;

        if let Some(buildkite) = &self.buildkite {
            let readme = self.github.readme(settings).await;
            let from_buildkite = buildkite
                .collect_failures(settings, readme.as_deref(), window_start, today)
                .await;
            for (branch, windows) in from_buildkite {
                merge_windows(branches.entry(branch).or_default(), windows);
            }
        }

        branches
    }
}
