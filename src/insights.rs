use chrono::{DateTime, NaiveDate, Utc};
use indexmap::IndexMap;
use serde::Serialize;

use crate::config::RepoSettings;
use crate::repo_stats::ItemStats;
use crate::streaks::FailureWindows;

#[derive(Debug, Serialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub as_of: NaiveDate,
    pub repositories: Vec<RepoReport>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CiReport {
    Collected {
        branches: IndexMap<String, FailureWindows>,
    },
    TimedOut {
        after_seconds: u64,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct RepoReport {
    #[serde(flatten)]
    pub settings: RepoSettings,
    pub url: String,
    pub window_start: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr: Option<ItemStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<ItemStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ci: Option<CiReport>,
}

impl RepoReport {
    pub fn new(settings: RepoSettings, window_start: NaiveDate) -> Self {
        let url = settings.html_url();
        Self {
            settings,
            url,
            window_start,
            pr: None,
            issue: None,
            ci: None,
        }
    }

    pub fn full_name(&self) -> String {
        self.settings.full_name()
    }

    fn ci_branches(&self) -> Option<&IndexMap<String, FailureWindows>> {
        match &self.ci {
            Some(CiReport::Collected { branches }) => Some(branches),
            _ => None,
        }
    }

    /// Broken days summed over every branch and job.
    pub fn broken_ci_days(&self) -> usize {
        self.ci_branches().map_or(0, |branches| {
            branches
                .values()
                .flat_map(|jobs| jobs.values())
                .map(|w| w.broken_days())
                .sum()
        })
    }

    /// Failing jobs counted once per branch they fail on.
    pub fn broken_ci_jobs(&self) -> usize {
        self.ci_branches()
            .map_or(0, |branches| branches.values().map(FailureWindows::len).sum())
    }
}
