use std::time::Duration;

use chrono::{DateTime, NaiveDate};
use futures::{stream, StreamExt, TryStreamExt};
use indexmap::IndexMap;
use log::{debug, error, info, warn};

use super::client::{GitHubClient, IssueDto, JobDto, WorkflowDto, WorkflowRunDto, PER_PAGE};
use super::url_utils::{repo_html_url_from_workflow, workflow_runs_url};
use crate::auth::Token;
use crate::config::RepoSettings;
use crate::error::{CiStatsError, Result};
use crate::repo_stats::touches_window;
use crate::streaks::{reconstruct, CheckEvent, FailureWindows, Outcome};

const CONCURRENCY: usize = 10;

pub struct GitHubProvider {
    pub client: GitHubClient,
}

impl GitHubProvider {
    pub fn new(base_url: &str, token: Token, call_delay: Option<Duration>) -> Result<Self> {
        let client = GitHubClient::new(base_url, token, call_delay)?;
        Ok(Self { client })
    }

    /// Failure windows of every GitHub Actions job, per configured branch.
    ///
    /// A failing branch is logged and reported empty; it never takes the
    /// other branches down with it.
    pub async fn collect_failures(
        &self,
        repo: &RepoSettings,
        window_start: NaiveDate,
        today: NaiveDate,
    ) -> IndexMap<String, FailureWindows> {
        let mut by_branch: IndexMap<String, FailureWindows> = repo
            .branches
            .iter()
            .map(|b| (b.clone(), FailureWindows::new()))
            .collect();

        let workflows = match self.client.list_workflows(&repo.org, &repo.repo).await {
            Ok(workflows) => workflows,
            Err(e) if e.is_not_found() => {
                warn!("Workflow API returned 404 for {}: {e}", repo.full_name());
                return by_branch;
            }
            Err(e) => {
                error!("Error listing workflows for {}: {e}", repo.full_name());
                return by_branch;
            }
        };

        for (branch, windows) in &mut by_branch {
            debug!(
                "Checking GitHub Actions workflow runs for {}, branch: {branch}",
                repo.full_name()
            );

            let events = match self.branch_events(repo, &workflows, branch, window_start).await {
                Ok(events) => events,
                Err(e) if e.is_not_found() => {
                    warn!(
                        "Workflow API returned 404 for {} branch {branch}: {e}",
                        repo.full_name()
                    );
                    continue;
                }
                Err(e) => {
                    error!(
                        "Error processing branch {branch} for repo {}: {e}",
                        repo.full_name()
                    );
                    continue;
                }
            };

            info!(
                "{}@{branch}: {} GitHub Actions job results in window",
                repo.full_name(),
                events.len()
            );
            *windows = reconstruct(&events, window_start, today);
        }

        by_branch
    }

    async fn branch_events(
        &self,
        repo: &RepoSettings,
        workflows: &[WorkflowDto],
        branch: &str,
        window_start: NaiveDate,
    ) -> Result<Vec<CheckEvent>> {
        let mut events = Vec::new();
        for workflow in workflows {
            debug!("Workflow: {}", workflow.name);
            let repo_html = repo_html_url_from_workflow(&workflow.html_url)
                .map_or_else(|| repo.html_url(), str::to_string);
            let url = workflow_runs_url(&repo_html, &workflow.path, branch);

            events.extend(
                self.workflow_events(repo, workflow.id, &workflow.name, branch, &url, window_start)
                    .await?,
            );
        }
        Ok(events)
    }

    async fn workflow_events(
        &self,
        repo: &RepoSettings,
        workflow_id: u64,
        workflow_name: &str,
        branch: &str,
        url: &str,
        window_start: NaiveDate,
    ) -> Result<Vec<CheckEvent>> {
        let runs = self
            .runs_in_window(repo, workflow_id, branch, window_start)
            .await?;

        let concurrency = if self.client.is_paced() { 1 } else { CONCURRENCY };

        let run_jobs: Vec<(WorkflowRunDto, Vec<JobDto>)> = stream::iter(runs)
            .map(|run| async move {
                debug!("  Looking at workflow run {}", run.id);
                let jobs = self.client.run_jobs(&repo.org, &repo.repo, run.id).await?;
                Ok::<_, CiStatsError>((run, jobs))
            })
            .buffered(concurrency)
            .try_collect()
            .await?;

        Ok(run_jobs
            .iter()
            .flat_map(|(run, jobs)| jobs_to_events(workflow_name, run, jobs, url))
            .collect())
    }

    /// Completed runs on `branch`, paging until we walk past `window_start`.
    async fn runs_in_window(
        &self,
        repo: &RepoSettings,
        workflow_id: u64,
        branch: &str,
        window_start: NaiveDate,
    ) -> Result<Vec<WorkflowRunDto>> {
        let mut runs = Vec::new();
        let mut page = 1;

        loop {
            debug!("  Acquiring page {page}");
            let batch = self
                .client
                .workflow_runs_page(&repo.org, &repo.repo, workflow_id, branch, page)
                .await?;

            let Some(last) = batch.last() else {
                break;
            };
            let past_window = run_date(last).is_some_and(|d| d < window_start);
            let last_page = batch.len() < PER_PAGE as usize;
            runs.extend(batch);

            if past_window || last_page {
                break;
            }
            page += 1;
        }

        // no point fetching jobs for runs reconstruction would skip
        runs.retain(|run| run_date(run).map_or(true, |d| d >= window_start));
        Ok(runs)
    }

    /// Issues and pull requests opened or closed since `window_start`, plus
    /// whatever older open items share their pages.
    pub async fn issue_items(
        &self,
        repo: &RepoSettings,
        window_start: NaiveDate,
    ) -> Result<Vec<IssueDto>> {
        let mut items = Vec::new();
        let mut page = 1;

        loop {
            let batch = self.client.issues_page(&repo.org, &repo.repo, page).await?;
            if batch.is_empty() {
                break;
            }

            let touched = batch.iter().any(|item| touches_window(item, window_start));
            items.extend(batch);

            if !touched {
                break;
            }
            page += 1;
        }

        debug!("Fetched {} issues and PRs for {}", items.len(), repo.full_name());
        Ok(items)
    }

    /// README text, or `None` when the repository has none we can read.
    pub async fn readme(&self, repo: &RepoSettings) -> Option<String> {
        match self.client.readme(&repo.org, &repo.repo).await {
            Ok(text) => Some(text),
            Err(e) if e.is_not_found() => {
                warn!(
                    "README not found for repo {}. Skipping Buildkite badge check.",
                    repo.full_name()
                );
                None
            }
            Err(e) => {
                error!("Error fetching README for {}: {e}", repo.full_name());
                None
            }
        }
    }
}

fn run_date(run: &WorkflowRunDto) -> Option<NaiveDate> {
    DateTime::parse_from_rfc3339(&run.created_at)
        .ok()
        .map(|ts| ts.date_naive())
}

fn jobs_to_events(
    workflow_name: &str,
    run: &WorkflowRunDto,
    jobs: &[JobDto],
    url: &str,
) -> Vec<CheckEvent> {
    jobs.iter()
        .filter_map(|job| {
            let conclusion = job.conclusion.as_deref();
            debug!("    Looking at job {} [{}]", job.name, conclusion.unwrap_or("none"));
            CheckEvent::parse(
                format!("{workflow_name} / {}", job.name),
                &run.created_at,
                Outcome::from_github_conclusion(conclusion),
                conclusion.unwrap_or("none"),
            )
            .map(|event| event.with_url(url))
        })
        .collect()
}
