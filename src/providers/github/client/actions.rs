use serde::Deserialize;

use super::core::{GitHubClient, PER_PAGE};
use crate::error::Result;

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowDto {
    pub id: u64,
    pub name: String,
    pub path: String,
    pub html_url: String,
}

#[derive(Debug, Deserialize)]
struct WorkflowsResponse {
    total_count: usize,
    workflows: Vec<WorkflowDto>,
}

/// `created_at` stays a string so one bad timestamp only costs one run.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRunDto {
    pub id: u64,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
struct WorkflowRunsResponse {
    workflow_runs: Vec<WorkflowRunDto>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobDto {
    pub name: String,
    pub conclusion: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobsResponse {
    total_count: usize,
    jobs: Vec<JobDto>,
}

impl GitHubClient {
    pub async fn list_workflows(&self, owner: &str, repo: &str) -> Result<Vec<WorkflowDto>> {
        let url = self.repo_url(owner, repo, "actions/workflows")?;
        let mut workflows = Vec::new();
        let mut page = 1;

        loop {
            let response: WorkflowsResponse = self
                .get_json(
                    url.clone(),
                    &[("per_page", PER_PAGE.to_string()), ("page", page.to_string())],
                )
                .await?;

            let fetched = response.workflows.len();
            workflows.extend(response.workflows);

            if fetched == 0 || workflows.len() >= response.total_count {
                break;
            }
            page += 1;
        }

        Ok(workflows)
    }

    /// One page of completed runs of a workflow on a branch, newest first.
    pub async fn workflow_runs_page(
        &self,
        owner: &str,
        repo: &str,
        workflow_id: u64,
        branch: &str,
        page: u32,
    ) -> Result<Vec<WorkflowRunDto>> {
        let url = self.repo_url(owner, repo, &format!("actions/workflows/{workflow_id}/runs"))?;
        let response: WorkflowRunsResponse = self
            .get_json(
                url,
                &[
                    ("branch", branch.to_string()),
                    ("status", "completed".to_string()),
                    ("per_page", PER_PAGE.to_string()),
                    ("page", page.to_string()),
                ],
            )
            .await?;

        Ok(response.workflow_runs)
    }

    pub async fn run_jobs(&self, owner: &str, repo: &str, run_id: u64) -> Result<Vec<JobDto>> {
        let url = self.repo_url(owner, repo, &format!("actions/runs/{run_id}/jobs"))?;
        let mut jobs = Vec::new();
        let mut page = 1;

        loop {
            let response: JobsResponse = self
                .get_json(
                    url.clone(),
                    &[("per_page", PER_PAGE.to_string()), ("page", page.to_string())],
                )
                .await?;

            let fetched = response.jobs.len();
            jobs.extend(response.jobs);

            if fetched == 0 || jobs.len() >= response.total_count {
                break;
            }
            page += 1;
        }

        Ok(jobs)
    }
}
