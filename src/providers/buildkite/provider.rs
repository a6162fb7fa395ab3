use chrono::{Duration, NaiveDate, NaiveTime};
use indexmap::IndexMap;
use log::{debug, error, info, warn};

use super::client::{BuildNode, BuildkiteClient, PipelineRef};
use super::readme::badge_pipelines;
use crate::auth::Token;
use crate::config::RepoSettings;
use crate::error::Result;
use crate::streaks::{merge_windows, reconstruct, CheckEvent, FailureWindows, Outcome};

pub struct BuildkiteProvider {
    client: BuildkiteClient,
    /// Pipelines of the configured org, keyed by normalized repository URL.
    org_pipelines: IndexMap<String, Vec<PipelineRef>>,
}

impl BuildkiteProvider {
    /// Connects and, when `org` is set, indexes that org's pipelines once
    /// for the whole run.
    pub async fn connect(graphql_url: &str, token: Token, org: Option<&str>) -> Result<Self> {
        let client = BuildkiteClient::new(graphql_url, token)?;

        let org_pipelines = match org {
            Some(org) => {
                let by_repo = client.pipelines_by_repo(org).await?;
                info!(
                    "Indexed Buildkite pipelines of {org} for {} repositories",
                    by_repo.len()
                );
                by_repo
            }
            None => IndexMap::new(),
        };

        Ok(Self {
            client,
            org_pipelines,
        })
    }

    /// Failure windows of every Buildkite pipeline linked to `repo`, per
    /// configured branch.
    pub async fn collect_failures(
        &self,
        repo: &RepoSettings,
        readme: Option<&str>,
        window_start: NaiveDate,
        today: NaiveDate,
    ) -> IndexMap<String, FailureWindows> {
        let mut by_branch: IndexMap<String, FailureWindows> = repo
            .branches
            .iter()
            .map(|b| (b.clone(), FailureWindows::new()))
            .collect();

        let pipelines = self.pipelines_for(repo, readme).await;
        if pipelines.is_empty() {
            debug!("No Buildkite pipelines for {}", repo.full_name());
            return by_branch;
        }

        let from = window_start.and_time(NaiveTime::MIN).and_utc();
        let to = (today + Duration::days(1)).and_time(NaiveTime::MIN).and_utc();

        for pipeline in &pipelines {
            for (branch, windows) in &mut by_branch {
                debug!("Fetching Buildkite builds for {}, branch: {branch}", pipeline.key());
                let builds = match self
                    .client
                    .pipeline_builds(&pipeline.org, &pipeline.slug, from, to, branch)
                    .await
                {
                    Ok(builds) => builds,
                    Err(e) => {
                        error!(
                            "Error fetching Buildkite builds for {} on {branch}: {e}",
                            pipeline.key()
                        );
                        continue;
                    }
                };
                if builds.is_empty() {
                    debug!("No builds for {} on {branch}", pipeline.key());
                    continue;
                }

                let events = builds_to_events(pipeline, &builds);
                merge_windows(windows, reconstruct(&events, window_start, today));
            }
        }

        by_branch
    }

    /// Org pipelines building this repository plus README badge pipelines,
    /// deduplicated by `org/slug`.
    async fn pipelines_for(&self, repo: &RepoSettings, readme: Option<&str>) -> Vec<PipelineRef> {
        let mut pipelines: IndexMap<String, PipelineRef> = self
            .org_pipelines
            .get(&repo.html_url())
            .into_iter()
            .flatten()
            .map(|p| (p.key(), p.clone()))
            .collect();

        for (org, slug) in readme.map(badge_pipelines).unwrap_or_default() {
            let key = format!("{org}/{slug}");
            if pipelines.contains_key(&key) {
                continue;
            }
            match self.client.get_pipeline(&org, &slug).await {
                Ok(Some(pipeline)) => {
                    debug!("Found Buildkite pipeline {key} in README");
                    pipelines.insert(key, pipeline);
                }
                Ok(None) => warn!("README of {} links unknown pipeline {key}", repo.full_name()),
                Err(e) => error!("Error fetching Buildkite pipeline {key}: {e}"),
            }
        }

        pipelines.into_values().collect()
    }
}

fn builds_to_events(pipeline: &PipelineRef, builds: &[BuildNode]) -> Vec<CheckEvent> {
    let job_key = format!("[BK] {}", pipeline.key());
    builds
        .iter()
        .filter_map(|build| {
            debug!("Build {} for {job_key} [{}]", build.id, build.state);
            CheckEvent::parse(
                job_key.as_str(),
                &build.created_at,
                Outcome::from_buildkite_state(&build.state),
                build.state.clone(),
            )
            .map(|event| event.with_url(pipeline.url.as_str()))
        })
        .collect()
}
