use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};

use super::core::BuildkiteClient;
use crate::error::Result;

const PAGE_SIZE: i64 = 50;

const PIPELINE_QUERY: &str = r"
query Pipeline($slug: ID!) {
  pipeline(slug: $slug) {
    url
  }
}
";

const ORGANIZATION_PIPELINES_QUERY: &str = r"
query OrganizationPipelines($slug: ID!, $first: Int!, $after: String) {
  organization(slug: $slug) {
    pipelines(first: $first, after: $after) {
      edges {
        node {
          slug
          url
          repository {
            url
          }
        }
      }
      pageInfo {
        hasNextPage
        endCursor
      }
    }
  }
}
";

const PIPELINE_BUILDS_QUERY: &str = r"
query PipelineBuilds(
  $slug: ID!
  $first: Int!
  $after: String
  $createdAtFrom: DateTime
  $createdAtTo: DateTime
  $branch: [String!]
) {
  pipeline(slug: $slug) {
    builds(
      first: $first
      after: $after
      createdAtFrom: $createdAtFrom
      createdAtTo: $createdAtTo
      branch: $branch
    ) {
      edges {
        node {
          id
          state
          createdAt
        }
      }
      pageInfo {
        hasNextPage
        endCursor
      }
    }
  }
}
";

#[derive(Debug, Serialize)]
struct SlugVariables<'a> {
    slug: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrganizationPipelinesVariables<'a> {
    slug: &'a str,
    first: i64,
    after: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PipelineBuildsVariables<'a> {
    slug: &'a str,
    first: i64,
    after: Option<String>,
    created_at_from: DateTime<Utc>,
    created_at_to: DateTime<Utc>,
    branch: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Edge<T> {
    node: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Connection<T> {
    edges: Vec<Edge<T>>,
    page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
struct PipelineData {
    pipeline: Option<PipelineInfo>,
}

#[derive(Debug, Deserialize)]
struct PipelineInfo {
    url: String,
}

#[derive(Debug, Deserialize)]
struct OrganizationData {
    organization: Option<Organization>,
}

#[derive(Debug, Deserialize)]
struct Organization {
    pipelines: Connection<OrgPipelineNode>,
}

#[derive(Debug, Deserialize)]
struct OrgPipelineNode {
    slug: String,
    url: String,
    repository: Option<Repository>,
}

#[derive(Debug, Deserialize)]
struct Repository {
    url: String,
}

#[derive(Debug, Deserialize)]
struct BuildsData {
    pipeline: Option<BuildsPipeline>,
}

#[derive(Debug, Deserialize)]
struct BuildsPipeline {
    builds: Option<Connection<BuildNode>>,
}

/// A pipeline worth checking, with the page readers should land on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRef {
    pub org: String,
    pub slug: String,
    pub url: String,
}

impl PipelineRef {
    pub fn key(&self) -> String {
        format!("{}/{}", self.org, self.slug)
    }
}

/// One build. `created_at` stays a string so a bad timestamp only costs
/// that build.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildNode {
    pub id: String,
    pub state: String,
    pub created_at: String,
}

/// Repository URL as Buildkite stores it, reduced to the form we compare
/// against: `git@`/`.git` variants collapse onto `https://github.com/o/r`.
fn normalize_repo_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    let url = url.strip_suffix(".git").unwrap_or(url);
    match url.strip_prefix("git@github.com:") {
        Some(path) => format!("https://github.com/{path}"),
        None => url.to_string(),
    }
}

impl BuildkiteClient {
    /// The pipeline `org/slug`, or `None` when Buildkite doesn't know it.
    pub async fn get_pipeline(&self, org: &str, slug: &str) -> Result<Option<PipelineRef>> {
        let full_slug = format!("{org}/{slug}");
        let data: PipelineData = self
            .graphql_query(
                "Pipeline",
                PIPELINE_QUERY,
                SlugVariables { slug: &full_slug },
            )
            .await?;

        if data.pipeline.is_none() {
            debug!("Pipeline {full_slug} not found");
        }

        Ok(data.pipeline.map(|p| PipelineRef {
            org: org.to_string(),
            slug: slug.to_string(),
            url: p.url,
        }))
    }

    async fn all_pipelines(&self, org: &str) -> Result<Vec<OrgPipelineNode>> {
        let mut pipelines = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let variables = OrganizationPipelinesVariables {
                slug: org,
                first: PAGE_SIZE,
                after: cursor.clone(),
            };
            let data: OrganizationData = self
                .graphql_query(
                    "OrganizationPipelines",
                    ORGANIZATION_PIPELINES_QUERY,
                    variables,
                )
                .await?;

            let Some(organization) = data.organization else {
                break;
            };
            let connection = organization.pipelines;
            pipelines.extend(connection.edges.into_iter().map(|e| e.node));

            if !connection.page_info.has_next_page {
                break;
            }
            cursor = connection.page_info.end_cursor;
            if cursor.is_none() {
                break;
            }
        }

        debug!("Found {} pipelines in Buildkite org {org}", pipelines.len());
        Ok(pipelines)
    }

    /// Every pipeline of `org`, grouped by the repository URL it builds.
    pub async fn pipelines_by_repo(&self, org: &str) -> Result<IndexMap<String, Vec<PipelineRef>>> {
        let mut by_repo: IndexMap<String, Vec<PipelineRef>> = IndexMap::new();

        for node in self.all_pipelines(org).await? {
            let Some(repository) = node.repository else {
                continue;
            };
            by_repo
                .entry(normalize_repo_url(&repository.url))
                .or_default()
                .push(PipelineRef {
                    org: org.to_string(),
                    slug: node.slug,
                    url: node.url,
                });
        }

        Ok(by_repo)
    }

    /// Builds of `org/slug` on `branch` created in `[from, to)`.
    pub async fn pipeline_builds(
        &self,
        org: &str,
        slug: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        branch: &str,
    ) -> Result<Vec<BuildNode>> {
        let full_slug = format!("{org}/{slug}");
        let mut builds = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let variables = PipelineBuildsVariables {
                slug: &full_slug,
                first: PAGE_SIZE,
                after: cursor.clone(),
                created_at_from: from,
                created_at_to: to,
                branch: vec![branch],
            };
            let data: BuildsData = self
                .graphql_query("PipelineBuilds", PIPELINE_BUILDS_QUERY, variables)
                .await?;

            let Some(connection) = data.pipeline.and_then(|p| p.builds) else {
                break;
            };
            builds.extend(connection.edges.into_iter().map(|e| e.node));

            if !connection.page_info.has_next_page {
                break;
            }
            cursor = connection.page_info.end_cursor;
            if cursor.is_none() {
                break;
            }
        }

        debug!("{full_slug}@{branch}: {} builds", builds.len());
        Ok(builds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Token;
    use chrono::TimeZone;
    use mockito::Matcher;
    use serde_json::json;

    fn client(server: &mockito::Server) -> BuildkiteClient {
        BuildkiteClient::new(&server.url(), Token::from("t")).unwrap()
    }

    #[test]
    fn test_normalize_repo_url() {
        assert_eq!(
            normalize_repo_url("https://github.com/octo/widgets.git"),
            "https://github.com/octo/widgets"
        );
        assert_eq!(
            normalize_repo_url("git@github.com:octo/widgets.git"),
            "https://github.com/octo/widgets"
        );
        assert_eq!(
            normalize_repo_url("https://github.com/octo/widgets"),
            "https://github.com/octo/widgets"
        );
    }

    #[tokio::test]
    async fn test_get_pipeline_found_and_missing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"variables": {"slug": "octo/widgets"}})))
            .with_body(r#"{"data":{"pipeline":{"url":"https://buildkite.com/octo/widgets"}}}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"variables": {"slug": "octo/nope"}})))
            .with_body(r#"{"data":{"pipeline":null}}"#)
            .create_async()
            .await;

        let client = client(&server);
        let found = client.get_pipeline("octo", "widgets").await.unwrap().unwrap();
        assert_eq!(found.url, "https://buildkite.com/octo/widgets");
        assert_eq!(found.key(), "octo/widgets");

        assert!(client.get_pipeline("octo", "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pipelines_by_repo_follows_cursor() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"variables": {"after": null}})))
            .with_body(
                r#"{"data":{"organization":{"pipelines":{
                    "edges":[
                      {"node":{"slug":"widgets","url":"https://buildkite.com/octo/widgets",
                               "repository":{"url":"https://github.com/octo/widgets.git"}}},
                      {"node":{"slug":"orphan","url":"https://buildkite.com/octo/orphan",
                               "repository":null}}],
                    "pageInfo":{"hasNextPage":true,"endCursor":"c1"}}}}}"#,
            )
            .create_async()
            .await;
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"variables": {"after": "c1"}})))
            .with_body(
                r#"{"data":{"organization":{"pipelines":{
                    "edges":[
                      {"node":{"slug":"widgets-nightly","url":"https://buildkite.com/octo/widgets-nightly",
                               "repository":{"url":"git@github.com:octo/widgets.git"}}}],
                    "pageInfo":{"hasNextPage":false,"endCursor":null}}}}}"#,
            )
            .create_async()
            .await;

        let by_repo = client(&server).pipelines_by_repo("octo").await.unwrap();

        let slugs: Vec<_> = by_repo["https://github.com/octo/widgets"]
            .iter()
            .map(|p| p.slug.as_str())
            .collect();
        assert_eq!(slugs, vec!["widgets", "widgets-nightly"]);
        assert_eq!(by_repo.len(), 1);
    }

    #[tokio::test]
    async fn test_pipeline_builds_sends_range_and_branch() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({
                "operationName": "PipelineBuilds",
                "variables": {
                    "slug": "octo/widgets",
                    "createdAtFrom": "2024-03-01T00:00:00Z",
                    "createdAtTo": "2024-03-11T00:00:00Z",
                    "branch": ["main"]
                }
            })))
            .with_body(
                r#"{"data":{"pipeline":{"builds":{
                    "edges":[{"node":{"id":"b1","state":"FAILED","createdAt":"2024-03-05T10:00:00Z"}}],
                    "pageInfo":{"hasNextPage":false,"endCursor":null}}}}}"#,
            )
            .create_async()
            .await;

        let builds = client(&server)
            .pipeline_builds(
                "octo",
                "widgets",
                Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap(),
                "main",
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].state, "FAILED");
    }
}
