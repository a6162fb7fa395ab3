use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::core::{GitHubClient, PER_PAGE};
use crate::error::Result;

#[derive(Debug, Clone, Deserialize)]
pub struct UserDto {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LabelDto {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestRefDto {
    pub merged_at: Option<DateTime<Utc>>,
}

/// An entry of the issues API. Pull requests show up here too, marked by
/// `pull_request`.
#[derive(Debug, Clone, Deserialize)]
pub struct IssueDto {
    pub number: u64,
    pub title: String,
    pub html_url: String,
    pub user: Option<UserDto>,
    #[serde(default)]
    pub labels: Vec<LabelDto>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub pull_request: Option<PullRequestRefDto>,
}

impl IssueDto {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }

    pub fn is_merged(&self) -> bool {
        self.pull_request
            .as_ref()
            .is_some_and(|pr| pr.merged_at.is_some())
    }

    pub fn has_label(&self, name: &str) -> bool {
        self.labels.iter().any(|l| l.name == name)
    }

    pub fn author(&self) -> &str {
        self.user.as_ref().map_or("ghost", |u| u.login.as_str())
    }
}

impl GitHubClient {
    /// One page of issues and pull requests in any state, newest first.
    pub async fn issues_page(&self, owner: &str, repo: &str, page: u32) -> Result<Vec<IssueDto>> {
        let url = self.repo_url(owner, repo, "issues")?;
        self.get_json(
            url,
            &[
                ("state", "all".to_string()),
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
            ],
        )
        .await
    }

    /// The repository README as raw Markdown.
    pub async fn readme(&self, owner: &str, repo: &str) -> Result<String> {
        let url = self.repo_url(owner, repo, "readme")?;
        self.get_raw(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Token;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_issues_page_parses_prs_and_issues() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/repos/octo/widgets/issues")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("state".into(), "all".into()),
                Matcher::UrlEncoded("page".into(), "1".into()),
            ]))
            .with_body(
                r#"[
                  {"number":2,"title":"Fix it","html_url":"https://github.com/octo/widgets/pull/2",
                   "user":{"login":"alice"},"labels":[],
                   "created_at":"2024-03-01T00:00:00Z","updated_at":"2024-03-02T00:00:00Z",
                   "closed_at":"2024-03-02T00:00:00Z",
                   "pull_request":{"merged_at":"2024-03-02T00:00:00Z"}},
                  {"number":1,"title":"Broken","html_url":"https://github.com/octo/widgets/issues/1",
                   "user":null,"labels":[{"name":"Status: Waiting on Contributor"}],
                   "created_at":"2024-02-01T00:00:00Z","updated_at":"2024-02-01T00:00:00Z",
                   "closed_at":null}
                ]"#,
            )
            .create_async()
            .await;

        let client = GitHubClient::new(&server.url(), Token::from("t"), None).unwrap();
        let items = client.issues_page("octo", "widgets", 1).await.unwrap();

        mock.assert_async().await;
        assert!(items[0].is_pull_request() && items[0].is_merged());
        assert_eq!(items[0].author(), "alice");
        assert!(!items[1].is_pull_request());
        assert!(items[1].has_label("Status: Waiting on Contributor"));
        assert_eq!(items[1].author(), "ghost");
    }
}
