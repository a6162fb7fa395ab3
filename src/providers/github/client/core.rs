use std::time::Duration;

use log::debug;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::auth::Token;
use crate::error::{CiStatsError, Result};

pub const PER_PAGE: u32 = 100;

const ACCEPT_JSON: &str = "application/vnd.github+json";
const ACCEPT_RAW: &str = "application/vnd.github.raw";
const API_VERSION: &str = "2022-11-28";

pub struct GitHubClient {
    client: Client,
    api_url: Url,
    token: Token,
    call_delay: Option<Duration>,
}

impl GitHubClient {
    /// `call_delay` is slept after every request to stay under a
    /// self-imposed operations-per-minute budget.
    pub fn new(base_url: &str, token: Token, call_delay: Option<Duration>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("ci-streaks/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CiStatsError::Config(format!("Failed to create HTTP client: {e}")))?;

        // Url::join drops the last path segment unless the base ends in '/'
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let api_url = Url::parse(&normalized)
            .map_err(|e| CiStatsError::Config(format!("Invalid GitHub API URL: {e}")))?;

        Ok(Self {
            client,
            api_url,
            token,
            call_delay,
        })
    }

    pub fn is_paced(&self) -> bool {
        self.call_delay.is_some()
    }

    fn auth_request(&self, request: RequestBuilder, accept: &str) -> RequestBuilder {
        request
            .bearer_auth(self.token.as_str())
            .header(reqwest::header::ACCEPT, accept)
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    /// `repos/{owner}/{repo}/{path}` under the API root.
    pub(super) fn repo_url(&self, owner: &str, repo: &str, path: &str) -> Result<Url> {
        self.api_url
            .join(&format!("repos/{owner}/{repo}/{path}"))
            .map_err(|e| CiStatsError::Config(format!("Invalid repository URL: {e}")))
    }

    async fn send(&self, request: RequestBuilder, what: &Url) -> Result<reqwest::Response> {
        debug!("GET {what}");
        let response = request.send().await?;
        self.pace().await;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(CiStatsError::NotFound(what.path().to_string()));
        }
        Ok(response.error_for_status()?)
    }

    pub(super) async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<T> {
        let request = self.auth_request(self.client.get(url.clone()).query(query), ACCEPT_JSON);
        let response = self.send(request, &url).await?;
        Ok(response.json::<T>().await?)
    }

    pub(super) async fn get_raw(&self, url: Url) -> Result<String> {
        let request = self.auth_request(self.client.get(url.clone()), ACCEPT_RAW);
        let response = self.send(request, &url).await?;
        Ok(response.text().await?)
    }

    async fn pace(&self) {
        if let Some(delay) = self.call_delay {
            debug!(
                "Sleeping for {:.2}s to honor rate-limit",
                delay.as_secs_f64()
            );
            tokio::time::sleep(delay).await;
        }
    }
}
