use graphql_client::{QueryBody, Response};
use log::debug;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::auth::Token;
use crate::error::{CiStatsError, Result};

pub const DEFAULT_GRAPHQL_URL: &str = "https://graphql.buildkite.com/v1";

pub struct BuildkiteClient {
    client: Client,
    graphql_url: Url,
    token: Token,
}

impl BuildkiteClient {
    pub fn new(graphql_url: &str, token: Token) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("ci-streaks/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CiStatsError::Config(format!("Failed to create HTTP client: {e}")))?;

        let graphql_url = Url::parse(graphql_url)
            .map_err(|e| CiStatsError::Config(format!("Invalid Buildkite GraphQL URL: {e}")))?;

        Ok(Self {
            client,
            graphql_url,
            token,
        })
    }

    fn auth_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.bearer_auth(self.token.as_str())
    }

    /// Posts one query and unwraps the GraphQL envelope.
    ///
    /// Errors reported in the body fail the whole call, even when partial
    /// `data` came back with them.
    pub(super) async fn graphql_query<V, T>(
        &self,
        operation_name: &'static str,
        query: &'static str,
        variables: V,
    ) -> Result<T>
    where
        V: Serialize,
        T: DeserializeOwned,
    {
        debug!("Buildkite query {operation_name}");
        let body = QueryBody {
            variables,
            query,
            operation_name,
        };

        let request = self.auth_request(self.client.post(self.graphql_url.clone()).json(&body));
        let response = request.send().await?.error_for_status()?;
        let envelope: Response<T> = response.json().await?;

        if let Some(errors) = envelope.errors.filter(|e| !e.is_empty()) {
            let joined = errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(CiStatsError::Api(format!(
                "Buildkite API returned errors: {joined}"
            )));
        }

        envelope
            .data
            .ok_or_else(|| CiStatsError::Api("Buildkite response contained no data".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Viewer {
        viewer: Option<serde_json::Value>,
    }

    #[tokio::test]
    async fn test_query_posts_envelope_with_bearer() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("authorization", "Bearer bk_secret")
            .match_body(Matcher::PartialJson(json!({
                "operationName": "Viewer",
                "variables": {"slug": "octo"}
            })))
            .with_body(r#"{"data":{"viewer":{"id":"1"}}}"#)
            .create_async()
            .await;

        let client = BuildkiteClient::new(&server.url(), Token::from("bk_secret")).unwrap();
        let data: Viewer = client
            .graphql_query("Viewer", "query Viewer { viewer { id } }", json!({"slug": "octo"}))
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(data.viewer.is_some());
    }

    #[tokio::test]
    async fn test_body_errors_become_api_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_body(r#"{"data":null,"errors":[{"message":"No organization found"}]}"#)
            .create_async()
            .await;

        let client = BuildkiteClient::new(&server.url(), Token::from("t")).unwrap();
        let err = client
            .graphql_query::<_, Viewer>("Viewer", "query Viewer { viewer { id } }", json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, CiStatsError::Api(ref m) if m.contains("No organization found")));
    }

    #[tokio::test]
    async fn test_http_failure_is_network_error() {
        let mut server = mockito::Server::new_async().await;
        server.mock("POST", "/").with_status(401).create_async().await;

        let client = BuildkiteClient::new(&server.url(), Token::from("t")).unwrap();
        let err = client
            .graphql_query::<_, Viewer>("Viewer", "query Viewer { viewer { id } }", json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, CiStatsError::Network(_)));
    }
}
