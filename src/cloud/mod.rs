//! The cloud HTTP API consumed by the agent only (§6): a single GET that
//! returns the raw upgrade-script body for this node.

use std::time::Duration;

use crate::error::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Thin wrapper around a `reqwest::Client` carrying the base URL and
/// credentials needed to fetch a node's upgrade script. Constructed once
/// at startup and passed down, rather than rebuilt per reconcile.
#[derive(Clone, Debug)]
pub struct CloudClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl CloudClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    #[cfg(test)]
    fn with_http_client(http: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// `GET {BASE}/v3/organizations/{org}/clusters/{cluster}/nodes/{node}-upgrade.sh`
    ///
    /// Network errors, non-2xx responses, and body read failures all map
    /// to a terminal "download failed" for this reconcile attempt; the
    /// caller writes the node annotation's status to `Failed` once the
    /// agent's own retry cap is exhausted.
    pub async fn download_upgrade_script(
        &self,
        organization_id: &str,
        cluster_id: &str,
        node_name: &str,
    ) -> Result<Vec<u8>> {
        let url = format!(
            "{}/v3/organizations/{}/clusters/{}/nodes/{}-upgrade.sh",
            self.base_url.trim_end_matches('/'),
            organization_id,
            cluster_id,
            node_name
        );

        let response = self
            .http
            .get(&url)
            .header("Authorization", format!("JWT {}", self.api_key))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::ScriptDownload(format!(
                "GET {url} returned status {status}"
            )));
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            return Err(Error::ScriptDownload(format!(
                "GET {url} returned an empty body"
            )));
        }

        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn downloads_script_body_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/organizations/org-1/clusters/cluster-1/nodes/node-a-upgrade.sh"))
            .and(header("Authorization", "JWT secret-key"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"#!/bin/sh\necho go\n".to_vec()))
            .mount(&server)
            .await;

        let client = CloudClient::with_http_client(reqwest::Client::new(), server.uri(), "secret-key");
        let body = client
            .download_upgrade_script("org-1", "cluster-1", "node-a")
            .await
            .unwrap();

        assert_eq!(body, b"#!/bin/sh\necho go\n");
    }

    #[tokio::test]
    async fn non_2xx_is_a_download_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = CloudClient::with_http_client(reqwest::Client::new(), server.uri(), "secret-key");
        let result = client.download_upgrade_script("org-1", "cluster-1", "node-a").await;

        assert!(matches!(result, Err(Error::ScriptDownload(_))));
    }

    #[tokio::test]
    async fn empty_body_is_a_download_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(Vec::<u8>::new()))
            .mount(&server)
            .await;

        let client = CloudClient::with_http_client(reqwest::Client::new(), server.uri(), "secret-key");
        let result = client.download_upgrade_script("org-1", "cluster-1", "node-a").await;

        assert!(matches!(result, Err(Error::ScriptDownload(_))));
    }
}
