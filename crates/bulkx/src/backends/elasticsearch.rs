//! # 📡 THE ELASTICSEARCH BACKEND
//!
//! 🎬 COLD OPEN — INT. SERVER ROOM — 3:47 AM
//!
//! The monitoring dashboard glows amber in the dark. One engineer, alone,
//! stares into the abyss of a RED cluster. The abyss stares back and
//! offers a 429. For every single document. In order.
//!
//! 🚀 This module POSTs one finished NDJSON payload to `/_bulk` and reads the
//! per-item verdict back. It does not retry. It does not classify. It reports.
//!
//! ⚠️ A non-2xx on the *request* is a transport failure. A 429 on an *item*
//! inside a 200 response is just Tuesday, and is somebody else's problem.
//!
//! 🦆 (mandatory duck, no context provided, none shall be requested)

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::backends::{BulkClient, BulkRequest, BulkResponse};
use crate::error::TransportError;

// 📡 ElasticsearchClientConfig — "It's just Elasticsearch", she said, before the cluster went red.
//
// 🔧 auth is tri-modal: username+password, api_key, or "I hope anonymous works" (it won't).
#[derive(Debug, Deserialize, Clone)]
pub struct ElasticsearchClientConfig {
    /// 📡 The URL of your cluster. Include scheme + port. Yes, all of it.
    pub url: String,
    /// 🔒 Username for basic auth. Optional, like flossing.
    #[serde(default)]
    pub username: Option<String>,
    /// 🔒 Password. "password123" is not a password. It is a confession.
    #[serde(default)]
    pub password: Option<String>,
    /// 🔒 API key auth. Wins over basic auth when both are set.
    #[serde(default)]
    pub api_key: Option<String>,
    /// 🧪 Ingest pipeline applied to every document in the request.
    #[serde(default)]
    pub pipeline: Option<String>,
    /// ⏱️ TCP+TLS handshake budget.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// ⏱️ Whole-request budget. Bulk requests can be meaty.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

// ⏱️ if ES can't handshake in 10 seconds, it's not having a good time and neither are we
fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl ElasticsearchClientConfig {
    /// 🚀 A config pointing at `url` with every other knob at its default.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            api_key: None,
            pipeline: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// 📦 The HTTP end of the pipeline. One `reqwest::Client`, reused for every request.
#[derive(Debug, Clone)]
pub struct ElasticsearchClient {
    client: reqwest::Client,
    config: ElasticsearchClientConfig,
}

impl ElasticsearchClient {
    /// 🚀 Build the HTTP client. No network traffic happens here; see [`ElasticsearchClient::ping`].
    pub fn new(config: ElasticsearchClientConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    // 🔒 api_key beats basic auth in this club
    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(ref api_key) = self.config.api_key {
            request.header("Authorization", format!("ApiKey {api_key}"))
        } else if let Some(ref username) = self.config.username {
            request.basic_auth(username, self.config.password.as_ref())
        } else {
            request
        }
    }

    fn bulk_url(&self) -> Result<reqwest::Url, TransportError> {
        // trim_end_matches('/'): one slash of difference, infinite suffering of difference
        let raw = format!("{}/_bulk", self.config.url.trim_end_matches('/'));
        let mut url = reqwest::Url::parse(&raw)
            .map_err(|err| TransportError::Send(format!("invalid bulk url '{raw}': {err}")))?;
        if let Some(ref pipeline) = self.config.pipeline {
            url.query_pairs_mut().append_pair("pipeline", pipeline);
        }
        Ok(url)
    }

    /// 📡 "Hello? Is this thing on?" GET the cluster root and insist on a 2xx.
    pub async fn ping(&self) -> Result<(), TransportError> {
        let response = self
            .authorize(self.client.get(&self.config.url))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        debug!(url = %self.config.url, "✅ cluster answered the ping, welcome mat is out");
        Ok(())
    }
}

#[async_trait]
impl BulkClient for ElasticsearchClient {
    async fn bulk(&self, request: BulkRequest) -> Result<BulkResponse, TransportError> {
        let mut http = self
            .client
            .post(self.bulk_url()?)
            // ⚠️ application/x-ndjson, not application/json. ES has feelings about this.
            .header("Content-Type", "application/x-ndjson");
        if request.compressed {
            http = http.header("Content-Encoding", "gzip");
        }
        http = self.authorize(http);

        trace!(
            items = request.items,
            bytes = request.payload.len(),
            uncompressed_bytes = request.uncompressed_len,
            "📡 POST /_bulk"
        );
        let response = http.body(request.payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            // 💀 the whole request bounced. the body usually explains which shard is having a rough morning.
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let body = response.bytes().await?;
        BulkResponse::from_slice(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_the_pipeline_rides_along_in_the_query() -> Result<(), TransportError> {
        let mut config = ElasticsearchClientConfig::new("http://localhost:9200/");
        config.pipeline = Some("geoip".into());
        let client = ElasticsearchClient::new(config)?;
        assert_eq!(
            client.bulk_url()?.as_str(),
            "http://localhost:9200/_bulk?pipeline=geoip"
        );
        Ok(())
    }

    #[test]
    fn the_one_where_a_cursed_url_is_a_send_error() -> Result<(), TransportError> {
        let client = ElasticsearchClient::new(ElasticsearchClientConfig::new("not a url"))?;
        assert!(matches!(client.bulk_url(), Err(TransportError::Send(_))));
        Ok(())
    }

    #[test]
    fn the_one_where_serde_fills_in_the_timeouts() {
        let config: ElasticsearchClientConfig =
            serde_json::from_str(r#"{"url":"http://es:9200"}"#).expect("💀 config should parse");
        assert_eq!(config.connect_timeout_secs, 10);
        assert_eq!(config.request_timeout_secs, 30);
        assert!(config.api_key.is_none());
    }
}
