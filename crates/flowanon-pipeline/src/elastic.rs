//! Elasticsearch scroll client for netflow indices

use std::time::Duration;

use anyhow::Context;
use flowanon_core::FlowRecord;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::SourceConfig;
use crate::source::{FlowPage, FlowSource};

/// Fields requested from each document
pub const FLOW_FIELDS: [&str; 13] = [
    "netflow.first_switched",
    "netflow.last_switched",
    "netflow.bytes",
    "netflow.protocol",
    "netflow.src_addr",
    "netflow.src_port",
    "netflow.dst_addr",
    "netflow.dst_port",
    "netflow.src_locality",
    "netflow.dst_locality",
    "netflow.tcp_flags",
    "netflow.flow_seq_num",
    "host",
];

const MULTICAST_FIRST: &str = "224.0.0.0";
const ADDRESS_LAST: &str = "255.255.255.255";

#[derive(Debug, Error)]
pub enum ScrollError {
    #[error("scroll context expired before the stream was drained")]
    ContextExpired,
    #[error("Elasticsearch returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("search response carries no scroll id")]
    MissingScrollId,
}

/// Query selecting the flows to anonymize
pub fn build_query(config: &SourceConfig) -> Value {
    let mut must_not = Vec::new();
    if config.exclude_multicast {
        for field in ["netflow.src_addr", "netflow.dst_addr"] {
            must_not.push(json!({
                "range": { field: { "gte": MULTICAST_FIRST, "lte": ADDRESS_LAST } }
            }));
        }
    }

    let mut filter = Vec::new();
    if let Some(range) = &config.time_range {
        filter.push(json!({
            "range": { "@timestamp": { "gte": range.gte, "lte": range.lte } }
        }));
    }

    json!({ "bool": { "must_not": must_not, "filter": filter } })
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "_scroll_id")]
    scroll_id: Option<String>,
    hits: Hits,
}

#[derive(Debug, Deserialize)]
struct Hits {
    #[serde(default)]
    total: Option<HitsTotal>,
    #[serde(default)]
    hits: Vec<Hit>,
}

/// `hits.total` is a plain number before ES 7 and an object after
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HitsTotal {
    Count(u64),
    Object { value: u64 },
}

impl HitsTotal {
    fn value(&self) -> u64 {
        match self {
            Self::Count(n) | Self::Object { value: n } => *n,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_source")]
    source: HitSource,
}

#[derive(Debug, Deserialize)]
struct HitSource {
    netflow: FlowRecord,
    #[serde(default)]
    host: Option<Value>,
}

impl HitSource {
    fn into_record(self) -> FlowRecord {
        let mut record = self.netflow;
        // Beats ship `host` either as a string or as `{ "name": ... }`
        record.host = match self.host {
            Some(Value::String(name)) => Some(name),
            Some(Value::Object(map)) => map.get("name").and_then(Value::as_str).map(String::from),
            _ => record.host,
        };
        record
    }
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

fn into_page(response: SearchResponse) -> FlowPage {
    FlowPage {
        cursor: response.scroll_id,
        total: response.hits.total.as_ref().map(HitsTotal::value),
        records: response
            .hits
            .hits
            .into_iter()
            .map(|hit| hit.source.into_record())
            .collect(),
    }
}

/// Scroll client over one index pattern
pub struct ElasticClient {
    client: reqwest::Client,
    config: SourceConfig,
    query: Value,
    scroll_id: Option<String>,
}

impl ElasticClient {
    pub fn new(config: SourceConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("building HTTP client")?;
        let query = build_query(&config);
        Ok(Self {
            client,
            config,
            query,
            scroll_id: None,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.url.trim_end_matches('/'), path)
    }

    /// Number of documents matching the query
    pub async fn count(&self) -> anyhow::Result<u64> {
        let url = self.url(&format!("{}/_count", self.config.index));
        let resp = self
            .client
            .post(&url)
            .json(&json!({ "query": self.query }))
            .send()
            .await
            .with_context(|| format!("POST {}", url))?;
        let resp = check_status(resp).await?;
        let body: CountResponse = resp.json().await.context("decoding _count response")?;
        Ok(body.count)
    }

    async fn search(&self, request: reqwest::RequestBuilder) -> anyhow::Result<SearchResponse> {
        let resp = request.send().await.context("sending search request")?;
        let resp = check_status(resp).await?;
        let body = resp.json().await.context("decoding search response")?;
        Ok(body)
    }

    fn remember(&mut self, page: &FlowPage) {
        if let Some(id) = &page.cursor {
            self.scroll_id = Some(id.clone());
        }
    }
}

async fn check_status(resp: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::NOT_FOUND && body.contains("search_context_missing") {
        return Err(ScrollError::ContextExpired.into());
    }
    Err(ScrollError::Status {
        status: status.as_u16(),
        body,
    }
    .into())
}

impl FlowSource for ElasticClient {
    async fn first_page(&mut self) -> anyhow::Result<FlowPage> {
        let total = self.count().await?;

        let url = self.url(&format!("{}/_search", self.config.index));
        let request = self
            .client
            .post(&url)
            .query(&[("scroll", self.config.scroll.as_str())])
            .json(&json!({
                "size": self.config.page_size,
                "_source": FLOW_FIELDS,
                "query": self.query,
            }));

        let response = self.search(request).await?;
        if response.scroll_id.is_none() {
            return Err(ScrollError::MissingScrollId.into());
        }

        let mut page = into_page(response);
        page.total = Some(total);
        self.remember(&page);

        tracing::info!(
            index = %self.config.index,
            total,
            page_size = self.config.page_size,
            "Opened scroll"
        );
        Ok(page)
    }

    async fn next_page(&mut self, cursor: &str) -> anyhow::Result<FlowPage> {
        let url = self.url("_search/scroll");
        let request = self.client.post(&url).json(&json!({
            "scroll": self.config.scroll,
            "scroll_id": cursor,
        }));

        let page = into_page(self.search(request).await?);
        self.remember(&page);
        Ok(page)
    }

    async fn finish(&mut self) -> anyhow::Result<()> {
        let Some(scroll_id) = self.scroll_id.take() else {
            return Ok(());
        };
        let url = self.url("_search/scroll");
        let resp = self
            .client
            .delete(&url)
            .json(&json!({ "scroll_id": scroll_id }))
            .send()
            .await
            .context("clearing scroll")?;
        if !resp.status().is_success() {
            tracing::warn!(status = resp.status().as_u16(), "Failed to clear scroll");
        }
        Ok(())
    }
}
