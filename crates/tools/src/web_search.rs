//! Web search: an HTTP search client and the tool adapter the summarizer
//! offers to the model.

use async_trait::async_trait;
use pagepilot_core::error::ToolError;
use pagepilot_core::search::{SearchHit, WebSearch};
use pagepilot_core::tool::{Tool, ToolResult};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const BRAVE_ENDPOINT: &str = "https://api.search.brave.com/res/v1/web/search";

/// Brave Search API client.
pub struct BraveSearch {
    api_key: String,
    endpoint: String,
    client: reqwest::Client,
}

impl BraveSearch {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "web_search".into(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            api_key: api_key.into(),
            endpoint: BRAVE_ENDPOINT.into(),
            client,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: Option<BraveWeb>,
}

#[derive(Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Deserialize)]
struct BraveResult {
    title: String,
    url: String,
    #[serde(default)]
    description: String,
}

fn parse_brave(body: &str, limit: usize) -> Result<Vec<SearchHit>, serde_json::Error> {
    let response: BraveResponse = serde_json::from_str(body)?;
    Ok(response
        .web
        .map(|w| w.results)
        .unwrap_or_default()
        .into_iter()
        .take(limit)
        .map(|r| SearchHit {
            title: r.title,
            url: r.url,
            snippet: r.description,
        })
        .collect())
}

#[async_trait]
impl WebSearch for BraveSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, ToolError> {
        let failed = |reason: String| ToolError::ExecutionFailed {
            tool_name: "web_search".into(),
            reason,
        };

        debug!(query = %query, limit, "Web search");
        let response = self
            .client
            .get(&self.endpoint)
            .header("X-Subscription-Token", &self.api_key)
            .header("Accept", "application/json")
            .query(&[("q", query), ("count", &limit.to_string())])
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| failed(e.to_string()))?;
        if !status.is_success() {
            return Err(failed(format!("search API returned {status}")));
        }
        parse_brave(&body, limit).map_err(|e| failed(format!("bad search response: {e}")))
    }
}

/// Exposes a [`WebSearch`] backend to the model as the `web_search` tool.
pub struct WebSearchTool {
    search: Arc<dyn WebSearch>,
    max_results: usize,
}

impl WebSearchTool {
    pub fn new(search: Arc<dyn WebSearch>, max_results: usize) -> Self {
        Self {
            search,
            max_results: max_results.max(1),
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for information. Returns a list of relevant results with titles, URLs, and snippets."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "num_results": {
                    "type": "integer",
                    "description": format!("Number of results to return (max {})", self.max_results)
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let query = arguments["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;
        let limit = arguments["num_results"]
            .as_u64()
            .map(|n| n as usize)
            .unwrap_or(self.max_results)
            .clamp(1, self.max_results);

        let hits = self.search.search(query, limit).await?;
        let output = hits
            .iter()
            .enumerate()
            .map(|(i, h)| format!("{}. {} ({})\n   {}", i + 1, h.title, h.url, h.snippet))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(ToolResult::ok("", output).with_data(serde_json::to_value(&hits).unwrap_or_default()))
    }
}
