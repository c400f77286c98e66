//! Navigate tool: load a URL in the active tab.

use async_trait::async_trait;
use pagepilot_core::error::ToolError;
use pagepilot_core::tool::{Tool, ToolResult};
use std::sync::Arc;

use crate::browser::BrowserBackend;
use crate::required_str;

pub struct NavigateTool {
    browser: Arc<dyn BrowserBackend>,
}

impl NavigateTool {
    pub fn new(browser: Arc<dyn BrowserBackend>) -> Self {
        Self { browser }
    }
}

/// Add `https://` to bare host names; reject non-web schemes.
pub fn normalize_url(raw: &str) -> Result<String, ToolError> {
    let url = raw.trim();
    if url.is_empty() {
        return Err(ToolError::InvalidArguments("'url' must not be empty".into()));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(url.to_string());
    }
    if url.contains("://") || url.starts_with("javascript:") || url.starts_with("data:") {
        return Err(ToolError::PermissionDenied {
            tool_name: "navigate".into(),
            reason: format!("unsupported URL scheme in '{url}'"),
        });
    }
    Ok(format!("https://{url}"))
}

#[async_trait]
impl Tool for NavigateTool {
    fn name(&self) -> &str {
        "navigate"
    }

    fn description(&self) -> &str {
        "Navigate the current tab to a URL. Returns the loaded page's title and URL."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "Absolute URL or host name to open"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let url = normalize_url(required_str(&arguments, "url")?)?;
        let page = self.browser.navigate(&url).await?;

        Ok(
            ToolResult::ok("", format!("Navigated to {} ({})", page.url, page.title))
                .with_data(serde_json::to_value(&page).unwrap_or_default()),
        )
    }
}
