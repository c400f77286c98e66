//! Read-side tools: wait, get_page_context, screenshot.

use async_trait::async_trait;
use pagepilot_core::error::ToolError;
use pagepilot_core::tool::{Tool, ToolResult};
use std::sync::Arc;
use std::time::Duration;

use crate::browser::{BrowserBackend, WaitCondition};

/// Upper bound on a single wait; longer requests are clamped.
const MAX_WAIT_MS: u64 = 10_000;
const DEFAULT_WAIT_MS: u64 = 1_000;

/// Page text is cut to this many characters before it reaches the model.
const MAX_CONTEXT_CHARS: usize = 8_000;

pub struct WaitTool {
    browser: Arc<dyn BrowserBackend>,
}

impl WaitTool {
    pub fn new(browser: Arc<dyn BrowserBackend>) -> Self {
        Self { browser }
    }
}

#[async_trait]
impl Tool for WaitTool {
    fn name(&self) -> &str {
        "wait"
    }

    fn description(&self) -> &str {
        "Wait for a number of milliseconds, or until an element matching a selector appears."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "ms": {
                    "type": "integer",
                    "description": "Milliseconds to wait (max 10000)"
                },
                "selector": {
                    "type": "string",
                    "description": "Wait until this element exists instead"
                }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let ms = arguments["ms"].as_u64().unwrap_or(DEFAULT_WAIT_MS).min(MAX_WAIT_MS);
        let condition = match arguments["selector"].as_str().filter(|s| !s.trim().is_empty()) {
            Some(selector) => WaitCondition::Selector {
                selector: selector.to_string(),
                timeout: Duration::from_millis(MAX_WAIT_MS),
            },
            None => WaitCondition::Duration(Duration::from_millis(ms)),
        };
        let output = self.browser.wait(condition).await?;
        Ok(ToolResult::ok("", output))
    }
}

pub struct PageContextTool {
    browser: Arc<dyn BrowserBackend>,
}

impl PageContextTool {
    pub fn new(browser: Arc<dyn BrowserBackend>) -> Self {
        Self { browser }
    }
}

#[async_trait]
impl Tool for PageContextTool {
    fn name(&self) -> &str {
        "get_page_context"
    }

    fn description(&self) -> &str {
        "Read the current page: URL, title, visible text and interactive elements."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let mut page = self.browser.page_context().await?;
        if page.text.chars().count() > MAX_CONTEXT_CHARS {
            page.text = page.text.chars().take(MAX_CONTEXT_CHARS).collect();
            page.text.push_str("…");
        }

        let mut output = format!("URL: {}\nTitle: {}\n\n{}", page.url, page.title, page.text);
        if !page.interactive_elements.is_empty() {
            output.push_str("\n\nInteractive elements: ");
            output.push_str(&page.interactive_elements.join(", "));
        }

        Ok(ToolResult::ok("", output).with_data(serde_json::to_value(&page).unwrap_or_default()))
    }
}

pub struct ScreenshotTool {
    browser: Arc<dyn BrowserBackend>,
}

impl ScreenshotTool {
    pub fn new(browser: Arc<dyn BrowserBackend>) -> Self {
        Self { browser }
    }
}

#[async_trait]
impl Tool for ScreenshotTool {
    fn name(&self) -> &str {
        "screenshot"
    }

    fn description(&self) -> &str {
        "Capture a screenshot of the visible part of the page."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let data_url = self.browser.screenshot().await?;
        // The image itself is not echoed back into the conversation
        Ok(ToolResult::ok("", format!("Captured screenshot ({} bytes)", data_url.len()))
            .with_data(serde_json::json!({ "dataUrl": data_url })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::DryRunBrowser;

    #[tokio::test(start_paused = true)]
    async fn wait_clamps_duration() {
        let browser = Arc::new(DryRunBrowser::new());
        let tool = WaitTool::new(browser.clone());
        let result = tool
            .execute(serde_json::json!({"ms": 60_000}))
            .await
            .unwrap();
        assert_eq!(result.output, "Waited 10000ms");
    }

    #[tokio::test]
    async fn wait_for_selector() {
        let tool = WaitTool::new(Arc::new(DryRunBrowser::new()));
        let result = tool
            .execute(serde_json::json!({"selector": ".results"}))
            .await
            .unwrap();
        assert!(result.output.contains(".results"));
    }

    #[tokio::test]
    async fn page_context_after_navigation() {
        let browser = Arc::new(DryRunBrowser::new());
        browser.navigate("https://example.com").await.unwrap();
        let result = PageContextTool::new(browser)
            .execute(serde_json::json!({}))
            .await
            .unwrap();
        assert!(result.output.starts_with("URL: https://example.com"));
        assert!(result.output.contains("Interactive elements"));
        assert_eq!(result.data.unwrap()["title"], "example.com");
    }

    #[tokio::test]
    async fn screenshot_keeps_image_out_of_output() {
        let result = ScreenshotTool::new(Arc::new(DryRunBrowser::new()))
            .execute(serde_json::json!({}))
            .await
            .unwrap();
        assert!(!result.output.contains("base64"));
        assert!(result.data.unwrap()["dataUrl"].as_str().unwrap().starts_with("data:image/png"));
    }
}
