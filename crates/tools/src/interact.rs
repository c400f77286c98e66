//! Page interaction tools: click, type_text, press_key, scroll.

use async_trait::async_trait;
use pagepilot_core::error::ToolError;
use pagepilot_core::tool::{Tool, ToolResult};
use std::sync::Arc;

use crate::browser::{BrowserBackend, ScrollDirection};
use crate::required_str;

const DEFAULT_SCROLL_AMOUNT: u32 = 500;

pub struct ClickTool {
    browser: Arc<dyn BrowserBackend>,
}

impl ClickTool {
    pub fn new(browser: Arc<dyn BrowserBackend>) -> Self {
        Self { browser }
    }
}

#[async_trait]
impl Tool for ClickTool {
    fn name(&self) -> &str {
        "click"
    }

    fn description(&self) -> &str {
        "Click an element on the current page, identified by CSS selector or visible text."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "selector": {
                    "type": "string",
                    "description": "CSS selector or visible text of the element"
                }
            },
            "required": ["selector"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let selector = required_str(&arguments, "selector")?;
        let output = self.browser.click(selector).await?;
        Ok(ToolResult::ok("", output))
    }
}

pub struct TypeTextTool {
    browser: Arc<dyn BrowserBackend>,
}

impl TypeTextTool {
    pub fn new(browser: Arc<dyn BrowserBackend>) -> Self {
        Self { browser }
    }
}

#[async_trait]
impl Tool for TypeTextTool {
    fn name(&self) -> &str {
        "type_text"
    }

    fn description(&self) -> &str {
        "Type text into an input field. Focuses the element first."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "selector": {
                    "type": "string",
                    "description": "CSS selector of the input or textarea"
                },
                "text": {
                    "type": "string",
                    "description": "Text to type"
                }
            },
            "required": ["selector", "text"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let selector = required_str(&arguments, "selector")?;
        let text = arguments["text"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'text' argument".into()))?;
        let output = self.browser.type_text(selector, text).await?;
        Ok(ToolResult::ok("", output))
    }
}

pub struct PressKeyTool {
    browser: Arc<dyn BrowserBackend>,
}

impl PressKeyTool {
    pub fn new(browser: Arc<dyn BrowserBackend>) -> Self {
        Self { browser }
    }
}

#[async_trait]
impl Tool for PressKeyTool {
    fn name(&self) -> &str {
        "press_key"
    }

    fn description(&self) -> &str {
        "Press a keyboard key (e.g. Enter, Tab, Escape, ArrowDown) on the focused element."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "key": {
                    "type": "string",
                    "description": "Key name as in KeyboardEvent.key"
                }
            },
            "required": ["key"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let key = required_str(&arguments, "key")?;
        let output = self.browser.press_key(key).await?;
        Ok(ToolResult::ok("", output))
    }
}

pub struct ScrollTool {
    browser: Arc<dyn BrowserBackend>,
}

impl ScrollTool {
    pub fn new(browser: Arc<dyn BrowserBackend>) -> Self {
        Self { browser }
    }
}

#[async_trait]
impl Tool for ScrollTool {
    fn name(&self) -> &str {
        "scroll"
    }

    fn description(&self) -> &str {
        "Scroll the page up, down, to the top or to the bottom."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "direction": {
                    "type": "string",
                    "enum": ["up", "down", "top", "bottom"]
                },
                "amount": {
                    "type": "integer",
                    "description": "Pixels to scroll for up/down (default 500)",
                    "default": DEFAULT_SCROLL_AMOUNT
                }
            },
            "required": ["direction"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let direction: ScrollDirection = required_str(&arguments, "direction")?.parse()?;
        let amount = arguments["amount"]
            .as_u64()
            .map(|a| a.min(u64::from(u32::MAX)) as u32)
            .unwrap_or(DEFAULT_SCROLL_AMOUNT);
        let output = self.browser.scroll(direction, amount).await?;
        Ok(ToolResult::ok("", output))
    }
}
