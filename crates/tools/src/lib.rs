//! Browser action tools for PagePilot.
//!
//! Tools give the agent the ability to act on a page: navigate, click,
//! type, press keys, scroll, wait, read the page and take screenshots.
//! Each tool is a thin adapter over a [`BrowserBackend`]; the
//! [`RetryingExecutor`] adds per-kind timeouts and transient-failure retry.

pub mod browser;
pub mod executor;
pub mod interact;
pub mod navigate;
pub mod page;
pub mod web_search;

use pagepilot_core::error::ToolError;
use pagepilot_core::tool::ToolRegistry;
use std::sync::Arc;

pub use browser::{BrowserBackend, DryRunBrowser, PageSnapshot, ScrollDirection, WaitCondition};
pub use executor::{RetryingExecutor, ToolKind, ToolOutcome, ToolRetryConfig};
pub use web_search::{BraveSearch, WebSearchTool};

/// Create a registry with every browser tool bound to `browser`.
pub fn browser_registry(browser: Arc<dyn BrowserBackend>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(navigate::NavigateTool::new(browser.clone())));
    registry.register(Arc::new(interact::ClickTool::new(browser.clone())));
    registry.register(Arc::new(interact::TypeTextTool::new(browser.clone())));
    registry.register(Arc::new(interact::PressKeyTool::new(browser.clone())));
    registry.register(Arc::new(interact::ScrollTool::new(browser.clone())));
    registry.register(Arc::new(page::WaitTool::new(browser.clone())));
    registry.register(Arc::new(page::PageContextTool::new(browser.clone())));
    registry.register(Arc::new(page::ScreenshotTool::new(browser)));
    registry
}

/// A non-empty string argument.
pub(crate) fn required_str<'a>(
    arguments: &'a serde_json::Value,
    key: &str,
) -> Result<&'a str, ToolError> {
    arguments[key]
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{key}' argument")))
}
