//! Browser backend capability and the dry-run implementation.
//!
//! The browser tools never touch a page directly; they translate model
//! arguments into calls on a [`BrowserBackend`]. A real backend (extension
//! bridge, CDP session) lives outside this workspace. [`DryRunBrowser`]
//! simulates one in memory so a full run can be exercised offline.

use async_trait::async_trait;
use pagepilot_core::error::ToolError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// What the agent can see of the current page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,

    /// Visible text, possibly truncated by the backend
    pub text: String,

    /// Selectors or labels of clickable / typeable elements
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interactive_elements: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
    Top,
    Bottom,
}

impl std::str::FromStr for ScrollDirection {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            "top" => Ok(Self::Top),
            "bottom" => Ok(Self::Bottom),
            other => Err(ToolError::InvalidArguments(format!(
                "invalid scroll direction '{other}' (expected up, down, top or bottom)"
            ))),
        }
    }
}

/// A condition the `wait` tool blocks on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitCondition {
    Duration(Duration),
    Selector { selector: String, timeout: Duration },
}

/// The browser, as seen by the tools.
#[async_trait]
pub trait BrowserBackend: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<PageSnapshot, ToolError>;

    async fn click(&self, selector: &str) -> Result<String, ToolError>;

    async fn type_text(&self, selector: &str, text: &str) -> Result<String, ToolError>;

    async fn press_key(&self, key: &str) -> Result<String, ToolError>;

    async fn scroll(&self, direction: ScrollDirection, amount: u32) -> Result<String, ToolError>;

    async fn wait(&self, condition: WaitCondition) -> Result<String, ToolError>;

    async fn page_context(&self) -> Result<PageSnapshot, ToolError>;

    /// Capture the visible viewport as a data URL.
    async fn screenshot(&self) -> Result<String, ToolError>;
}

#[derive(Debug, Default)]
struct DryRunState {
    page: PageSnapshot,
    history: Vec<String>,
    scroll_y: i64,
}

/// An in-memory browser that accepts every action and records it.
///
/// Pages are synthesized from the URL: the title is the host name and the
/// body text mentions the URL, which is enough for a model to "read" it.
#[derive(Debug, Default)]
pub struct DryRunBrowser {
    state: Mutex<DryRunState>,
}

impl DryRunBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every action performed so far, in order.
    pub async fn history(&self) -> Vec<String> {
        self.state.lock().await.history.clone()
    }

    async fn record(&self, entry: String) {
        debug!(action = %entry, "dry-run browser");
        self.state.lock().await.history.push(entry);
    }
}

fn host_of(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, r)| r);
    rest.split(['/', '?', '#']).next().unwrap_or(rest)
}

#[async_trait]
impl BrowserBackend for DryRunBrowser {
    async fn navigate(&self, url: &str) -> Result<PageSnapshot, ToolError> {
        let host = host_of(url).trim_start_matches("www.").to_string();
        let page = PageSnapshot {
            url: url.to_string(),
            title: host.clone(),
            text: format!("{host}: simulated page loaded from {url}."),
            interactive_elements: vec!["a".into(), "input[type=search]".into(), "button".into()],
        };
        {
            let mut state = self.state.lock().await;
            state.page = page.clone();
            state.scroll_y = 0;
        }
        self.record(format!("navigate {url}")).await;
        Ok(page)
    }

    async fn click(&self, selector: &str) -> Result<String, ToolError> {
        self.record(format!("click {selector}")).await;
        Ok(format!("Clicked {selector}"))
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<String, ToolError> {
        self.record(format!("type {selector} ({} chars)", text.chars().count()))
            .await;
        Ok(format!("Typed {} characters into {selector}", text.chars().count()))
    }

    async fn press_key(&self, key: &str) -> Result<String, ToolError> {
        self.record(format!("press {key}")).await;
        Ok(format!("Pressed {key}"))
    }

    async fn scroll(&self, direction: ScrollDirection, amount: u32) -> Result<String, ToolError> {
        let y = {
            let mut state = self.state.lock().await;
            state.scroll_y = match direction {
                ScrollDirection::Up => (state.scroll_y - i64::from(amount)).max(0),
                ScrollDirection::Down => state.scroll_y + i64::from(amount),
                ScrollDirection::Top => 0,
                ScrollDirection::Bottom => 10_000,
            };
            state.scroll_y
        };
        self.record(format!("scroll {direction:?} {amount}")).await;
        Ok(format!("Scrolled to y={y}"))
    }

    async fn wait(&self, condition: WaitCondition) -> Result<String, ToolError> {
        match condition {
            WaitCondition::Duration(d) => {
                tokio::time::sleep(d).await;
                self.record(format!("wait {}ms", d.as_millis())).await;
                Ok(format!("Waited {}ms", d.as_millis()))
            }
            WaitCondition::Selector { selector, .. } => {
                self.record(format!("wait for {selector}")).await;
                Ok(format!("Element {selector} is present"))
            }
        }
    }

    async fn page_context(&self) -> Result<PageSnapshot, ToolError> {
        self.record("page_context".into()).await;
        let page = self.state.lock().await.page.clone();
        if page.url.is_empty() {
            return Ok(PageSnapshot {
                url: "about:blank".into(),
                title: "New Tab".into(),
                text: String::new(),
                interactive_elements: Vec::new(),
            });
        }
        Ok(page)
    }

    async fn screenshot(&self) -> Result<String, ToolError> {
        self.record("screenshot".into()).await;
        Ok("data:image/png;base64,".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_extraction() {
        assert_eq!(host_of("https://www.example.com/path?q=1"), "www.example.com");
        assert_eq!(host_of("example.com"), "example.com");
    }

    #[test]
    fn scroll_direction_parse() {
        assert_eq!("Down".parse::<ScrollDirection>().unwrap(), ScrollDirection::Down);
        assert!("sideways".parse::<ScrollDirection>().is_err());
    }

    #[tokio::test]
    async fn dry_run_tracks_current_page() {
        let browser = DryRunBrowser::new();
        assert_eq!(browser.page_context().await.unwrap().url, "about:blank");

        browser.navigate("https://example.com").await.unwrap();
        let page = browser.page_context().await.unwrap();
        assert_eq!(page.title, "example.com");
        assert!(page.text.contains("example.com"));

        let history = browser.history().await;
        assert_eq!(history[0], "page_context");
        assert_eq!(history[1], "navigate https://example.com");
    }

    #[tokio::test]
    async fn dry_run_scroll_clamps_at_top() {
        let browser = DryRunBrowser::new();
        let out = browser.scroll(ScrollDirection::Up, 500).await.unwrap();
        assert_eq!(out, "Scrolled to y=0");
    }
}
