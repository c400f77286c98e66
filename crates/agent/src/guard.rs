//! Stop-condition bookkeeping for the execution loop.

use std::collections::VecDeque;

/// Detects the model navigating to the same place over and over.
///
/// Keeps the last `window` navigation targets; a loop is reported when any
/// target occurs `threshold` times among them.
#[derive(Debug, Clone)]
pub struct NavigationLoopDetector {
    window: usize,
    threshold: usize,
    recent: VecDeque<String>,
}

impl NavigationLoopDetector {
    pub fn new(window: usize, threshold: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            threshold: threshold.clamp(2, window.max(2)),
            recent: VecDeque::with_capacity(window),
        }
    }

    /// Record a navigation. Returns true when it closes a loop.
    pub fn record(&mut self, target: &str) -> bool {
        let key = normalize(target);
        if self.recent.len() == self.window {
            self.recent.pop_front();
        }
        self.recent.push_back(key.clone());
        self.recent.iter().filter(|t| **t == key).count() >= self.threshold
    }
}

/// `https://Example.com/` and `example.com` count as the same target.
fn normalize(target: &str) -> String {
    let lower = target.trim().to_lowercase();
    let rest = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower);
    rest.trim_start_matches("www.").trim_end_matches('/').to_string()
}

/// Counts consecutive failed tool calls.
#[derive(Debug, Clone, Default)]
pub struct ErrorStreak {
    current: u32,
}

impl ErrorStreak {
    pub fn record(&mut self, success: bool) {
        if success {
            self.current = 0;
        } else {
            self.current += 1;
        }
    }

    pub fn current(&self) -> u32 {
        self.current
    }
}
